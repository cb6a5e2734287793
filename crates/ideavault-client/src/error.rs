//! Client error types.
//!
//! [`RemoteError`] is what a backend reports; [`VaultError`] is what session
//! and synchronizer operations return. Local precondition failures
//! (`NotAuthenticated`, `Validation`) never touch the network.

use ideavault_types::FieldError;
use thiserror::Error;

/// A failed backend request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct RemoteError {
    /// HTTP-style status, when the failure came from a response.
    pub status: Option<u16>,
    /// Backend-provided (or transport) message.
    pub message: String,
}

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status {
            Some(status) => write!(f, "{status}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl RemoteError {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self { status: Some(status), message: message.into() }
    }

    /// A failure with no response (connect error, timeout, decode error).
    pub fn transport(message: impl Into<String>) -> Self {
        Self { status: None, message: message.into() }
    }

    /// 401/403: credentials missing, expired, or insufficient.
    pub fn is_authorization(&self) -> bool {
        matches!(self.status, Some(401 | 403))
    }
}

/// Errors from session and synchronizer operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VaultError {
    #[error("authentication failed: {0}")]
    Authentication(String),
    #[error("registration failed: {0}")]
    Registration(String),
    #[error("you must be logged in")]
    NotAuthenticated,
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("remote error: {0}")]
    Remote(RemoteError),
    #[error("not authorized: {0}")]
    Authorization(RemoteError),
}

impl VaultError {
    /// Classify a CRUD failure: 401/403 become `Authorization`.
    pub fn from_remote(err: RemoteError) -> Self {
        if err.is_authorization() {
            Self::Authorization(err)
        } else {
            Self::Remote(err)
        }
    }

    /// Whether the caller should force re-authentication.
    pub fn requires_reauth(&self) -> bool {
        matches!(self, Self::Authorization(_))
    }

    /// Local precondition failures, reported without any network attempt.
    pub fn is_local(&self) -> bool {
        matches!(self, Self::NotAuthenticated | Self::Validation(_))
    }
}

impl From<FieldError> for VaultError {
    fn from(err: FieldError) -> Self {
        Self::Validation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_remote_classifies_status() {
        assert!(VaultError::from_remote(RemoteError::new(401, "expired")).requires_reauth());
        assert!(VaultError::from_remote(RemoteError::new(403, "forbidden")).requires_reauth());
        assert_eq!(
            VaultError::from_remote(RemoteError::new(404, "missing")),
            VaultError::Remote(RemoteError::new(404, "missing"))
        );
        assert!(!VaultError::from_remote(RemoteError::transport("refused")).requires_reauth());
    }

    #[test]
    fn test_display() {
        assert_eq!(RemoteError::new(400, "bad").to_string(), "400: bad");
        assert_eq!(RemoteError::transport("refused").to_string(), "refused");
        assert_eq!(
            VaultError::from(FieldError::EmptyTitle).to_string(),
            "invalid input: title cannot be empty"
        );
    }

    #[test]
    fn test_local_errors() {
        assert!(VaultError::NotAuthenticated.is_local());
        assert!(VaultError::Validation("x".into()).is_local());
        assert!(!VaultError::Remote(RemoteError::transport("x")).is_local());
    }
}

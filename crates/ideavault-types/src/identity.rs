//! The authenticated user record.
//!
//! The backend's user record carries more fields than this; unknown fields are
//! ignored on deserialize. The client never mutates an `Identity`.

use serde::{Deserialize, Serialize};

use crate::ids::UserId;

/// An authenticated user, as reported by the backend.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Backend-assigned user id. Ideas reference it as their owner.
    pub id: UserId,
    /// Login email.
    #[serde(default)]
    pub email: String,
    /// Whether the backend has confirmed the email address.
    #[serde(default)]
    pub verified: bool,
}

impl Identity {
    pub fn new(id: impl Into<UserId>, email: impl Into<String>) -> Self {
        Self { id: id.into(), email: email.into(), verified: false }
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.email, self.id.short())
    }
}

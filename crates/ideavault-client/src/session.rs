//! The current authenticated identity.
//!
//! [`SessionStore`] is constructed once and shared as `Arc<SessionStore>`.
//! Consumers either read [`current`](SessionStore::current) or hold a
//! [`watch`](SessionStore::watch) receiver; a new value is published only when
//! the identity actually changes, so re-announcing the same user is silent.

use std::sync::Arc;

use ideavault_types::Identity;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::backend::VaultBackend;
use crate::error::VaultError;
use crate::subscriptions::AuthEvent;

/// Holds at most one authenticated [`Identity`].
pub struct SessionStore {
    backend: Arc<dyn VaultBackend>,
    identity: watch::Sender<Option<Identity>>,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore").field("identity", &*self.identity.borrow()).finish()
    }
}

impl SessionStore {
    pub fn new(backend: Arc<dyn VaultBackend>) -> Self {
        Self { backend, identity: watch::Sender::new(None) }
    }

    /// The signed-in identity, if any.
    pub fn current(&self) -> Option<Identity> {
        self.identity.borrow().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.identity.borrow().is_some()
    }

    /// Observe identity transitions. The receiver starts at the current value.
    pub fn watch(&self) -> watch::Receiver<Option<Identity>> {
        self.identity.subscribe()
    }

    /// Authenticate with email and password.
    ///
    /// On failure the current identity is left as it was.
    pub async fn login(&self, email: &str, password: &str) -> Result<Identity, VaultError> {
        match self.backend.authenticate(email, password).await {
            Ok(identity) => {
                info!(user = %identity.id, "Signed in");
                self.set(Some(identity.clone()));
                Ok(identity)
            }
            Err(err) => {
                warn!(%err, "Sign-in failed");
                Err(VaultError::Authentication(err.message))
            }
        }
    }

    /// Create an account, then sign in with the same credentials.
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        password_confirm: &str,
    ) -> Result<Identity, VaultError> {
        if let Err(err) = self.backend.create_identity(email, password, password_confirm).await {
            warn!(%err, "Registration failed");
            return Err(VaultError::Registration(err.message));
        }
        info!(email, "Registered");
        self.login(email, password).await
    }

    /// Sign out locally. Always succeeds.
    pub fn logout(&self) {
        self.backend.invalidate_session();
        if self.set(None) {
            info!("Signed out");
        }
    }

    /// Drop the identity after the backend reported it invalid.
    pub fn invalidate(&self, reason: &str) {
        if self.set(None) {
            warn!(reason, "Session invalidated");
        }
    }

    /// Clear the identity whenever the backend publishes an invalidation.
    ///
    /// The task ends when the store is dropped or the backend's event
    /// channel closes.
    pub fn spawn_invalidation_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let mut events = self.backend.auth_events();
        let store = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(AuthEvent::Invalidated { reason }) => {
                        let Some(store) = store.upgrade() else { break };
                        store.invalidate(&reason);
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Auth event listener lagged by {n} events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Publish `next` if it differs from the current value.
    fn set(&self, next: Option<Identity>) -> bool {
        self.identity.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{BackendCall, MemoryBackend};

    fn store() -> (Arc<MemoryBackend>, Arc<SessionStore>) {
        let backend = Arc::new(MemoryBackend::new());
        backend.add_user("amy@example.com", "password123");
        let store = Arc::new(SessionStore::new(backend.clone()));
        (backend, store)
    }

    #[tokio::test]
    async fn test_login_sets_identity() {
        let (_backend, store) = store();
        let mut rx = store.watch();

        let identity = store.login("amy@example.com", "password123").await.unwrap();
        assert_eq!(store.current(), Some(identity.clone()));
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), Some(identity));
    }

    #[tokio::test]
    async fn test_login_failure_leaves_identity_unset() {
        let (_backend, store) = store();
        let err = store.login("amy@example.com", "wrong").await.unwrap_err();
        assert_eq!(err, VaultError::Authentication("Failed to authenticate.".into()));
        assert!(!store.is_authenticated());
    }

    #[tokio::test]
    async fn test_same_identity_is_not_republished() {
        let (_backend, store) = store();
        store.login("amy@example.com", "password123").await.unwrap();
        let mut rx = store.watch();
        rx.borrow_and_update();

        store.login("amy@example.com", "password123").await.unwrap();
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_register_then_login() {
        let (backend, store) = store();
        let identity = store.register("bob@example.com", "password123", "password123").await.unwrap();
        assert_eq!(identity.email, "bob@example.com");
        assert_eq!(store.current(), Some(identity));
        assert_eq!(backend.calls(BackendCall::Authenticate), 1);
    }

    #[tokio::test]
    async fn test_register_failure_does_not_login() {
        let (backend, store) = store();
        let err = store.register("bob@example.com", "password123", "different1").await.unwrap_err();
        assert!(matches!(err, VaultError::Registration(_)));
        assert_eq!(backend.calls(BackendCall::Authenticate), 0);
        assert!(!store.is_authenticated());
    }

    #[tokio::test]
    async fn test_logout_invalidates_backend_session() {
        let (backend, store) = store();
        store.login("amy@example.com", "password123").await.unwrap();
        store.logout();
        assert!(store.current().is_none());
        assert_eq!(backend.calls(BackendCall::InvalidateSession), 1);
        assert_eq!(backend.signed_in(), None);

        // Already signed out: still fine.
        store.logout();
    }

    #[tokio::test]
    async fn test_out_of_band_invalidation_clears_identity() {
        let (backend, store) = store();
        let _listener = store.spawn_invalidation_listener();
        store.login("amy@example.com", "password123").await.unwrap();
        let mut rx = store.watch();

        backend.revoke_session("token revoked");
        rx.wait_for(Option::is_none).await.unwrap();
        assert!(!store.is_authenticated());
    }
}

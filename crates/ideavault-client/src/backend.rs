//! The remote collaborator contract.
//!
//! Everything the client knows about persistence, authentication, and live
//! change delivery goes through [`VaultBackend`]. Two implementations ship
//! with the crate: [`PocketBaseBackend`](crate::PocketBaseBackend) over HTTP
//! and [`MemoryBackend`](crate::MemoryBackend) in-process.

use async_trait::async_trait;
use ideavault_types::{Idea, IdeaFields, IdeaId, Identity, UserId};
use tokio::sync::broadcast;

use crate::error::RemoteError;
use crate::subscriptions::{AuthEvent, Subscription};

/// Result type for backend calls.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Authentication, record CRUD, and live change delivery.
///
/// Implementations keep whatever credential state their transport needs
/// (a bearer token, say) after a successful [`authenticate`](Self::authenticate).
#[async_trait]
pub trait VaultBackend: Send + Sync {
    /// Exchange email/password for an identity and keep the credential.
    async fn authenticate(&self, email: &str, password: &str) -> RemoteResult<Identity>;

    /// Create a new user. Does not authenticate.
    async fn create_identity(
        &self,
        email: &str,
        password: &str,
        password_confirm: &str,
    ) -> RemoteResult<Identity>;

    /// Drop stored credentials. Fire-and-forget.
    fn invalidate_session(&self);

    /// Every record owned by `owner`, newest first.
    async fn list_owned(&self, owner: &UserId) -> RemoteResult<Vec<Idea>>;

    /// Create a record owned by `owner`.
    async fn create_record(&self, fields: &IdeaFields, owner: &UserId) -> RemoteResult<Idea>;

    /// Replace title, description, and tags of an existing record.
    async fn update_record(&self, id: &IdeaId, fields: &IdeaFields) -> RemoteResult<Idea>;

    async fn delete_record(&self, id: &IdeaId) -> RemoteResult<()>;

    /// Open a live change stream for records visible to `owner`.
    ///
    /// The stream may be broader than asked for; consumers filter by owner.
    async fn subscribe(&self, owner: &UserId) -> RemoteResult<Subscription>;

    /// Out-of-band session notices (token expiry detected by the transport).
    fn auth_events(&self) -> broadcast::Receiver<AuthEvent>;
}

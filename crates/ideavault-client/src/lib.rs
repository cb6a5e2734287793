//! IdeaVault client library
//!
//! Keeps a local, owner-scoped list of ideas consistent with a remote
//! collection. A [`SessionStore`] holds the signed-in identity; an
//! [`IdeaSynchronizer`] follows it, fetching the owner's records and applying
//! live change events. The backend is abstracted behind [`VaultBackend`], with
//! a PocketBase implementation over HTTP and an in-memory one for tests.

pub mod backend;
pub mod components;
pub mod config;
pub mod constants;
pub mod error;
pub mod memory;
pub mod pocketbase;
pub mod session;
pub mod sse;
pub mod subscriptions;
pub mod sync;
pub mod synchronizer;

use std::sync::Arc;

pub use backend::{RemoteResult, VaultBackend};
pub use components::{
    EMPTY_FIELDS_MESSAGE, EditorMode, IdeaActions, IdeaDraft, IdeaEditor, IdeaForm, SessionBanner,
};
pub use config::{ClientConfig, ConfigError};
pub use error::{RemoteError, VaultError};
pub use memory::{BackendCall, MemoryBackend};
pub use pocketbase::PocketBaseBackend;
pub use session::SessionStore;
pub use subscriptions::{AuthEvent, ChangeAction, ChangeEvent, Subscription, SyncGeneration};
pub use sync::{IdeaSync, InsertOrder, SkipReason, SyncFailure, SyncOp, SyncPhase, SyncResult, SyncSnapshot};
pub use synchronizer::{AppliedChange, IdeaSynchronizer};

/// Wire a session store and synchronizer to `backend`.
///
/// Starts the invalidation listener and the synchronizer's driver, so it
/// must be called within a tokio runtime.
pub fn start_client(
    backend: Arc<dyn VaultBackend>,
    insert_order: InsertOrder,
) -> (Arc<SessionStore>, IdeaSynchronizer) {
    let session = Arc::new(SessionStore::new(backend.clone()));
    session.spawn_invalidation_listener();
    let synchronizer = IdeaSynchronizer::spawn(backend, session.clone(), insert_order);
    (session, synchronizer)
}

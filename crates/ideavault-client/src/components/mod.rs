//! Presentation state for the idea list, creation form, and session banner.
//!
//! Components hold only local UI state (modes, drafts, the last error) and
//! forward intents through [`IdeaActions`]. They never touch the list
//! directly: changes arrive through the synchronizer's live events.

mod banner;
mod editor;
mod form;

pub use banner::SessionBanner;
pub use editor::{EditorMode, IdeaDraft, IdeaEditor};
pub use form::{EMPTY_FIELDS_MESSAGE, IdeaForm};

use async_trait::async_trait;
use ideavault_types::{Idea, IdeaFields, IdeaId};

use crate::error::VaultError;

/// Mutations a component may request.
///
/// Implemented by [`IdeaSynchronizer`](crate::IdeaSynchronizer); tests use a
/// recording stub.
#[async_trait]
pub trait IdeaActions: Send + Sync {
    async fn add_idea(&self, fields: IdeaFields) -> Result<Idea, VaultError>;
    async fn update_idea(&self, id: &IdeaId, fields: IdeaFields) -> Result<Idea, VaultError>;
    async fn delete_idea(&self, id: &IdeaId) -> Result<(), VaultError>;
}

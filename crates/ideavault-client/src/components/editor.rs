//! A single list item with an inline edit mode.

use ideavault_types::{Idea, IdeaFields, format_tags};
use tracing::debug;

use super::IdeaActions;
use crate::error::VaultError;

/// Editable text of an idea. Tags are held as the comma-separated line the
/// user types.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdeaDraft {
    pub title: String,
    pub description: String,
    pub tags: String,
}

impl IdeaDraft {
    pub fn from_idea(idea: &Idea) -> Self {
        Self {
            title: idea.title.clone(),
            description: idea.description.clone(),
            tags: format_tags(&idea.tags),
        }
    }

    /// Parse into a request payload; tags become trimmed, non-empty tokens.
    pub fn to_fields(&self) -> IdeaFields {
        IdeaFields::from_text(&self.title, &self.description, &self.tags)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum EditorMode {
    #[default]
    Viewing,
    Editing(IdeaDraft),
}

/// One idea as shown in the list.
#[derive(Debug, Clone)]
pub struct IdeaEditor {
    idea: Idea,
    mode: EditorMode,
}

impl IdeaEditor {
    pub fn new(idea: Idea) -> Self {
        Self { idea, mode: EditorMode::Viewing }
    }

    pub fn idea(&self) -> &Idea {
        &self.idea
    }

    pub fn mode(&self) -> &EditorMode {
        &self.mode
    }

    pub fn is_editing(&self) -> bool {
        matches!(self.mode, EditorMode::Editing(_))
    }

    pub fn draft(&self) -> Option<&IdeaDraft> {
        match &self.mode {
            EditorMode::Editing(draft) => Some(draft),
            EditorMode::Viewing => None,
        }
    }

    pub fn draft_mut(&mut self) -> Option<&mut IdeaDraft> {
        match &mut self.mode {
            EditorMode::Editing(draft) => Some(draft),
            EditorMode::Viewing => None,
        }
    }

    /// Tags as shown in viewing mode.
    pub fn tags_text(&self) -> String {
        format_tags(&self.idea.tags)
    }

    /// Show a newer version of the same record. An open draft is kept.
    pub fn refresh(&mut self, idea: Idea) {
        self.idea = idea;
    }

    /// Enter editing mode with a draft seeded from the record. No-op if
    /// already editing.
    pub fn begin_edit(&mut self) {
        if !self.is_editing() {
            self.mode = EditorMode::Editing(IdeaDraft::from_idea(&self.idea));
        }
    }

    /// Discard the draft. Nothing is sent.
    pub fn cancel(&mut self) {
        self.mode = EditorMode::Viewing;
    }

    /// Leave editing mode, returning the payload to send.
    pub fn commit(&mut self) -> Option<IdeaFields> {
        match std::mem::take(&mut self.mode) {
            EditorMode::Editing(draft) => Some(draft.to_fields()),
            EditorMode::Viewing => None,
        }
    }

    /// Send the draft as an update and return to viewing mode.
    ///
    /// The editor returns to viewing whatever the outcome; the list picks up
    /// the change from the updated-event. `Ok(None)` if not editing.
    pub async fn save(&mut self, actions: &dyn IdeaActions) -> Result<Option<Idea>, VaultError> {
        let Some(fields) = self.commit() else {
            return Ok(None);
        };
        debug!(id = %self.idea.id, "Saving draft");
        actions.update_idea(&self.idea.id, fields).await.map(Some)
    }

    pub async fn delete(&self, actions: &dyn IdeaActions) -> Result<(), VaultError> {
        actions.delete_idea(&self.idea.id).await
    }
}

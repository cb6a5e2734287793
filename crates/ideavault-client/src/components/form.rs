//! The "add new idea" form.

use ideavault_types::{Idea, IdeaFields};
use tracing::debug;

use super::IdeaActions;
use super::editor::IdeaDraft;
use crate::error::VaultError;

/// Shown when a submit is rejected locally.
pub const EMPTY_FIELDS_MESSAGE: &str = "Title and Description cannot be empty.";

/// Draft fields for a new idea.
///
/// An accepted submit clears the draft whatever the outcome. The cleared
/// draft stays available through [`last_submitted`](Self::last_submitted) so
/// a failed submit can be restored.
#[derive(Debug, Clone, Default)]
pub struct IdeaForm {
    pub draft: IdeaDraft,
    error: Option<String>,
    last_submitted: Option<IdeaDraft>,
    submitting: bool,
}

impl IdeaForm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Message from the last rejected or failed submit.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn last_submitted(&self) -> Option<&IdeaDraft> {
        self.last_submitted.as_ref()
    }

    pub fn is_submitting(&self) -> bool {
        self.submitting
    }

    /// Validate the draft and take it for sending.
    ///
    /// Rejects a blank title or description without clearing anything.
    pub fn take_submission(&mut self) -> Result<IdeaFields, VaultError> {
        self.error = None;
        let fields = self.draft.to_fields();
        if fields.validate().is_err() {
            self.error = Some(EMPTY_FIELDS_MESSAGE.to_string());
            return Err(VaultError::Validation(EMPTY_FIELDS_MESSAGE.to_string()));
        }
        self.last_submitted = Some(std::mem::take(&mut self.draft));
        Ok(fields)
    }

    /// Submit the draft as a new idea.
    pub async fn submit(&mut self, actions: &dyn IdeaActions) -> Result<Idea, VaultError> {
        let fields = self.take_submission()?;
        debug!(title = %fields.title, "Submitting new idea");
        self.submitting = true;
        let result = actions.add_idea(fields).await;
        self.submitting = false;
        if let Err(err) = &result {
            self.error = Some(err.to_string());
        }
        result
    }

    /// Put the last submitted draft back. Returns false if there is none.
    pub fn restore_last(&mut self) -> bool {
        match self.last_submitted.take() {
            Some(draft) => {
                self.draft = draft;
                self.error = None;
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.draft = IdeaDraft::default();
        self.error = None;
    }
}

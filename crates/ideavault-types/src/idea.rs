//! Idea records and their editable payload.
//!
//! An [`Idea`] is the backend's record; [`IdeaFields`] is the part the client
//! is allowed to write. The owner and creation time are assigned on create and
//! never change afterwards.

use serde::{Deserialize, Deserializer, Serialize};

use crate::ids::{IdeaId, UserId};
use crate::tags::parse_tags;
use crate::timestamp::Timestamp;

/// A stored idea.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Idea {
    pub id: IdeaId,
    pub title: String,
    pub description: String,
    /// Ordered tags. The backend stores them in a JSON field that may be null.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub tags: Vec<String>,
    /// Owning user (`user` relation field on the wire).
    #[serde(rename = "user")]
    pub owner: UserId,
    /// Creation time, assigned by the backend.
    pub created: Timestamp,
}

impl Idea {
    /// Assemble a record from its parts.
    pub fn new(
        id: impl Into<IdeaId>,
        owner: impl Into<UserId>,
        fields: IdeaFields,
        created: Timestamp,
    ) -> Self {
        Self {
            id: id.into(),
            title: fields.title,
            description: fields.description,
            tags: fields.tags,
            owner: owner.into(),
            created,
        }
    }

    /// The editable part of this record.
    pub fn fields(&self) -> IdeaFields {
        IdeaFields {
            title: self.title.clone(),
            description: self.description.clone(),
            tags: self.tags.clone(),
        }
    }

    /// Replace title, description, and tags; id, owner and created are kept.
    pub fn apply_fields(&mut self, fields: IdeaFields) {
        self.title = fields.title;
        self.description = fields.description;
        self.tags = fields.tags;
    }

    /// Whether this record belongs to `owner`.
    pub fn is_owned_by(&self, owner: &UserId) -> bool {
        &self.owner == owner
    }
}

fn null_as_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Why an [`IdeaFields`] payload was rejected before sending.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FieldError {
    #[error("title cannot be empty")]
    EmptyTitle,
    #[error("description cannot be empty")]
    EmptyDescription,
}

/// Title, description, and tags: the payload of create and update requests.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdeaFields {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl IdeaFields {
    pub fn new(title: impl Into<String>, description: impl Into<String>, tags: Vec<String>) -> Self {
        Self { title: title.into(), description: description.into(), tags }
    }

    /// Build from form text, parsing the comma-separated tag line.
    pub fn from_text(title: &str, description: &str, tags: &str) -> Self {
        Self::new(title, description, parse_tags(tags))
    }

    /// Reject a blank title or description.
    pub fn validate(&self) -> Result<(), FieldError> {
        if self.title.trim().is_empty() {
            return Err(FieldError::EmptyTitle);
        }
        if self.description.trim().is_empty() {
            return Err(FieldError::EmptyDescription);
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn created() -> Timestamp {
        Timestamp::parse("2024-01-15 10:30:00.123Z").unwrap()
    }

    #[test]
    fn test_deserialize_backend_record() {
        let json = r#"{
            "id": "i1",
            "collectionId": "pbc_123",
            "collectionName": "ideas",
            "title": "X",
            "description": "Y",
            "tags": ["a", "b"],
            "user": "u1",
            "created": "2024-01-15 10:30:00.123Z",
            "updated": "2024-01-15 10:30:00.123Z"
        }"#;
        let idea: Idea = serde_json::from_str(json).unwrap();
        assert_eq!(idea.id.as_str(), "i1");
        assert_eq!(idea.tags, vec!["a", "b"]);
        assert_eq!(idea.owner.as_str(), "u1");
        assert_eq!(idea.created, created());
    }

    #[test]
    fn test_null_tags_become_empty() {
        let json = r#"{"id":"i1","title":"X","description":"Y","tags":null,"user":"u1","created":"2024-01-15 10:30:00.123Z"}"#;
        let idea: Idea = serde_json::from_str(json).unwrap();
        assert!(idea.tags.is_empty());
    }

    #[test]
    fn test_serialize_uses_user_field() {
        let idea = Idea::new("i1", "u1", IdeaFields::from_text("X", "Y", ""), created());
        let value = serde_json::to_value(&idea).unwrap();
        assert_eq!(value["user"], "u1");
        assert!(value.get("owner").is_none());
    }

    #[test]
    fn test_apply_fields_keeps_identity() {
        let mut idea = Idea::new("i1", "u1", IdeaFields::from_text("X", "Y", "a"), created());
        idea.apply_fields(IdeaFields::from_text("Z", "W", "b, c"));
        assert_eq!(idea.id.as_str(), "i1");
        assert_eq!(idea.owner.as_str(), "u1");
        assert_eq!(idea.title, "Z");
        assert_eq!(idea.tags, vec!["b", "c"]);
        assert_eq!(idea.created, created());
    }

    #[test]
    fn test_validate() {
        assert_eq!(IdeaFields::from_text("X", "Y", "").validate(), Ok(()));
        assert_eq!(
            IdeaFields::from_text("  ", "Y", "").validate(),
            Err(FieldError::EmptyTitle)
        );
        assert_eq!(
            IdeaFields::from_text("X", "", "").validate(),
            Err(FieldError::EmptyDescription)
        );
    }
}

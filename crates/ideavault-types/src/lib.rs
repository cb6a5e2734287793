//! Shared identity and record types for IdeaVault.
//!
//! A pure leaf crate: typed ids, the authenticated [`Identity`], the [`Idea`]
//! record with its editable [`IdeaFields`], backend [`Timestamp`]s, and tag
//! text conversion. No I/O, no async.
//!
//! # Relationships
//!
//! ```text
//! Identity (UserId) ← signed-in user
//!     └── owns Idea (IdeaId), stamped on create via Idea.owner
//!                 └── title, description, tags  = IdeaFields (editable)
//!                 └── created                   = Timestamp (backend-assigned)
//! ```

pub mod ids;
pub mod identity;
pub mod idea;
pub mod tags;
pub mod timestamp;

pub use ids::{IdeaId, UserId};
pub use identity::Identity;
pub use idea::{FieldError, Idea, IdeaFields};
pub use tags::{format_tags, parse_tags};
pub use timestamp::{Timestamp, TimestampError};

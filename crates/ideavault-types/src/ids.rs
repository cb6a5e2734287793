//! Typed identifiers for users and idea records.
//!
//! Both wrap the opaque string the backend assigns (PocketBase uses 15-char
//! lowercase alphanumerics). They're never parsed or generated client-side,
//! only compared and echoed back. The `short()` form is for human-facing UI.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A user (identity) identifier assigned by the backend.
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

/// An idea record identifier assigned by the backend.
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdeaId(String);

// ── Shared behavior ─────────────────────────────────────────────────────────

macro_rules! impl_record_id {
    ($T:ident, $name:literal) => {
        impl $T {
            /// Wrap a backend-assigned id.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// The raw id string.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// First 6 characters, for human display only.
            pub fn short(&self) -> &str {
                match self.0.char_indices().nth(6) {
                    Some((idx, _)) => &self.0[..idx],
                    None => &self.0,
                }
            }

            /// Whether the id is the empty string (never valid on the wire).
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl From<&str> for $T {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $T {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl AsRef<str> for $T {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl fmt::Debug for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", $name, self.0)
            }
        }
    };
}

impl_record_id!(UserId, "UserId");
impl_record_id!(IdeaId, "IdeaId");

// ============================================================================
// Tests
// ============================================================================

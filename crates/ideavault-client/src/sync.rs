//! Idea-list sync state, independent of transport and UI.
//!
//! [`IdeaSync`] owns the local projection of one user's ideas and makes every
//! decision about it: when a fetch result may replace the list, whether a
//! change event applies, where a created record goes. It never awaits, so the
//! async driver ([`IdeaSynchronizer`](crate::IdeaSynchronizer)) can call it
//! under a short lock and everything here is unit-testable.
//!
//! # State Machine
//!
//! ```text
//! +-----------+  rescope(Some)   +-----------+  apply_fetch(Ok)  +-----------+
//! | Unscoped  | ---------------> |  Loading  | ----------------> |  Synced   |
//! | list = [] |                  | events    |                   | events    |
//! +-----------+ <--------------- | buffered  | <---------------- | applied   |
//!       ^        rescope(None)   +-----------+   begin_fetch()   +-----------+
//!       |                              |                            |     ^
//!       |                 apply_fetch(Err)                 failure|     | success
//!       |                              v                            v     |
//!       |                        +-----------+                   +-----------+
//!       +----------------------- |   Error   | <---------------- |   Error   |
//!             rescope(None)      | (no list) |                   | (list kept)|
//!                                +-----------+                   +-----------+
//! ```
//!
//! Every rescope bumps the [`SyncGeneration`]. Fetch tickets and live events
//! carry the generation they were issued under and are dropped on mismatch,
//! so nothing from a previous identity can reach the current list.

use ideavault_types::{Idea, IdeaId, Identity, UserId};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::constants::MAX_PENDING_EVENTS;
use crate::error::VaultError;
use crate::subscriptions::{ChangeAction, ChangeEvent, SyncGeneration};

/// Where a created-event's record is placed in the list.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsertOrder {
    /// Always at the front, regardless of timestamp.
    #[default]
    Prepend,
    /// Before the first record created earlier, keeping newest-first order.
    ByCreated,
}

/// Lifecycle phase of the local list.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum SyncPhase {
    /// No identity; list empty.
    #[default]
    Unscoped,
    /// Full fetch in flight.
    Loading,
    /// List populated; live events applied directly.
    Synced,
    /// Last fetch or mutation failed; list holds last-known-good contents.
    Error,
}

/// The operation a recorded failure came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
pub enum SyncOp {
    #[strum(serialize = "fetch ideas")]
    Fetch,
    #[strum(serialize = "subscribe to changes")]
    Subscribe,
    #[strum(serialize = "add idea")]
    Add,
    #[strum(serialize = "update idea")]
    Update,
    #[strum(serialize = "delete idea")]
    Delete,
}

/// A failure kept in state for display.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncFailure {
    pub op: SyncOp,
    pub error: VaultError,
}

impl std::fmt::Display for SyncFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Failed to {}: {}", self.op, self.error)
    }
}

/// Result of feeding a fetch result or change event into [`IdeaSync`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncResult {
    /// The list was replaced by a full fetch.
    FullSync { count: usize },
    /// A record was inserted (or, if already present, replaced) at `index`.
    Created { index: usize },
    /// A record was replaced in place.
    Updated { index: usize },
    /// A record was removed from `index`.
    Deleted { index: usize },
    /// Held until the scope's first fetch lands.
    Buffered,
    /// Nothing changed (see reason).
    Skipped { reason: SkipReason },
}

/// Reason a fetch result or event was not applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// No identity is in scope.
    Unscoped,
    /// Issued under a previous identity scope.
    StaleGeneration { current: SyncGeneration, got: SyncGeneration },
    /// The record belongs to another user.
    OwnerMismatch { expected: UserId, got: UserId },
    /// Update or delete for a record not in the list.
    UnknownRecord(IdeaId),
}

/// Handle for one in-flight full fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTicket {
    pub owner: UserId,
    pub generation: SyncGeneration,
}

/// Point-in-time copy of sync state for rendering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSnapshot {
    pub owner: Option<UserId>,
    pub phase: SyncPhase,
    pub ideas: Vec<Idea>,
    pub failure: Option<SyncFailure>,
    pub version: u64,
}

impl SyncSnapshot {
    /// User-facing error line, if any.
    pub fn error_message(&self) -> Option<String> {
        self.failure.as_ref().map(ToString::to_string)
    }
}

/// Local list state for a single owner.
#[derive(Debug, Clone, Default)]
pub struct IdeaSync {
    /// Owner the list is scoped to (None = signed out).
    scope: Option<UserId>,
    /// Bumped on every scope change.
    generation: SyncGeneration,
    ideas: Vec<Idea>,
    phase: SyncPhase,
    failure: Option<SyncFailure>,
    /// Whether a full fetch has landed for the current scope.
    loaded: bool,
    /// Full fetches issued for the current scope and not yet applied.
    fetching: usize,
    /// Owned events to replay over the next fetch result. Before the first
    /// load they are only buffered; during a refresh they are applied too.
    pending: Vec<ChangeEvent>,
    insert_order: InsertOrder,
    /// Version counter for change detection (bumped on every state change).
    version: u64,
}

impl IdeaSync {
    pub fn new(insert_order: InsertOrder) -> Self {
        Self { insert_order, ..Self::default() }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn ideas(&self) -> &[Idea] {
        &self.ideas
    }

    pub fn get(&self, id: &IdeaId) -> Option<&Idea> {
        self.ideas.iter().find(|idea| &idea.id == id)
    }

    pub fn owner(&self) -> Option<&UserId> {
        self.scope.as_ref()
    }

    pub fn generation(&self) -> SyncGeneration {
        self.generation
    }

    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    pub fn failure(&self) -> Option<&SyncFailure> {
        self.failure.as_ref()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn is_fetching(&self) -> bool {
        self.fetching > 0
    }

    /// Scoped, never loaded, and nothing in flight that would load it.
    pub fn needs_fetch(&self) -> bool {
        self.scope.is_some() && !self.is_loaded() && !self.is_fetching()
    }

    #[cfg(test)]
    fn pending_events_count(&self) -> usize {
        self.pending.len()
    }

    /// The current generation, if the list is scoped to `owner`.
    pub fn generation_for(&self, owner: &UserId) -> Option<SyncGeneration> {
        (self.scope.as_ref() == Some(owner)).then_some(self.generation)
    }

    pub fn snapshot(&self) -> SyncSnapshot {
        SyncSnapshot {
            owner: self.scope.clone(),
            phase: self.phase,
            ideas: self.ideas.clone(),
            failure: self.failure.clone(),
            version: self.version,
        }
    }

    // =========================================================================
    // Scope
    // =========================================================================

    /// Point the list at a new identity (or none).
    ///
    /// Returns the new generation when the owner actually changed; `None`
    /// means the same user was re-announced and nothing was reset.
    pub fn rescope(&mut self, identity: Option<&Identity>) -> Option<SyncGeneration> {
        let next = identity.map(|identity| identity.id.clone());
        if next == self.scope {
            return None;
        }

        self.generation = self.generation.next();
        info!(
            from = ?self.scope,
            to = ?next,
            generation = %self.generation,
            "Rescoping idea list"
        );

        self.scope = next;
        self.ideas.clear();
        self.pending.clear();
        self.failure = None;
        self.loaded = false;
        self.fetching = 0;
        self.phase = if self.scope.is_some() { SyncPhase::Loading } else { SyncPhase::Unscoped };
        self.bump();
        Some(self.generation)
    }

    // =========================================================================
    // Full fetch
    // =========================================================================

    /// Start a full fetch for the current scope.
    ///
    /// Every ticket handed out must come back through [`apply_fetch`](Self::apply_fetch),
    /// or events keep being journaled until the next rescope.
    pub fn begin_fetch(&mut self) -> Option<FetchTicket> {
        let owner = self.scope.clone()?;
        self.fetching += 1;
        if self.phase != SyncPhase::Loading {
            self.phase = SyncPhase::Loading;
            self.bump();
        }
        Some(FetchTicket { owner, generation: self.generation })
    }

    /// Apply a full fetch result.
    ///
    /// A result for a superseded scope is dropped. On success the list is
    /// replaced wholesale and events received since any fetch began are
    /// replayed on top. On failure the list is kept and the error recorded
    /// and handed back.
    pub fn apply_fetch(
        &mut self,
        ticket: &FetchTicket,
        result: Result<Vec<Idea>, VaultError>,
    ) -> Result<SyncResult, VaultError> {
        if let Some(reason) = self.stale(ticket.generation) {
            debug!(owner = %ticket.owner, ?reason, "Dropping fetch result from superseded scope");
            return Ok(SyncResult::Skipped { reason });
        }
        self.fetching = self.fetching.saturating_sub(1);

        match result {
            Ok(records) => {
                let total = records.len();
                let owned: Vec<Idea> =
                    records.into_iter().filter(|idea| idea.is_owned_by(&ticket.owner)).collect();
                if owned.len() != total {
                    warn!(
                        owner = %ticket.owner,
                        dropped = total - owned.len(),
                        "Fetch returned records owned by other users"
                    );
                }

                let count = owned.len();
                self.ideas = owned;
                self.loaded = true;
                self.phase = SyncPhase::Synced;
                self.failure = None;
                self.replay_pending();
                self.bump();

                info!(owner = %ticket.owner, count = self.ideas.len(), "Full sync complete");
                Ok(SyncResult::FullSync { count })
            }
            Err(error) => {
                if self.loaded && !self.is_fetching() {
                    // Already applied to the list; nothing left to replay onto.
                    self.pending.clear();
                }
                self.fail(SyncOp::Fetch, error.clone());
                Err(error)
            }
        }
    }

    // =========================================================================
    // Live events
    // =========================================================================

    /// Apply a change event received under `generation`.
    pub fn apply_event(&mut self, generation: SyncGeneration, event: &ChangeEvent) -> SyncResult {
        let Some(owner) = &self.scope else {
            return SyncResult::Skipped { reason: SkipReason::Unscoped };
        };
        if let Some(reason) = self.stale(generation) {
            trace!(?reason, "Dropping change event from superseded scope");
            return SyncResult::Skipped { reason };
        }
        if !event.record.is_owned_by(owner) {
            trace!(record = %event.record.id, "Ignoring change for another owner");
            return SyncResult::Skipped {
                reason: SkipReason::OwnerMismatch {
                    expected: owner.clone(),
                    got: event.record.owner.clone(),
                },
            };
        }

        if !self.loaded {
            self.buffer(event.clone());
            return SyncResult::Buffered;
        }
        if self.is_fetching() {
            // An in-flight snapshot may predate this event.
            self.buffer(event.clone());
        }

        let result = self.apply_owned(event.clone());
        if !matches!(result, SyncResult::Skipped { .. }) {
            self.bump();
        }
        result
    }

    // =========================================================================
    // Failures from mutations
    // =========================================================================

    /// Record a failure issued under `generation`. Returns whether it was kept.
    pub fn record_failure(
        &mut self,
        generation: SyncGeneration,
        op: SyncOp,
        error: VaultError,
    ) -> bool {
        if self.scope.is_none() || self.stale(generation).is_some() {
            return false;
        }
        self.fail(op, error);
        true
    }

    /// Clear a recorded failure after a later operation succeeded.
    ///
    /// A scope whose fetch failed and has none in flight stays in `Error`:
    /// only a landed fetch can vouch for the list.
    pub fn clear_failure(&mut self, generation: SyncGeneration) {
        if self.failure.is_none() || self.stale(generation).is_some() || self.needs_fetch() {
            return;
        }
        self.failure = None;
        if self.phase == SyncPhase::Error {
            self.phase = if self.loaded { SyncPhase::Synced } else { SyncPhase::Loading };
        }
        self.bump();
    }

    // =========================================================================
    // Internal helpers
    // =========================================================================

    fn stale(&self, generation: SyncGeneration) -> Option<SkipReason> {
        (generation != self.generation).then_some(SkipReason::StaleGeneration {
            current: self.generation,
            got: generation,
        })
    }

    fn bump(&mut self) {
        self.version = self.version.wrapping_add(1);
    }

    fn fail(&mut self, op: SyncOp, error: VaultError) {
        warn!(%op, %error, "Sync operation failed");
        self.phase = SyncPhase::Error;
        self.failure = Some(SyncFailure { op, error });
        self.bump();
    }

    fn buffer(&mut self, event: ChangeEvent) {
        if self.pending.len() >= MAX_PENDING_EVENTS {
            let drop_count = self.pending.len() - MAX_PENDING_EVENTS + 1;
            warn!(
                "Pending events buffer full ({}/{}), dropping {} oldest entries",
                self.pending.len(),
                MAX_PENDING_EVENTS,
                drop_count
            );
            self.pending.drain(..drop_count);
        }
        trace!(record = %event.record.id, action = %event.action, "Holding event until fetch lands");
        self.pending.push(event);
    }

    fn replay_pending(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        // Later fetches still in flight need the journal too.
        let events = if self.is_fetching() {
            self.pending.clone()
        } else {
            std::mem::take(&mut self.pending)
        };
        debug!("Replaying {} held events", events.len());
        for event in events {
            self.apply_owned(event);
        }
    }

    /// Apply an event already known to be current and owned.
    fn apply_owned(&mut self, event: ChangeEvent) -> SyncResult {
        let position = self.ideas.iter().position(|idea| idea.id == event.record.id);
        match (event.action, position) {
            (ChangeAction::Created, Some(index)) => {
                // Duplicate delivery (e.g. replay over a fetch that already
                // contains the record): replace, don't insert twice.
                self.ideas[index] = event.record;
                SyncResult::Created { index }
            }
            (ChangeAction::Created, None) => {
                let index = self.insert_index(&event.record);
                self.ideas.insert(index, event.record);
                SyncResult::Created { index }
            }
            (ChangeAction::Updated, Some(index)) => {
                self.ideas[index] = event.record;
                SyncResult::Updated { index }
            }
            (ChangeAction::Deleted, Some(index)) => {
                self.ideas.remove(index);
                SyncResult::Deleted { index }
            }
            (ChangeAction::Updated | ChangeAction::Deleted, None) => {
                trace!(record = %event.record.id, action = %event.action, "No local entry");
                SyncResult::Skipped { reason: SkipReason::UnknownRecord(event.record.id) }
            }
        }
    }

    fn insert_index(&self, record: &Idea) -> usize {
        match self.insert_order {
            InsertOrder::Prepend => 0,
            InsertOrder::ByCreated => self
                .ideas
                .iter()
                .position(|idea| idea.created < record.created)
                .unwrap_or(self.ideas.len()),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

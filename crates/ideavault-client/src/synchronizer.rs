//! Async driver keeping an [`IdeaSync`] consistent with the backend.
//!
//! [`IdeaSynchronizer`] is a cloneable handle. Spawning one starts a driver
//! task that follows the [`SessionStore`]: on every owner change it tears down
//! the previous subscription, rescopes the state, subscribes for the new
//! owner, and issues a full fetch. A live stream that ends on its own is
//! reported as a failure and reopened with backoff, followed by a refetch.
//!
//! ```text
//!   SessionStore ──watch──▶ driver ──rescope──▶ ┌──────────────────────┐
//!                              │                │ Mutex<IdeaSync>      │
//!                              ├─ scope task ──▶│  apply_event(gen, e) │──▶ watch<u64>
//!                              │  (subscribe,   │  apply_fetch(ticket) │──▶ broadcast<AppliedChange>
//!                              │   forward)     └──────────────────────┘
//!                              └─ fetch task
//! ```
//!
//! The state lock is never held across an `.await`: every transition is a
//! short synchronous critical section between backend calls.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use ideavault_types::{Idea, IdeaFields, IdeaId, Identity, UserId};
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::{RemoteResult, VaultBackend};
use crate::components::IdeaActions;
use crate::constants::{RESUBSCRIBE_INITIAL_DELAY, RESUBSCRIBE_MAX_DELAY};
use crate::error::{RemoteError, VaultError};
use crate::session::SessionStore;
use crate::subscriptions::{ChangeAction, ChangeEvent, Subscription, SyncGeneration};
use crate::sync::{FetchTicket, IdeaSync, InsertOrder, SyncOp, SyncPhase, SyncResult, SyncSnapshot};

const CHANGE_NOTICE_CAPACITY: usize = 64;

/// A live event that changed the list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedChange {
    pub action: ChangeAction,
    pub record: Idea,
    /// Position the record was inserted at, replaced at, or removed from.
    pub index: usize,
}

struct Shared {
    backend: Arc<dyn VaultBackend>,
    session: Arc<SessionStore>,
    state: Mutex<IdeaSync>,
    version: watch::Sender<u64>,
    changes: broadcast::Sender<AppliedChange>,
    /// Cancels the open subscription of the current scope.
    live: Mutex<Option<CancellationToken>>,
    shutdown: CancellationToken,
}

/// Handle to the idea-list synchronizer.
#[derive(Clone)]
pub struct IdeaSynchronizer {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for IdeaSynchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("IdeaSynchronizer")
            .field("owner", &state.owner())
            .field("phase", &state.phase())
            .field("ideas", &state.ideas().len())
            .finish()
    }
}

impl IdeaSynchronizer {
    /// Create the synchronizer and start following `session`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        backend: Arc<dyn VaultBackend>,
        session: Arc<SessionStore>,
        insert_order: InsertOrder,
    ) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_NOTICE_CAPACITY);
        let shared = Arc::new(Shared {
            backend,
            state: Mutex::new(IdeaSync::new(insert_order)),
            version: watch::Sender::new(0),
            changes,
            live: Mutex::new(None),
            shutdown: CancellationToken::new(),
            session,
        });
        let identity_rx = shared.session.watch();
        tokio::spawn(drive(shared.clone(), identity_rx));
        Self { shared }
    }

    /// Stop following the session and close the live subscription.
    pub fn shutdown(&self) {
        self.shared.shutdown.cancel();
        self.shared.close_live();
    }

    // =========================================================================
    // Read side
    // =========================================================================

    pub fn session(&self) -> &Arc<SessionStore> {
        &self.shared.session
    }

    pub fn snapshot(&self) -> SyncSnapshot {
        self.shared.state.lock().snapshot()
    }

    pub fn ideas(&self) -> Vec<Idea> {
        self.shared.state.lock().ideas().to_vec()
    }

    pub fn phase(&self) -> SyncPhase {
        self.shared.state.lock().phase()
    }

    /// Observe the state version; it changes on every state transition.
    pub fn watch_version(&self) -> watch::Receiver<u64> {
        self.shared.version.subscribe()
    }

    /// Live events that changed the list, for notifications.
    pub fn changes(&self) -> broadcast::Receiver<AppliedChange> {
        self.shared.changes.subscribe()
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Replace the list with a fresh full fetch.
    ///
    /// Idempotent. Concurrent fetches are allowed; the last to complete wins.
    /// A result issued under a previous identity is discarded and reported
    /// as [`SyncResult::Skipped`].
    pub async fn fetch_all(&self) -> Result<SyncResult, VaultError> {
        let ticket = self.shared.update(IdeaSync::begin_fetch).ok_or(VaultError::NotAuthenticated)?;
        // Detached so the ticket is always returned, even if this caller is dropped.
        let shared = self.shared.clone();
        tokio::spawn(async move { shared.run_fetch(ticket).await })
            .await
            .map_err(|err| VaultError::Remote(RemoteError::transport(format!("fetch task failed: {err}"))))?
    }

    /// Create an idea owned by the signed-in user.
    ///
    /// The list is not touched here; the created-event inserts the record.
    pub async fn add_idea(&self, fields: IdeaFields) -> Result<Idea, VaultError> {
        let (owner, generation) = self.shared.scope()?;
        fields.validate()?;
        debug!(owner = %owner, title = %fields.title, "Adding idea");
        let result = self.shared.backend.create_record(&fields, &owner).await;
        self.shared.settle(generation, SyncOp::Add, result)
    }

    /// Replace an idea's title, description, and tags.
    pub async fn update_idea(&self, id: &IdeaId, fields: IdeaFields) -> Result<Idea, VaultError> {
        let (_, generation) = self.shared.scope()?;
        fields.validate()?;
        debug!(id = %id, "Updating idea");
        let result = self.shared.backend.update_record(id, &fields).await;
        self.shared.settle(generation, SyncOp::Update, result)
    }

    pub async fn delete_idea(&self, id: &IdeaId) -> Result<(), VaultError> {
        let (_, generation) = self.shared.scope()?;
        debug!(id = %id, "Deleting idea");
        let result = self.shared.backend.delete_record(id).await;
        self.shared.settle(generation, SyncOp::Delete, result)
    }
}

#[async_trait]
impl IdeaActions for IdeaSynchronizer {
    async fn add_idea(&self, fields: IdeaFields) -> Result<Idea, VaultError> {
        IdeaSynchronizer::add_idea(self, fields).await
    }

    async fn update_idea(&self, id: &IdeaId, fields: IdeaFields) -> Result<Idea, VaultError> {
        IdeaSynchronizer::update_idea(self, id, fields).await
    }

    async fn delete_idea(&self, id: &IdeaId) -> Result<(), VaultError> {
        IdeaSynchronizer::delete_idea(self, id).await
    }
}

// ============================================================================
// Shared state helpers
// ============================================================================

impl Shared {
    /// Run `f` under the state lock, then publish the version.
    fn update<R>(&self, f: impl FnOnce(&mut IdeaSync) -> R) -> R {
        let mut state = self.state.lock();
        let result = f(&mut state);
        let version = state.version();
        drop(state);
        self.version.send_if_modified(|current| {
            if *current == version {
                false
            } else {
                *current = version;
                true
            }
        });
        result
    }

    /// Owner and generation for a mutation; fails fast when signed out.
    ///
    /// The generation is `None` when the session changed but the driver has
    /// not rescoped yet; failures from such a call are returned, not recorded.
    fn scope(&self) -> Result<(UserId, Option<SyncGeneration>), VaultError> {
        let identity = self.session.current().ok_or(VaultError::NotAuthenticated)?;
        let generation = self.state.lock().generation_for(&identity.id);
        Ok((identity.id, generation))
    }

    fn settle<T>(
        self: &Arc<Self>,
        generation: Option<SyncGeneration>,
        op: SyncOp,
        result: RemoteResult<T>,
    ) -> Result<T, VaultError> {
        match result {
            Ok(value) => {
                if let Some(generation) = generation {
                    // A list whose first fetch failed is fetched again.
                    let ticket = self.update(|state| {
                        let ticket = if state.generation() == generation && state.needs_fetch() {
                            state.begin_fetch()
                        } else {
                            None
                        };
                        state.clear_failure(generation);
                        ticket
                    });
                    if let Some(ticket) = ticket {
                        info!(owner = %ticket.owner, %op, "Retrying fetch after successful mutation");
                        self.spawn_fetch(ticket);
                    }
                }
                Ok(value)
            }
            Err(err) => {
                let err = VaultError::from_remote(err);
                if let Some(generation) = generation {
                    self.update(|state| state.record_failure(generation, op, err.clone()));
                }
                Err(err)
            }
        }
    }

    async fn run_fetch(&self, ticket: FetchTicket) -> Result<SyncResult, VaultError> {
        debug!(owner = %ticket.owner, generation = %ticket.generation, "Fetching ideas");
        let result = self.backend.list_owned(&ticket.owner).await.map_err(VaultError::from_remote);
        self.update(|state| state.apply_fetch(&ticket, result))
    }

    /// Begin a fetch for `generation` if it is still current.
    fn begin_fetch_for(&self, generation: SyncGeneration) -> Option<FetchTicket> {
        self.update(|state| if state.generation() == generation { state.begin_fetch() } else { None })
    }

    fn spawn_fetch(self: &Arc<Self>, ticket: FetchTicket) {
        let fetcher = self.clone();
        tokio::spawn(async move {
            if let Err(err) = fetcher.run_fetch(ticket).await {
                warn!(%err, "Background fetch failed");
            }
        });
    }

    fn apply_live(&self, generation: SyncGeneration, event: ChangeEvent) {
        let result = self.update(|state| state.apply_event(generation, &event));
        let index = match result {
            SyncResult::Created { index }
            | SyncResult::Updated { index }
            | SyncResult::Deleted { index } => index,
            _ => return,
        };
        let _ = self.changes.send(AppliedChange { action: event.action, record: event.record, index });
    }

    fn close_live(&self) {
        if let Some(token) = self.live.lock().take() {
            token.cancel();
            debug!("Closed live subscription");
        }
    }

    /// Follow a new identity value. Returns the scope token of the new
    /// owner's task, if one was started.
    fn rescope(self: &Arc<Self>, identity: Option<&Identity>) -> Option<CancellationToken> {
        let generation = self.update(|state| state.rescope(identity))?;
        self.close_live();

        let identity = identity?;
        let scope = self.shutdown.child_token();
        tokio::spawn(run_scope(self.clone(), identity.id.clone(), generation, scope.clone()));
        Some(scope)
    }
}

// ============================================================================
// Tasks
// ============================================================================

async fn drive(shared: Arc<Shared>, mut identity_rx: watch::Receiver<Option<Identity>>) {
    let mut scope: Option<CancellationToken> = None;
    loop {
        let identity = identity_rx.borrow_and_update().clone();
        let owner_changed = shared.state.lock().owner() != identity.as_ref().map(|i| &i.id);
        if owner_changed {
            if let Some(previous) = scope.take() {
                previous.cancel();
            }
            scope = shared.rescope(identity.as_ref());
        }

        tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            changed = identity_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    if let Some(scope) = scope {
        scope.cancel();
    }
    shared.close_live();
    info!("Synchronizer stopped");
}

/// Subscribe for `owner`, fetch, then forward live events until cancelled.
///
/// When the stream ends or a subscribe fails, the failure is recorded and
/// the subscription reopened after a doubling delay. Every reopened stream
/// is followed by a refetch, which covers what was missed meanwhile and
/// clears the failure when it lands.
async fn run_scope(
    shared: Arc<Shared>,
    owner: UserId,
    generation: SyncGeneration,
    scope: CancellationToken,
) {
    let mut delay = RESUBSCRIBE_INITIAL_DELAY;
    let mut attempt: u32 = 0;

    loop {
        // Subscribe before fetching: events racing the fetch are held and
        // replayed over its result, so nothing between snapshot and stream is lost.
        let subscribed = tokio::select! {
            _ = scope.cancelled() => return,
            result = shared.backend.subscribe(&owner) => result,
        };

        let subscription = match subscribed {
            Ok(subscription) if !scope.is_cancelled() => {
                *shared.live.lock() = Some(subscription.cancel_token());
                if attempt > 0 {
                    info!(owner = %owner, attempt, "Live updates restored");
                }
                Some(subscription)
            }
            Ok(_) => return,
            Err(err) => {
                let err = VaultError::from_remote(err);
                warn!(owner = %owner, %err, attempt, "Subscribe failed");
                shared.update(|state| state.record_failure(generation, SyncOp::Subscribe, err));
                None
            }
        };

        // The first pass always fetches; later passes only once live again.
        if attempt == 0 || subscription.is_some() {
            if let Some(ticket) = shared.begin_fetch_for(generation) {
                shared.spawn_fetch(ticket);
            }
        }

        if let Some(subscription) = subscription {
            let opened = Instant::now();
            if !forward(&shared, generation, subscription, &scope).await {
                return;
            }
            warn!(owner = %owner, generation = %generation, "Live stream ended");
            let err = VaultError::Remote(RemoteError::transport("live updates disconnected"));
            shared.update(|state| state.record_failure(generation, SyncOp::Subscribe, err));
            if opened.elapsed() >= RESUBSCRIBE_MAX_DELAY {
                delay = RESUBSCRIBE_INITIAL_DELAY;
            }
        }

        attempt += 1;
        debug!(owner = %owner, attempt, ?delay, "Resubscribing after delay");
        tokio::select! {
            _ = scope.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
        delay = (delay * 2).min(RESUBSCRIBE_MAX_DELAY);
    }
}

/// Apply live events until the scope is cancelled (`false`) or the stream
/// ends on its own (`true`).
async fn forward(
    shared: &Shared,
    generation: SyncGeneration,
    mut subscription: Subscription,
    scope: &CancellationToken,
) -> bool {
    let ended = loop {
        tokio::select! {
            biased;
            _ = scope.cancelled() => break false,
            event = subscription.recv() => match event {
                Some(event) => shared.apply_live(generation, event),
                None => break !scope.is_cancelled(),
            },
        }
    };
    subscription.close();
    ended
}

//! In-process backend.
//!
//! Used by the tests and by `ideavault --memory`. All data is ephemeral.
//!
//! Behaves like the hosted backend where the client can tell the difference:
//! record ids are 15 lowercase alphanumerics, records are listed newest
//! first, and change events reach a subscriber only for records its owner
//! can see. Unauthenticated record calls are rejected with a 401.
//!
//! On top of the [`VaultBackend`] contract it exposes the knobs tests need:
//! per-call counters, injected one-shot failures, per-owner gating of
//! `list_owned` (to hold a fetch in flight), raw event injection that
//! bypasses owner scoping, and session expiry.

use std::collections::{HashMap, HashSet, VecDeque};

use async_trait::async_trait;
use ideavault_types::{Idea, IdeaFields, IdeaId, Identity, Timestamp, UserId};
use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info};

use crate::backend::{RemoteResult, VaultBackend};
use crate::constants::{AUTH_EVENT_CAPACITY, SUBSCRIPTION_BUFFER};
use crate::error::RemoteError;
use crate::subscriptions::{AuthEvent, ChangeEvent, Subscription, SubscriptionSink};

const ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const ID_LENGTH: usize = 15;
const MIN_PASSWORD_LENGTH: usize = 8;

const MSG_AUTH_FAILED: &str = "Failed to authenticate.";
const MSG_AUTH_REQUIRED: &str = "The request requires valid record authorization token.";
const MSG_NOT_FOUND: &str = "The requested resource wasn't found.";
const MSG_CREATE_FAILED: &str = "Failed to create record.";

/// Backend entry points, for counters and injected failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum BackendCall {
    Authenticate,
    CreateIdentity,
    InvalidateSession,
    ListOwned,
    CreateRecord,
    UpdateRecord,
    DeleteRecord,
    Subscribe,
}

#[derive(Debug, Default)]
enum SessionState {
    #[default]
    SignedOut,
    Active(UserId),
    /// Token still held by the client but no longer accepted.
    Expired(UserId),
}

#[derive(Debug)]
struct UserEntry {
    identity: Identity,
    password: String,
}

#[derive(Debug)]
struct Subscriber {
    owner: UserId,
    sink: SubscriptionSink,
}

#[derive(Debug, Default)]
struct MemoryState {
    users: Vec<UserEntry>,
    /// Newest first.
    records: Vec<Idea>,
    session: SessionState,
    subscribers: Vec<Subscriber>,
    failures: HashMap<BackendCall, VecDeque<RemoteError>>,
    last_created: u64,
}

/// In-process [`VaultBackend`].
#[derive(Debug)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
    calls: watch::Sender<HashMap<BackendCall, usize>>,
    held: watch::Sender<HashSet<UserId>>,
    auth_tx: broadcast::Sender<AuthEvent>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        let (auth_tx, _) = broadcast::channel(AUTH_EVENT_CAPACITY);
        Self {
            state: Mutex::new(MemoryState::default()),
            calls: watch::Sender::new(HashMap::new()),
            held: watch::Sender::new(HashSet::new()),
            auth_tx,
        }
    }

    // =========================================================================
    // Seeding
    // =========================================================================

    /// Register a user directly, without counting a call.
    pub fn add_user(&self, email: &str, password: &str) -> Identity {
        let identity = Identity::new(new_record_id(), email);
        self.state.lock().users.push(UserEntry {
            identity: identity.clone(),
            password: password.to_string(),
        });
        identity
    }

    /// Store a record directly. No events are delivered.
    pub fn seed_record(&self, owner: &UserId, fields: IdeaFields) -> Idea {
        let mut state = self.state.lock();
        let created = next_created(&mut state);
        let record = Idea::new(new_record_id(), owner.clone(), fields, created);
        state.records.insert(0, record.clone());
        record
    }

    /// Every stored record, newest first.
    pub fn records(&self) -> Vec<Idea> {
        self.state.lock().records.clone()
    }

    // =========================================================================
    // Observation
    // =========================================================================

    /// How many times `call` has been made.
    pub fn calls(&self, call: BackendCall) -> usize {
        self.calls.borrow().get(&call).copied().unwrap_or(0)
    }

    /// Total calls across every entry point.
    pub fn total_calls(&self) -> usize {
        self.calls.borrow().values().sum()
    }

    /// Wait until `call` has been made at least `count` times.
    pub async fn wait_for_calls(&self, call: BackendCall, count: usize) {
        let mut rx = self.calls.subscribe();
        // The sender lives in `self`, so this only ends when the count is reached.
        let _ = rx.wait_for(|calls| calls.get(&call).copied().unwrap_or(0) >= count).await;
    }

    /// The user the backend currently accepts requests from.
    pub fn signed_in(&self) -> Option<UserId> {
        match &self.state.lock().session {
            SessionState::Active(id) => Some(id.clone()),
            _ => None,
        }
    }

    /// Subscriptions whose consumer is still listening.
    pub fn open_subscriptions(&self) -> usize {
        let mut state = self.state.lock();
        state.subscribers.retain(|s| !s.sink.is_closed());
        state.subscribers.len()
    }

    // =========================================================================
    // Fault injection
    // =========================================================================

    /// Fail the next `call` with `error`. Queued failures are consumed in order.
    pub fn fail_next(&self, call: BackendCall, error: RemoteError) {
        self.state.lock().failures.entry(call).or_default().push_back(error);
    }

    /// Hold `list_owned(owner)` calls until [`release_list`](Self::release_list).
    pub fn hold_list(&self, owner: &UserId) {
        self.held.send_modify(|held| {
            held.insert(owner.clone());
        });
    }

    pub fn release_list(&self, owner: &UserId) {
        self.held.send_modify(|held| {
            held.remove(owner);
        });
    }

    /// Deliver `event` to every open subscription, ignoring owner scoping.
    /// Returns how many subscriptions received it.
    pub async fn inject(&self, event: ChangeEvent) -> usize {
        let sinks: Vec<SubscriptionSink> = {
            let mut state = self.state.lock();
            state.subscribers.retain(|s| !s.sink.is_closed());
            state.subscribers.iter().map(|s| s.sink.clone()).collect()
        };
        let mut delivered = 0;
        for sink in sinks {
            if sink.send(event.clone()).await {
                delivered += 1;
            }
        }
        delivered
    }

    /// Stop accepting the current token without telling anyone. The next
    /// record call fails with 401 and publishes [`AuthEvent::Invalidated`].
    pub fn expire_session(&self) {
        let mut state = self.state.lock();
        if let SessionState::Active(id) = std::mem::take(&mut state.session) {
            info!(user = %id, "Session expired");
            state.session = SessionState::Expired(id);
        }
    }

    /// Revoke the session and publish the invalidation immediately.
    pub fn revoke_session(&self, reason: &str) {
        self.state.lock().session = SessionState::SignedOut;
        let _ = self.auth_tx.send(AuthEvent::Invalidated { reason: reason.to_string() });
    }

    /// Drop every open live stream from the server side, as a restart would.
    /// Returns how many were open.
    pub fn disconnect_subscribers(&self) -> usize {
        let dropped = std::mem::take(&mut self.state.lock().subscribers);
        let open = dropped.iter().filter(|s| !s.sink.is_closed()).count();
        info!(open, "Disconnected subscribers");
        open
    }

    // =========================================================================
    // Internal helpers
    // =========================================================================

    fn record_call(&self, call: BackendCall) -> RemoteResult<()> {
        self.calls.send_modify(|calls| *calls.entry(call).or_default() += 1);
        let injected = self.state.lock().failures.get_mut(&call).and_then(VecDeque::pop_front);
        match injected {
            Some(error) => {
                debug!(%call, %error, "Injected failure");
                Err(error)
            }
            None => Ok(()),
        }
    }

    fn require_session(&self) -> RemoteResult<UserId> {
        let mut state = self.state.lock();
        match std::mem::take(&mut state.session) {
            SessionState::Active(id) => {
                state.session = SessionState::Active(id.clone());
                Ok(id)
            }
            SessionState::Expired(id) => {
                drop(state);
                info!(user = %id, "Rejecting expired token");
                let _ = self.auth_tx.send(AuthEvent::Invalidated {
                    reason: "authorization token expired".to_string(),
                });
                Err(RemoteError::new(401, MSG_AUTH_REQUIRED))
            }
            SessionState::SignedOut => Err(RemoteError::new(401, MSG_AUTH_REQUIRED)),
        }
    }

    /// Send `event` to subscribers whose owner can see the record.
    async fn deliver(&self, event: ChangeEvent) {
        let sinks: Vec<SubscriptionSink> = {
            let mut state = self.state.lock();
            state.subscribers.retain(|s| !s.sink.is_closed());
            state
                .subscribers
                .iter()
                .filter(|s| event.record.is_owned_by(&s.owner))
                .map(|s| s.sink.clone())
                .collect()
        };
        for sink in sinks {
            sink.send(event.clone()).await;
        }
    }
}

#[async_trait]
impl VaultBackend for MemoryBackend {
    async fn authenticate(&self, email: &str, password: &str) -> RemoteResult<Identity> {
        self.record_call(BackendCall::Authenticate)?;
        let mut state = self.state.lock();
        let identity = state
            .users
            .iter()
            .find(|u| u.identity.email.eq_ignore_ascii_case(email) && u.password == password)
            .map(|u| u.identity.clone())
            .ok_or_else(|| RemoteError::new(400, MSG_AUTH_FAILED))?;
        state.session = SessionState::Active(identity.id.clone());
        Ok(identity)
    }

    async fn create_identity(
        &self,
        email: &str,
        password: &str,
        password_confirm: &str,
    ) -> RemoteResult<Identity> {
        self.record_call(BackendCall::CreateIdentity)?;
        if !email.contains('@') {
            return Err(RemoteError::new(400, "Must be a valid email address."));
        }
        if password.chars().count() < MIN_PASSWORD_LENGTH {
            return Err(RemoteError::new(
                400,
                format!("Must be at least {MIN_PASSWORD_LENGTH} character(s)."),
            ));
        }
        if password != password_confirm {
            return Err(RemoteError::new(400, "Values don't match."));
        }

        let mut state = self.state.lock();
        if state.users.iter().any(|u| u.identity.email.eq_ignore_ascii_case(email)) {
            return Err(RemoteError::new(400, "Value must be unique."));
        }
        let identity = Identity::new(new_record_id(), email);
        state.users.push(UserEntry { identity: identity.clone(), password: password.to_string() });
        Ok(identity)
    }

    fn invalidate_session(&self) {
        self.calls.send_modify(|calls| {
            *calls.entry(BackendCall::InvalidateSession).or_default() += 1
        });
        self.state.lock().session = SessionState::SignedOut;
    }

    async fn list_owned(&self, owner: &UserId) -> RemoteResult<Vec<Idea>> {
        self.record_call(BackendCall::ListOwned)?;
        // Authorized as of the request, like a token checked on arrival.
        let session = self.require_session()?;

        let mut held = self.held.subscribe();
        let _ = held.wait_for(|held| !held.contains(owner)).await;

        if &session != owner {
            // List rules filter rather than reject.
            return Ok(Vec::new());
        }
        let state = self.state.lock();
        Ok(state.records.iter().filter(|r| r.is_owned_by(owner)).cloned().collect())
    }

    async fn create_record(&self, fields: &IdeaFields, owner: &UserId) -> RemoteResult<Idea> {
        self.record_call(BackendCall::CreateRecord)?;
        let session = self.require_session()?;
        if &session != owner || fields.validate().is_err() {
            return Err(RemoteError::new(400, MSG_CREATE_FAILED));
        }

        let record = {
            let mut state = self.state.lock();
            let created = next_created(&mut state);
            let record = Idea::new(new_record_id(), owner.clone(), fields.clone(), created);
            state.records.insert(0, record.clone());
            record
        };
        debug!(id = %record.id, owner = %owner, "Created record");
        self.deliver(ChangeEvent::created(record.clone())).await;
        Ok(record)
    }

    async fn update_record(&self, id: &IdeaId, fields: &IdeaFields) -> RemoteResult<Idea> {
        self.record_call(BackendCall::UpdateRecord)?;
        let session = self.require_session()?;

        let record = {
            let mut state = self.state.lock();
            let record = state
                .records
                .iter_mut()
                .find(|r| &r.id == id && r.is_owned_by(&session))
                .ok_or_else(|| RemoteError::new(404, MSG_NOT_FOUND))?;
            record.apply_fields(fields.clone());
            record.clone()
        };
        self.deliver(ChangeEvent::updated(record.clone())).await;
        Ok(record)
    }

    async fn delete_record(&self, id: &IdeaId) -> RemoteResult<()> {
        self.record_call(BackendCall::DeleteRecord)?;
        let session = self.require_session()?;

        let removed = {
            let mut state = self.state.lock();
            let index = state
                .records
                .iter()
                .position(|r| &r.id == id && r.is_owned_by(&session))
                .ok_or_else(|| RemoteError::new(404, MSG_NOT_FOUND))?;
            state.records.remove(index)
        };
        self.deliver(ChangeEvent::deleted(removed)).await;
        Ok(())
    }

    async fn subscribe(&self, owner: &UserId) -> RemoteResult<Subscription> {
        self.record_call(BackendCall::Subscribe)?;
        let (subscription, sink) = Subscription::channel(SUBSCRIPTION_BUFFER);
        let mut state = self.state.lock();
        state.subscribers.retain(|s| !s.sink.is_closed());
        state.subscribers.push(Subscriber { owner: owner.clone(), sink });
        Ok(subscription)
    }

    fn auth_events(&self) -> broadcast::Receiver<AuthEvent> {
        self.auth_tx.subscribe()
    }
}

fn new_record_id() -> String {
    let mut rng = rand::thread_rng();
    (0..ID_LENGTH)
        .map(|_| ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())] as char)
        .collect()
}

/// Strictly increasing creation times, so newest-first order is total.
fn next_created(state: &mut MemoryState) -> Timestamp {
    let millis = Timestamp::now().as_millis().max(state.last_created + 1);
    state.last_created = millis;
    Timestamp::from_millis(millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn fields(title: &str) -> IdeaFields {
        IdeaFields::from_text(title, "desc", "a, b")
    }

    async fn signed_in(backend: &MemoryBackend) -> Identity {
        backend.add_user("amy@example.com", "password123");
        backend.authenticate("amy@example.com", "password123").await.unwrap()
    }

    #[test]
    fn test_record_ids_look_like_backend_ids() {
        let id = new_record_id();
        assert_eq!(id.len(), ID_LENGTH);
        assert!(id.bytes().all(|b| ID_ALPHABET.contains(&b)));
    }

    #[tokio::test]
    async fn test_authenticate() {
        let backend = MemoryBackend::new();
        let amy = backend.add_user("amy@example.com", "password123");

        let err = backend.authenticate("amy@example.com", "nope").await.unwrap_err();
        assert_eq!(err, RemoteError::new(400, MSG_AUTH_FAILED));
        assert_eq!(backend.signed_in(), None);

        let identity = backend.authenticate("AMY@example.com", "password123").await.unwrap();
        assert_eq!(identity, amy);
        assert_eq!(backend.signed_in(), Some(amy.id));
        assert_eq!(backend.calls(BackendCall::Authenticate), 2);
    }

    #[tokio::test]
    async fn test_create_identity_rules() {
        let backend = MemoryBackend::new();
        backend.add_user("amy@example.com", "password123");

        let mismatch = backend.create_identity("bob@example.com", "password123", "password124");
        assert_eq!(mismatch.await.unwrap_err().message, "Values don't match.");
        let short = backend.create_identity("bob@example.com", "short", "short");
        assert_eq!(short.await.unwrap_err().status, Some(400));
        let taken = backend.create_identity("amy@example.com", "password123", "password123");
        assert_eq!(taken.await.unwrap_err().message, "Value must be unique.");

        let bob = backend.create_identity("bob@example.com", "password123", "password123");
        assert_eq!(bob.await.unwrap().email, "bob@example.com");
        // Registration does not sign in.
        assert_eq!(backend.signed_in(), None);
    }

    #[tokio::test]
    async fn test_record_calls_require_session() {
        let backend = MemoryBackend::new();
        let err = backend.create_record(&fields("X"), &UserId::new("u1")).await.unwrap_err();
        assert_eq!(err.status, Some(401));
        assert!(backend.records().is_empty());
    }

    #[tokio::test]
    async fn test_crud_delivers_owner_scoped_events() {
        let backend = MemoryBackend::new();
        let amy = signed_in(&backend).await;
        let mut mine = backend.subscribe(&amy.id).await.unwrap();
        let mut theirs = backend.subscribe(&UserId::new("other")).await.unwrap();

        let created = backend.create_record(&fields("X"), &amy.id).await.unwrap();
        let event = mine.recv().await.unwrap();
        assert_eq!(event, ChangeEvent::created(created.clone()));

        let updated = backend.update_record(&created.id, &fields("Z")).await.unwrap();
        assert_eq!(updated.title, "Z");
        assert_eq!(updated.created, created.created);
        assert_eq!(mine.recv().await.unwrap(), ChangeEvent::updated(updated.clone()));

        backend.delete_record(&created.id).await.unwrap();
        assert_eq!(mine.recv().await.unwrap(), ChangeEvent::deleted(updated));
        assert!(backend.records().is_empty());

        theirs.close();
        assert_eq!(backend.open_subscriptions(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_ends_streams() {
        let backend = MemoryBackend::new();
        let amy = signed_in(&backend).await;
        let mut live = backend.subscribe(&amy.id).await.unwrap();

        assert_eq!(backend.disconnect_subscribers(), 1);
        assert_eq!(live.recv().await, None);
        assert_eq!(backend.open_subscriptions(), 0);
    }

    #[tokio::test]
    async fn test_list_is_newest_first_and_owner_filtered() {
        let backend = MemoryBackend::new();
        let amy = signed_in(&backend).await;
        let first = backend.seed_record(&amy.id, fields("first"));
        let second = backend.seed_record(&amy.id, fields("second"));
        backend.seed_record(&UserId::new("other"), fields("foreign"));

        let list = backend.list_owned(&amy.id).await.unwrap();
        assert_eq!(list, vec![second, first]);
        assert!(backend.list_owned(&UserId::new("other")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_foreign_record_is_not_found() {
        let backend = MemoryBackend::new();
        signed_in(&backend).await;
        let foreign = backend.seed_record(&UserId::new("other"), fields("X"));
        let err = backend.update_record(&foreign.id, &fields("Z")).await.unwrap_err();
        assert_eq!(err.status, Some(404));
    }

    #[tokio::test]
    async fn test_injected_failure_is_one_shot() {
        let backend = MemoryBackend::new();
        let amy = signed_in(&backend).await;
        backend.fail_next(BackendCall::ListOwned, RemoteError::new(500, "down"));

        assert_eq!(backend.list_owned(&amy.id).await.unwrap_err().status, Some(500));
        assert!(backend.list_owned(&amy.id).await.is_ok());
        assert_eq!(backend.calls(BackendCall::ListOwned), 2);
    }

    #[tokio::test]
    async fn test_hold_list_parks_fetch() {
        let backend = Arc::new(MemoryBackend::new());
        let amy = signed_in(&backend).await;
        backend.seed_record(&amy.id, fields("X"));
        backend.hold_list(&amy.id);

        let task = tokio::spawn({
            let backend = backend.clone();
            let owner = amy.id.clone();
            async move { backend.list_owned(&owner).await }
        });
        backend.wait_for_calls(BackendCall::ListOwned, 1).await;
        tokio::task::yield_now().await;
        assert!(!task.is_finished());

        backend.release_list(&amy.id);
        assert_eq!(task.await.unwrap().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_expired_session_publishes_on_next_call() {
        let backend = MemoryBackend::new();
        let amy = signed_in(&backend).await;
        let mut auth = backend.auth_events();

        backend.expire_session();
        assert!(auth.try_recv().is_err());

        let err = backend.create_record(&fields("X"), &amy.id).await.unwrap_err();
        assert!(err.is_authorization());
        assert!(matches!(auth.recv().await.unwrap(), AuthEvent::Invalidated { .. }));
        assert_eq!(backend.signed_in(), None);
    }

    #[tokio::test]
    async fn test_inject_ignores_owner_scoping() {
        let backend = MemoryBackend::new();
        let mut sub = backend.subscribe(&UserId::new("u1")).await.unwrap();
        let foreign = Idea::new("x1", "u2", fields("X"), Timestamp::from_millis(1));

        assert_eq!(backend.inject(ChangeEvent::created(foreign.clone())).await, 1);
        assert_eq!(sub.recv().await.unwrap().record, foreign);
    }
}

//! Integration tests for the session → synchronizer lifecycle
//!
//! Drives a real `IdeaSynchronizer` against the in-memory backend, so every
//! path (subscribe, fetch, live events, mutations) runs through the same
//! tasks the binary uses.

use std::sync::Arc;
use std::time::Duration;

use ideavault_client::{
    BackendCall, ChangeAction, ChangeEvent, IdeaActions, IdeaEditor, IdeaForm, IdeaSynchronizer,
    InsertOrder, MemoryBackend, RemoteError, SessionStore, SyncOp, SyncPhase, SyncResult,
    SyncSnapshot, VaultError, start_client,
};
use ideavault_types::{Idea, IdeaFields, Identity, Timestamp};

const PASSWORD: &str = "password123";

struct Harness {
    backend: Arc<MemoryBackend>,
    session: Arc<SessionStore>,
    sync: IdeaSynchronizer,
}

fn harness() -> Harness {
    harness_with(InsertOrder::Prepend)
}

fn harness_with(order: InsertOrder) -> Harness {
    let backend = Arc::new(MemoryBackend::new());
    let (session, sync) = start_client(backend.clone(), order);
    Harness { backend, session, sync }
}

impl Harness {
    fn user(&self, email: &str) -> Identity {
        self.backend.add_user(email, PASSWORD)
    }

    /// Sign in and wait for the initial fetch to land.
    async fn login(&self, email: &str) -> SyncSnapshot {
        let identity = self.session.login(email, PASSWORD).await.unwrap();
        self.until(|s| s.owner.as_ref() == Some(&identity.id) && s.phase == SyncPhase::Synced)
            .await
    }

    async fn until(&self, pred: impl Fn(&SyncSnapshot) -> bool) -> SyncSnapshot {
        let mut version = self.sync.watch_version();
        let wait = async {
            loop {
                let snapshot = self.sync.snapshot();
                if pred(&snapshot) {
                    return snapshot;
                }
                version.changed().await.unwrap();
            }
        };
        tokio::time::timeout(Duration::from_secs(5), wait)
            .await
            .expect("synchronizer never reached the expected state")
    }

    async fn wait_for_subscriptions(&self, count: usize) {
        let wait = async {
            while self.backend.open_subscriptions() != count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };
        tokio::time::timeout(Duration::from_secs(5), wait)
            .await
            .expect("subscription count never settled");
    }
}

fn fields(title: &str, description: &str, tags: &str) -> IdeaFields {
    IdeaFields::from_text(title, description, tags)
}

fn titles(snapshot: &SyncSnapshot) -> Vec<&str> {
    snapshot.ideas.iter().map(|i| i.title.as_str()).collect()
}

// ============================================================================
// Scope
// ============================================================================

#[tokio::test]
async fn test_signed_out_makes_no_calls() {
    let h = harness();
    assert_eq!(h.sync.add_idea(fields("X", "Y", "")).await, Err(VaultError::NotAuthenticated));
    assert_eq!(h.sync.fetch_all().await, Err(VaultError::NotAuthenticated));
    assert_eq!(h.sync.phase(), SyncPhase::Unscoped);
    assert_eq!(h.backend.total_calls(), 0);
}

#[tokio::test]
async fn test_login_loads_only_owned_records() {
    let h = harness();
    let amy = h.user("amy@example.com");
    let bob = h.user("bob@example.com");
    h.backend.seed_record(&amy.id, fields("old", "d", ""));
    h.backend.seed_record(&bob.id, fields("bob's", "d", ""));
    h.backend.seed_record(&amy.id, fields("new", "d", ""));

    let snapshot = h.login("amy@example.com").await;
    assert_eq!(titles(&snapshot), vec!["new", "old"]);
    assert!(snapshot.ideas.iter().all(|i| i.owner == amy.id));
}

#[tokio::test]
async fn test_logout_clears_list_and_subscription() {
    let h = harness();
    let amy = h.user("amy@example.com");
    h.backend.seed_record(&amy.id, fields("X", "Y", ""));
    h.login("amy@example.com").await;
    h.wait_for_subscriptions(1).await;

    h.session.logout();
    let snapshot = h.until(|s| s.phase == SyncPhase::Unscoped).await;
    assert!(snapshot.ideas.is_empty());
    assert!(snapshot.owner.is_none());
    h.wait_for_subscriptions(0).await;
}

#[tokio::test]
async fn test_switching_user_drops_in_flight_fetch() {
    let h = harness();
    let a = h.user("a@example.com");
    let b = h.user("b@example.com");
    h.backend.seed_record(&a.id, fields("a's idea", "d", ""));
    h.backend.seed_record(&b.id, fields("b's idea", "d", ""));
    h.backend.hold_list(&a.id);
    h.backend.hold_list(&b.id);

    h.session.login("a@example.com", PASSWORD).await.unwrap();
    h.backend.wait_for_calls(BackendCall::ListOwned, 1).await;
    h.session.login("b@example.com", PASSWORD).await.unwrap();
    h.backend.wait_for_calls(BackendCall::ListOwned, 2).await;

    // A's fetch completes while B's is still loading.
    h.backend.release_list(&a.id);
    tokio::time::sleep(Duration::from_millis(50)).await;
    let snapshot = h.sync.snapshot();
    assert_eq!(snapshot.owner.as_ref(), Some(&b.id));
    assert_eq!(snapshot.phase, SyncPhase::Loading);
    assert!(snapshot.ideas.is_empty());

    h.backend.release_list(&b.id);
    let snapshot = h.until(|s| s.phase == SyncPhase::Synced).await;
    assert_eq!(titles(&snapshot), vec!["b's idea"]);
    h.wait_for_subscriptions(1).await;
}

// ============================================================================
// Mutations and live events
// ============================================================================

#[tokio::test]
async fn test_add_idea_arrives_through_created_event() {
    let h = harness();
    let amy = h.user("amy@example.com");
    h.login("amy@example.com").await;
    let mut changes = h.sync.changes();

    let created = h.sync.add_idea(fields("X", "Y", "a, b")).await.unwrap();
    let snapshot = h.until(|s| s.ideas.len() == 1).await;
    assert_eq!(snapshot.ideas, vec![created.clone()]);
    assert_eq!(snapshot.ideas[0].tags, vec!["a", "b"]);
    assert_eq!(snapshot.ideas[0].owner, amy.id);

    let change = changes.recv().await.unwrap();
    assert_eq!(change.action, ChangeAction::Created);
    assert_eq!(change.index, 0);
    assert_eq!(change.record, created);
}

#[tokio::test]
async fn test_add_idea_validates_before_any_call() {
    let h = harness();
    h.user("amy@example.com");
    h.login("amy@example.com").await;

    let err = h.sync.add_idea(fields("", "Y", "")).await.unwrap_err();
    assert!(matches!(err, VaultError::Validation(_)));
    assert_eq!(h.backend.calls(BackendCall::CreateRecord), 0);
    assert!(h.backend.records().is_empty());
}

#[tokio::test]
async fn test_update_keeps_position() {
    let h = harness();
    let amy = h.user("amy@example.com");
    let second = h.backend.seed_record(&amy.id, fields("second", "d", ""));
    h.backend.seed_record(&amy.id, fields("first", "d", ""));
    h.login("amy@example.com").await;

    h.sync.update_idea(&second.id, fields("Z", "d", "t")).await.unwrap();
    let snapshot = h.until(|s| s.ideas.iter().any(|i| i.title == "Z")).await;
    assert_eq!(titles(&snapshot), vec!["first", "Z"]);
    assert_eq!(snapshot.ideas[1].id, second.id);
    assert_eq!(snapshot.ideas[1].created, second.created);
}

#[tokio::test]
async fn test_delete_removes() {
    let h = harness();
    let amy = h.user("amy@example.com");
    let idea = h.backend.seed_record(&amy.id, fields("X", "Y", ""));
    h.login("amy@example.com").await;

    h.sync.delete_idea(&idea.id).await.unwrap();
    h.until(|s| s.ideas.is_empty()).await;
}

#[tokio::test]
async fn test_foreign_events_are_ignored() {
    let h = harness();
    let amy = h.user("amy@example.com");
    h.login("amy@example.com").await;

    let foreign = Idea::new("x1", "someone", fields("theirs", "d", ""), Timestamp::from_millis(1));
    let mine = Idea::new("m1", amy.id.clone(), fields("mine", "d", ""), Timestamp::from_millis(2));
    h.backend.inject(ChangeEvent::created(foreign)).await;
    h.backend.inject(ChangeEvent::created(mine)).await;

    let snapshot = h.until(|s| !s.ideas.is_empty()).await;
    assert_eq!(titles(&snapshot), vec!["mine"]);
}

#[tokio::test]
async fn test_fetch_all_is_idempotent() {
    let h = harness();
    let amy = h.user("amy@example.com");
    for title in ["one", "two", "three"] {
        h.backend.seed_record(&amy.id, fields(title, "d", ""));
    }
    let first = h.login("amy@example.com").await;

    assert_eq!(h.sync.fetch_all().await, Ok(SyncResult::FullSync { count: 3 }));
    assert_eq!(h.sync.ideas(), first.ideas);
    assert_eq!(h.sync.fetch_all().await, Ok(SyncResult::FullSync { count: 3 }));
    assert_eq!(h.sync.ideas(), first.ideas);
}

#[tokio::test]
async fn test_created_during_initial_fetch_is_not_duplicated() {
    let h = harness();
    let amy = h.user("amy@example.com");
    h.backend.hold_list(&amy.id);
    h.session.login("amy@example.com", PASSWORD).await.unwrap();
    h.backend.wait_for_calls(BackendCall::ListOwned, 1).await;
    h.until(|s| s.phase == SyncPhase::Loading).await;

    // The event is buffered; the held fetch then also returns the record.
    h.sync.add_idea(fields("X", "Y", "")).await.unwrap();
    h.backend.release_list(&amy.id);

    let snapshot = h.until(|s| s.phase == SyncPhase::Synced).await;
    assert_eq!(titles(&snapshot), vec!["X"]);
}

#[tokio::test]
async fn test_by_created_insert_order() {
    let h = harness_with(InsertOrder::ByCreated);
    let amy = h.user("amy@example.com");
    h.backend.seed_record(&amy.id, fields("existing", "d", ""));
    h.login("amy@example.com").await;

    let old = Idea::new("o1", amy.id.clone(), fields("ancient", "d", ""), Timestamp::from_millis(1));
    h.backend.inject(ChangeEvent::created(old)).await;
    let snapshot = h.until(|s| s.ideas.len() == 2).await;
    assert_eq!(titles(&snapshot), vec!["existing", "ancient"]);
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn test_fetch_failure_keeps_list_until_refresh() {
    let h = harness();
    let amy = h.user("amy@example.com");
    h.backend.seed_record(&amy.id, fields("X", "Y", ""));
    h.login("amy@example.com").await;

    h.backend.fail_next(BackendCall::ListOwned, RemoteError::new(500, "boom"));
    let err = h.sync.fetch_all().await.unwrap_err();
    assert_eq!(err, VaultError::Remote(RemoteError::new(500, "boom")));

    let snapshot = h.sync.snapshot();
    assert_eq!(snapshot.phase, SyncPhase::Error);
    assert_eq!(titles(&snapshot), vec!["X"]);
    assert_eq!(
        snapshot.error_message().as_deref(),
        Some("Failed to fetch ideas: remote error: 500: boom")
    );

    h.sync.fetch_all().await.unwrap();
    let snapshot = h.sync.snapshot();
    assert_eq!(snapshot.phase, SyncPhase::Synced);
    assert!(snapshot.failure.is_none());
}

#[tokio::test]
async fn test_mutation_failure_cleared_by_next_success() {
    let h = harness();
    h.user("amy@example.com");
    h.login("amy@example.com").await;

    h.backend.fail_next(BackendCall::CreateRecord, RemoteError::new(400, "Failed to create record."));
    assert!(h.sync.add_idea(fields("X", "Y", "")).await.is_err());
    assert_eq!(h.sync.phase(), SyncPhase::Error);

    h.sync.add_idea(fields("X", "Y", "")).await.unwrap();
    let snapshot = h.until(|s| s.ideas.len() == 1).await;
    assert_eq!(snapshot.phase, SyncPhase::Synced);
    assert!(snapshot.failure.is_none());
}

#[tokio::test]
async fn test_success_after_failed_first_fetch_loads_list() {
    let h = harness();
    h.user("amy@example.com");
    h.backend.fail_next(BackendCall::ListOwned, RemoteError::new(500, "boom"));
    h.session.login("amy@example.com", PASSWORD).await.unwrap();
    let snapshot = h.until(|s| s.phase == SyncPhase::Error).await;
    assert!(snapshot.ideas.is_empty());

    h.sync.add_idea(fields("X", "Y", "")).await.unwrap();
    let snapshot = h.until(|s| s.phase == SyncPhase::Synced && s.ideas.len() == 1).await;
    assert_eq!(titles(&snapshot), vec!["X"]);
    assert!(snapshot.failure.is_none());
    assert_eq!(h.backend.calls(BackendCall::ListOwned), 2);
}

#[tokio::test]
async fn test_dropped_stream_is_reported_and_reopened() {
    let h = harness();
    let amy = h.user("amy@example.com");
    h.login("amy@example.com").await;
    h.wait_for_subscriptions(1).await;

    assert_eq!(h.backend.disconnect_subscribers(), 1);
    let snapshot = h.until(|s| s.failure.as_ref().is_some_and(|f| f.op == SyncOp::Subscribe)).await;
    assert_eq!(snapshot.phase, SyncPhase::Error);
    assert_eq!(
        snapshot.error_message().as_deref(),
        Some("Failed to subscribe to changes: remote error: live updates disconnected")
    );

    // Written while nobody was listening; the refetch picks it up.
    h.backend.seed_record(&amy.id, fields("missed", "d", ""));
    h.backend.wait_for_calls(BackendCall::Subscribe, 2).await;
    let snapshot = h.until(|s| s.phase == SyncPhase::Synced && s.failure.is_none()).await;
    assert_eq!(titles(&snapshot), vec!["missed"]);
    h.wait_for_subscriptions(1).await;

    h.sync.add_idea(fields("live again", "d", "")).await.unwrap();
    let snapshot = h.until(|s| s.ideas.len() == 2).await;
    assert_eq!(titles(&snapshot), vec!["live again", "missed"]);
}

#[tokio::test]
async fn test_expired_session_surfaces_authorization_and_signs_out() {
    let h = harness();
    h.user("amy@example.com");
    h.login("amy@example.com").await;

    h.backend.expire_session();
    let err = h.sync.add_idea(fields("X", "Y", "")).await.unwrap_err();
    assert!(err.requires_reauth());

    // The backend's invalidation notice clears the session, which unscopes.
    h.until(|s| s.phase == SyncPhase::Unscoped).await;
    assert!(!h.session.is_authenticated());
}

// ============================================================================
// Components over the synchronizer
// ============================================================================

#[tokio::test]
async fn test_form_and_editor_round_trip() {
    let h = harness();
    h.user("amy@example.com");
    h.login("amy@example.com").await;
    let actions: &dyn IdeaActions = &h.sync;

    let mut form = IdeaForm::new();
    form.draft.title = "X".into();
    form.draft.description = "Y".into();
    form.draft.tags = "a, b".into();
    form.submit(actions).await.unwrap();
    assert!(form.draft.title.is_empty());

    let snapshot = h.until(|s| s.ideas.len() == 1).await;
    let mut editor = IdeaEditor::new(snapshot.ideas[0].clone());
    editor.begin_edit();
    editor.draft_mut().unwrap().title = "Z".into();
    editor.save(actions).await.unwrap();
    assert!(!editor.is_editing());

    let snapshot = h.until(|s| s.ideas.first().is_some_and(|i| i.title == "Z")).await;
    assert_eq!(snapshot.ideas[0].tags, vec!["a", "b"]);

    editor.delete(actions).await.unwrap();
    h.until(|s| s.ideas.is_empty()).await;
}

#[tokio::test]
async fn test_register_flow_scopes_new_user() {
    let h = harness();
    let identity = h
        .session
        .register("new@example.com", PASSWORD, PASSWORD)
        .await
        .unwrap();
    let snapshot = h.until(|s| s.phase == SyncPhase::Synced).await;
    assert_eq!(snapshot.owner, Some(identity.id));
    assert!(snapshot.ideas.is_empty());
    assert_eq!(h.backend.signed_in(), snapshot.owner);
}

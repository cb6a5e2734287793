//! Server-push event types and the cancellable subscription handle.
//!
//! Provides [`ChangeEvent`], a typed record change pushed by the backend,
//! [`AuthEvent`] for out-of-band session invalidation, and [`Subscription`],
//! the receiving end of a live change stream.
//!
//! A backend creates a subscription with [`Subscription::channel`], keeps the
//! [`SubscriptionSink`], and pushes events into it until the consumer closes
//! or drops the [`Subscription`]. Delivery stops the moment the handle is
//! closed: anything still buffered is discarded.

use ideavault_types::Idea;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Event Types
// ============================================================================

/// What happened to a record.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "lowercase")]
pub enum ChangeAction {
    #[serde(rename = "create")]
    Created,
    #[serde(rename = "update")]
    Updated,
    #[serde(rename = "delete")]
    Deleted,
}

/// A record change pushed from the backend.
///
/// For `Deleted` the record is the last state before removal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub action: ChangeAction,
    pub record: Idea,
}

impl ChangeEvent {
    pub fn created(record: Idea) -> Self {
        Self { action: ChangeAction::Created, record }
    }

    pub fn updated(record: Idea) -> Self {
        Self { action: ChangeAction::Updated, record }
    }

    pub fn deleted(record: Idea) -> Self {
        Self { action: ChangeAction::Deleted, record }
    }
}

/// Out-of-band notices about the backend session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthEvent {
    /// The stored credentials stopped being valid (expired or revoked token).
    Invalidated { reason: String },
}

/// Monotonic scope counter, bumped whenever the synchronizer's owner changes.
///
/// Async results carry the generation they were issued under; a mismatch
/// means the result belongs to a previous identity and must be dropped.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SyncGeneration(pub u64);

impl SyncGeneration {
    pub fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl std::fmt::Display for SyncGeneration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "g{}", self.0)
    }
}

// ============================================================================
// Subscription handle
// ============================================================================

/// Receiving end of a live change stream.
///
/// Closing (or dropping) the handle cancels the stream; the backend observes
/// this through its [`SubscriptionSink`] and tears down its side.
#[derive(Debug)]
pub struct Subscription {
    events: mpsc::Receiver<ChangeEvent>,
    cancel: CancellationToken,
}

/// Sending end held by a backend.
#[derive(Clone, Debug)]
pub struct SubscriptionSink {
    tx: mpsc::Sender<ChangeEvent>,
    cancel: CancellationToken,
}

impl Subscription {
    /// Create a connected handle/sink pair.
    pub fn channel(buffer: usize) -> (Subscription, SubscriptionSink) {
        let (tx, events) = mpsc::channel(buffer);
        let cancel = CancellationToken::new();
        (
            Subscription { events, cancel: cancel.clone() },
            SubscriptionSink { tx, cancel },
        )
    }

    /// Next event, or `None` once the stream is closed from either side.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        if self.cancel.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            event = self.events.recv() => event,
        }
    }

    /// Stop delivery. Idempotent.
    pub fn close(&mut self) {
        self.cancel.cancel();
        self.events.close();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// A token that closes this subscription when cancelled, for callers
    /// that hand the handle itself to another task.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl SubscriptionSink {
    /// Deliver an event. Returns `false` once the subscriber has gone away.
    pub async fn send(&self, event: ChangeEvent) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            sent = self.tx.send(event) => sent.is_ok(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.tx.is_closed()
    }

    /// Resolves when the subscriber closes or drops its handle.
    pub async fn closed(&self) {
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = self.tx.closed() => {}
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use ideavault_types::{IdeaFields, Timestamp};

    fn idea(id: &str) -> Idea {
        Idea::new(id, "u1", IdeaFields::from_text("t", "d", ""), Timestamp::from_millis(1))
    }

    #[test]
    fn test_action_wire_names() {
        let event: ChangeEvent = serde_json::from_value(serde_json::json!({
            "action": "update",
            "record": {"id": "i1", "title": "t", "description": "d", "tags": [], "user": "u1",
                       "created": "2024-01-01 00:00:00.000Z"}
        }))
        .unwrap();
        assert_eq!(event.action, ChangeAction::Updated);
        assert_eq!(ChangeAction::Created.to_string(), "created");
    }

    #[tokio::test]
    async fn test_events_flow_until_closed() {
        let (mut sub, sink) = Subscription::channel(4);
        assert!(sink.send(ChangeEvent::created(idea("i1"))).await);
        assert_eq!(sub.recv().await.unwrap().record.id.as_str(), "i1");

        sub.close();
        assert!(sink.is_closed());
        assert!(!sink.send(ChangeEvent::created(idea("i2"))).await);
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_close_discards_buffered_events() {
        let (mut sub, sink) = Subscription::channel(4);
        assert!(sink.send(ChangeEvent::created(idea("i1"))).await);
        sub.cancel_token().cancel();
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_drop_signals_sink() {
        let (sub, sink) = Subscription::channel(4);
        drop(sub);
        sink.closed().await;
        assert!(sink.is_closed());
    }

    #[tokio::test]
    async fn test_sink_drop_ends_stream() {
        let (mut sub, sink) = Subscription::channel(4);
        drop(sink);
        assert!(sub.recv().await.is_none());
    }
}

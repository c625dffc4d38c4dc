use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use alder_types::UserId;
use alder_types::proto::{ErrorFrame, ServerFrame};

/// Frames queued for a session's writer task. The writer owns the socket
/// sink, so everything that reaches a client goes through this queue.
#[derive(Debug, Clone)]
pub enum Outbound {
    Relay(ServerFrame),
    Error(ErrorFrame),
}

/// Per-session outbound queue depth. A client that falls this far behind is
/// disconnected rather than allowed to stall group fan-outs.
pub const OUTBOUND_QUEUE: usize = 256;

/// A live channel bound to exactly one identity.
struct Session {
    conn_id: Uuid,
    sender: mpsc::Sender<Outbound>,
    connected_at: DateTime<Utc>,
}

/// Concurrent map from identity to its live session. The only state shared
/// across connections; all operations are per-key atomic.
#[derive(Clone, Default)]
pub struct Registry {
    inner: Arc<DashMap<UserId, Session>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a channel to an identity, superseding any previous session.
    /// Dropping the superseded sender closes the old connection's queue,
    /// which tears the old writer task (and socket) down. Returns the
    /// connection id the caller must present to `remove`.
    pub fn register(&self, user_id: UserId, sender: mpsc::Sender<Outbound>) -> Uuid {
        let conn_id = Uuid::new_v4();
        let prior = self.inner.insert(
            user_id,
            Session {
                conn_id,
                sender,
                connected_at: Utc::now(),
            },
        );
        if let Some(prior) = prior {
            debug!(
                "user {} reconnected, superseding connection {} after {}s",
                user_id,
                prior.conn_id,
                (Utc::now() - prior.connected_at).num_seconds()
            );
        }
        conn_id
    }

    pub fn lookup(&self, user_id: UserId) -> Option<mpsc::Sender<Outbound>> {
        self.inner.get(&user_id).map(|s| s.sender.clone())
    }

    /// Removes the session only if it is still the one the caller owns, so
    /// a stale disconnect never evicts a newer registration.
    pub fn remove(&self, user_id: UserId, conn_id: Uuid) {
        self.inner.remove_if(&user_id, |_, s| s.conn_id == conn_id);
    }

    /// Best-effort delivery to one identity. Returns false when the
    /// identity has no live session. A full queue means the client stopped
    /// draining; the session is unregistered, which closes the queue and
    /// disconnects it.
    pub fn deliver(&self, user_id: UserId, frame: Outbound) -> bool {
        let Some(session) = self.inner.get(&user_id) else {
            return false;
        };

        match session.sender.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                let conn_id = session.conn_id;
                drop(session);
                warn!(
                    "outbound queue for user {} overflowed, disconnecting",
                    user_id
                );
                self.remove(user_id, conn_id);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                // Writer already gone; cleanup happens on its disconnect path.
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alder_types::proto::MessageRelay;

    fn frame(id: i64) -> Outbound {
        Outbound::Relay(ServerFrame::Message(MessageRelay {
            sender_id: 1,
            receiver_id: Some(2),
            group_id: None,
            ciphertext: "abc".into(),
            iv: None,
            metadata: None,
            id,
            ts: 0,
        }))
    }

    #[tokio::test]
    async fn lookup_misses_for_unregistered_identity() {
        let registry = Registry::new();
        assert!(registry.lookup(7).is_none());
        assert!(!registry.deliver(7, frame(1)));
    }

    #[tokio::test]
    async fn last_registration_wins() {
        let registry = Registry::new();
        let (old_tx, mut old_rx) = mpsc::channel(OUTBOUND_QUEUE);
        let (new_tx, mut new_rx) = mpsc::channel(OUTBOUND_QUEUE);

        registry.register(2, old_tx);
        registry.register(2, new_tx);

        assert!(registry.deliver(2, frame(1)));
        assert!(new_rx.try_recv().is_ok());

        // superseded channel never sees the frame, and its queue is closed
        assert!(old_rx.try_recv().is_err());
        assert!(old_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn stale_remove_does_not_evict_newer_registration() {
        let registry = Registry::new();
        let (old_tx, _old_rx) = mpsc::channel(OUTBOUND_QUEUE);
        let (new_tx, mut new_rx) = mpsc::channel(OUTBOUND_QUEUE);

        let stale_conn = registry.register(2, old_tx);
        registry.register(2, new_tx);

        // the old connection's cleanup races in after the reconnect
        registry.remove(2, stale_conn);

        assert!(registry.deliver(2, frame(1)));
        assert!(new_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn remove_makes_sends_silent_noops() {
        let registry = Registry::new();
        let (tx, _rx) = mpsc::channel(OUTBOUND_QUEUE);

        let conn_id = registry.register(2, tx);
        registry.remove(2, conn_id);

        assert!(registry.lookup(2).is_none());
        assert!(!registry.deliver(2, frame(1)));
    }

    #[tokio::test]
    async fn queue_overflow_evicts_the_slow_session() {
        let registry = Registry::new();
        let (tx, mut rx) = mpsc::channel(1);

        registry.register(2, tx);

        assert!(registry.deliver(2, frame(1)));
        // nobody drains rx, so the next frame overflows and evicts
        assert!(!registry.deliver(2, frame(2)));
        assert!(registry.lookup(2).is_none());

        // the queued frame is still there, then the queue reports closed
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_none());
    }
}

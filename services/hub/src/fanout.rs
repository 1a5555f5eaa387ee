//! Realtime fan-out.
//!
//! Each actor instance has a set of live push subscribers. Connections
//! register on WebSocket upgrade, receive a full snapshot from their
//! instance, then get incremental `Push` frames until they drop. There is no
//! hibernation: a reconnect is a fresh subscribe plus a fresh snapshot.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tokio::sync::mpsc;
use tracing::debug;

use waggle_events::Push;

use crate::registry::ActorKind;

struct Subscriber {
    conn_id: u64,
    /// Agent identity the connection authenticated as, when known. Used to
    /// skip echoing a sender's own chat messages back to it.
    agent_id: Option<String>,
    tx: mpsc::UnboundedSender<Push>,
}

/// Per-instance subscriber registry.
#[derive(Clone)]
pub struct Fanout {
    inner: Arc<FanoutInner>,
}

struct FanoutInner {
    subs: RwLock<HashMap<(ActorKind, String), Vec<Subscriber>>>,
    next_conn_id: AtomicU64,
}

impl Fanout {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(FanoutInner {
                subs: RwLock::new(HashMap::new()),
                next_conn_id: AtomicU64::new(1),
            }),
        }
    }

    /// Registers a connection with an instance. Returns the connection id
    /// (needed to unsubscribe) and the frame receiver.
    pub fn subscribe(
        &self,
        kind: ActorKind,
        key: &str,
        agent_id: Option<String>,
    ) -> (u64, mpsc::UnboundedReceiver<Push>) {
        let conn_id = self.inner.next_conn_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();

        let mut subs = self.inner.subs.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        subs.entry((kind, key.to_string()))
            .or_default()
            .push(Subscriber { conn_id, agent_id, tx });

        debug!(kind = %kind, key = %key, conn_id, "Push subscriber connected");
        (conn_id, rx)
    }

    /// Removes a connection from an instance.
    pub fn unsubscribe(&self, kind: ActorKind, key: &str, conn_id: u64) {
        let mut subs = self.inner.subs.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(list) = subs.get_mut(&(kind, key.to_string())) {
            list.retain(|s| s.conn_id != conn_id);
            if list.is_empty() {
                subs.remove(&(kind, key.to_string()));
            }
        }
        debug!(kind = %kind, key = %key, conn_id, "Push subscriber disconnected");
    }

    /// Delivers a frame to every subscriber of an instance.
    pub fn publish(&self, kind: ActorKind, key: &str, push: &Push) {
        self.publish_filtered(kind, key, push, None);
    }

    /// Delivers a frame to every subscriber except connections identified as
    /// `except_agent`.
    pub fn publish_except(&self, kind: ActorKind, key: &str, push: &Push, except_agent: &str) {
        self.publish_filtered(kind, key, push, Some(except_agent));
    }

    fn publish_filtered(
        &self,
        kind: ActorKind,
        key: &str,
        push: &Push,
        except_agent: Option<&str>,
    ) {
        let subs = self.inner.subs.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        let Some(list) = subs.get(&(kind, key.to_string())) else {
            return;
        };
        for sub in list {
            if let (Some(except), Some(agent)) = (except_agent, sub.agent_id.as_deref()) {
                if except == agent {
                    continue;
                }
            }
            // A closed receiver just means the connection is mid-teardown;
            // unsubscribe handles removal.
            let _ = sub.tx.send(push.clone());
        }
    }

    /// Number of live subscribers for an instance.
    pub fn subscriber_count(&self, kind: ActorKind, key: &str) -> usize {
        let subs = self.inner.subs.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        subs.get(&(kind, key.to_string())).map_or(0, Vec::len)
    }
}

impl Default for Fanout {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use waggle_events::event_types;

    fn frame(kind: &str) -> Push {
        Push::new(kind, Utc::now(), &serde_json::json!({}))
    }

    #[tokio::test]
    async fn publish_reaches_all_subscribers() {
        let fanout = Fanout::new();
        let (_a, mut rx_a) = fanout.subscribe(ActorKind::Coordinator, "coordinator", None);
        let (_b, mut rx_b) = fanout.subscribe(ActorKind::Coordinator, "coordinator", None);

        fanout.publish(
            ActorKind::Coordinator,
            "coordinator",
            &frame(event_types::TASK_UPDATE),
        );

        assert_eq!(rx_a.recv().await.unwrap().kind, "task-update");
        assert_eq!(rx_b.recv().await.unwrap().kind, "task-update");
    }

    #[tokio::test]
    async fn publish_except_skips_the_sender() {
        let fanout = Fanout::new();
        let (_a, mut rx_sender) = fanout.subscribe(
            ActorKind::Coordinator,
            "coordinator",
            Some("alpha".to_string()),
        );
        let (_b, mut rx_other) = fanout.subscribe(
            ActorKind::Coordinator,
            "coordinator",
            Some("beta".to_string()),
        );

        fanout.publish_except(
            ActorKind::Coordinator,
            "coordinator",
            &frame(event_types::CHAT),
            "alpha",
        );

        assert_eq!(rx_other.recv().await.unwrap().kind, "chat");
        assert!(rx_sender.try_recv().is_err());
    }

    #[tokio::test]
    async fn unsubscribe_removes_connection() {
        let fanout = Fanout::new();
        let (conn_id, _rx) = fanout.subscribe(ActorKind::Agent, "alpha", None);
        assert_eq!(fanout.subscriber_count(ActorKind::Agent, "alpha"), 1);

        fanout.unsubscribe(ActorKind::Agent, "alpha", conn_id);
        assert_eq!(fanout.subscriber_count(ActorKind::Agent, "alpha"), 0);
    }

    #[tokio::test]
    async fn instances_are_isolated() {
        let fanout = Fanout::new();
        let (_a, mut rx_alpha) = fanout.subscribe(ActorKind::Agent, "alpha", None);
        let (_b, mut rx_beta) = fanout.subscribe(ActorKind::Agent, "beta", None);

        fanout.publish(ActorKind::Agent, "alpha", &frame(event_types::MESSAGE));

        assert_eq!(rx_alpha.recv().await.unwrap().kind, "message");
        assert!(rx_beta.try_recv().is_err());
    }
}

//! Push-channel event envelope.
//!
//! Every frame delivered over a realtime connection is a `Push`: a type tag,
//! a server timestamp, and the event payload. On connect the instance sends
//! a single `snapshot` frame with its full state; everything after is
//! incremental.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// All push event type names as constants.
pub mod event_types {
    /// Full instance state, sent once on (re)connect.
    pub const SNAPSHOT: &str = "snapshot";
    /// An agent registry row changed (heartbeat, connect, disconnect).
    pub const AGENT_UPDATE: &str = "agent-update";
    /// A group-chat message was appended or reacted to.
    pub const CHAT: &str = "chat";
    /// A task was created or mutated.
    pub const TASK_UPDATE: &str = "task-update";
    /// A handoff advanced (created, claimed, completed).
    pub const HANDOFF_UPDATE: &str = "handoff-update";
    /// An agent saved its context checkpoint.
    pub const CHECKPOINT_SAVED: &str = "checkpoint-saved";
    /// A direct message landed in this agent's inbox.
    pub const MESSAGE: &str = "message";
    /// A resource lock was granted or released.
    pub const LOCK_UPDATE: &str = "lock-update";
}

/// A single frame on the push channel.
#[derive(Debug, Clone, Serialize)]
pub struct Push {
    #[serde(rename = "type")]
    pub kind: String,
    pub at: DateTime<Utc>,
    pub data: serde_json::Value,
}

impl Push {
    /// Wraps a payload in an envelope stamped with `at`.
    ///
    /// Payload serialization failures collapse to JSON null rather than
    /// erroring: a malformed push frame must never fail the state change
    /// that produced it.
    pub fn new(kind: &str, at: DateTime<Utc>, data: &impl Serialize) -> Self {
        Self {
            kind: kind.to_string(),
            at,
            data: serde_json::to_value(data).unwrap_or(serde_json::Value::Null),
        }
    }

    /// Serializes the frame for the wire.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_shape() {
        let at = Utc::now();
        let push = Push::new(event_types::CHAT, at, &serde_json::json!({"text": "hi"}));
        let value: serde_json::Value = serde_json::from_str(&push.to_json()).unwrap();
        assert_eq!(value["type"], "chat");
        assert_eq!(value["data"]["text"], "hi");
    }
}

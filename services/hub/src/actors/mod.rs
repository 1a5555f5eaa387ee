//! The hub's actor implementations.
//!
//! An actor here is a plain struct over an [`ActorCell`](crate::registry::ActorCell);
//! every public operation takes the cell's gate before touching the store,
//! which is what makes read-then-write sequences safe without any further
//! synchronization. Handlers construct actors per request; the cell (and so
//! the gate and store) is the long-lived part.

mod agent;
mod coordinator;
mod lock;

pub use agent::{AgentState, AgentStateSnapshot, SaveCheckpoint};
pub use coordinator::{
    AgentUpsert, Coordinator, CoordinatorSnapshot, CreateHandoff, CreateTask, TaskPatch,
    WorkBundle, CHAT_WINDOW,
};
pub use lock::{arm_expiry, LockActor, LOCK_HISTORY_CAP};

use serde::Serialize;
use thiserror::Error;

use crate::store::DbError;

/// Domain errors actors surface to the API layer.
#[derive(Debug, Error)]
pub enum ActorError {
    /// Unknown id or key.
    #[error("{0}")]
    NotFound(String),

    /// A claim/lock/handoff/transfer precondition was violated. Carries the
    /// current record so the caller can decide whether to back off or
    /// escalate.
    #[error("{detail}")]
    Conflict {
        detail: String,
        current: serde_json::Value,
    },

    /// Caller is not the owner of the thing it tried to mutate.
    #[error("{0}")]
    Forbidden(String),

    /// Missing or malformed request field.
    #[error("{0}")]
    InvalidArgument(String),

    /// Storage failure.
    #[error(transparent)]
    Db(#[from] DbError),
}

impl ActorError {
    /// Builds a Conflict carrying the conflicting record.
    pub fn conflict(detail: impl Into<String>, current: &impl Serialize) -> Self {
        ActorError::Conflict {
            detail: detail.into(),
            current: serde_json::to_value(current).unwrap_or(serde_json::Value::Null),
        }
    }
}

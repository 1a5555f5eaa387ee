//! Application state shared across request handlers.

use std::sync::Arc;

use crate::actors::{ActorError, AgentState, Coordinator, LockActor};
use crate::fanout::Fanout;
use crate::lifecycle::Lifecycle;
use crate::registry::{ActorCell, ActorKind, Registry};

/// Shared application state, passed to all handlers via Axum's state
/// extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    registry: Registry,
    fanout: Fanout,
}

impl AppState {
    pub fn new(registry: Registry) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                registry,
                fanout: Fanout::new(),
            }),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    pub fn fanout(&self) -> &Fanout {
        &self.inner.fanout
    }

    /// The global coordinator actor.
    pub async fn coordinator(&self) -> Result<Coordinator, ActorError> {
        let cell = self.inner.registry.coordinator().await?;
        Ok(Coordinator::new(cell))
    }

    /// The soul/body protocol, over the coordinator cell.
    pub async fn lifecycle(&self) -> Result<Lifecycle, ActorError> {
        let cell = self.inner.registry.coordinator().await?;
        Ok(Lifecycle::new(cell))
    }

    /// The state actor for one agent id.
    pub async fn agent_state(&self, agent_id: &str) -> Result<AgentState, ActorError> {
        let cell = self.inner.registry.cell(ActorKind::Agent, agent_id).await?;
        Ok(AgentState::new(cell))
    }

    /// The lock actor (and its cell, for alarm arming) for one resource
    /// path.
    pub async fn lock_cell(&self, resource: &str) -> Result<Arc<ActorCell>, ActorError> {
        Ok(self.inner.registry.cell(ActorKind::Lock, resource).await?)
    }

    pub async fn lock_actor(&self, resource: &str) -> Result<LockActor, ActorError> {
        Ok(LockActor::new(self.lock_cell(resource).await?))
    }
}

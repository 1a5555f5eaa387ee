//! API v1 routes.

mod agents;
mod coordinator;
mod lifecycle;
mod locks;

use axum::Router;

use crate::state::AppState;

/// Create API v1 routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .nest("/coordinator", coordinator::routes())
        // Agent state is per-agent: /v1/agents/{agent_id}/...
        .nest("/agents/{agent_id}", agents::routes())
        // Locks address a single URL-encoded resource segment.
        .nest("/locks", locks::routes())
        // Souls, bodies, and transfers live at the top level.
        .merge(lifecycle::routes())
}

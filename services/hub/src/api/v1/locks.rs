//! Resource lock endpoints.
//!
//! The resource path is one URL-encoded segment: `/v1/locks/src%2Fmain.rs`.
//! Axum decodes it before it reaches the handler.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{Duration, Utc};
use serde::Deserialize;

use waggle_events::{event_types, Push};

use crate::actors::{arm_expiry, LockActor};
use crate::api::error::ApiError;
use crate::api::ws;
use crate::registry::{ActorCell, ActorKind};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/{resource}", get(check).post(lock))
        .route("/{resource}/unlock", post(unlock))
        .route("/{resource}/history", get(history))
        .route("/{resource}/ws", get(ws::lock_ws))
}

#[derive(Debug, Deserialize)]
struct LockRequest {
    agent_id: String,
    #[serde(default)]
    reason: String,
    #[serde(default)]
    resource_type: Option<String>,
    ttl_ms: i64,
}

#[derive(Debug, Deserialize)]
struct UnlockRequest {
    agent_id: String,
    #[serde(default)]
    force: bool,
}

async fn check(
    State(state): State<AppState>,
    Path(resource): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = state.lock_actor(&resource).await?;
    let lock = actor.check(Utc::now()).await?;
    Ok(Json(serde_json::json!({ "locked": lock.is_some(), "lock": lock })))
}

async fn lock(
    State(state): State<AppState>,
    Path(resource): Path<String>,
    Json(request): Json<LockRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let cell: Arc<ActorCell> = state.lock_cell(&resource).await?;
    let actor = LockActor::new(Arc::clone(&cell));

    let now = Utc::now();
    let granted = actor
        .lock(
            &request.agent_id,
            &request.reason,
            request.resource_type.as_deref().unwrap_or("file"),
            Duration::milliseconds(request.ttl_ms),
            now,
        )
        .await?;

    // Liveness only; every read path still lazily enforces expiry.
    arm_expiry(cell, state.fanout().clone(), granted.expires_at);

    let push = Push::new(
        event_types::LOCK_UPDATE,
        now,
        &serde_json::json!({ "resource_path": resource, "lock": granted }),
    );
    state.fanout().publish(ActorKind::Lock, &resource, &push);

    Ok(Json(granted))
}

async fn unlock(
    State(state): State<AppState>,
    Path(resource): Path<String>,
    Json(request): Json<UnlockRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = state.lock_actor(&resource).await?;
    let now = Utc::now();
    let kind = actor.unlock(&request.agent_id, request.force, now).await?;

    let push = Push::new(
        event_types::LOCK_UPDATE,
        now,
        &serde_json::json!({ "resource_path": resource, "lock": null, "release": kind }),
    );
    state.fanout().publish(ActorKind::Lock, &resource, &push);

    Ok(Json(serde_json::json!({ "ok": true, "release": kind })))
}

async fn history(
    State(state): State<AppState>,
    Path(resource): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = state.lock_actor(&resource).await?;
    let entries = actor.history().await?;
    Ok(Json(entries))
}

//! Per-agent state endpoints: checkpoint, inbox, memory, state view.

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;

use waggle_events::{event_types, AuthorType, Push};
use waggle_id::MessageId;

use crate::actors::SaveCheckpoint;
use crate::api::error::ApiError;
use crate::api::ws;
use crate::registry::ActorKind;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/checkpoint", get(get_checkpoint).post(save_checkpoint))
        .route(
            "/messages",
            get(list_messages).post(post_message).patch(mark_read),
        )
        .route("/memory", get(list_memories).post(add_memory))
        .route("/state", get(get_state))
        .route("/ws", get(ws::agent_ws))
}

// -----------------------------------------------------------------------------
// Checkpoint
// -----------------------------------------------------------------------------

async fn get_checkpoint(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let checkpoint = state.agent_state(&agent_id).await?.checkpoint().await?;
    Ok(Json(serde_json::json!({ "checkpoint": checkpoint })))
}

async fn save_checkpoint(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    Json(save): Json<SaveCheckpoint>,
) -> Result<impl IntoResponse, ApiError> {
    let now = Utc::now();
    let checkpoint = state
        .agent_state(&agent_id)
        .await?
        .save_checkpoint(save, now)
        .await?;

    let push = Push::new(event_types::CHECKPOINT_SAVED, now, &checkpoint);
    state.fanout().publish(ActorKind::Agent, &agent_id, &push);
    Ok(Json(checkpoint))
}

// -----------------------------------------------------------------------------
// Inbox
// -----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ListMessagesQuery {
    #[serde(default)]
    unread: bool,
}

#[derive(Debug, Deserialize)]
struct PostMessage {
    from: String,
    #[serde(default)]
    kind: Option<AuthorType>,
    text: String,
}

#[derive(Debug, Deserialize)]
struct MarkRead {
    ids: Vec<MessageId>,
}

async fn list_messages(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    Query(query): Query<ListMessagesQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let messages = state
        .agent_state(&agent_id)
        .await?
        .messages(query.unread)
        .await?;
    Ok(Json(messages))
}

async fn post_message(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    Json(request): Json<PostMessage>,
) -> Result<impl IntoResponse, ApiError> {
    let now = Utc::now();
    let message = state
        .agent_state(&agent_id)
        .await?
        .add_message(
            &request.from,
            request.kind.unwrap_or(AuthorType::Agent),
            &request.text,
            now,
        )
        .await?;

    // Deliver straight to the owner's realtime channel when connected.
    let push = Push::new(event_types::MESSAGE, now, &message);
    state.fanout().publish(ActorKind::Agent, &agent_id, &push);
    Ok(Json(message))
}

async fn mark_read(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    Json(request): Json<MarkRead>,
) -> Result<impl IntoResponse, ApiError> {
    let updated = state
        .agent_state(&agent_id)
        .await?
        .mark_read(&request.ids)
        .await?;
    Ok(Json(serde_json::json!({ "updated": updated })))
}

// -----------------------------------------------------------------------------
// Memory
// -----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ListMemoriesQuery {
    category: Option<String>,
    q: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AddMemory {
    category: String,
    content: String,
    #[serde(default)]
    tags: Vec<String>,
}

async fn list_memories(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    Query(query): Query<ListMemoriesQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let memories = state
        .agent_state(&agent_id)
        .await?
        .memories(query.category.as_deref(), query.q.as_deref())
        .await?;
    Ok(Json(memories))
}

async fn add_memory(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    Json(request): Json<AddMemory>,
) -> Result<impl IntoResponse, ApiError> {
    let memory = state
        .agent_state(&agent_id)
        .await?
        .add_memory(&request.category, &request.content, request.tags, Utc::now())
        .await?;
    Ok(Json(memory))
}

// -----------------------------------------------------------------------------
// State view
// -----------------------------------------------------------------------------

async fn get_state(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let snapshot = state.agent_state(&agent_id).await?.state().await?;
    Ok(Json(snapshot))
}

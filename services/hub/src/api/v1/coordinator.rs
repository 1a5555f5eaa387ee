//! Coordinator endpoints: agents, chat, tasks, zones, claims, handoffs,
//! and the work bundle.

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::{get, patch, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;

use waggle_events::{
    event_types, AgentStatus, AuthorType, HandoffStatus, Push, TaskStatus,
};
use waggle_id::{HandoffId, MessageId, TaskId};

use crate::actors::{AgentUpsert, CreateHandoff, CreateTask, TaskPatch};
use crate::api::error::ApiError;
use crate::api::ws;
use crate::registry::{ActorKind, COORDINATOR_KEY};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/agents", get(list_agents).post(heartbeat))
        .route("/chat", get(get_chat).post(post_chat))
        .route("/chat/react", post(react))
        .route("/tasks", get(list_tasks).post(create_task))
        .route("/tasks/{task_id}", patch(update_task))
        .route("/zones", get(list_zones).post(zone_action))
        .route("/zones/check", get(check_zone))
        .route("/claims", get(list_claims).post(claim_action))
        .route("/handoffs", get(list_handoffs).post(handoff_action))
        .route("/work", get(work_bundle))
        .route("/ws", get(ws::coordinator_ws))
}

fn publish(state: &AppState, push: Push) {
    state
        .fanout()
        .publish(ActorKind::Coordinator, COORDINATOR_KEY, &push);
}

// -----------------------------------------------------------------------------
// Agents
// -----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ListAgentsQuery {
    status: Option<AgentStatus>,
}

async fn list_agents(
    State(state): State<AppState>,
    Query(query): Query<ListAgentsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let agents = state.coordinator().await?.list_agents(query.status).await?;
    Ok(Json(agents))
}

async fn heartbeat(
    State(state): State<AppState>,
    Json(upsert): Json<AgentUpsert>,
) -> Result<impl IntoResponse, ApiError> {
    let now = Utc::now();
    let agent = state.coordinator().await?.upsert_agent(upsert, now).await?;
    publish(&state, Push::new(event_types::AGENT_UPDATE, now, &agent));
    Ok(Json(agent))
}

// -----------------------------------------------------------------------------
// Chat
// -----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ChatQuery {
    limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct PostChat {
    author: String,
    #[serde(default)]
    author_type: Option<AuthorType>,
    text: String,
}

#[derive(Debug, Deserialize)]
struct ReactRequest {
    message_id: MessageId,
    emoji: String,
    agent_id: String,
}

async fn get_chat(
    State(state): State<AppState>,
    Query(query): Query<ChatQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let messages = state
        .coordinator()
        .await?
        .recent_chat(query.limit.unwrap_or(50))
        .await?;
    Ok(Json(messages))
}

async fn post_chat(
    State(state): State<AppState>,
    Json(request): Json<PostChat>,
) -> Result<impl IntoResponse, ApiError> {
    let now = Utc::now();
    let message = state
        .coordinator()
        .await?
        .append_chat(
            &request.author,
            request.author_type.unwrap_or(AuthorType::Agent),
            &request.text,
            now,
        )
        .await?;

    // Everyone but the author; their own send echoes locally.
    let push = Push::new(event_types::CHAT, now, &message);
    state
        .fanout()
        .publish_except(ActorKind::Coordinator, COORDINATOR_KEY, &push, &message.author);
    Ok(Json(message))
}

async fn react(
    State(state): State<AppState>,
    Json(request): Json<ReactRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let now = Utc::now();
    let message = state
        .coordinator()
        .await?
        .react(request.message_id, &request.emoji, &request.agent_id)
        .await?;
    publish(&state, Push::new(event_types::CHAT, now, &message));
    Ok(Json(message))
}

// -----------------------------------------------------------------------------
// Tasks
// -----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ListTasksQuery {
    status: Option<TaskStatus>,
    assignee: Option<String>,
}

async fn list_tasks(
    State(state): State<AppState>,
    Query(query): Query<ListTasksQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let tasks = state
        .coordinator()
        .await?
        .list_tasks(query.status, query.assignee.as_deref())
        .await?;
    Ok(Json(tasks))
}

async fn create_task(
    State(state): State<AppState>,
    Json(create): Json<CreateTask>,
) -> Result<impl IntoResponse, ApiError> {
    let now = Utc::now();
    let task = state.coordinator().await?.create_task(create, now).await?;
    publish(&state, Push::new(event_types::TASK_UPDATE, now, &task));
    Ok(Json(task))
}

async fn update_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
    Json(patch): Json<TaskPatch>,
) -> Result<impl IntoResponse, ApiError> {
    let task_id: TaskId = task_id
        .parse()
        .map_err(|_| ApiError::bad_request("invalid_task_id", "Invalid task ID format"))?;

    let now = Utc::now();
    let task = state
        .coordinator()
        .await?
        .update_task(task_id, patch, now)
        .await?;
    publish(&state, Push::new(event_types::TASK_UPDATE, now, &task));
    Ok(Json(task))
}

// -----------------------------------------------------------------------------
// Zones
// -----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum ZoneAction {
    Claim {
        zone_id: String,
        path: String,
        owner: String,
        #[serde(default)]
        description: String,
    },
    Release {
        zone_id: String,
        owner: String,
    },
}

#[derive(Debug, Deserialize)]
struct CheckZoneQuery {
    path: String,
}

async fn list_zones(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let zones = state.coordinator().await?.list_zones().await?;
    Ok(Json(zones))
}

async fn zone_action(
    State(state): State<AppState>,
    Json(action): Json<ZoneAction>,
) -> Result<impl IntoResponse, ApiError> {
    let now = Utc::now();
    let coordinator = state.coordinator().await?;
    match action {
        ZoneAction::Claim {
            zone_id,
            path,
            owner,
            description,
        } => {
            let zone = coordinator
                .claim_zone(&zone_id, &path, &owner, &description, now)
                .await?;
            Ok(Json(serde_json::json!({ "ok": true, "zone": zone })))
        }
        ZoneAction::Release { zone_id, owner } => {
            coordinator.release_zone(&zone_id, &owner).await?;
            Ok(Json(serde_json::json!({ "ok": true })))
        }
    }
}

async fn check_zone(
    State(state): State<AppState>,
    Query(query): Query<CheckZoneQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let zone = state.coordinator().await?.check_zone(&query.path).await?;
    Ok(Json(serde_json::json!({ "zone": zone })))
}

// -----------------------------------------------------------------------------
// Claims
// -----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum ClaimAction {
    Claim {
        what: String,
        by: String,
        #[serde(default)]
        description: String,
    },
    Release {
        what: String,
        by: String,
    },
}

async fn list_claims(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let claims = state.coordinator().await?.list_claims(Utc::now()).await?;
    Ok(Json(claims))
}

async fn claim_action(
    State(state): State<AppState>,
    Json(action): Json<ClaimAction>,
) -> Result<impl IntoResponse, ApiError> {
    let now = Utc::now();
    let coordinator = state.coordinator().await?;
    match action {
        ClaimAction::Claim {
            what,
            by,
            description,
        } => {
            let claim = coordinator.claim(&what, &by, &description, now).await?;
            Ok(Json(serde_json::json!({ "ok": true, "claim": claim })))
        }
        ClaimAction::Release { what, by } => {
            coordinator.release_claim(&what, &by).await?;
            Ok(Json(serde_json::json!({ "ok": true })))
        }
    }
}

// -----------------------------------------------------------------------------
// Handoffs
// -----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum HandoffAction {
    Create {
        #[serde(flatten)]
        create: CreateHandoff,
    },
    Claim {
        handoff_id: HandoffId,
        agent_id: String,
    },
    Complete {
        handoff_id: HandoffId,
        agent_id: String,
    },
}

#[derive(Debug, Deserialize)]
struct ListHandoffsQuery {
    status: Option<HandoffStatus>,
}

async fn list_handoffs(
    State(state): State<AppState>,
    Query(query): Query<ListHandoffsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let handoffs = state.coordinator().await?.list_handoffs(query.status).await?;
    Ok(Json(handoffs))
}

async fn handoff_action(
    State(state): State<AppState>,
    Json(action): Json<HandoffAction>,
) -> Result<impl IntoResponse, ApiError> {
    let now = Utc::now();
    let coordinator = state.coordinator().await?;
    let handoff = match action {
        HandoffAction::Create { create } => coordinator.create_handoff(create, now).await?,
        HandoffAction::Claim {
            handoff_id,
            agent_id,
        } => coordinator.claim_handoff(handoff_id, &agent_id, now).await?,
        HandoffAction::Complete {
            handoff_id,
            agent_id,
        } => {
            coordinator
                .complete_handoff(handoff_id, &agent_id, now)
                .await?
        }
    };
    publish(&state, Push::new(event_types::HANDOFF_UPDATE, now, &handoff));
    Ok(Json(handoff))
}

// -----------------------------------------------------------------------------
// Work bundle
// -----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct WorkQuery {
    agent_id: String,
}

async fn work_bundle(
    State(state): State<AppState>,
    Query(query): Query<WorkQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let bundle = state
        .coordinator()
        .await?
        .work_bundle(&query.agent_id, Utc::now())
        .await?;
    Ok(Json(bundle))
}

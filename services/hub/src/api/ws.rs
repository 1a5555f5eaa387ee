//! Push-channel WebSocket endpoints.
//!
//! One endpoint per actor kind that fans out: the coordinator channel (all
//! shared-state events) and the per-agent channel (inbox + checkpoint
//! events). On upgrade the connection receives one `snapshot` frame with the
//! instance's full state, then incremental frames until either side closes.
//!
//! Connecting to the coordinator channel with an `agent_id` also counts as
//! presence: the agent is upserted active on connect and flipped offline on
//! disconnect.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::warn;

use waggle_events::{event_types, AgentStatus, Push};

use crate::actors::AgentUpsert;
use crate::api::error::ApiError;
use crate::registry::{ActorKind, COORDINATOR_KEY};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ConnectQuery {
    pub agent_id: Option<String>,
}

/// GET /v1/coordinator/ws?agent_id=
pub async fn coordinator_ws(
    State(state): State<AppState>,
    Query(query): Query<ConnectQuery>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, ApiError> {
    // Materialize the coordinator before upgrading so store failures surface
    // as HTTP errors instead of silent socket closes.
    state.coordinator().await?;
    Ok(ws.on_upgrade(move |socket| run_coordinator_connection(state, query.agent_id, socket)))
}

/// GET /v1/agents/{agent_id}/ws
pub async fn agent_ws(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, ApiError> {
    state.agent_state(&agent_id).await?;
    Ok(ws.on_upgrade(move |socket| run_agent_connection(state, agent_id, socket)))
}

/// GET /v1/locks/{resource}/ws
pub async fn lock_ws(
    State(state): State<AppState>,
    Path(resource): Path<String>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, ApiError> {
    state.lock_actor(&resource).await?;
    Ok(ws.on_upgrade(move |socket| run_lock_connection(state, resource, socket)))
}

async fn run_coordinator_connection(
    state: AppState,
    agent_id: Option<String>,
    socket: WebSocket,
) {
    let now = Utc::now();
    let coordinator = match state.coordinator().await {
        Ok(coordinator) => coordinator,
        Err(e) => {
            warn!(error = %e, "Coordinator unavailable for push connection");
            return;
        }
    };

    if let Some(agent_id) = &agent_id {
        let upsert = AgentUpsert {
            agent_id: agent_id.clone(),
            status: Some(AgentStatus::Active),
            ..Default::default()
        };
        match coordinator.upsert_agent(upsert, now).await {
            Ok(agent) => {
                let push = Push::new(event_types::AGENT_UPDATE, now, &agent);
                state
                    .fanout()
                    .publish_except(ActorKind::Coordinator, COORDINATOR_KEY, &push, agent_id);
            }
            Err(e) => warn!(agent_id = %agent_id, error = %e, "Connect upsert failed"),
        }
    }

    let snapshot = match coordinator.snapshot(now).await {
        Ok(snapshot) => Push::new(event_types::SNAPSHOT, now, &snapshot),
        Err(e) => {
            warn!(error = %e, "Failed to assemble coordinator snapshot");
            return;
        }
    };

    let (conn_id, rx) =
        state
            .fanout()
            .subscribe(ActorKind::Coordinator, COORDINATOR_KEY, agent_id.clone());
    pump(socket, snapshot, rx).await;
    state
        .fanout()
        .unsubscribe(ActorKind::Coordinator, COORDINATOR_KEY, conn_id);

    if let Some(agent_id) = &agent_id {
        let now = Utc::now();
        match coordinator.agent_disconnected(agent_id, now).await {
            Ok(Some(agent)) => {
                let push = Push::new(event_types::AGENT_UPDATE, now, &agent);
                state
                    .fanout()
                    .publish(ActorKind::Coordinator, COORDINATOR_KEY, &push);
            }
            Ok(None) => {}
            Err(e) => warn!(agent_id = %agent_id, error = %e, "Disconnect update failed"),
        }
    }
}

async fn run_lock_connection(state: AppState, resource: String, socket: WebSocket) {
    let actor = match state.lock_actor(&resource).await {
        Ok(actor) => actor,
        Err(e) => {
            warn!(resource = %resource, error = %e, "Lock actor unavailable for push connection");
            return;
        }
    };

    let snapshot = match actor.check(Utc::now()).await {
        Ok(lock) => Push::new(
            event_types::SNAPSHOT,
            Utc::now(),
            &serde_json::json!({ "resource_path": resource, "lock": lock }),
        ),
        Err(e) => {
            warn!(resource = %resource, error = %e, "Failed to read lock state");
            return;
        }
    };

    let (conn_id, rx) = state.fanout().subscribe(ActorKind::Lock, &resource, None);
    pump(socket, snapshot, rx).await;
    state.fanout().unsubscribe(ActorKind::Lock, &resource, conn_id);
}

async fn run_agent_connection(state: AppState, agent_id: String, socket: WebSocket) {
    let actor = match state.agent_state(&agent_id).await {
        Ok(actor) => actor,
        Err(e) => {
            warn!(agent_id = %agent_id, error = %e, "Agent state unavailable for push connection");
            return;
        }
    };

    let snapshot = match actor.state().await {
        Ok(snapshot) => Push::new(event_types::SNAPSHOT, Utc::now(), &snapshot),
        Err(e) => {
            warn!(agent_id = %agent_id, error = %e, "Failed to assemble agent snapshot");
            return;
        }
    };

    let (conn_id, rx) = state.fanout().subscribe(ActorKind::Agent, &agent_id, None);
    pump(socket, snapshot, rx).await;
    state.fanout().unsubscribe(ActorKind::Agent, &agent_id, conn_id);
}

/// Sends the snapshot, then forwards frames until the connection closes.
async fn pump(socket: WebSocket, snapshot: Push, mut rx: mpsc::UnboundedReceiver<Push>) {
    let (mut sender, mut receiver) = socket.split();

    if sender
        .send(Message::Text(snapshot.to_json().into()))
        .await
        .is_err()
    {
        return;
    }

    loop {
        tokio::select! {
            frame = rx.recv() => match frame {
                Some(push) => {
                    if sender.send(Message::Text(push.to_json().into())).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            incoming = receiver.next() => match incoming {
                // Pings are answered at the protocol layer; inbound text is
                // not part of the push channel and is ignored.
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
}

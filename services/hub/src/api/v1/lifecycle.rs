//! Soul/body lifecycle endpoints.

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;

use waggle_id::{BodyId, SoulId, TransferId};

use crate::api::error::ApiError;
use crate::lifecycle::{BodyPatch, CreateSoul, InitiateTransfer, SoulCheckpoint};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/souls", get(list_souls).post(create_soul))
        .route("/souls/{soul_id}", get(get_soul))
        .route("/souls/{soul_id}/checkpoint", post(checkpoint_soul))
        .route("/souls/{soul_id}/bind", post(bind))
        .route("/souls/{soul_id}/transfers", post(initiate_transfer))
        .route("/souls/{soul_id}/bundle", get(bundle))
        .route("/bodies", get(list_bodies).post(spawn_body))
        .route("/bodies/{body_id}", get(get_body))
        .route("/bodies/{body_id}/tokens", post(update_tokens))
        .route("/bodies/{body_id}/status", post(patch_body))
        .route("/transfers/{transfer_id}", get(get_transfer))
        .route("/transfers/{transfer_id}/complete", post(complete_transfer))
        .route("/transfers/{transfer_id}/fail", post(fail_transfer))
        .route("/transfers/{transfer_id}/rollback", post(rollback_transfer))
        .route("/lifecycle/dashboard", get(dashboard))
}

fn parse_soul_id(raw: &str) -> Result<SoulId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::bad_request("invalid_soul_id", "Invalid soul ID format"))
}

fn parse_body_id(raw: &str) -> Result<BodyId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::bad_request("invalid_body_id", "Invalid body ID format"))
}

fn parse_transfer_id(raw: &str) -> Result<TransferId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::bad_request("invalid_transfer_id", "Invalid transfer ID format"))
}

// -----------------------------------------------------------------------------
// Souls
// -----------------------------------------------------------------------------

async fn create_soul(
    State(state): State<AppState>,
    Json(create): Json<CreateSoul>,
) -> Result<impl IntoResponse, ApiError> {
    let soul = state.lifecycle().await?.create_soul(create, Utc::now()).await?;
    Ok(Json(soul))
}

async fn list_souls(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let souls = state.lifecycle().await?.list_souls().await?;
    Ok(Json(souls))
}

async fn get_soul(
    State(state): State<AppState>,
    Path(soul_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let soul_id = parse_soul_id(&soul_id)?;
    let soul = state.lifecycle().await?.get_soul(soul_id).await?;
    Ok(Json(soul))
}

async fn checkpoint_soul(
    State(state): State<AppState>,
    Path(soul_id): Path<String>,
    Json(checkpoint): Json<SoulCheckpoint>,
) -> Result<impl IntoResponse, ApiError> {
    let soul_id = parse_soul_id(&soul_id)?;
    let soul = state
        .lifecycle()
        .await?
        .checkpoint_soul(soul_id, checkpoint, Utc::now())
        .await?;
    Ok(Json(soul))
}

async fn bundle(
    State(state): State<AppState>,
    Path(soul_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let soul_id = parse_soul_id(&soul_id)?;
    let bundle = state.lifecycle().await?.bundle(soul_id).await?;
    Ok(Json(bundle))
}

// -----------------------------------------------------------------------------
// Bodies
// -----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ListBodiesQuery {
    soul_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UpdateTokensRequest {
    tokens: i64,
}

#[derive(Debug, Deserialize)]
struct BindRequest {
    body_id: BodyId,
}

async fn spawn_body(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let body = state.lifecycle().await?.spawn_body(Utc::now()).await?;
    Ok(Json(body))
}

async fn list_bodies(
    State(state): State<AppState>,
    Query(query): Query<ListBodiesQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let soul_id = query
        .soul_id
        .as_deref()
        .map(parse_soul_id)
        .transpose()?;
    let bodies = state.lifecycle().await?.list_bodies(soul_id).await?;
    Ok(Json(bodies))
}

async fn get_body(
    State(state): State<AppState>,
    Path(body_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let body_id = parse_body_id(&body_id)?;
    let body = state.lifecycle().await?.get_body(body_id).await?;
    Ok(Json(body))
}

async fn update_tokens(
    State(state): State<AppState>,
    Path(body_id): Path<String>,
    Json(request): Json<UpdateTokensRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let body_id = parse_body_id(&body_id)?;
    let report = state
        .lifecycle()
        .await?
        .update_tokens(body_id, request.tokens, Utc::now())
        .await?;
    Ok(Json(report))
}

async fn patch_body(
    State(state): State<AppState>,
    Path(body_id): Path<String>,
    Json(patch): Json<BodyPatch>,
) -> Result<impl IntoResponse, ApiError> {
    let body_id = parse_body_id(&body_id)?;
    let body = state
        .lifecycle()
        .await?
        .patch_body(body_id, patch, Utc::now())
        .await?;
    Ok(Json(body))
}

// -----------------------------------------------------------------------------
// Binding and transfers
// -----------------------------------------------------------------------------

async fn bind(
    State(state): State<AppState>,
    Path(soul_id): Path<String>,
    Json(request): Json<BindRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let soul_id = parse_soul_id(&soul_id)?;
    let soul = state
        .lifecycle()
        .await?
        .bind(soul_id, request.body_id, Utc::now())
        .await?;
    Ok(Json(soul))
}

async fn initiate_transfer(
    State(state): State<AppState>,
    Path(soul_id): Path<String>,
    Json(initiate): Json<InitiateTransfer>,
) -> Result<impl IntoResponse, ApiError> {
    let soul_id = parse_soul_id(&soul_id)?;
    let transfer = state
        .lifecycle()
        .await?
        .initiate_transfer(soul_id, initiate, Utc::now())
        .await?;
    Ok(Json(transfer))
}

async fn get_transfer(
    State(state): State<AppState>,
    Path(transfer_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let transfer_id = parse_transfer_id(&transfer_id)?;
    let transfer = state.lifecycle().await?.get_transfer(transfer_id).await?;
    Ok(Json(transfer))
}

async fn complete_transfer(
    State(state): State<AppState>,
    Path(transfer_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let transfer_id = parse_transfer_id(&transfer_id)?;
    let transfer = state
        .lifecycle()
        .await?
        .complete_transfer(transfer_id, Utc::now())
        .await?;
    Ok(Json(transfer))
}

#[derive(Debug, Deserialize)]
struct FailRequest {
    error: String,
}

async fn fail_transfer(
    State(state): State<AppState>,
    Path(transfer_id): Path<String>,
    Json(request): Json<FailRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let transfer_id = parse_transfer_id(&transfer_id)?;
    let transfer = state
        .lifecycle()
        .await?
        .fail_transfer(transfer_id, &request.error, Utc::now())
        .await?;
    Ok(Json(transfer))
}

async fn rollback_transfer(
    State(state): State<AppState>,
    Path(transfer_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let transfer_id = parse_transfer_id(&transfer_id)?;
    let transfer = state
        .lifecycle()
        .await?
        .rollback_transfer(transfer_id, Utc::now())
        .await?;
    Ok(Json(transfer))
}

// -----------------------------------------------------------------------------
// Dashboard
// -----------------------------------------------------------------------------

async fn dashboard(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let dashboard = state.lifecycle().await?.dashboard().await?;
    Ok(Json(dashboard))
}

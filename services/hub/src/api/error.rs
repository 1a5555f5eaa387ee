//! Structured JSON API errors.
//!
//! Every handler failure serializes to a problem document. Conflicts carry
//! the current record (the standing claim, lock grant, or handoff) so the
//! caller can decide whether to back off or escalate without a second read.

use axum::{
    http::{header::CONTENT_TYPE, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::actors::ActorError;

#[derive(Debug, Serialize)]
pub struct Problem {
    pub code: String,
    pub title: String,
    pub status: u16,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<serde_json::Value>,
}

impl Problem {
    fn new(status: StatusCode, code: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            title: status
                .canonical_reason()
                .unwrap_or("Unknown Error")
                .to_string(),
            status: status.as_u16(),
            detail: detail.into(),
            current: None,
        }
    }
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub problem: Box<Problem>,
}

impl ApiError {
    pub fn bad_request(code: impl Into<String>, message: impl Into<String>) -> Self {
        let status = StatusCode::BAD_REQUEST;
        let problem = Box::new(Problem::new(status, code, message));
        Self { status, problem }
    }

    pub fn not_found(code: impl Into<String>, message: impl Into<String>) -> Self {
        let status = StatusCode::NOT_FOUND;
        let problem = Box::new(Problem::new(status, code, message));
        Self { status, problem }
    }

    pub fn conflict(code: impl Into<String>, message: impl Into<String>) -> Self {
        let status = StatusCode::CONFLICT;
        let problem = Box::new(Problem::new(status, code, message));
        Self { status, problem }
    }

    pub fn forbidden(code: impl Into<String>, message: impl Into<String>) -> Self {
        let status = StatusCode::FORBIDDEN;
        let problem = Box::new(Problem::new(status, code, message));
        Self { status, problem }
    }

    pub fn internal(code: impl Into<String>, message: impl Into<String>) -> Self {
        let status = StatusCode::INTERNAL_SERVER_ERROR;
        let problem = Box::new(Problem::new(status, code, message));
        Self { status, problem }
    }

    pub fn with_current(mut self, current: serde_json::Value) -> Self {
        self.problem.current = Some(current);
        self
    }
}

impl From<ActorError> for ApiError {
    fn from(err: ActorError) -> Self {
        match err {
            ActorError::NotFound(detail) => ApiError::not_found("not_found", detail),
            ActorError::Conflict { detail, current } => {
                ApiError::conflict("conflict", detail).with_current(current)
            }
            ActorError::Forbidden(detail) => ApiError::forbidden("forbidden", detail),
            ActorError::InvalidArgument(detail) => {
                ApiError::bad_request("invalid_argument", detail)
            }
            ActorError::Db(e) => {
                tracing::error!(error = %e, "Storage failure");
                ApiError::internal("internal_error", "Storage failure")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = (self.status, Json(self.problem)).into_response();
        response.headers_mut().insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/problem+json"),
        );
        response
    }
}

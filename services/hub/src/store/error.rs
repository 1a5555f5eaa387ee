//! Store error types.

use thiserror::Error;

/// Errors from a per-actor store.
#[derive(Debug, Error)]
pub enum DbError {
    /// Failed to open or create the store file.
    #[error("failed to open store: {0}")]
    Open(#[source] sqlx::Error),

    /// Failed to apply the schema on first open.
    #[error("schema setup failed: {0}")]
    Schema(#[source] sqlx::Error),

    /// Failed to execute a query.
    #[error("query failed: {0}")]
    Query(#[from] sqlx::Error),

    /// A JSON column failed to encode or decode.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored value no longer parses (e.g. an unknown status string).
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

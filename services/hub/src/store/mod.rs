//! Per-actor durable storage.
//!
//! Every actor instance owns one SQLite file, created lazily on first
//! reference and colocated with the hub process. The schema for an actor
//! kind is applied idempotently on open; there is no separate provisioning
//! or migration step.

mod error;
mod schema;

pub use error::DbError;
pub use schema::{AGENT_SCHEMA, COORDINATOR_SCHEMA, LOCK_SCHEMA};

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use tracing::debug;

/// Handle to one actor instance's SQLite store.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Opens (creating if needed) the store file and applies `schema`.
    pub async fn open(path: &Path, schema: &str) -> Result<Self, DbError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DbError::Open(sqlx::Error::Io(e)))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        // One connection per store: the actor cell's gate already serializes
        // access, so a larger pool would only hide ordering bugs.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(DbError::Open)?;

        sqlx::raw_sql(schema)
            .execute(&pool)
            .await
            .map_err(DbError::Schema)?;

        debug!(path = %path.display(), "Opened actor store");

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Encodes a value into a JSON text column.
pub fn encode_json<T: Serialize>(value: &T) -> Result<String, DbError> {
    Ok(serde_json::to_string(value)?)
}

/// Decodes a JSON text column.
pub fn decode_json<T: DeserializeOwned>(raw: &str) -> Result<T, DbError> {
    Ok(serde_json::from_str(raw)?)
}

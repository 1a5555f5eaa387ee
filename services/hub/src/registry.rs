//! Actor instance registry: the hub's router core.
//!
//! Every request resolves to exactly one actor cell, addressed by
//! `(ActorKind, key)`: the coordinator singleton, one cell per agent id, one
//! cell per lockable resource path. A cell pairs a serialization gate with
//! the instance's store handle; holding the gate is what gives each key its
//! one-at-a-time execution guarantee, so every actor operation takes it
//! before touching storage.
//!
//! Cells materialize lazily and idempotently: the first reference to a key
//! opens (creating if needed) its store file with the schema for that kind.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, MutexGuard};
use tracing::info;

use crate::store::{DbError, Store, AGENT_SCHEMA, COORDINATOR_SCHEMA, LOCK_SCHEMA};

/// The reserved key for the global coordinator instance.
pub const COORDINATOR_KEY: &str = "coordinator";

/// The kinds of actor the hub hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActorKind {
    Coordinator,
    Agent,
    Lock,
}

impl ActorKind {
    /// Subdirectory under the data dir for this kind's store files.
    pub fn dir(&self) -> &'static str {
        match self {
            ActorKind::Coordinator => "coordinator",
            ActorKind::Agent => "agents",
            ActorKind::Lock => "locks",
        }
    }

    fn schema(&self) -> &'static str {
        match self {
            ActorKind::Coordinator => COORDINATOR_SCHEMA,
            ActorKind::Agent => AGENT_SCHEMA,
            ActorKind::Lock => LOCK_SCHEMA,
        }
    }
}

impl std::fmt::Display for ActorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.dir())
    }
}

/// One actor instance: serialization gate + store handle.
///
/// Lock cells additionally carry an alarm slot for the expiry timer; the
/// slot holds at most one armed task and re-arming aborts the previous one.
pub struct ActorCell {
    kind: ActorKind,
    key: String,
    store: Store,
    gate: Mutex<()>,
    alarm: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl ActorCell {
    pub fn kind(&self) -> ActorKind {
        self.kind
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Takes this instance's gate. All operations on the cell's state must
    /// run under the returned guard.
    pub async fn enter(&self) -> MutexGuard<'_, ()> {
        self.gate.lock().await
    }

    /// Installs a new alarm task, aborting any previously armed one.
    pub fn arm_alarm(&self, handle: tokio::task::JoinHandle<()>) {
        let mut slot = self
            .alarm
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(old) = slot.replace(handle) {
            old.abort();
        }
    }

    /// Cancels the armed alarm, if any.
    pub fn disarm_alarm(&self) {
        let mut slot = self
            .alarm
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(old) = slot.take() {
            old.abort();
        }
    }
}

impl Drop for ActorCell {
    fn drop(&mut self) {
        self.disarm_alarm();
    }
}

/// Process-wide map from actor key to live cell.
pub struct Registry {
    data_dir: PathBuf,
    cells: Mutex<HashMap<(ActorKind, String), Arc<ActorCell>>>,
}

impl Registry {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            cells: Mutex::new(HashMap::new()),
        }
    }

    /// Resolves `(kind, key)` to its cell, materializing it on first
    /// reference. The registry map stays locked across the open so two
    /// concurrent first references cannot race to create the same store.
    pub async fn cell(&self, kind: ActorKind, key: &str) -> Result<Arc<ActorCell>, DbError> {
        let mut cells = self.cells.lock().await;
        if let Some(cell) = cells.get(&(kind, key.to_string())) {
            return Ok(Arc::clone(cell));
        }

        let path = self.data_dir.join(kind.dir()).join(store_file_name(key));
        let store = Store::open(&path, kind.schema()).await?;
        info!(kind = %kind, key = %key, "Materialized actor instance");

        let cell = Arc::new(ActorCell {
            kind,
            key: key.to_string(),
            store,
            gate: Mutex::new(()),
            alarm: std::sync::Mutex::new(None),
        });
        cells.insert((kind, key.to_string()), Arc::clone(&cell));
        Ok(cell)
    }

    /// The global coordinator cell.
    pub async fn coordinator(&self) -> Result<Arc<ActorCell>, DbError> {
        self.cell(ActorKind::Coordinator, COORDINATOR_KEY).await
    }
}

/// Derives a filesystem-safe, collision-free store filename from an
/// arbitrary key. Resource paths can contain separators and unicode, so the
/// sanitized stem is only for operator readability; uniqueness comes from
/// the digest suffix.
fn store_file_name(key: &str) -> String {
    let stem: String = key
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .take(48)
        .collect();

    let digest = Sha256::digest(key.as_bytes());
    let suffix = hex::encode(&digest[..4]);

    if stem.is_empty() {
        format!("{suffix}.db")
    } else {
        format!("{stem}-{suffix}.db")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_names_are_sanitized() {
        let name = store_file_name("src/api/mod.rs");
        assert!(name.starts_with("src-api-mod.rs-"));
        assert!(name.ends_with(".db"));
        assert!(!name.contains('/'));
    }

    #[test]
    fn distinct_keys_never_collide_on_sanitized_stem() {
        // Both sanitize to the same stem; the digest suffix must differ.
        let a = store_file_name("db migration");
        let b = store_file_name("db/migration");
        assert_ne!(a, b);
    }

    #[test]
    fn empty_key_still_produces_a_name() {
        let name = store_file_name("");
        assert!(name.ends_with(".db"));
        assert!(name.len() > 3);
    }

    #[tokio::test]
    async fn cell_creation_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::new(dir.path().to_path_buf());

        let a = registry.cell(ActorKind::Agent, "builder-1").await.unwrap();
        let b = registry.cell(ActorKind::Agent, "builder-1").await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        let other = registry.cell(ActorKind::Agent, "builder-2").await.unwrap();
        assert!(!Arc::ptr_eq(&a, &other));
    }

    #[tokio::test]
    async fn kinds_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::new(dir.path().to_path_buf());

        let agent = registry.cell(ActorKind::Agent, "x").await.unwrap();
        let lock = registry.cell(ActorKind::Lock, "x").await.unwrap();
        assert!(!Arc::ptr_eq(&agent, &lock));
    }
}

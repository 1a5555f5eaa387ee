//! Shared helpers for hub integration tests.
//!
//! Each test gets a fresh registry over a scratch data dir, so actor cells
//! exercise the real SQLite stores. Time-dependent behavior (claim
//! staleness, lock expiry, burn rates) is driven through the explicit `now`
//! parameters rather than by sleeping.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use tempfile::TempDir;

use waggle_hub::actors::{AgentState, Coordinator, LockActor};
use waggle_hub::lifecycle::Lifecycle;
use waggle_hub::registry::{ActorKind, Registry};

pub struct Hub {
    pub registry: Arc<Registry>,
    // Held so the scratch dir outlives the registry.
    _dir: TempDir,
}

pub async fn hub() -> Hub {
    let dir = tempfile::tempdir().expect("scratch dir");
    Hub {
        registry: Arc::new(Registry::new(dir.path().to_path_buf())),
        _dir: dir,
    }
}

impl Hub {
    pub async fn coordinator(&self) -> Coordinator {
        Coordinator::new(self.registry.coordinator().await.expect("coordinator cell"))
    }

    pub async fn lifecycle(&self) -> Lifecycle {
        Lifecycle::new(self.registry.coordinator().await.expect("coordinator cell"))
    }

    pub async fn agent(&self, agent_id: &str) -> AgentState {
        AgentState::new(
            self.registry
                .cell(ActorKind::Agent, agent_id)
                .await
                .expect("agent cell"),
        )
    }

    pub async fn lock(&self, resource: &str) -> LockActor {
        LockActor::new(
            self.registry
                .cell(ActorKind::Lock, resource)
                .await
                .expect("lock cell"),
        )
    }
}

/// A fixed base instant so simulated clocks are deterministic.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 8, 1, 9, 0, 0).unwrap()
}

pub fn minutes(n: i64) -> Duration {
    Duration::minutes(n)
}

pub fn millis(n: i64) -> Duration {
    Duration::milliseconds(n)
}

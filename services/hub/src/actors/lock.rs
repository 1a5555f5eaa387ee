//! Per-resource lock actor.
//!
//! One instance per lockable resource path, granting time-bounded exclusive
//! ownership. Expiry is enforced twice over: every read path lazily releases
//! a lock past its deadline, and a one-shot alarm task re-armed on each
//! grant fires a check at the deadline so waiters see the release promptly.
//! The alarm is a liveness optimization only; correctness never depends on
//! it firing.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::SqliteRow;
use tracing::{debug, warn};

use waggle_events::{LockHistoryEntry, LockInfo, Push, ReleaseKind};

use crate::fanout::Fanout;
use crate::registry::{ActorCell, ActorKind};
use crate::store::DbError;

use super::ActorError;

/// Release log entries kept per resource.
pub const LOCK_HISTORY_CAP: i64 = 50;

pub struct LockActor {
    cell: Arc<ActorCell>,
}

struct LockRow {
    resource_path: String,
    resource_type: String,
    locked_by: String,
    reason: String,
    locked_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, SqliteRow> for LockRow {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Self {
            resource_path: row.try_get("resource_path")?,
            resource_type: row.try_get("resource_type")?,
            locked_by: row.try_get("locked_by")?,
            reason: row.try_get("reason")?,
            locked_at: row.try_get("locked_at")?,
            expires_at: row.try_get("expires_at")?,
        })
    }
}

impl LockRow {
    fn into_lock(self) -> LockInfo {
        LockInfo {
            resource_path: self.resource_path,
            resource_type: self.resource_type,
            locked_by: self.locked_by,
            reason: self.reason,
            locked_at: self.locked_at,
            expires_at: self.expires_at,
        }
    }
}

struct HistoryRow {
    locked_by: String,
    reason: String,
    release_kind: String,
    released_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, SqliteRow> for HistoryRow {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Self {
            locked_by: row.try_get("locked_by")?,
            reason: row.try_get("reason")?,
            release_kind: row.try_get("release_kind")?,
            released_at: row.try_get("released_at")?,
        })
    }
}

impl HistoryRow {
    fn into_entry(self) -> Result<LockHistoryEntry, DbError> {
        Ok(LockHistoryEntry {
            locked_by: self.locked_by,
            reason: self.reason,
            release: self.release_kind.parse().map_err(DbError::Corrupt)?,
            released_at: self.released_at,
        })
    }
}

impl LockActor {
    pub fn new(cell: Arc<ActorCell>) -> Self {
        Self { cell }
    }

    fn resource_path(&self) -> &str {
        self.cell.key()
    }

    /// Current lock, or None. A lock observed past its deadline is released
    /// here before answering.
    pub async fn check(&self, now: DateTime<Utc>) -> Result<Option<LockInfo>, ActorError> {
        let _gate = self.cell.enter().await;
        self.live_lock(now).await
    }

    /// Grants or renews the lock. A live lock held by a different agent
    /// yields Conflict with the current grant.
    pub async fn lock(
        &self,
        agent_id: &str,
        reason: &str,
        resource_type: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<LockInfo, ActorError> {
        if agent_id.is_empty() {
            return Err(ActorError::InvalidArgument("agent_id is required".into()));
        }
        if ttl <= Duration::zero() {
            return Err(ActorError::InvalidArgument(
                "ttl_ms must be positive".into(),
            ));
        }

        let _gate = self.cell.enter().await;

        if let Some(current) = self.live_lock(now).await? {
            if current.locked_by != agent_id {
                return Err(ActorError::conflict(
                    format!(
                        "{} is locked by {}",
                        self.resource_path(),
                        current.locked_by
                    ),
                    &current,
                ));
            }
        }

        let lock = LockInfo {
            resource_path: self.resource_path().to_string(),
            resource_type: resource_type.to_string(),
            locked_by: agent_id.to_string(),
            reason: reason.to_string(),
            locked_at: now,
            expires_at: now + ttl,
        };

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO lock
                (resource_path, resource_type, locked_by, reason, locked_at, expires_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&lock.resource_path)
        .bind(&lock.resource_type)
        .bind(&lock.locked_by)
        .bind(&lock.reason)
        .bind(lock.locked_at)
        .bind(lock.expires_at)
        .execute(self.cell.store().pool())
        .await
        .map_err(DbError::Query)?;

        Ok(lock)
    }

    /// Releases the lock. Only the owner may release unless `force` is set;
    /// a forced release by a non-owner is logged as stolen.
    pub async fn unlock(
        &self,
        agent_id: &str,
        force: bool,
        now: DateTime<Utc>,
    ) -> Result<ReleaseKind, ActorError> {
        let _gate = self.cell.enter().await;

        let current = self
            .live_lock(now)
            .await?
            .ok_or_else(|| ActorError::NotFound(format!("{} is not locked", self.resource_path())))?;

        let kind = if current.locked_by == agent_id {
            ReleaseKind::Manual
        } else if force {
            ReleaseKind::Stolen
        } else {
            return Err(ActorError::Forbidden(format!(
                "{} is locked by {}",
                self.resource_path(),
                current.locked_by
            )));
        };

        self.release(&current, kind, now).await?;
        self.cell.disarm_alarm();
        Ok(kind)
    }

    /// Release log, newest first, capped at 50 entries.
    pub async fn history(&self) -> Result<Vec<LockHistoryEntry>, ActorError> {
        let _gate = self.cell.enter().await;
        let rows = sqlx::query_as::<_, HistoryRow>(
            "SELECT * FROM history ORDER BY id DESC LIMIT ?1",
        )
        .bind(LOCK_HISTORY_CAP)
        .fetch_all(self.cell.store().pool())
        .await
        .map_err(DbError::Query)?;

        rows.into_iter()
            .map(|r| r.into_entry().map_err(ActorError::Db))
            .collect()
    }

    /// Reads the stored lock, releasing it first if expired. Callers hold
    /// the gate.
    async fn live_lock(&self, now: DateTime<Utc>) -> Result<Option<LockInfo>, ActorError> {
        let row = sqlx::query_as::<_, LockRow>("SELECT * FROM lock WHERE resource_path = ?1")
            .bind(self.resource_path())
            .fetch_optional(self.cell.store().pool())
            .await
            .map_err(DbError::Query)?;

        let Some(lock) = row.map(LockRow::into_lock) else {
            return Ok(None);
        };

        if lock.expires_at <= now {
            debug!(resource = %self.resource_path(), owner = %lock.locked_by, "Lock expired");
            self.release(&lock, ReleaseKind::Expired, now).await?;
            return Ok(None);
        }

        Ok(Some(lock))
    }

    async fn release(
        &self,
        lock: &LockInfo,
        kind: ReleaseKind,
        now: DateTime<Utc>,
    ) -> Result<(), ActorError> {
        let pool = self.cell.store().pool();

        sqlx::query("DELETE FROM lock WHERE resource_path = ?1")
            .bind(&lock.resource_path)
            .execute(pool)
            .await
            .map_err(DbError::Query)?;

        sqlx::query(
            "INSERT INTO history (locked_by, reason, release_kind, released_at) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(&lock.locked_by)
        .bind(&lock.reason)
        .bind(kind.to_string())
        .bind(now)
        .execute(pool)
        .await
        .map_err(DbError::Query)?;

        sqlx::query(
            "DELETE FROM history WHERE id NOT IN (SELECT id FROM history ORDER BY id DESC LIMIT ?1)",
        )
        .bind(LOCK_HISTORY_CAP)
        .execute(pool)
        .await
        .map_err(DbError::Query)?;

        Ok(())
    }
}

/// Arms the cell's one-shot expiry alarm for a freshly granted lock.
///
/// At the deadline the task runs a plain `check`, which performs the lazy
/// release and publishes the update. Re-arming on a renewed grant aborts the
/// previous task, so at most one alarm is pending per cell.
pub fn arm_expiry(cell: Arc<ActorCell>, fanout: Fanout, expires_at: DateTime<Utc>) {
    let delay = (expires_at - Utc::now())
        .to_std()
        .unwrap_or(std::time::Duration::ZERO);

    let handle = tokio::spawn({
        let cell = Arc::clone(&cell);
        async move {
            tokio::time::sleep(delay).await;

            let key = cell.key().to_string();
            let actor = LockActor::new(Arc::clone(&cell));
            match actor.check(Utc::now()).await {
                Ok(lock) => {
                    // Renewals re-arm a fresh alarm, so reaching here with a
                    // live lock means this alarm is stale; only the released
                    // case is worth announcing.
                    if lock.is_none() {
                        let push = Push::new(
                            waggle_events::event_types::LOCK_UPDATE,
                            Utc::now(),
                            &serde_json::json!({ "resource_path": key, "lock": null }),
                        );
                        fanout.publish(ActorKind::Lock, &key, &push);
                    }
                }
                Err(e) => {
                    warn!(resource = %key, error = %e, "Lock expiry check failed");
                }
            }
        }
    });

    cell.arm_alarm(handle);
}

//! Soul/body lifecycle protocol.
//!
//! Layers identity migration on top of the coordinator instance: souls,
//! bodies, and transfers live in the coordinator's store and every
//! operation here runs under the coordinator cell's gate, so the protocol
//! never bypasses the actor boundary.
//!
//! The cross-record steps of a transfer are sequential writes, not a
//! distributed transaction. A crash mid-protocol leaves the transfer in a
//! non-terminal status with the old body still nominally bound; recovery is
//! an operator re-driving `complete`, `fail`, or `rollback` off the
//! dashboard, never an automatic retry.

mod tokens;

pub use tokens::{budget_level, estimated_minutes_to_limit, smooth_burn_rate, CRITICAL_TOKENS};

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use tracing::info;

use waggle_events::{
    Body, BodyRecord, BodyStatus, BudgetLevel, MemoryImportance, Soul, SoulFocus, SoulKnowledge,
    SoulMemory, SoulMetrics, Transfer, TransferStatus,
};
use waggle_id::{BodyId, SoulId, TransferId};

use crate::actors::ActorError;
use crate::registry::ActorCell;
use crate::store::{decode_json, encode_json, DbError};

/// Memories kept on a soul; lowest-importance, oldest entries fall off.
const SOUL_MEMORY_CAP: usize = 200;

/// Injection bundle trim sizes.
const BUNDLE_PATTERNS: usize = 20;
const BUNDLE_ANTI_PATTERNS: usize = 10;
const BUNDLE_MEMORIES: usize = 30;

pub struct Lifecycle {
    cell: Arc<ActorCell>,
}

// =============================================================================
// Request shapes
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct CreateSoul {
    pub name: String,
    pub identity: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewSoulMemory {
    pub content: String,
    pub importance: MemoryImportance,
}

/// Incremental soul checkpoint. Scalars replace, lists append, expertise
/// merges per key.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SoulCheckpoint {
    #[serde(default)]
    pub identity: Option<String>,
    #[serde(default)]
    pub current_task: Option<String>,
    #[serde(default)]
    pub pending_work: Option<Vec<String>>,
    #[serde(default)]
    pub blockers: Option<Vec<String>>,
    #[serde(default)]
    pub goals: Option<Vec<String>>,
    #[serde(default)]
    pub add_patterns: Vec<String>,
    #[serde(default)]
    pub add_anti_patterns: Vec<String>,
    #[serde(default)]
    pub add_memories: Vec<NewSoulMemory>,
    #[serde(default)]
    pub expertise: BTreeMap<String, f64>,
    #[serde(default)]
    pub completion_rate: Option<f64>,
    /// Tokens processed since the previous checkpoint; added to the total.
    #[serde(default)]
    pub tokens_processed: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BodyPatch {
    #[serde(default)]
    pub status: Option<BodyStatus>,
    /// When true, bumps the body's error counter.
    #[serde(default)]
    pub error: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InitiateTransfer {
    pub reason: String,
    /// Target body; a fresh one is spawned when absent.
    #[serde(default)]
    pub to_body_id: Option<BodyId>,
}

// =============================================================================
// Views
// =============================================================================

/// Result of a token update: the body plus its derived budget standing.
#[derive(Debug, Serialize)]
pub struct TokenReport {
    pub body: Body,
    pub level: BudgetLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_minutes_to_limit: Option<i64>,
}

/// The trimmed soul view used to re-prime a fresh process. This is the
/// payload an external completion service consumes; assembling it is the
/// extent of the hub's involvement.
#[derive(Debug, Serialize)]
pub struct InjectionBundle {
    pub soul_id: SoulId,
    pub name: String,
    pub identity: String,
    pub focus: SoulFocus,
    pub patterns: Vec<String>,
    pub anti_patterns: Vec<String>,
    pub memories: Vec<SoulMemory>,
    pub metrics: SoulMetrics,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_body_id: Option<BodyId>,
}

#[derive(Debug, Serialize)]
pub struct SoulOverview {
    pub soul_id: SoulId,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_body_id: Option<BodyId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_status: Option<BodyStatus>,
    pub current_tokens: i64,
    pub burn_rate: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<BudgetLevel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_minutes_to_limit: Option<i64>,
    pub transfer_count: i64,
}

/// Operator view: every soul with its bound body's budget standing, plus
/// any transfer stuck in a non-terminal state.
#[derive(Debug, Serialize)]
pub struct Dashboard {
    pub souls: Vec<SoulOverview>,
    pub active_transfers: Vec<Transfer>,
}

// =============================================================================
// Row mapping
// =============================================================================

struct SoulRow {
    soul_id: String,
    name: String,
    identity: String,
    knowledge: String,
    focus: String,
    metrics: String,
    current_body_id: Option<String>,
    body_history: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, SqliteRow> for SoulRow {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Self {
            soul_id: row.try_get("soul_id")?,
            name: row.try_get("name")?,
            identity: row.try_get("identity")?,
            knowledge: row.try_get("knowledge")?,
            focus: row.try_get("focus")?,
            metrics: row.try_get("metrics")?,
            current_body_id: row.try_get("current_body_id")?,
            body_history: row.try_get("body_history")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl SoulRow {
    fn into_soul(self) -> Result<Soul, DbError> {
        let current_body_id = self
            .current_body_id
            .map(|raw| BodyId::parse(&raw).map_err(|e| DbError::Corrupt(e.to_string())))
            .transpose()?;
        Ok(Soul {
            soul_id: SoulId::parse(&self.soul_id).map_err(|e| DbError::Corrupt(e.to_string()))?,
            name: self.name,
            identity: self.identity,
            knowledge: decode_json(&self.knowledge)?,
            focus: decode_json(&self.focus)?,
            metrics: decode_json(&self.metrics)?,
            current_body_id,
            body_history: decode_json(&self.body_history)?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

struct BodyRow {
    body_id: String,
    soul_id: Option<String>,
    status: String,
    current_tokens: i64,
    peak_tokens: i64,
    burn_rate: f64,
    last_heartbeat: DateTime<Utc>,
    error_count: i64,
    created_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, SqliteRow> for BodyRow {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Self {
            body_id: row.try_get("body_id")?,
            soul_id: row.try_get("soul_id")?,
            status: row.try_get("status")?,
            current_tokens: row.try_get("current_tokens")?,
            peak_tokens: row.try_get("peak_tokens")?,
            burn_rate: row.try_get("burn_rate")?,
            last_heartbeat: row.try_get("last_heartbeat")?,
            error_count: row.try_get("error_count")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl BodyRow {
    fn into_body(self) -> Result<Body, DbError> {
        let soul_id = self
            .soul_id
            .map(|raw| SoulId::parse(&raw).map_err(|e| DbError::Corrupt(e.to_string())))
            .transpose()?;
        Ok(Body {
            body_id: BodyId::parse(&self.body_id).map_err(|e| DbError::Corrupt(e.to_string()))?,
            soul_id,
            status: self.status.parse().map_err(DbError::Corrupt)?,
            current_tokens: self.current_tokens,
            peak_tokens: self.peak_tokens,
            burn_rate: self.burn_rate,
            last_heartbeat: self.last_heartbeat,
            error_count: self.error_count,
            created_at: self.created_at,
        })
    }
}

struct TransferRow {
    transfer_id: String,
    soul_id: String,
    from_body_id: String,
    to_body_id: String,
    status: String,
    reason: String,
    tokens_saved: i64,
    error: Option<String>,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl<'r> sqlx::FromRow<'r, SqliteRow> for TransferRow {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Self {
            transfer_id: row.try_get("transfer_id")?,
            soul_id: row.try_get("soul_id")?,
            from_body_id: row.try_get("from_body_id")?,
            to_body_id: row.try_get("to_body_id")?,
            status: row.try_get("status")?,
            reason: row.try_get("reason")?,
            tokens_saved: row.try_get("tokens_saved")?,
            error: row.try_get("error")?,
            created_at: row.try_get("created_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }
}

impl TransferRow {
    fn into_transfer(self) -> Result<Transfer, DbError> {
        Ok(Transfer {
            transfer_id: TransferId::parse(&self.transfer_id)
                .map_err(|e| DbError::Corrupt(e.to_string()))?,
            soul_id: SoulId::parse(&self.soul_id).map_err(|e| DbError::Corrupt(e.to_string()))?,
            from_body_id: BodyId::parse(&self.from_body_id)
                .map_err(|e| DbError::Corrupt(e.to_string()))?,
            to_body_id: BodyId::parse(&self.to_body_id)
                .map_err(|e| DbError::Corrupt(e.to_string()))?,
            status: self.status.parse().map_err(DbError::Corrupt)?,
            reason: self.reason,
            tokens_saved: self.tokens_saved,
            error: self.error,
            created_at: self.created_at,
            completed_at: self.completed_at,
        })
    }
}

// =============================================================================
// Operations
// =============================================================================

impl Lifecycle {
    /// `cell` must be the coordinator cell; soul/body records share its
    /// store and its gate.
    pub fn new(cell: Arc<ActorCell>) -> Self {
        Self { cell }
    }

    // -------------------------------------------------------------------------
    // Souls
    // -------------------------------------------------------------------------

    pub async fn create_soul(
        &self,
        create: CreateSoul,
        now: DateTime<Utc>,
    ) -> Result<Soul, ActorError> {
        if create.name.is_empty() {
            return Err(ActorError::InvalidArgument("name is required".into()));
        }

        let soul = Soul {
            soul_id: SoulId::new(),
            name: create.name,
            identity: create.identity,
            knowledge: SoulKnowledge::default(),
            focus: SoulFocus::default(),
            metrics: SoulMetrics::default(),
            current_body_id: None,
            body_history: Vec::new(),
            created_at: now,
            updated_at: now,
        };

        let _gate = self.cell.enter().await;
        sqlx::query(
            r#"
            INSERT INTO souls
                (soul_id, name, identity, knowledge, focus, metrics,
                 current_body_id, body_history, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(soul.soul_id.to_string())
        .bind(&soul.name)
        .bind(&soul.identity)
        .bind(encode_json(&soul.knowledge)?)
        .bind(encode_json(&soul.focus)?)
        .bind(encode_json(&soul.metrics)?)
        .bind(soul.current_body_id.map(|id| id.to_string()))
        .bind(encode_json(&soul.body_history)?)
        .bind(soul.created_at)
        .bind(soul.updated_at)
        .execute(self.cell.store().pool())
        .await
        .map_err(DbError::Query)?;

        info!(soul_id = %soul.soul_id, name = %soul.name, "Soul created");
        Ok(soul)
    }

    pub async fn get_soul(&self, soul_id: SoulId) -> Result<Soul, ActorError> {
        let _gate = self.cell.enter().await;
        self.fetch_soul(soul_id).await
    }

    pub async fn list_souls(&self) -> Result<Vec<Soul>, ActorError> {
        let _gate = self.cell.enter().await;
        let rows = sqlx::query_as::<_, SoulRow>("SELECT * FROM souls ORDER BY created_at ASC")
            .fetch_all(self.cell.store().pool())
            .await
            .map_err(DbError::Query)?;
        rows.into_iter()
            .map(|r| r.into_soul().map_err(ActorError::Db))
            .collect()
    }

    /// Applies an incremental checkpoint to a soul.
    pub async fn checkpoint_soul(
        &self,
        soul_id: SoulId,
        checkpoint: SoulCheckpoint,
        now: DateTime<Utc>,
    ) -> Result<Soul, ActorError> {
        let _gate = self.cell.enter().await;
        let mut soul = self.fetch_soul(soul_id).await?;

        if let Some(identity) = checkpoint.identity {
            soul.identity = identity;
        }
        if let Some(current_task) = checkpoint.current_task {
            soul.focus.current_task = Some(current_task);
        }
        if let Some(pending_work) = checkpoint.pending_work {
            soul.focus.pending_work = pending_work;
        }
        if let Some(blockers) = checkpoint.blockers {
            soul.focus.blockers = blockers;
        }
        if let Some(goals) = checkpoint.goals {
            soul.focus.goals = goals;
        }

        soul.knowledge.patterns.extend(checkpoint.add_patterns);
        soul.knowledge
            .anti_patterns
            .extend(checkpoint.add_anti_patterns);
        for memory in checkpoint.add_memories {
            soul.knowledge.memories.push(SoulMemory {
                content: memory.content,
                importance: memory.importance,
                at: now,
            });
        }
        trim_memories(&mut soul.knowledge.memories);

        for (skill, score) in checkpoint.expertise {
            soul.knowledge.expertise.insert(skill, score);
        }
        if let Some(completion_rate) = checkpoint.completion_rate {
            soul.metrics.completion_rate = completion_rate;
        }
        if let Some(tokens) = checkpoint.tokens_processed {
            soul.metrics.total_tokens_processed += tokens;
        }
        soul.updated_at = now;

        self.write_soul(&soul).await?;
        Ok(soul)
    }

    // -------------------------------------------------------------------------
    // Bodies
    // -------------------------------------------------------------------------

    /// Spawns a fresh, unbound body.
    pub async fn spawn_body(&self, now: DateTime<Utc>) -> Result<Body, ActorError> {
        let _gate = self.cell.enter().await;
        self.spawn_body_inner(now).await
    }

    async fn spawn_body_inner(&self, now: DateTime<Utc>) -> Result<Body, ActorError> {
        let body = Body {
            body_id: BodyId::new(),
            soul_id: None,
            status: BodyStatus::Ready,
            current_tokens: 0,
            peak_tokens: 0,
            burn_rate: 0.0,
            last_heartbeat: now,
            error_count: 0,
            created_at: now,
        };
        self.insert_body(&body).await?;
        info!(body_id = %body.body_id, "Body spawned");
        Ok(body)
    }

    pub async fn get_body(&self, body_id: BodyId) -> Result<Body, ActorError> {
        let _gate = self.cell.enter().await;
        self.fetch_body(body_id).await
    }

    pub async fn list_bodies(&self, soul_id: Option<SoulId>) -> Result<Vec<Body>, ActorError> {
        let _gate = self.cell.enter().await;
        let pool = self.cell.store().pool();
        let rows = match soul_id {
            Some(soul_id) => {
                sqlx::query_as::<_, BodyRow>(
                    "SELECT * FROM bodies WHERE soul_id = ?1 ORDER BY created_at ASC",
                )
                .bind(soul_id.to_string())
                .fetch_all(pool)
                .await
            }
            None => {
                sqlx::query_as::<_, BodyRow>("SELECT * FROM bodies ORDER BY created_at ASC")
                    .fetch_all(pool)
                    .await
            }
        }
        .map_err(DbError::Query)?;
        rows.into_iter()
            .map(|r| r.into_body().map_err(ActorError::Db))
            .collect()
    }

    /// Records a token reading and recomputes the smoothed burn rate.
    pub async fn update_tokens(
        &self,
        body_id: BodyId,
        new_tokens: i64,
        now: DateTime<Utc>,
    ) -> Result<TokenReport, ActorError> {
        if new_tokens < 0 {
            return Err(ActorError::InvalidArgument("tokens must be >= 0".into()));
        }

        let _gate = self.cell.enter().await;
        let mut body = self.fetch_body(body_id).await?;

        if body.status == BodyStatus::Terminated {
            return Err(ActorError::conflict(
                format!("body {body_id} is terminated"),
                &body,
            ));
        }

        let minutes_elapsed =
            (now - body.last_heartbeat).num_milliseconds() as f64 / 60_000.0;
        if minutes_elapsed > 0.0 {
            let instant = (new_tokens - body.current_tokens) as f64 / minutes_elapsed;
            body.burn_rate = smooth_burn_rate(body.burn_rate, instant);
        }
        body.current_tokens = new_tokens;
        body.peak_tokens = body.peak_tokens.max(new_tokens);
        body.last_heartbeat = now;

        self.write_body(&body).await?;

        let level = budget_level(body.current_tokens);
        let estimated = estimated_minutes_to_limit(body.current_tokens, body.burn_rate);
        Ok(TokenReport {
            body,
            level,
            estimated_minutes_to_limit: estimated,
        })
    }

    /// Applies a status/error patch to a body.
    pub async fn patch_body(
        &self,
        body_id: BodyId,
        patch: BodyPatch,
        now: DateTime<Utc>,
    ) -> Result<Body, ActorError> {
        let _gate = self.cell.enter().await;
        let mut body = self.fetch_body(body_id).await?;

        if let Some(status) = patch.status {
            body.status = status;
        }
        if patch.error {
            body.error_count += 1;
        }
        body.last_heartbeat = now;

        self.write_body(&body).await?;
        Ok(body)
    }

    // -------------------------------------------------------------------------
    // Binding and transfers
    // -------------------------------------------------------------------------

    /// Binds an unbound soul to a live body. The initial binding only;
    /// rebinding is what transfers are for.
    pub async fn bind(
        &self,
        soul_id: SoulId,
        body_id: BodyId,
        now: DateTime<Utc>,
    ) -> Result<Soul, ActorError> {
        let _gate = self.cell.enter().await;
        let mut soul = self.fetch_soul(soul_id).await?;
        let mut body = self.fetch_body(body_id).await?;

        if let Some(bound) = soul.current_body_id {
            return Err(ActorError::conflict(
                format!("soul {soul_id} is already bound to {bound}"),
                &soul,
            ));
        }
        if body.status == BodyStatus::Terminated {
            return Err(ActorError::conflict(
                format!("body {body_id} is terminated"),
                &body,
            ));
        }
        if let Some(other) = body.soul_id {
            return Err(ActorError::conflict(
                format!("body {body_id} already hosts {other}"),
                &body,
            ));
        }

        body.soul_id = Some(soul_id);
        body.status = BodyStatus::Active;
        body.last_heartbeat = now;
        self.write_body(&body).await?;

        soul.current_body_id = Some(body_id);
        soul.updated_at = now;
        self.write_soul(&soul).await?;

        info!(soul_id = %soul_id, body_id = %body_id, "Soul bound to body");
        Ok(soul)
    }

    /// Starts a migration off the soul's current body. Spawns a target body
    /// when the caller did not supply one. Records `tokens_saved` as the
    /// old body's current usage.
    pub async fn initiate_transfer(
        &self,
        soul_id: SoulId,
        initiate: InitiateTransfer,
        now: DateTime<Utc>,
    ) -> Result<Transfer, ActorError> {
        let _gate = self.cell.enter().await;
        let soul = self.fetch_soul(soul_id).await?;

        let Some(from_body_id) = soul.current_body_id else {
            return Err(ActorError::conflict(
                format!("soul {soul_id} has no bound body"),
                &soul,
            ));
        };

        if let Some(active) = self.active_transfer(soul_id).await? {
            return Err(ActorError::conflict(
                format!("soul {soul_id} already has transfer {} in flight", active.transfer_id),
                &active,
            ));
        }

        let mut from_body = self.fetch_body(from_body_id).await?;

        let to_body = match initiate.to_body_id {
            Some(to_body_id) => {
                let body = self.fetch_body(to_body_id).await?;
                if body.status == BodyStatus::Terminated {
                    return Err(ActorError::conflict(
                        format!("body {to_body_id} is terminated"),
                        &body,
                    ));
                }
                if body.soul_id.is_some() {
                    return Err(ActorError::conflict(
                        format!("body {to_body_id} already hosts a soul"),
                        &body,
                    ));
                }
                body
            }
            None => self.spawn_body_inner(now).await?,
        };

        from_body.status = BodyStatus::Transferring;
        self.write_body(&from_body).await?;

        let transfer = Transfer {
            transfer_id: TransferId::new(),
            soul_id,
            from_body_id,
            to_body_id: to_body.body_id,
            status: TransferStatus::Initiated,
            reason: initiate.reason,
            tokens_saved: from_body.current_tokens,
            error: None,
            created_at: now,
            completed_at: None,
        };

        sqlx::query(
            r#"
            INSERT INTO transfers
                (transfer_id, soul_id, from_body_id, to_body_id, status, reason,
                 tokens_saved, error, created_at, completed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(transfer.transfer_id.to_string())
        .bind(transfer.soul_id.to_string())
        .bind(transfer.from_body_id.to_string())
        .bind(transfer.to_body_id.to_string())
        .bind(transfer.status.to_string())
        .bind(&transfer.reason)
        .bind(transfer.tokens_saved)
        .bind(&transfer.error)
        .bind(transfer.created_at)
        .bind(transfer.completed_at)
        .execute(self.cell.store().pool())
        .await
        .map_err(DbError::Query)?;

        info!(
            transfer_id = %transfer.transfer_id,
            soul_id = %soul_id,
            from = %from_body_id,
            to = %to_body.body_id,
            "Transfer initiated"
        );
        Ok(transfer)
    }

    pub async fn get_transfer(&self, transfer_id: TransferId) -> Result<Transfer, ActorError> {
        let _gate = self.cell.enter().await;
        self.fetch_transfer(transfer_id).await
    }

    /// Drives a transfer through extract → validate → inject → completed.
    ///
    /// Each intermediate status is written before its step runs, so a crash
    /// or validation failure leaves the transfer parked at the exact step
    /// that did not finish. Completing is the only operation anywhere that
    /// reassigns `soul.current_body_id`.
    pub async fn complete_transfer(
        &self,
        transfer_id: TransferId,
        now: DateTime<Utc>,
    ) -> Result<Transfer, ActorError> {
        let _gate = self.cell.enter().await;
        let mut transfer = self.fetch_transfer(transfer_id).await?;

        if transfer.status.is_terminal() {
            return Err(ActorError::conflict(
                format!("transfer {transfer_id} is already {}", transfer.status),
                &transfer,
            ));
        }

        // Extract: capture the old body's final usage.
        self.set_transfer_status(transfer_id, TransferStatus::Extracting)
            .await?;
        let from_body = self.fetch_body(transfer.from_body_id).await?;
        let mut soul = self.fetch_soul(transfer.soul_id).await?;

        // Validate: the binding must not have moved underneath the transfer.
        self.set_transfer_status(transfer_id, TransferStatus::Validating)
            .await?;
        if soul.current_body_id != Some(transfer.from_body_id) {
            transfer.status = TransferStatus::Validating;
            return Err(ActorError::conflict(
                format!(
                    "soul {} is no longer bound to {}",
                    transfer.soul_id, transfer.from_body_id
                ),
                &transfer,
            ));
        }
        let mut to_body = self.fetch_body(transfer.to_body_id).await?;
        if to_body.status == BodyStatus::Terminated {
            transfer.status = TransferStatus::Validating;
            return Err(ActorError::conflict(
                format!("target body {} is terminated", transfer.to_body_id),
                &transfer,
            ));
        }

        // Inject: rebind. Old body dies, new body activates, soul moves.
        self.set_transfer_status(transfer_id, TransferStatus::Injecting)
            .await?;

        sqlx::query(
            "UPDATE bodies SET status = 'terminated', soul_id = NULL WHERE body_id = ?1",
        )
        .bind(transfer.from_body_id.to_string())
        .execute(self.cell.store().pool())
        .await
        .map_err(DbError::Query)?;

        to_body.soul_id = Some(transfer.soul_id);
        to_body.status = BodyStatus::Active;
        to_body.last_heartbeat = now;
        self.write_body(&to_body).await?;

        soul.body_history.push(BodyRecord {
            body_id: from_body.body_id,
            started_at: from_body.created_at,
            ended_at: now,
            tokens_used: from_body.current_tokens,
            peak_tokens: from_body.peak_tokens,
            transfer_reason: transfer.reason.clone(),
        });
        soul.current_body_id = Some(transfer.to_body_id);
        soul.metrics.transfer_count += 1;
        soul.metrics.total_tokens_processed += from_body.current_tokens;
        soul.updated_at = now;
        self.write_soul(&soul).await?;

        transfer.status = TransferStatus::Completed;
        transfer.completed_at = Some(now);
        sqlx::query("UPDATE transfers SET status = ?2, completed_at = ?3 WHERE transfer_id = ?1")
            .bind(transfer.transfer_id.to_string())
            .bind(transfer.status.to_string())
            .bind(transfer.completed_at)
            .execute(self.cell.store().pool())
            .await
            .map_err(DbError::Query)?;

        info!(
            transfer_id = %transfer_id,
            soul_id = %transfer.soul_id,
            tokens_saved = transfer.tokens_saved,
            "Transfer completed"
        );
        Ok(transfer)
    }

    /// Marks a stuck transfer failed with an operator-supplied error.
    pub async fn fail_transfer(
        &self,
        transfer_id: TransferId,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<Transfer, ActorError> {
        let _gate = self.cell.enter().await;
        let mut transfer = self.fetch_transfer(transfer_id).await?;

        if transfer.status.is_terminal() {
            return Err(ActorError::conflict(
                format!("transfer {transfer_id} is already {}", transfer.status),
                &transfer,
            ));
        }

        transfer.status = TransferStatus::Failed;
        transfer.error = Some(error.to_string());
        transfer.completed_at = Some(now);

        sqlx::query(
            "UPDATE transfers SET status = ?2, error = ?3, completed_at = ?4 WHERE transfer_id = ?1",
        )
        .bind(transfer.transfer_id.to_string())
        .bind(transfer.status.to_string())
        .bind(&transfer.error)
        .bind(transfer.completed_at)
        .execute(self.cell.store().pool())
        .await
        .map_err(DbError::Query)?;

        Ok(transfer)
    }

    /// Abandons a transfer without touching the binding; the old body goes
    /// back to active duty.
    pub async fn rollback_transfer(
        &self,
        transfer_id: TransferId,
        now: DateTime<Utc>,
    ) -> Result<Transfer, ActorError> {
        let _gate = self.cell.enter().await;
        let mut transfer = self.fetch_transfer(transfer_id).await?;

        if transfer.status.is_terminal() {
            return Err(ActorError::conflict(
                format!("transfer {transfer_id} is already {}", transfer.status),
                &transfer,
            ));
        }

        let mut from_body = self.fetch_body(transfer.from_body_id).await?;
        if from_body.status == BodyStatus::Transferring {
            from_body.status = BodyStatus::Active;
            self.write_body(&from_body).await?;
        }

        transfer.status = TransferStatus::RolledBack;
        transfer.completed_at = Some(now);

        sqlx::query("UPDATE transfers SET status = ?2, completed_at = ?3 WHERE transfer_id = ?1")
            .bind(transfer.transfer_id.to_string())
            .bind(transfer.status.to_string())
            .bind(transfer.completed_at)
            .execute(self.cell.store().pool())
            .await
            .map_err(DbError::Query)?;

        Ok(transfer)
    }

    // -------------------------------------------------------------------------
    // Aggregates
    // -------------------------------------------------------------------------

    /// Assembles the trimmed re-priming payload for a soul.
    pub async fn bundle(&self, soul_id: SoulId) -> Result<InjectionBundle, ActorError> {
        let _gate = self.cell.enter().await;
        let soul = self.fetch_soul(soul_id).await?;

        let patterns = last_n(&soul.knowledge.patterns, BUNDLE_PATTERNS);
        let anti_patterns = last_n(&soul.knowledge.anti_patterns, BUNDLE_ANTI_PATTERNS);

        let mut memories: Vec<SoulMemory> = soul
            .knowledge
            .memories
            .iter()
            .filter(|m| m.importance >= MemoryImportance::High)
            .cloned()
            .collect();
        memories.sort_by(|a, b| b.importance.cmp(&a.importance).then(b.at.cmp(&a.at)));
        memories.truncate(BUNDLE_MEMORIES);

        Ok(InjectionBundle {
            soul_id: soul.soul_id,
            name: soul.name,
            identity: soul.identity,
            focus: soul.focus,
            patterns,
            anti_patterns,
            memories,
            metrics: soul.metrics,
            current_body_id: soul.current_body_id,
        })
    }

    /// Operator dashboard: souls with budget standings plus in-flight
    /// transfers.
    pub async fn dashboard(&self) -> Result<Dashboard, ActorError> {
        let _gate = self.cell.enter().await;
        let pool = self.cell.store().pool();

        let soul_rows = sqlx::query_as::<_, SoulRow>("SELECT * FROM souls ORDER BY created_at ASC")
            .fetch_all(pool)
            .await
            .map_err(DbError::Query)?;

        let mut souls = Vec::with_capacity(soul_rows.len());
        for row in soul_rows {
            let soul = row.into_soul()?;
            let body = match soul.current_body_id {
                Some(body_id) => Some(self.fetch_body(body_id).await?),
                None => None,
            };
            let (body_status, current_tokens, burn_rate) = match &body {
                Some(b) => (Some(b.status), b.current_tokens, b.burn_rate),
                None => (None, 0, 0.0),
            };
            souls.push(SoulOverview {
                soul_id: soul.soul_id,
                name: soul.name,
                current_body_id: soul.current_body_id,
                body_status,
                current_tokens,
                burn_rate,
                level: body.as_ref().map(|b| budget_level(b.current_tokens)),
                estimated_minutes_to_limit: body
                    .as_ref()
                    .and_then(|b| estimated_minutes_to_limit(b.current_tokens, b.burn_rate)),
                transfer_count: soul.metrics.transfer_count,
            });
        }

        let transfer_rows = sqlx::query_as::<_, TransferRow>(
            r#"
            SELECT * FROM transfers
            WHERE status NOT IN ('completed', 'failed', 'rolled_back')
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(pool)
        .await
        .map_err(DbError::Query)?;
        let active_transfers = transfer_rows
            .into_iter()
            .map(|r| r.into_transfer().map_err(ActorError::Db))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Dashboard {
            souls,
            active_transfers,
        })
    }

    // -------------------------------------------------------------------------
    // Fetch/write helpers (callers hold the gate)
    // -------------------------------------------------------------------------

    async fn fetch_soul(&self, soul_id: SoulId) -> Result<Soul, ActorError> {
        let row = sqlx::query_as::<_, SoulRow>("SELECT * FROM souls WHERE soul_id = ?1")
            .bind(soul_id.to_string())
            .fetch_optional(self.cell.store().pool())
            .await
            .map_err(DbError::Query)?
            .ok_or_else(|| ActorError::NotFound(format!("soul {soul_id} not found")))?;
        Ok(row.into_soul()?)
    }

    async fn fetch_body(&self, body_id: BodyId) -> Result<Body, ActorError> {
        let row = sqlx::query_as::<_, BodyRow>("SELECT * FROM bodies WHERE body_id = ?1")
            .bind(body_id.to_string())
            .fetch_optional(self.cell.store().pool())
            .await
            .map_err(DbError::Query)?
            .ok_or_else(|| ActorError::NotFound(format!("body {body_id} not found")))?;
        Ok(row.into_body()?)
    }

    async fn fetch_transfer(&self, transfer_id: TransferId) -> Result<Transfer, ActorError> {
        let row =
            sqlx::query_as::<_, TransferRow>("SELECT * FROM transfers WHERE transfer_id = ?1")
                .bind(transfer_id.to_string())
                .fetch_optional(self.cell.store().pool())
                .await
                .map_err(DbError::Query)?
                .ok_or_else(|| ActorError::NotFound(format!("transfer {transfer_id} not found")))?;
        Ok(row.into_transfer()?)
    }

    async fn active_transfer(&self, soul_id: SoulId) -> Result<Option<Transfer>, ActorError> {
        let row = sqlx::query_as::<_, TransferRow>(
            r#"
            SELECT * FROM transfers
            WHERE soul_id = ?1 AND status NOT IN ('completed', 'failed', 'rolled_back')
            LIMIT 1
            "#,
        )
        .bind(soul_id.to_string())
        .fetch_optional(self.cell.store().pool())
        .await
        .map_err(DbError::Query)?;
        Ok(row.map(TransferRow::into_transfer).transpose()?)
    }

    async fn write_soul(&self, soul: &Soul) -> Result<(), ActorError> {
        sqlx::query(
            r#"
            UPDATE souls SET name = ?2, identity = ?3, knowledge = ?4, focus = ?5,
                metrics = ?6, current_body_id = ?7, body_history = ?8, updated_at = ?9
            WHERE soul_id = ?1
            "#,
        )
        .bind(soul.soul_id.to_string())
        .bind(&soul.name)
        .bind(&soul.identity)
        .bind(encode_json(&soul.knowledge)?)
        .bind(encode_json(&soul.focus)?)
        .bind(encode_json(&soul.metrics)?)
        .bind(soul.current_body_id.map(|id| id.to_string()))
        .bind(encode_json(&soul.body_history)?)
        .bind(soul.updated_at)
        .execute(self.cell.store().pool())
        .await
        .map_err(DbError::Query)?;
        Ok(())
    }

    async fn insert_body(&self, body: &Body) -> Result<(), ActorError> {
        sqlx::query(
            r#"
            INSERT INTO bodies
                (body_id, soul_id, status, current_tokens, peak_tokens, burn_rate,
                 last_heartbeat, error_count, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(body.body_id.to_string())
        .bind(body.soul_id.map(|id| id.to_string()))
        .bind(body.status.to_string())
        .bind(body.current_tokens)
        .bind(body.peak_tokens)
        .bind(body.burn_rate)
        .bind(body.last_heartbeat)
        .bind(body.error_count)
        .bind(body.created_at)
        .execute(self.cell.store().pool())
        .await
        .map_err(DbError::Query)?;
        Ok(())
    }

    async fn write_body(&self, body: &Body) -> Result<(), ActorError> {
        sqlx::query(
            r#"
            UPDATE bodies SET soul_id = ?2, status = ?3, current_tokens = ?4,
                peak_tokens = ?5, burn_rate = ?6, last_heartbeat = ?7, error_count = ?8
            WHERE body_id = ?1
            "#,
        )
        .bind(body.body_id.to_string())
        .bind(body.soul_id.map(|id| id.to_string()))
        .bind(body.status.to_string())
        .bind(body.current_tokens)
        .bind(body.peak_tokens)
        .bind(body.burn_rate)
        .bind(body.last_heartbeat)
        .bind(body.error_count)
        .execute(self.cell.store().pool())
        .await
        .map_err(DbError::Query)?;
        Ok(())
    }

    async fn set_transfer_status(
        &self,
        transfer_id: TransferId,
        status: TransferStatus,
    ) -> Result<(), ActorError> {
        sqlx::query("UPDATE transfers SET status = ?2 WHERE transfer_id = ?1")
            .bind(transfer_id.to_string())
            .bind(status.to_string())
            .execute(self.cell.store().pool())
            .await
            .map_err(DbError::Query)?;
        Ok(())
    }
}

/// Keeps the highest-importance, most recent memories, restoring
/// chronological order afterwards.
fn trim_memories(memories: &mut Vec<SoulMemory>) {
    if memories.len() <= SOUL_MEMORY_CAP {
        return;
    }
    memories.sort_by(|a, b| b.importance.cmp(&a.importance).then(b.at.cmp(&a.at)));
    memories.truncate(SOUL_MEMORY_CAP);
    memories.sort_by(|a, b| a.at.cmp(&b.at));
}

fn last_n(items: &[String], n: usize) -> Vec<String> {
    items.iter().rev().take(n).rev().cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn mem(content: &str, importance: MemoryImportance, minute: u32) -> SoulMemory {
        SoulMemory {
            content: content.to_string(),
            importance,
            at: Utc.with_ymd_and_hms(2026, 8, 1, 12, minute, 0).unwrap(),
        }
    }

    #[test]
    fn trim_keeps_importance_then_recency() {
        let mut memories = Vec::new();
        for i in 0..SOUL_MEMORY_CAP {
            memories.push(mem(&format!("low-{i}"), MemoryImportance::Low, (i % 60) as u32));
        }
        memories.push(mem("critical", MemoryImportance::Critical, 59));

        trim_memories(&mut memories);
        assert_eq!(memories.len(), SOUL_MEMORY_CAP);
        assert!(memories.iter().any(|m| m.content == "critical"));
    }

    #[test]
    fn trim_restores_chronological_order() {
        let mut memories: Vec<SoulMemory> = (0..=SOUL_MEMORY_CAP)
            .map(|i| mem(&format!("m-{i}"), MemoryImportance::High, (i % 60) as u32))
            .collect();
        trim_memories(&mut memories);
        for pair in memories.windows(2) {
            assert!(pair[0].at <= pair[1].at);
        }
    }

    #[test]
    fn last_n_takes_the_tail_in_order() {
        let items: Vec<String> = (0..5).map(|i| format!("p{i}")).collect();
        assert_eq!(last_n(&items, 2), vec!["p3".to_string(), "p4".to_string()]);
        assert_eq!(last_n(&items, 10).len(), 5);
    }
}

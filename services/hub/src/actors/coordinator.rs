//! The global coordinator actor.
//!
//! One instance per hub, at the reserved key. Holds the shared agent
//! registry, group chat, tasks, zones, claims, and handoffs. All operations
//! run under the coordinator cell's gate, so read-then-write logic here
//! needs no further synchronization.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;

use waggle_events::{
    Agent, AgentStatus, AuthorType, ChatMessage, Claim, Handoff, HandoffStatus, Task, TaskStatus,
    Zone,
};
use waggle_id::{HandoffId, MessageId, TaskId};

use crate::registry::ActorCell;
use crate::store::{decode_json, encode_json, DbError};

use super::ActorError;

/// Rolling cap on the group chat; the oldest messages beyond it are
/// trimmed on every append.
pub const CHAT_WINDOW: i64 = 200;

/// Claims older than this are advisory-only and silently reclaimable.
const CLAIM_STALE_MINUTES: i64 = 30;

pub struct Coordinator {
    cell: Arc<ActorCell>,
}

// =============================================================================
// Request shapes
// =============================================================================

/// Heartbeat/connect upsert. Absent fields keep their stored values
/// (COALESCE semantics); `last_seen` always advances.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgentUpsert {
    pub agent_id: String,
    #[serde(default)]
    pub status: Option<AgentStatus>,
    #[serde(default)]
    pub current_task: Option<String>,
    #[serde(default)]
    pub working_on: Option<String>,
    #[serde(default)]
    pub capabilities: Option<Vec<String>>,
    #[serde(default)]
    pub offers: Option<Vec<String>>,
    #[serde(default)]
    pub needs: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateTask {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: Option<TaskStatus>,
    #[serde(default)]
    pub assignee: Option<String>,
    pub created_by: String,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub files: Vec<String>,
}

/// Partial task update; absent fields are left alone.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskPatch {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<TaskStatus>,
    #[serde(default)]
    pub assignee: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub files: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateHandoff {
    pub from_agent: String,
    #[serde(default)]
    pub to_agent: Option<String>,
    pub title: String,
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(default)]
    pub next_steps: Vec<String>,
    #[serde(default)]
    pub priority: Option<String>,
}

/// Read-only aggregate a newly connecting agent uses to hot-start.
#[derive(Debug, Serialize)]
pub struct WorkBundle {
    pub active_agents: Vec<Agent>,
    pub todo_tasks: Vec<Task>,
    pub my_tasks: Vec<Task>,
    pub recent_chat: Vec<ChatMessage>,
}

/// Full coordinator state, sent on push-channel connect.
#[derive(Debug, Serialize)]
pub struct CoordinatorSnapshot {
    pub agents: Vec<Agent>,
    pub chat: Vec<ChatMessage>,
    pub tasks: Vec<Task>,
    pub zones: Vec<Zone>,
    pub claims: Vec<Claim>,
    pub handoffs: Vec<Handoff>,
}

// =============================================================================
// Row mapping
// =============================================================================

struct AgentRow {
    agent_id: String,
    status: String,
    current_task: Option<String>,
    working_on: Option<String>,
    last_seen: DateTime<Utc>,
    capabilities: String,
    offers: String,
    needs: String,
}

impl<'r> sqlx::FromRow<'r, SqliteRow> for AgentRow {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Self {
            agent_id: row.try_get("agent_id")?,
            status: row.try_get("status")?,
            current_task: row.try_get("current_task")?,
            working_on: row.try_get("working_on")?,
            last_seen: row.try_get("last_seen")?,
            capabilities: row.try_get("capabilities")?,
            offers: row.try_get("offers")?,
            needs: row.try_get("needs")?,
        })
    }
}

impl AgentRow {
    fn into_agent(self) -> Result<Agent, DbError> {
        Ok(Agent {
            agent_id: self.agent_id,
            status: self.status.parse().map_err(DbError::Corrupt)?,
            current_task: self.current_task,
            working_on: self.working_on,
            last_seen: self.last_seen,
            capabilities: decode_json(&self.capabilities)?,
            offers: decode_json(&self.offers)?,
            needs: decode_json(&self.needs)?,
        })
    }
}

struct MessageRow {
    message_id: String,
    author: String,
    author_type: String,
    body: String,
    created_at: DateTime<Utc>,
    reactions: String,
}

impl<'r> sqlx::FromRow<'r, SqliteRow> for MessageRow {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Self {
            message_id: row.try_get("message_id")?,
            author: row.try_get("author")?,
            author_type: row.try_get("author_type")?,
            body: row.try_get("body")?,
            created_at: row.try_get("created_at")?,
            reactions: row.try_get("reactions")?,
        })
    }
}

impl MessageRow {
    fn into_message(self) -> Result<ChatMessage, DbError> {
        Ok(ChatMessage {
            message_id: MessageId::parse(&self.message_id)
                .map_err(|e| DbError::Corrupt(e.to_string()))?,
            author: self.author,
            author_type: self.author_type.parse().map_err(DbError::Corrupt)?,
            text: self.body,
            created_at: self.created_at,
            reactions: decode_json(&self.reactions)?,
        })
    }
}

struct TaskRow {
    task_id: String,
    title: String,
    description: String,
    status: String,
    assignee: Option<String>,
    created_by: String,
    priority: String,
    tags: String,
    files: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, SqliteRow> for TaskRow {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Self {
            task_id: row.try_get("task_id")?,
            title: row.try_get("title")?,
            description: row.try_get("description")?,
            status: row.try_get("status")?,
            assignee: row.try_get("assignee")?,
            created_by: row.try_get("created_by")?,
            priority: row.try_get("priority")?,
            tags: row.try_get("tags")?,
            files: row.try_get("files")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl TaskRow {
    fn into_task(self) -> Result<Task, DbError> {
        Ok(Task {
            task_id: TaskId::parse(&self.task_id).map_err(|e| DbError::Corrupt(e.to_string()))?,
            title: self.title,
            description: self.description,
            status: self.status.parse().map_err(DbError::Corrupt)?,
            assignee: self.assignee,
            created_by: self.created_by,
            priority: self.priority,
            tags: decode_json(&self.tags)?,
            files: decode_json(&self.files)?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

struct ZoneRow {
    zone_id: String,
    path: String,
    owner: String,
    description: String,
    claimed_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, SqliteRow> for ZoneRow {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Self {
            zone_id: row.try_get("zone_id")?,
            path: row.try_get("path")?,
            owner: row.try_get("owner")?,
            description: row.try_get("description")?,
            claimed_at: row.try_get("claimed_at")?,
        })
    }
}

impl ZoneRow {
    fn into_zone(self) -> Zone {
        Zone {
            zone_id: self.zone_id,
            path: self.path,
            owner: self.owner,
            description: self.description,
            claimed_at: self.claimed_at,
        }
    }
}

struct ClaimRow {
    what: String,
    claimed_by: String,
    description: String,
    since: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, SqliteRow> for ClaimRow {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Self {
            what: row.try_get("what")?,
            claimed_by: row.try_get("claimed_by")?,
            description: row.try_get("description")?,
            since: row.try_get("since")?,
        })
    }
}

impl ClaimRow {
    fn into_claim(self, now: DateTime<Utc>) -> Claim {
        let stale = now - self.since > Duration::minutes(CLAIM_STALE_MINUTES);
        Claim {
            what: self.what,
            claimed_by: self.claimed_by,
            description: self.description,
            since: self.since,
            stale,
        }
    }
}

struct HandoffRow {
    handoff_id: String,
    from_agent: String,
    to_agent: Option<String>,
    title: String,
    context: String,
    code: Option<String>,
    file_path: Option<String>,
    next_steps: String,
    priority: String,
    status: String,
    claimed_by: Option<String>,
    created_at: DateTime<Utc>,
    claimed_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl<'r> sqlx::FromRow<'r, SqliteRow> for HandoffRow {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Self {
            handoff_id: row.try_get("handoff_id")?,
            from_agent: row.try_get("from_agent")?,
            to_agent: row.try_get("to_agent")?,
            title: row.try_get("title")?,
            context: row.try_get("context")?,
            code: row.try_get("code")?,
            file_path: row.try_get("file_path")?,
            next_steps: row.try_get("next_steps")?,
            priority: row.try_get("priority")?,
            status: row.try_get("status")?,
            claimed_by: row.try_get("claimed_by")?,
            created_at: row.try_get("created_at")?,
            claimed_at: row.try_get("claimed_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }
}

impl HandoffRow {
    fn into_handoff(self) -> Result<Handoff, DbError> {
        Ok(Handoff {
            handoff_id: HandoffId::parse(&self.handoff_id)
                .map_err(|e| DbError::Corrupt(e.to_string()))?,
            from_agent: self.from_agent,
            to_agent: self.to_agent,
            title: self.title,
            context: self.context,
            code: self.code,
            file_path: self.file_path,
            next_steps: decode_json(&self.next_steps)?,
            priority: self.priority,
            status: self.status.parse().map_err(DbError::Corrupt)?,
            claimed_by: self.claimed_by,
            created_at: self.created_at,
            claimed_at: self.claimed_at,
            completed_at: self.completed_at,
        })
    }
}

// =============================================================================
// Operations
// =============================================================================

impl Coordinator {
    pub fn new(cell: Arc<ActorCell>) -> Self {
        Self { cell }
    }

    // -------------------------------------------------------------------------
    // Agents
    // -------------------------------------------------------------------------

    /// Upserts an agent from a heartbeat or connect. Absent fields keep
    /// their stored values; `last_seen` always advances.
    pub async fn upsert_agent(
        &self,
        upsert: AgentUpsert,
        now: DateTime<Utc>,
    ) -> Result<Agent, ActorError> {
        if upsert.agent_id.is_empty() {
            return Err(ActorError::InvalidArgument("agent_id is required".into()));
        }

        let _gate = self.cell.enter().await;
        let pool = self.cell.store().pool();

        let existing = sqlx::query_as::<_, AgentRow>("SELECT * FROM agents WHERE agent_id = ?1")
            .bind(&upsert.agent_id)
            .fetch_optional(pool)
            .await
            .map_err(DbError::Query)?;

        let merged = match existing {
            Some(row) => {
                let prior = row.into_agent()?;
                Agent {
                    agent_id: prior.agent_id,
                    status: upsert.status.unwrap_or(prior.status),
                    current_task: upsert.current_task.or(prior.current_task),
                    working_on: upsert.working_on.or(prior.working_on),
                    last_seen: now,
                    capabilities: upsert.capabilities.unwrap_or(prior.capabilities),
                    offers: upsert.offers.unwrap_or(prior.offers),
                    needs: upsert.needs.unwrap_or(prior.needs),
                }
            }
            None => Agent {
                agent_id: upsert.agent_id,
                status: upsert.status.unwrap_or(AgentStatus::Active),
                current_task: upsert.current_task,
                working_on: upsert.working_on,
                last_seen: now,
                capabilities: upsert.capabilities.unwrap_or_default(),
                offers: upsert.offers.unwrap_or_default(),
                needs: upsert.needs.unwrap_or_default(),
            },
        };

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO agents
                (agent_id, status, current_task, working_on, last_seen, capabilities, offers, needs)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&merged.agent_id)
        .bind(merged.status.to_string())
        .bind(&merged.current_task)
        .bind(&merged.working_on)
        .bind(merged.last_seen)
        .bind(encode_json(&merged.capabilities)?)
        .bind(encode_json(&merged.offers)?)
        .bind(encode_json(&merged.needs)?)
        .execute(pool)
        .await
        .map_err(DbError::Query)?;

        Ok(merged)
    }

    /// Lists agents, most recently seen first, optionally filtered by status.
    pub async fn list_agents(&self, status: Option<AgentStatus>) -> Result<Vec<Agent>, ActorError> {
        let _gate = self.cell.enter().await;
        let pool = self.cell.store().pool();

        let rows = match status {
            Some(status) => {
                sqlx::query_as::<_, AgentRow>(
                    "SELECT * FROM agents WHERE status = ?1 ORDER BY last_seen DESC",
                )
                .bind(status.to_string())
                .fetch_all(pool)
                .await
            }
            None => {
                sqlx::query_as::<_, AgentRow>("SELECT * FROM agents ORDER BY last_seen DESC")
                    .fetch_all(pool)
                    .await
            }
        }
        .map_err(DbError::Query)?;

        rows.into_iter()
            .map(|r| r.into_agent().map_err(ActorError::Db))
            .collect()
    }

    /// Flips an agent offline (push-channel disconnect). Unknown agents are
    /// ignored: a connection that never heartbeated has nothing to flip.
    pub async fn agent_disconnected(
        &self,
        agent_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Agent>, ActorError> {
        let _gate = self.cell.enter().await;
        let pool = self.cell.store().pool();

        let result = sqlx::query("UPDATE agents SET status = 'offline', last_seen = ?2 WHERE agent_id = ?1")
            .bind(agent_id)
            .bind(now)
            .execute(pool)
            .await
            .map_err(DbError::Query)?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        let row = sqlx::query_as::<_, AgentRow>("SELECT * FROM agents WHERE agent_id = ?1")
            .bind(agent_id)
            .fetch_one(pool)
            .await
            .map_err(DbError::Query)?;
        Ok(Some(row.into_agent()?))
    }

    // -------------------------------------------------------------------------
    // Chat
    // -------------------------------------------------------------------------

    /// Appends a chat message and trims the window.
    pub async fn append_chat(
        &self,
        author: &str,
        author_type: AuthorType,
        text: &str,
        now: DateTime<Utc>,
    ) -> Result<ChatMessage, ActorError> {
        if author.is_empty() || text.is_empty() {
            return Err(ActorError::InvalidArgument(
                "author and text are required".into(),
            ));
        }

        let message = ChatMessage {
            message_id: MessageId::new(),
            author: author.to_string(),
            author_type,
            text: text.to_string(),
            created_at: now,
            reactions: BTreeMap::new(),
        };

        let _gate = self.cell.enter().await;
        let pool = self.cell.store().pool();

        sqlx::query(
            r#"
            INSERT INTO messages (message_id, author, author_type, body, created_at, reactions)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(message.message_id.to_string())
        .bind(&message.author)
        .bind(message.author_type.to_string())
        .bind(&message.text)
        .bind(message.created_at)
        .bind(encode_json(&message.reactions)?)
        .execute(pool)
        .await
        .map_err(DbError::Query)?;

        sqlx::query(
            r#"
            DELETE FROM messages WHERE message_id NOT IN
                (SELECT message_id FROM messages ORDER BY created_at DESC, message_id DESC LIMIT ?1)
            "#,
        )
        .bind(CHAT_WINDOW)
        .execute(pool)
        .await
        .map_err(DbError::Query)?;

        Ok(message)
    }

    /// Adds a reaction to a chat message. Reacting twice with the same emoji
    /// is a no-op.
    pub async fn react(
        &self,
        message_id: MessageId,
        emoji: &str,
        agent_id: &str,
    ) -> Result<ChatMessage, ActorError> {
        if emoji.is_empty() || agent_id.is_empty() {
            return Err(ActorError::InvalidArgument(
                "emoji and agent_id are required".into(),
            ));
        }

        let _gate = self.cell.enter().await;
        let pool = self.cell.store().pool();

        let row =
            sqlx::query_as::<_, MessageRow>("SELECT * FROM messages WHERE message_id = ?1")
                .bind(message_id.to_string())
                .fetch_optional(pool)
                .await
                .map_err(DbError::Query)?
                .ok_or_else(|| ActorError::NotFound(format!("message {message_id} not found")))?;

        let mut message = row.into_message()?;
        let reactors = message.reactions.entry(emoji.to_string()).or_default();
        if !reactors.iter().any(|a| a == agent_id) {
            reactors.push(agent_id.to_string());
        }

        sqlx::query("UPDATE messages SET reactions = ?2 WHERE message_id = ?1")
            .bind(message_id.to_string())
            .bind(encode_json(&message.reactions)?)
            .execute(pool)
            .await
            .map_err(DbError::Query)?;

        Ok(message)
    }

    /// Most recent `limit` messages in chronological order.
    pub async fn recent_chat(&self, limit: i64) -> Result<Vec<ChatMessage>, ActorError> {
        let _gate = self.cell.enter().await;
        self.recent_chat_inner(limit).await
    }

    async fn recent_chat_inner(&self, limit: i64) -> Result<Vec<ChatMessage>, ActorError> {
        let pool = self.cell.store().pool();
        let rows = sqlx::query_as::<_, MessageRow>(
            "SELECT * FROM messages ORDER BY created_at DESC, message_id DESC LIMIT ?1",
        )
        .bind(limit.clamp(1, CHAT_WINDOW))
        .fetch_all(pool)
        .await
        .map_err(DbError::Query)?;

        let mut messages = rows
            .into_iter()
            .map(|r| r.into_message().map_err(ActorError::Db))
            .collect::<Result<Vec<_>, _>>()?;
        messages.reverse();
        Ok(messages)
    }

    // -------------------------------------------------------------------------
    // Tasks
    // -------------------------------------------------------------------------

    pub async fn create_task(
        &self,
        create: CreateTask,
        now: DateTime<Utc>,
    ) -> Result<Task, ActorError> {
        if create.title.is_empty() || create.created_by.is_empty() {
            return Err(ActorError::InvalidArgument(
                "title and created_by are required".into(),
            ));
        }

        let task = Task {
            task_id: TaskId::new(),
            title: create.title,
            description: create.description,
            status: create.status.unwrap_or(TaskStatus::Todo),
            assignee: create.assignee,
            created_by: create.created_by,
            priority: create.priority.unwrap_or_else(|| "normal".to_string()),
            tags: create.tags,
            files: create.files,
            created_at: now,
            updated_at: now,
        };

        let _gate = self.cell.enter().await;
        let pool = self.cell.store().pool();

        sqlx::query(
            r#"
            INSERT INTO tasks
                (task_id, title, description, status, assignee, created_by, priority,
                 tags, files, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
        )
        .bind(task.task_id.to_string())
        .bind(&task.title)
        .bind(&task.description)
        .bind(task.status.to_string())
        .bind(&task.assignee)
        .bind(&task.created_by)
        .bind(&task.priority)
        .bind(encode_json(&task.tags)?)
        .bind(encode_json(&task.files)?)
        .bind(task.created_at)
        .bind(task.updated_at)
        .execute(pool)
        .await
        .map_err(DbError::Query)?;

        Ok(task)
    }

    pub async fn list_tasks(
        &self,
        status: Option<TaskStatus>,
        assignee: Option<&str>,
    ) -> Result<Vec<Task>, ActorError> {
        let _gate = self.cell.enter().await;
        self.list_tasks_inner(status, assignee).await
    }

    async fn list_tasks_inner(
        &self,
        status: Option<TaskStatus>,
        assignee: Option<&str>,
    ) -> Result<Vec<Task>, ActorError> {
        let pool = self.cell.store().pool();

        let rows = match status {
            Some(status) => {
                sqlx::query_as::<_, TaskRow>(
                    "SELECT * FROM tasks WHERE status = ?1 ORDER BY updated_at DESC",
                )
                .bind(status.to_string())
                .fetch_all(pool)
                .await
            }
            None => {
                sqlx::query_as::<_, TaskRow>("SELECT * FROM tasks ORDER BY updated_at DESC")
                    .fetch_all(pool)
                    .await
            }
        }
        .map_err(DbError::Query)?;

        let mut tasks = rows
            .into_iter()
            .map(|r| r.into_task().map_err(ActorError::Db))
            .collect::<Result<Vec<_>, _>>()?;
        if let Some(assignee) = assignee {
            tasks.retain(|t| t.assignee.as_deref() == Some(assignee));
        }
        Ok(tasks)
    }

    pub async fn update_task(
        &self,
        task_id: TaskId,
        patch: TaskPatch,
        now: DateTime<Utc>,
    ) -> Result<Task, ActorError> {
        let _gate = self.cell.enter().await;
        let pool = self.cell.store().pool();

        let row = sqlx::query_as::<_, TaskRow>("SELECT * FROM tasks WHERE task_id = ?1")
            .bind(task_id.to_string())
            .fetch_optional(pool)
            .await
            .map_err(DbError::Query)?
            .ok_or_else(|| ActorError::NotFound(format!("task {task_id} not found")))?;

        let mut task = row.into_task()?;
        if let Some(title) = patch.title {
            task.title = title;
        }
        if let Some(description) = patch.description {
            task.description = description;
        }
        if let Some(status) = patch.status {
            task.status = status;
        }
        if let Some(assignee) = patch.assignee {
            task.assignee = Some(assignee);
        }
        if let Some(priority) = patch.priority {
            task.priority = priority;
        }
        if let Some(tags) = patch.tags {
            task.tags = tags;
        }
        if let Some(files) = patch.files {
            task.files = files;
        }
        task.updated_at = now;

        sqlx::query(
            r#"
            UPDATE tasks SET title = ?2, description = ?3, status = ?4, assignee = ?5,
                priority = ?6, tags = ?7, files = ?8, updated_at = ?9
            WHERE task_id = ?1
            "#,
        )
        .bind(task.task_id.to_string())
        .bind(&task.title)
        .bind(&task.description)
        .bind(task.status.to_string())
        .bind(&task.assignee)
        .bind(&task.priority)
        .bind(encode_json(&task.tags)?)
        .bind(encode_json(&task.files)?)
        .bind(task.updated_at)
        .execute(pool)
        .await
        .map_err(DbError::Query)?;

        Ok(task)
    }

    // -------------------------------------------------------------------------
    // Zones
    // -------------------------------------------------------------------------

    /// Claims (or re-claims) a zone; upsert keyed by zone id.
    pub async fn claim_zone(
        &self,
        zone_id: &str,
        path: &str,
        owner: &str,
        description: &str,
        now: DateTime<Utc>,
    ) -> Result<Zone, ActorError> {
        if zone_id.is_empty() || path.is_empty() || owner.is_empty() {
            return Err(ActorError::InvalidArgument(
                "zone_id, path, and owner are required".into(),
            ));
        }

        let zone = Zone {
            zone_id: zone_id.to_string(),
            path: path.to_string(),
            owner: owner.to_string(),
            description: description.to_string(),
            claimed_at: now,
        };

        let _gate = self.cell.enter().await;
        let pool = self.cell.store().pool();

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO zones (zone_id, path, owner, description, claimed_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(&zone.zone_id)
        .bind(&zone.path)
        .bind(&zone.owner)
        .bind(&zone.description)
        .bind(zone.claimed_at)
        .execute(pool)
        .await
        .map_err(DbError::Query)?;

        Ok(zone)
    }

    /// Releases a zone; requires the caller to be the recorded owner.
    pub async fn release_zone(&self, zone_id: &str, owner: &str) -> Result<(), ActorError> {
        let _gate = self.cell.enter().await;
        let pool = self.cell.store().pool();

        let row = sqlx::query_as::<_, ZoneRow>("SELECT * FROM zones WHERE zone_id = ?1")
            .bind(zone_id)
            .fetch_optional(pool)
            .await
            .map_err(DbError::Query)?
            .ok_or_else(|| ActorError::NotFound(format!("zone {zone_id} not found")))?;

        if row.owner != owner {
            return Err(ActorError::Forbidden(format!(
                "zone {zone_id} is owned by {}",
                row.owner
            )));
        }

        sqlx::query("DELETE FROM zones WHERE zone_id = ?1")
            .bind(zone_id)
            .execute(pool)
            .await
            .map_err(DbError::Query)?;
        Ok(())
    }

    pub async fn list_zones(&self) -> Result<Vec<Zone>, ActorError> {
        let _gate = self.cell.enter().await;
        self.list_zones_inner().await
    }

    async fn list_zones_inner(&self) -> Result<Vec<Zone>, ActorError> {
        let pool = self.cell.store().pool();
        let rows = sqlx::query_as::<_, ZoneRow>(
            "SELECT * FROM zones ORDER BY claimed_at ASC, zone_id ASC",
        )
        .fetch_all(pool)
        .await
        .map_err(DbError::Query)?;
        Ok(rows.into_iter().map(ZoneRow::into_zone).collect())
    }

    /// First zone whose path is a string prefix of `path`. Callers keep
    /// zones non-overlapping; on overlap the oldest claim wins.
    pub async fn check_zone(&self, path: &str) -> Result<Option<Zone>, ActorError> {
        let _gate = self.cell.enter().await;
        let zones = self.list_zones_inner().await?;
        Ok(zones.into_iter().find(|z| path.starts_with(&z.path)))
    }

    // -------------------------------------------------------------------------
    // Claims
    // -------------------------------------------------------------------------

    /// Claims a key. A live claim by a different owner yields Conflict with
    /// the existing record; a stale one is silently reclaimed. Staleness is
    /// computed here at read time and never persisted.
    pub async fn claim(
        &self,
        what: &str,
        by: &str,
        description: &str,
        now: DateTime<Utc>,
    ) -> Result<Claim, ActorError> {
        if what.is_empty() || by.is_empty() {
            return Err(ActorError::InvalidArgument(
                "what and by are required".into(),
            ));
        }

        let _gate = self.cell.enter().await;
        let pool = self.cell.store().pool();

        let existing = sqlx::query_as::<_, ClaimRow>("SELECT * FROM claims WHERE what = ?1")
            .bind(what)
            .fetch_optional(pool)
            .await
            .map_err(DbError::Query)?;

        if let Some(row) = existing {
            let current = row.into_claim(now);
            if current.claimed_by != by && !current.stale {
                return Err(ActorError::conflict(
                    format!("{what} is already claimed by {}", current.claimed_by),
                    &current,
                ));
            }
        }

        let claim = Claim {
            what: what.to_string(),
            claimed_by: by.to_string(),
            description: description.to_string(),
            since: now,
            stale: false,
        };

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO claims (what, claimed_by, description, since)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(&claim.what)
        .bind(&claim.claimed_by)
        .bind(&claim.description)
        .bind(claim.since)
        .execute(pool)
        .await
        .map_err(DbError::Query)?;

        Ok(claim)
    }

    /// Deletes a claim on owner match.
    pub async fn release_claim(&self, what: &str, by: &str) -> Result<(), ActorError> {
        let _gate = self.cell.enter().await;
        let pool = self.cell.store().pool();

        let row = sqlx::query_as::<_, ClaimRow>("SELECT * FROM claims WHERE what = ?1")
            .bind(what)
            .fetch_optional(pool)
            .await
            .map_err(DbError::Query)?
            .ok_or_else(|| ActorError::NotFound(format!("no claim on {what}")))?;

        if row.claimed_by != by {
            return Err(ActorError::Forbidden(format!(
                "{what} is claimed by {}",
                row.claimed_by
            )));
        }

        sqlx::query("DELETE FROM claims WHERE what = ?1")
            .bind(what)
            .execute(pool)
            .await
            .map_err(DbError::Query)?;
        Ok(())
    }

    pub async fn list_claims(&self, now: DateTime<Utc>) -> Result<Vec<Claim>, ActorError> {
        let _gate = self.cell.enter().await;
        self.list_claims_inner(now).await
    }

    async fn list_claims_inner(&self, now: DateTime<Utc>) -> Result<Vec<Claim>, ActorError> {
        let pool = self.cell.store().pool();
        let rows = sqlx::query_as::<_, ClaimRow>("SELECT * FROM claims ORDER BY since DESC")
            .fetch_all(pool)
            .await
            .map_err(DbError::Query)?;
        Ok(rows.into_iter().map(|r| r.into_claim(now)).collect())
    }

    // -------------------------------------------------------------------------
    // Handoffs
    // -------------------------------------------------------------------------

    pub async fn create_handoff(
        &self,
        create: CreateHandoff,
        now: DateTime<Utc>,
    ) -> Result<Handoff, ActorError> {
        if create.from_agent.is_empty() || create.title.is_empty() {
            return Err(ActorError::InvalidArgument(
                "from_agent and title are required".into(),
            ));
        }

        let handoff = Handoff {
            handoff_id: HandoffId::new(),
            from_agent: create.from_agent,
            to_agent: create.to_agent,
            title: create.title,
            context: create.context,
            code: create.code,
            file_path: create.file_path,
            next_steps: create.next_steps,
            priority: create.priority.unwrap_or_else(|| "normal".to_string()),
            status: HandoffStatus::Pending,
            claimed_by: None,
            created_at: now,
            claimed_at: None,
            completed_at: None,
        };

        let _gate = self.cell.enter().await;
        let pool = self.cell.store().pool();

        sqlx::query(
            r#"
            INSERT INTO handoffs
                (handoff_id, from_agent, to_agent, title, context, code, file_path,
                 next_steps, priority, status, claimed_by, created_at, claimed_at, completed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            "#,
        )
        .bind(handoff.handoff_id.to_string())
        .bind(&handoff.from_agent)
        .bind(&handoff.to_agent)
        .bind(&handoff.title)
        .bind(&handoff.context)
        .bind(&handoff.code)
        .bind(&handoff.file_path)
        .bind(encode_json(&handoff.next_steps)?)
        .bind(&handoff.priority)
        .bind(handoff.status.to_string())
        .bind(&handoff.claimed_by)
        .bind(handoff.created_at)
        .bind(handoff.claimed_at)
        .bind(handoff.completed_at)
        .execute(pool)
        .await
        .map_err(DbError::Query)?;

        Ok(handoff)
    }

    /// Claims a pending handoff. Fails if it already advanced, or if it was
    /// pinned to a different agent.
    pub async fn claim_handoff(
        &self,
        handoff_id: HandoffId,
        agent_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Handoff, ActorError> {
        let _gate = self.cell.enter().await;
        let pool = self.cell.store().pool();

        let mut handoff = self.fetch_handoff(handoff_id).await?;

        if handoff.status != HandoffStatus::Pending {
            return Err(ActorError::conflict(
                format!("handoff {handoff_id} is already {}", handoff.status),
                &handoff,
            ));
        }
        if let Some(to_agent) = &handoff.to_agent {
            if to_agent != agent_id {
                return Err(ActorError::Forbidden(format!(
                    "handoff {handoff_id} is addressed to {to_agent}"
                )));
            }
        }

        handoff.status = HandoffStatus::Claimed;
        handoff.claimed_by = Some(agent_id.to_string());
        handoff.claimed_at = Some(now);

        sqlx::query(
            "UPDATE handoffs SET status = ?2, claimed_by = ?3, claimed_at = ?4 WHERE handoff_id = ?1",
        )
        .bind(handoff.handoff_id.to_string())
        .bind(handoff.status.to_string())
        .bind(&handoff.claimed_by)
        .bind(handoff.claimed_at)
        .execute(pool)
        .await
        .map_err(DbError::Query)?;

        Ok(handoff)
    }

    /// Completes a claimed handoff; only the claimer may complete.
    pub async fn complete_handoff(
        &self,
        handoff_id: HandoffId,
        agent_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Handoff, ActorError> {
        let _gate = self.cell.enter().await;
        let pool = self.cell.store().pool();

        let mut handoff = self.fetch_handoff(handoff_id).await?;

        if handoff.status != HandoffStatus::Claimed {
            return Err(ActorError::conflict(
                format!("handoff {handoff_id} is {}, not claimed", handoff.status),
                &handoff,
            ));
        }
        if handoff.claimed_by.as_deref() != Some(agent_id) {
            return Err(ActorError::Forbidden(format!(
                "handoff {handoff_id} was claimed by {}",
                handoff.claimed_by.as_deref().unwrap_or("nobody")
            )));
        }

        handoff.status = HandoffStatus::Completed;
        handoff.completed_at = Some(now);

        sqlx::query("UPDATE handoffs SET status = ?2, completed_at = ?3 WHERE handoff_id = ?1")
            .bind(handoff.handoff_id.to_string())
            .bind(handoff.status.to_string())
            .bind(handoff.completed_at)
            .execute(pool)
            .await
            .map_err(DbError::Query)?;

        Ok(handoff)
    }

    pub async fn list_handoffs(
        &self,
        status: Option<HandoffStatus>,
    ) -> Result<Vec<Handoff>, ActorError> {
        let _gate = self.cell.enter().await;
        self.list_handoffs_inner(status).await
    }

    async fn list_handoffs_inner(
        &self,
        status: Option<HandoffStatus>,
    ) -> Result<Vec<Handoff>, ActorError> {
        let pool = self.cell.store().pool();
        let rows = match status {
            Some(status) => {
                sqlx::query_as::<_, HandoffRow>(
                    "SELECT * FROM handoffs WHERE status = ?1 ORDER BY created_at DESC",
                )
                .bind(status.to_string())
                .fetch_all(pool)
                .await
            }
            None => {
                sqlx::query_as::<_, HandoffRow>("SELECT * FROM handoffs ORDER BY created_at DESC")
                    .fetch_all(pool)
                    .await
            }
        }
        .map_err(DbError::Query)?;

        rows.into_iter()
            .map(|r| r.into_handoff().map_err(ActorError::Db))
            .collect()
    }

    async fn fetch_handoff(&self, handoff_id: HandoffId) -> Result<Handoff, ActorError> {
        let pool = self.cell.store().pool();
        let row = sqlx::query_as::<_, HandoffRow>("SELECT * FROM handoffs WHERE handoff_id = ?1")
            .bind(handoff_id.to_string())
            .fetch_optional(pool)
            .await
            .map_err(DbError::Query)?
            .ok_or_else(|| ActorError::NotFound(format!("handoff {handoff_id} not found")))?;
        Ok(row.into_handoff()?)
    }

    // -------------------------------------------------------------------------
    // Aggregates
    // -------------------------------------------------------------------------

    /// Everything a newly connecting agent needs to hot-start, in one call.
    pub async fn work_bundle(
        &self,
        agent_id: &str,
        _now: DateTime<Utc>,
    ) -> Result<WorkBundle, ActorError> {
        let _gate = self.cell.enter().await;
        let pool = self.cell.store().pool();

        let agent_rows = sqlx::query_as::<_, AgentRow>(
            "SELECT * FROM agents WHERE status = 'active' ORDER BY last_seen DESC",
        )
        .fetch_all(pool)
        .await
        .map_err(DbError::Query)?;
        let active_agents = agent_rows
            .into_iter()
            .map(|r| r.into_agent().map_err(ActorError::Db))
            .collect::<Result<Vec<_>, _>>()?;

        let todo_tasks = self.list_tasks_inner(Some(TaskStatus::Todo), None).await?;
        let my_tasks = self
            .list_tasks_inner(Some(TaskStatus::InProgress), Some(agent_id))
            .await?;
        let recent_chat = self.recent_chat_inner(20).await?;

        Ok(WorkBundle {
            active_agents,
            todo_tasks,
            my_tasks,
            recent_chat,
        })
    }

    /// Full state for the push-channel connect handshake.
    pub async fn snapshot(&self, now: DateTime<Utc>) -> Result<CoordinatorSnapshot, ActorError> {
        let _gate = self.cell.enter().await;
        let pool = self.cell.store().pool();

        let agent_rows =
            sqlx::query_as::<_, AgentRow>("SELECT * FROM agents ORDER BY last_seen DESC")
                .fetch_all(pool)
                .await
                .map_err(DbError::Query)?;
        let agents = agent_rows
            .into_iter()
            .map(|r| r.into_agent().map_err(ActorError::Db))
            .collect::<Result<Vec<_>, _>>()?;

        let chat = self.recent_chat_inner(50).await?;
        let tasks = self.list_tasks_inner(None, None).await?;
        let zones = self.list_zones_inner().await?;
        let claims = self.list_claims_inner(now).await?;

        let mut handoffs = self.list_handoffs_inner(Some(HandoffStatus::Pending)).await?;
        handoffs.extend(self.list_handoffs_inner(Some(HandoffStatus::Claimed)).await?);

        Ok(CoordinatorSnapshot {
            agents,
            chat,
            tasks,
            zones,
            claims,
            handoffs,
        })
    }
}

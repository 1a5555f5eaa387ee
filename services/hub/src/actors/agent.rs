//! Per-agent state actor.
//!
//! One instance per agent id. Holds that agent's context checkpoint, direct
//! inbox, and long-term memory. An instance only ever reads and writes its
//! own store; there is no cross-agent visibility here.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;

use waggle_events::{AuthorType, Checkpoint, InboxMessage, Memory};
use waggle_id::{MemoryId, MessageId};

use crate::registry::ActorCell;
use crate::store::{decode_json, encode_json, DbError};

use super::ActorError;

/// Inbox rows kept per agent; the oldest beyond this are trimmed on append.
const INBOX_CAP: i64 = 100;

/// Most memories a single query returns.
const MEMORY_QUERY_CAP: i64 = 50;

pub struct AgentState {
    cell: Arc<ActorCell>,
}

/// Checkpoint upsert request. One row per agent; saving replaces the
/// previous checkpoint outright.
#[derive(Debug, Clone, Deserialize)]
pub struct SaveCheckpoint {
    pub conversation_summary: String,
    #[serde(default)]
    pub accomplishments: Vec<String>,
    #[serde(default)]
    pub pending_work: Vec<String>,
    #[serde(default)]
    pub recent_context: String,
    #[serde(default)]
    pub files_edited: Vec<String>,
}

/// Full agent-state view, served by `GET state` and the push-channel
/// connect handshake.
#[derive(Debug, Serialize)]
pub struct AgentStateSnapshot {
    pub agent_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<Checkpoint>,
    pub inbox: Vec<InboxMessage>,
    pub unread_count: i64,
    pub memory_count: i64,
}

struct CheckpointRow {
    conversation_summary: String,
    accomplishments: String,
    pending_work: String,
    recent_context: String,
    files_edited: String,
    saved_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, SqliteRow> for CheckpointRow {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Self {
            conversation_summary: row.try_get("conversation_summary")?,
            accomplishments: row.try_get("accomplishments")?,
            pending_work: row.try_get("pending_work")?,
            recent_context: row.try_get("recent_context")?,
            files_edited: row.try_get("files_edited")?,
            saved_at: row.try_get("saved_at")?,
        })
    }
}

impl CheckpointRow {
    fn into_checkpoint(self) -> Result<Checkpoint, DbError> {
        Ok(Checkpoint {
            conversation_summary: self.conversation_summary,
            accomplishments: decode_json(&self.accomplishments)?,
            pending_work: decode_json(&self.pending_work)?,
            recent_context: self.recent_context,
            files_edited: decode_json(&self.files_edited)?,
            saved_at: self.saved_at,
        })
    }
}

struct InboxRow {
    message_id: String,
    from_agent: String,
    kind: String,
    body: String,
    read: bool,
    created_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, SqliteRow> for InboxRow {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Self {
            message_id: row.try_get("message_id")?,
            from_agent: row.try_get("from_agent")?,
            kind: row.try_get("kind")?,
            body: row.try_get("body")?,
            read: row.try_get("read")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl InboxRow {
    fn into_message(self) -> Result<InboxMessage, DbError> {
        Ok(InboxMessage {
            message_id: MessageId::parse(&self.message_id)
                .map_err(|e| DbError::Corrupt(e.to_string()))?,
            from_agent: self.from_agent,
            kind: self.kind.parse().map_err(DbError::Corrupt)?,
            text: self.body,
            read: self.read,
            created_at: self.created_at,
        })
    }
}

struct MemoryRow {
    memory_id: String,
    category: String,
    content: String,
    tags: String,
    created_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, SqliteRow> for MemoryRow {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Self {
            memory_id: row.try_get("memory_id")?,
            category: row.try_get("category")?,
            content: row.try_get("content")?,
            tags: row.try_get("tags")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl MemoryRow {
    fn into_memory(self) -> Result<Memory, DbError> {
        Ok(Memory {
            memory_id: MemoryId::parse(&self.memory_id)
                .map_err(|e| DbError::Corrupt(e.to_string()))?,
            category: self.category,
            content: self.content,
            tags: decode_json(&self.tags)?,
            created_at: self.created_at,
        })
    }
}

impl AgentState {
    pub fn new(cell: Arc<ActorCell>) -> Self {
        Self { cell }
    }

    fn agent_id(&self) -> &str {
        self.cell.key()
    }

    /// Upserts the single checkpoint row.
    pub async fn save_checkpoint(
        &self,
        save: SaveCheckpoint,
        now: DateTime<Utc>,
    ) -> Result<Checkpoint, ActorError> {
        if save.conversation_summary.is_empty() {
            return Err(ActorError::InvalidArgument(
                "conversation_summary is required".into(),
            ));
        }

        let checkpoint = Checkpoint {
            conversation_summary: save.conversation_summary,
            accomplishments: save.accomplishments,
            pending_work: save.pending_work,
            recent_context: save.recent_context,
            files_edited: save.files_edited,
            saved_at: now,
        };

        let _gate = self.cell.enter().await;
        let pool = self.cell.store().pool();

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO checkpoint
                (slot, conversation_summary, accomplishments, pending_work,
                 recent_context, files_edited, saved_at)
            VALUES ('current', ?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&checkpoint.conversation_summary)
        .bind(encode_json(&checkpoint.accomplishments)?)
        .bind(encode_json(&checkpoint.pending_work)?)
        .bind(&checkpoint.recent_context)
        .bind(encode_json(&checkpoint.files_edited)?)
        .bind(checkpoint.saved_at)
        .execute(pool)
        .await
        .map_err(DbError::Query)?;

        Ok(checkpoint)
    }

    pub async fn checkpoint(&self) -> Result<Option<Checkpoint>, ActorError> {
        let _gate = self.cell.enter().await;
        self.checkpoint_inner().await
    }

    async fn checkpoint_inner(&self) -> Result<Option<Checkpoint>, ActorError> {
        let pool = self.cell.store().pool();
        let row = sqlx::query_as::<_, CheckpointRow>(
            "SELECT * FROM checkpoint WHERE slot = 'current'",
        )
        .fetch_optional(pool)
        .await
        .map_err(DbError::Query)?;
        Ok(row.map(CheckpointRow::into_checkpoint).transpose()?)
    }

    /// Appends to the inbox and trims it to the cap.
    pub async fn add_message(
        &self,
        from: &str,
        kind: AuthorType,
        text: &str,
        now: DateTime<Utc>,
    ) -> Result<InboxMessage, ActorError> {
        if from.is_empty() || text.is_empty() {
            return Err(ActorError::InvalidArgument(
                "from and text are required".into(),
            ));
        }

        let message = InboxMessage {
            message_id: MessageId::new(),
            from_agent: from.to_string(),
            kind,
            text: text.to_string(),
            read: false,
            created_at: now,
        };

        let _gate = self.cell.enter().await;
        let pool = self.cell.store().pool();

        sqlx::query(
            r#"
            INSERT INTO inbox (message_id, from_agent, kind, body, read, created_at)
            VALUES (?1, ?2, ?3, ?4, 0, ?5)
            "#,
        )
        .bind(message.message_id.to_string())
        .bind(&message.from_agent)
        .bind(message.kind.to_string())
        .bind(&message.text)
        .bind(message.created_at)
        .execute(pool)
        .await
        .map_err(DbError::Query)?;

        sqlx::query(
            r#"
            DELETE FROM inbox WHERE message_id NOT IN
                (SELECT message_id FROM inbox ORDER BY created_at DESC, message_id DESC LIMIT ?1)
            "#,
        )
        .bind(INBOX_CAP)
        .execute(pool)
        .await
        .map_err(DbError::Query)?;

        Ok(message)
    }

    /// Inbox, most recent first.
    pub async fn messages(&self, unread_only: bool) -> Result<Vec<InboxMessage>, ActorError> {
        let _gate = self.cell.enter().await;
        self.messages_inner(unread_only).await
    }

    async fn messages_inner(&self, unread_only: bool) -> Result<Vec<InboxMessage>, ActorError> {
        let pool = self.cell.store().pool();
        let query = if unread_only {
            "SELECT * FROM inbox WHERE read = 0 ORDER BY created_at DESC, message_id DESC"
        } else {
            "SELECT * FROM inbox ORDER BY created_at DESC, message_id DESC"
        };
        let rows = sqlx::query_as::<_, InboxRow>(query)
            .fetch_all(pool)
            .await
            .map_err(DbError::Query)?;
        rows.into_iter()
            .map(|r| r.into_message().map_err(ActorError::Db))
            .collect()
    }

    /// Marks the given messages read. Unknown ids are ignored.
    pub async fn mark_read(&self, ids: &[MessageId]) -> Result<u64, ActorError> {
        let _gate = self.cell.enter().await;
        let pool = self.cell.store().pool();

        let mut updated = 0;
        for id in ids {
            let result = sqlx::query("UPDATE inbox SET read = 1 WHERE message_id = ?1")
                .bind(id.to_string())
                .execute(pool)
                .await
                .map_err(DbError::Query)?;
            updated += result.rows_affected();
        }
        Ok(updated)
    }

    pub async fn add_memory(
        &self,
        category: &str,
        content: &str,
        tags: Vec<String>,
        now: DateTime<Utc>,
    ) -> Result<Memory, ActorError> {
        if category.is_empty() || content.is_empty() {
            return Err(ActorError::InvalidArgument(
                "category and content are required".into(),
            ));
        }

        let memory = Memory {
            memory_id: MemoryId::new(),
            category: category.to_string(),
            content: content.to_string(),
            tags,
            created_at: now,
        };

        let _gate = self.cell.enter().await;
        let pool = self.cell.store().pool();

        sqlx::query(
            r#"
            INSERT INTO memories (memory_id, category, content, tags, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(memory.memory_id.to_string())
        .bind(&memory.category)
        .bind(&memory.content)
        .bind(encode_json(&memory.tags)?)
        .bind(memory.created_at)
        .execute(pool)
        .await
        .map_err(DbError::Query)?;

        Ok(memory)
    }

    /// Memories filtered by category and a free-text match over content and
    /// tags, capped at the most recent 50.
    pub async fn memories(
        &self,
        category: Option<&str>,
        query: Option<&str>,
    ) -> Result<Vec<Memory>, ActorError> {
        let _gate = self.cell.enter().await;
        let pool = self.cell.store().pool();

        let rows = match category {
            Some(category) => {
                sqlx::query_as::<_, MemoryRow>(
                    "SELECT * FROM memories WHERE category = ?1 ORDER BY created_at DESC, memory_id DESC",
                )
                .bind(category)
                .fetch_all(pool)
                .await
            }
            None => {
                sqlx::query_as::<_, MemoryRow>(
                    "SELECT * FROM memories ORDER BY created_at DESC, memory_id DESC",
                )
                .fetch_all(pool)
                .await
            }
        }
        .map_err(DbError::Query)?;

        let mut memories = rows
            .into_iter()
            .map(|r| r.into_memory().map_err(ActorError::Db))
            .collect::<Result<Vec<_>, _>>()?;

        if let Some(q) = query {
            let needle = q.to_lowercase();
            memories.retain(|m| {
                m.content.to_lowercase().contains(&needle)
                    || m.tags.iter().any(|t| t.to_lowercase().contains(&needle))
            });
        }
        memories.truncate(MEMORY_QUERY_CAP as usize);
        Ok(memories)
    }

    /// Full state view for `GET state` and the connect handshake.
    pub async fn state(&self) -> Result<AgentStateSnapshot, ActorError> {
        let _gate = self.cell.enter().await;
        let pool = self.cell.store().pool();

        let checkpoint = self.checkpoint_inner().await?;
        let inbox = self.messages_inner(false).await?;
        let unread_count = inbox.iter().filter(|m| !m.read).count() as i64;

        let memory_count: i64 = {
            use sqlx::Row;
            sqlx::query("SELECT COUNT(*) AS n FROM memories")
                .fetch_one(pool)
                .await
                .map_err(DbError::Query)?
                .try_get("n")
                .map_err(DbError::Query)?
        };

        Ok(AgentStateSnapshot {
            agent_id: self.agent_id().to_string(),
            checkpoint,
            inbox,
            unread_count,
            memory_count,
        })
    }
}

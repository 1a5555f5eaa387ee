//! Table definitions per actor kind.
//!
//! Applied with `CREATE TABLE IF NOT EXISTS` on every open, so adding a
//! table is safe; altering an existing one is not and needs a new column
//! with a default instead.

/// Schema for the global coordinator instance. Holds the shared registry
/// plus the soul/body lifecycle records the transfer protocol works over.
pub const COORDINATOR_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS agents (
    agent_id      TEXT PRIMARY KEY,
    status        TEXT NOT NULL,
    current_task  TEXT,
    working_on    TEXT,
    last_seen     TEXT NOT NULL,
    capabilities  TEXT NOT NULL DEFAULT '[]',
    offers        TEXT NOT NULL DEFAULT '[]',
    needs         TEXT NOT NULL DEFAULT '[]'
);
CREATE INDEX IF NOT EXISTS idx_agents_last_seen ON agents (last_seen);
CREATE INDEX IF NOT EXISTS idx_agents_status ON agents (status);

CREATE TABLE IF NOT EXISTS messages (
    message_id  TEXT PRIMARY KEY,
    author      TEXT NOT NULL,
    author_type TEXT NOT NULL,
    body        TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    reactions   TEXT NOT NULL DEFAULT '{}'
);
CREATE INDEX IF NOT EXISTS idx_messages_created_at ON messages (created_at);

CREATE TABLE IF NOT EXISTS tasks (
    task_id     TEXT PRIMARY KEY,
    title       TEXT NOT NULL,
    description TEXT NOT NULL,
    status      TEXT NOT NULL,
    assignee    TEXT,
    created_by  TEXT NOT NULL,
    priority    TEXT NOT NULL,
    tags        TEXT NOT NULL DEFAULT '[]',
    files       TEXT NOT NULL DEFAULT '[]',
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks (status);
CREATE INDEX IF NOT EXISTS idx_tasks_assignee ON tasks (assignee);

CREATE TABLE IF NOT EXISTS zones (
    zone_id     TEXT PRIMARY KEY,
    path        TEXT NOT NULL,
    owner       TEXT NOT NULL,
    description TEXT NOT NULL,
    claimed_at  TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_zones_path ON zones (path);

CREATE TABLE IF NOT EXISTS claims (
    what        TEXT PRIMARY KEY,
    claimed_by  TEXT NOT NULL,
    description TEXT NOT NULL,
    since       TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_claims_claimed_by ON claims (claimed_by);

CREATE TABLE IF NOT EXISTS handoffs (
    handoff_id   TEXT PRIMARY KEY,
    from_agent   TEXT NOT NULL,
    to_agent     TEXT,
    title        TEXT NOT NULL,
    context      TEXT NOT NULL,
    code         TEXT,
    file_path    TEXT,
    next_steps   TEXT NOT NULL DEFAULT '[]',
    priority     TEXT NOT NULL,
    status       TEXT NOT NULL,
    claimed_by   TEXT,
    created_at   TEXT NOT NULL,
    claimed_at   TEXT,
    completed_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_handoffs_status ON handoffs (status);

CREATE TABLE IF NOT EXISTS souls (
    soul_id         TEXT PRIMARY KEY,
    name            TEXT NOT NULL,
    identity        TEXT NOT NULL,
    knowledge       TEXT NOT NULL,
    focus           TEXT NOT NULL,
    metrics         TEXT NOT NULL,
    current_body_id TEXT,
    body_history    TEXT NOT NULL DEFAULT '[]',
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS bodies (
    body_id        TEXT PRIMARY KEY,
    soul_id        TEXT,
    status         TEXT NOT NULL,
    current_tokens INTEGER NOT NULL DEFAULT 0,
    peak_tokens    INTEGER NOT NULL DEFAULT 0,
    burn_rate      REAL NOT NULL DEFAULT 0,
    last_heartbeat TEXT NOT NULL,
    error_count    INTEGER NOT NULL DEFAULT 0,
    created_at     TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_bodies_soul_id ON bodies (soul_id);
CREATE INDEX IF NOT EXISTS idx_bodies_status ON bodies (status);

CREATE TABLE IF NOT EXISTS transfers (
    transfer_id  TEXT PRIMARY KEY,
    soul_id      TEXT NOT NULL,
    from_body_id TEXT NOT NULL,
    to_body_id   TEXT NOT NULL,
    status       TEXT NOT NULL,
    reason       TEXT NOT NULL,
    tokens_saved INTEGER NOT NULL DEFAULT 0,
    error        TEXT,
    created_at   TEXT NOT NULL,
    completed_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_transfers_soul_id ON transfers (soul_id);
CREATE INDEX IF NOT EXISTS idx_transfers_status ON transfers (status);
"#;

/// Schema for one agent-state instance.
pub const AGENT_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS checkpoint (
    slot                 TEXT PRIMARY KEY CHECK (slot = 'current'),
    conversation_summary TEXT NOT NULL,
    accomplishments      TEXT NOT NULL DEFAULT '[]',
    pending_work         TEXT NOT NULL DEFAULT '[]',
    recent_context       TEXT NOT NULL,
    files_edited         TEXT NOT NULL DEFAULT '[]',
    saved_at             TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS inbox (
    message_id TEXT PRIMARY KEY,
    from_agent TEXT NOT NULL,
    kind       TEXT NOT NULL,
    body       TEXT NOT NULL,
    read       INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_inbox_created_at ON inbox (created_at);

CREATE TABLE IF NOT EXISTS memories (
    memory_id  TEXT PRIMARY KEY,
    category   TEXT NOT NULL,
    content    TEXT NOT NULL,
    tags       TEXT NOT NULL DEFAULT '[]',
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_memories_category ON memories (category);
CREATE INDEX IF NOT EXISTS idx_memories_created_at ON memories (created_at);
"#;

/// Schema for one resource-lock instance.
pub const LOCK_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS lock (
    resource_path TEXT PRIMARY KEY,
    resource_type TEXT NOT NULL,
    locked_by     TEXT NOT NULL,
    reason        TEXT NOT NULL,
    locked_at     TEXT NOT NULL,
    expires_at    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS history (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    locked_by    TEXT NOT NULL,
    reason       TEXT NOT NULL,
    release_kind TEXT NOT NULL,
    released_at  TEXT NOT NULL
);
"#;

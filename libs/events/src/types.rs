//! Entity and status type definitions shared across the hub.
//!
//! Status enums serialize to the exact strings agents exchange, so renames
//! here are wire-format changes.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use waggle_id::{BodyId, HandoffId, MemoryId, MessageId, SoulId, TaskId, TransferId};

// =============================================================================
// Status Enums
// =============================================================================

/// Agent presence status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Offline,
    Active,
    Waiting,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentStatus::Offline => write!(f, "offline"),
            AgentStatus::Active => write!(f, "active"),
            AgentStatus::Waiting => write!(f, "waiting"),
        }
    }
}

impl std::str::FromStr for AgentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "offline" => Ok(AgentStatus::Offline),
            "active" => Ok(AgentStatus::Active),
            "waiting" => Ok(AgentStatus::Waiting),
            other => Err(format!("unknown agent status: {other}")),
        }
    }
}

/// Who authored a chat or inbox message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorType {
    Agent,
    Human,
    System,
    Ai,
}

impl std::fmt::Display for AuthorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthorType::Agent => write!(f, "agent"),
            AuthorType::Human => write!(f, "human"),
            AuthorType::System => write!(f, "system"),
            AuthorType::Ai => write!(f, "ai"),
        }
    }
}

impl std::str::FromStr for AuthorType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "agent" => Ok(AuthorType::Agent),
            "human" => Ok(AuthorType::Human),
            "system" => Ok(AuthorType::System),
            "ai" => Ok(AuthorType::Ai),
            other => Err(format!("unknown author type: {other}")),
        }
    }
}

/// Task workflow status. Transitions are free-form; callers set the value
/// they mean.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    Todo,
    InProgress,
    Blocked,
    Done,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Todo => write!(f, "todo"),
            TaskStatus::InProgress => write!(f, "in-progress"),
            TaskStatus::Blocked => write!(f, "blocked"),
            TaskStatus::Done => write!(f, "done"),
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "todo" => Ok(TaskStatus::Todo),
            "in-progress" => Ok(TaskStatus::InProgress),
            "blocked" => Ok(TaskStatus::Blocked),
            "done" => Ok(TaskStatus::Done),
            other => Err(format!("unknown task status: {other}")),
        }
    }
}

/// Handoff workflow status. Unlike tasks, these transitions are enforced:
/// pending → claimed → completed, never backward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoffStatus {
    Pending,
    Claimed,
    Completed,
}

impl std::fmt::Display for HandoffStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandoffStatus::Pending => write!(f, "pending"),
            HandoffStatus::Claimed => write!(f, "claimed"),
            HandoffStatus::Completed => write!(f, "completed"),
        }
    }
}

impl std::str::FromStr for HandoffStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(HandoffStatus::Pending),
            "claimed" => Ok(HandoffStatus::Claimed),
            "completed" => Ok(HandoffStatus::Completed),
            other => Err(format!("unknown handoff status: {other}")),
        }
    }
}

/// Body process lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyStatus {
    Spawning,
    Ready,
    Active,
    Transferring,
    Terminated,
}

impl std::fmt::Display for BodyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BodyStatus::Spawning => write!(f, "spawning"),
            BodyStatus::Ready => write!(f, "ready"),
            BodyStatus::Active => write!(f, "active"),
            BodyStatus::Transferring => write!(f, "transferring"),
            BodyStatus::Terminated => write!(f, "terminated"),
        }
    }
}

impl std::str::FromStr for BodyStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "spawning" => Ok(BodyStatus::Spawning),
            "ready" => Ok(BodyStatus::Ready),
            "active" => Ok(BodyStatus::Active),
            "transferring" => Ok(BodyStatus::Transferring),
            "terminated" => Ok(BodyStatus::Terminated),
            other => Err(format!("unknown body status: {other}")),
        }
    }
}

/// Soul transfer workflow status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Initiated,
    Extracting,
    Validating,
    Injecting,
    Completed,
    Failed,
    RolledBack,
}

impl TransferStatus {
    /// Completed, failed, and rolled-back transfers accept no further
    /// transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferStatus::Completed | TransferStatus::Failed | TransferStatus::RolledBack
        )
    }
}

impl std::fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransferStatus::Initiated => write!(f, "initiated"),
            TransferStatus::Extracting => write!(f, "extracting"),
            TransferStatus::Validating => write!(f, "validating"),
            TransferStatus::Injecting => write!(f, "injecting"),
            TransferStatus::Completed => write!(f, "completed"),
            TransferStatus::Failed => write!(f, "failed"),
            TransferStatus::RolledBack => write!(f, "rolled_back"),
        }
    }
}

impl std::str::FromStr for TransferStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initiated" => Ok(TransferStatus::Initiated),
            "extracting" => Ok(TransferStatus::Extracting),
            "validating" => Ok(TransferStatus::Validating),
            "injecting" => Ok(TransferStatus::Injecting),
            "completed" => Ok(TransferStatus::Completed),
            "failed" => Ok(TransferStatus::Failed),
            "rolled_back" => Ok(TransferStatus::RolledBack),
            other => Err(format!("unknown transfer status: {other}")),
        }
    }
}

/// Token-budget danger level for a body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetLevel {
    Safe,
    Warning,
    Danger,
    Critical,
}

/// How a lock release came about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseKind {
    Manual,
    Expired,
    Stolen,
}

impl std::fmt::Display for ReleaseKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReleaseKind::Manual => write!(f, "manual"),
            ReleaseKind::Expired => write!(f, "expired"),
            ReleaseKind::Stolen => write!(f, "stolen"),
        }
    }
}

impl std::str::FromStr for ReleaseKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(ReleaseKind::Manual),
            "expired" => Ok(ReleaseKind::Expired),
            "stolen" => Ok(ReleaseKind::Stolen),
            other => Err(format!("unknown release kind: {other}")),
        }
    }
}

/// Importance of a soul memory; used to rank what survives trimming and
/// what makes it into the injection bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryImportance {
    Low,
    Medium,
    High,
    Critical,
}

// =============================================================================
// Coordinator entities
// =============================================================================

/// A registered agent as the coordinator sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub agent_id: String,
    pub status: AgentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_task: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_on: Option<String>,
    pub last_seen: DateTime<Utc>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub offers: Vec<String>,
    #[serde(default)]
    pub needs: Vec<String>,
}

/// A group-chat message. Reactions map emoji → reacting agent ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub message_id: MessageId,
    pub author: String,
    pub author_type: AuthorType,
    pub text: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub reactions: BTreeMap<String, Vec<String>>,
}

/// A shared work item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: TaskId,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    pub created_by: String,
    pub priority: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub files: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A coarse path-prefix area reservation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub zone_id: String,
    pub path: String,
    pub owner: String,
    pub description: String,
    pub claimed_at: DateTime<Utc>,
}

/// An advisory named reservation. `stale` is computed at read time and never
/// persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    pub what: String,
    pub claimed_by: String,
    pub description: String,
    pub since: DateTime<Utc>,
    #[serde(default)]
    pub stale: bool,
}

/// A unit of work explicitly passed between agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Handoff {
    pub handoff_id: HandoffId,
    pub from_agent: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_agent: Option<String>,
    pub title: String,
    pub context: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(default)]
    pub next_steps: Vec<String>,
    pub priority: String,
    pub status: HandoffStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claimed_by: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Agent state entities
// =============================================================================

/// The single-row context checkpoint an agent saves before its process dies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub conversation_summary: String,
    #[serde(default)]
    pub accomplishments: Vec<String>,
    #[serde(default)]
    pub pending_work: Vec<String>,
    pub recent_context: String,
    #[serde(default)]
    pub files_edited: Vec<String>,
    pub saved_at: DateTime<Utc>,
}

/// A direct message in an agent's inbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboxMessage {
    pub message_id: MessageId,
    pub from_agent: String,
    pub kind: AuthorType,
    pub text: String,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

/// A categorized long-term memory entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    pub memory_id: MemoryId,
    pub category: String,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Lock entities
// =============================================================================

/// A live exclusive lock on a resource path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockInfo {
    pub resource_path: String,
    pub resource_type: String,
    pub locked_by: String,
    pub reason: String,
    pub locked_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// A recorded lock release.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockHistoryEntry {
    pub locked_by: String,
    pub reason: String,
    pub release: ReleaseKind,
    pub released_at: DateTime<Utc>,
}

// =============================================================================
// Soul/body lifecycle entities
// =============================================================================

/// A single remembered fact with an importance rank.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoulMemory {
    pub content: String,
    pub importance: MemoryImportance,
    pub at: DateTime<Utc>,
}

/// Accumulated knowledge a soul carries across bodies.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SoulKnowledge {
    #[serde(default)]
    pub patterns: Vec<String>,
    #[serde(default)]
    pub anti_patterns: Vec<String>,
    #[serde(default)]
    pub expertise: BTreeMap<String, f64>,
    #[serde(default)]
    pub memories: Vec<SoulMemory>,
}

/// What a soul is doing right now.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SoulFocus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_task: Option<String>,
    #[serde(default)]
    pub pending_work: Vec<String>,
    #[serde(default)]
    pub blockers: Vec<String>,
    #[serde(default)]
    pub goals: Vec<String>,
}

/// Lifetime counters for a soul.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SoulMetrics {
    pub total_tokens_processed: i64,
    pub transfer_count: i64,
    pub completion_rate: f64,
}

/// Usage stats for a body a soul once inhabited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BodyRecord {
    pub body_id: BodyId,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub tokens_used: i64,
    pub peak_tokens: i64,
    pub transfer_reason: String,
}

/// A persistent logical agent identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Soul {
    pub soul_id: SoulId,
    pub name: String,
    pub identity: String,
    pub knowledge: SoulKnowledge,
    pub focus: SoulFocus,
    pub metrics: SoulMetrics,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_body_id: Option<BodyId>,
    #[serde(default)]
    pub body_history: Vec<BodyRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An ephemeral process instance a soul can be bound to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Body {
    pub body_id: BodyId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub soul_id: Option<SoulId>,
    pub status: BodyStatus,
    pub current_tokens: i64,
    pub peak_tokens: i64,
    /// Exponentially smoothed tokens/minute.
    pub burn_rate: f64,
    pub last_heartbeat: DateTime<Utc>,
    pub error_count: i64,
    pub created_at: DateTime<Utc>,
}

/// A soul-binding migration between two bodies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transfer {
    pub transfer_id: TransferId,
    pub soul_id: SoulId,
    pub from_body_id: BodyId,
    pub to_body_id: BodyId,
    pub status: TransferStatus,
    pub reason: String,
    pub tokens_saved: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_status_wire_format_is_kebab_case() {
        let json = serde_json::to_string(&TaskStatus::InProgress).unwrap();
        assert_eq!(json, "\"in-progress\"");
        assert_eq!("in-progress".parse::<TaskStatus>().unwrap(), TaskStatus::InProgress);
    }

    #[test]
    fn transfer_terminal_states() {
        assert!(TransferStatus::Completed.is_terminal());
        assert!(TransferStatus::Failed.is_terminal());
        assert!(TransferStatus::RolledBack.is_terminal());
        assert!(!TransferStatus::Injecting.is_terminal());
    }

    #[test]
    fn budget_levels_order() {
        assert!(BudgetLevel::Safe < BudgetLevel::Warning);
        assert!(BudgetLevel::Danger < BudgetLevel::Critical);
    }

    #[test]
    fn status_display_matches_serde() {
        for status in [
            TransferStatus::Initiated,
            TransferStatus::RolledBack,
            TransferStatus::Completed,
        ] {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json.trim_matches('"'), status.to_string());
        }
    }
}

//! Row types and persisted vocabularies.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Account created on first sign-in; never deleted.
#[derive(Clone, Debug, PartialEq)]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
    pub picture: Option<String>,
    pub custom_instructions: Option<String>,
    pub created_at: NaiveDateTime,
}

/// A conversation. `is_planning` and `is_agent` are mutually exclusive;
/// regular conversations have both false.
#[derive(Clone, Debug, PartialEq)]
pub struct Conversation {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub model: String,
    pub is_planning: bool,
    pub is_agent: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    #[default]
    User,
    Assistant,
    Tool,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::Tool => "tool",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(MessageRole::User),
            "assistant" => Some(MessageRole::Assistant),
            "tool" => Some(MessageRole::Tool),
            _ => None,
        }
    }
}

/// File metadata on a message; binary content lives in the blob store
/// under `<message_id>:<file_index>`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredFile {
    pub name: String,
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// A web source the model actually referenced.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub title: String,
    pub url: String,
}

/// Metadata for one generated image (the prompt that produced it).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeneratedImageMeta {
    pub prompt: String,
}

/// One stored message. Totally ordered within a conversation by
/// `(created_at, id)`.
#[derive(Clone, Debug, PartialEq)]
pub struct StoredMessage {
    pub id: String,
    pub conversation_id: String,
    pub role: MessageRole,
    pub content: String,
    pub created_at: NaiveDateTime,
    pub files: Vec<StoredFile>,
    pub sources: Option<Vec<Source>>,
    pub generated_images: Option<Vec<GeneratedImageMeta>>,
    pub language: Option<String>,
}

/// A named, scheduled, autonomous conversational unit owned by a user.
#[derive(Clone, Debug, PartialEq)]
pub struct Agent {
    pub id: String,
    pub user_id: String,
    /// Unique per user.
    pub name: String,
    pub description: Option<String>,
    pub system_prompt: String,
    /// Five-field cron; `None` means manual/agent-trigger only.
    pub schedule: Option<String>,
    /// IANA zone the schedule is evaluated in.
    pub timezone: String,
    pub model: String,
    pub enabled: bool,
    /// `None` = all tools; `Some(list)` = allow-list (may be empty).
    pub tool_permissions: Option<Vec<String>>,
    /// Daily USD cap; `None` = unlimited.
    pub budget_limit: Option<f64>,
    /// Naive UTC.
    pub next_run_at: Option<NaiveDateTime>,
    pub last_run_at: Option<NaiveDateTime>,
    /// The one conversation this agent owns for its life.
    pub conversation_id: String,
    pub created_at: NaiveDateTime,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
    WaitingApproval,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::WaitingApproval => "waiting_approval",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(ExecutionStatus::Running),
            "completed" => Some(ExecutionStatus::Completed),
            "failed" => Some(ExecutionStatus::Failed),
            "waiting_approval" => Some(ExecutionStatus::WaitingApproval),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TriggerType {
    Scheduled,
    Manual,
    AgentTrigger,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerType::Scheduled => "scheduled",
            TriggerType::Manual => "manual",
            TriggerType::AgentTrigger => "agent_trigger",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "scheduled" => Some(TriggerType::Scheduled),
            "manual" => Some(TriggerType::Manual),
            "agent_trigger" => Some(TriggerType::AgentTrigger),
            _ => None,
        }
    }
}

/// One run of one agent; created at the start of every run.
#[derive(Clone, Debug, PartialEq)]
pub struct AgentExecution {
    pub id: String,
    pub agent_id: String,
    pub trigger_type: TriggerType,
    pub triggered_by_agent_id: Option<String>,
    pub status: ExecutionStatus,
    pub started_at: NaiveDateTime,
    pub error_message: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ApprovalStatus::Pending),
            "approved" => Some(ApprovalStatus::Approved),
            "rejected" => Some(ApprovalStatus::Rejected),
            _ => None,
        }
    }
}

/// A pending user decision raised by an autonomous agent.
#[derive(Clone, Debug, PartialEq)]
pub struct ApprovalRequest {
    pub id: String,
    pub agent_id: String,
    pub user_id: String,
    pub tool_name: String,
    pub tool_args: Value,
    pub description: String,
    pub status: ApprovalStatus,
    pub created_at: NaiveDateTime,
    pub decided_at: Option<NaiveDateTime>,
}

/// Append-only cost row; survives conversation deletes.
#[derive(Clone, Debug, PartialEq)]
pub struct MessageCost {
    pub id: String,
    pub message_id: String,
    pub conversation_id: String,
    pub user_id: String,
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cost_usd: f64,
    pub image_cost_usd: Option<f64>,
    pub created_at: NaiveDateTime,
}

/// One long-term memory entry for a user.
#[derive(Clone, Debug, PartialEq)]
pub struct MemoryEntry {
    pub id: String,
    pub user_id: String,
    pub content: String,
    pub category: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_vocabulary_round_trips() {
        for status in [
            ExecutionStatus::Running,
            ExecutionStatus::Completed,
            ExecutionStatus::Failed,
            ExecutionStatus::WaitingApproval,
        ] {
            assert_eq!(ExecutionStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ExecutionStatus::parse("paused"), None);
    }

    #[test]
    fn trigger_vocabulary_round_trips() {
        for trigger in [
            TriggerType::Scheduled,
            TriggerType::Manual,
            TriggerType::AgentTrigger,
        ] {
            assert_eq!(TriggerType::parse(trigger.as_str()), Some(trigger));
        }
    }
}

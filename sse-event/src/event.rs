//! Stream event types: type + payload, serialized with a `type` tag.
//!
//! Event order within one request: optional `placeholder`, then any number
//! of `thinking` / `tool_start` / `tool_end` / `token`, exactly one `final`,
//! then `done` (or `error`). Consumers must tolerate unknown fields.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Icon names the frontend may render for a tool. Fixed set; adding a
/// variant requires a matching frontend asset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolIcon {
    Search,
    Link,
    Sparkles,
    Code,
    Checklist,
    Refresh,
    Calendar,
}

/// Display metadata for one tool: present-tense label while running,
/// past-tense label once finished, and an icon from the fixed set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDisplayMeta {
    pub label: String,
    pub past_label: String,
    pub icon: ToolIcon,
}

/// One stream event: wire shape for the chat SSE endpoint and agent runs.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    /// Emitted first when the placeholder optimization is enabled; carries
    /// the id of the empty assistant row streaming tokens belong to.
    Placeholder { message_id: String },
    /// Model reasoning text (only when the model exposes thoughts).
    Thinking { text: String },
    ToolStart {
        tool: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        metadata: Option<ToolDisplayMeta>,
    },
    ToolEnd { tool: String },
    /// One text fragment for incremental display.
    Token { text: String },
    /// Terminal payload: clean content plus everything the server extracted.
    Final {
        content: String,
        metadata: Value,
        tool_results: Vec<Value>,
        usage_info: Value,
    },
    /// Emitted after the assistant message is persisted on the consumer path.
    Done {
        message_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        #[serde(skip_serializing_if = "Vec::is_empty", default)]
        sources: Vec<Value>,
        #[serde(skip_serializing_if = "Vec::is_empty", default)]
        generated_images: Vec<Value>,
    },
    Error { message: String },
}

impl ChatEvent {
    /// Serializes this event to its JSON payload (no SSE framing).
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

//! Internal stream events emitted by graph nodes.
//!
//! Nodes push these through the `RunContext` channel; the chat facade maps
//! them to wire-level `sse_event::ChatEvent`s, handling metadata-marker
//! buffering and display metadata along the way.

use serde_json::Value;

use crate::llm::LlmUsage;

/// One event from inside a graph run.
#[derive(Clone, Debug)]
pub enum StreamEvent {
    /// Text fragment from the model.
    Token { text: String },
    /// Reasoning fragment (models with thoughts only).
    Thinking { text: String },
    /// The model requested a tool call (full arguments resolved).
    ToolCall { name: String, arguments: Value },
    /// One tool finished executing.
    ToolEnd { tool: String },
    /// Stripped tool result content, in execution order.
    ToolResult { content: String },
    /// Usage for one model call.
    Usage { usage: LlmUsage },
}

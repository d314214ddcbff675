//! Conversation messages flowing through the graph.
//!
//! One enum covers the four roles the model sees. User messages may carry
//! multimodal blocks (inline images/PDFs, fenced text files); assistant
//! messages carry tool calls and usage metadata; tool messages carry one
//! tool's (already stripped) result.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::llm::LlmUsage;

/// One tool invocation requested by the model. Arguments are
/// schema-validated by the vendor, so they are read directly, never reparsed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// One block of multimodal user content.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    /// Inline base64 payload; images and PDFs both travel this way.
    Inline { mime_type: String, data: String },
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UserMessage {
    pub content: String,
    /// Extra multimodal blocks; empty means plain text only.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blocks: Vec<ContentBlock>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AssistantMessage {
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<LlmUsage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolMessage {
    pub call_id: String,
    pub tool: String,
    /// Result content as JSON text, `_full_result` already stripped.
    pub content: String,
    #[serde(default)]
    pub is_error: bool,
}

/// One message in graph state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    System(SystemBody),
    User(UserMessage),
    Assistant(AssistantMessage),
    Tool(ToolMessage),
}

/// Newtype so the serde tag stays on the enum.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemBody {
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Message::System(SystemBody {
            content: content.into(),
        })
    }

    pub fn user(content: impl Into<String>) -> Self {
        Message::User(UserMessage {
            content: content.into(),
            blocks: Vec::new(),
        })
    }

    pub fn user_with_blocks(content: impl Into<String>, blocks: Vec<ContentBlock>) -> Self {
        Message::User(UserMessage {
            content: content.into(),
            blocks,
        })
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Message::Assistant(AssistantMessage {
            content: content.into(),
            ..Default::default()
        })
    }

    pub fn tool(
        call_id: impl Into<String>,
        tool: impl Into<String>,
        content: impl Into<String>,
        is_error: bool,
    ) -> Self {
        Message::Tool(ToolMessage {
            call_id: call_id.into(),
            tool: tool.into(),
            content: content.into(),
            is_error,
        })
    }

    pub fn as_assistant(&self) -> Option<&AssistantMessage> {
        match self {
            Message::Assistant(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_tool(&self) -> Option<&ToolMessage> {
        match self {
            Message::Tool(m) => Some(m),
            _ => None,
        }
    }

    pub fn is_assistant(&self) -> bool {
        matches!(self, Message::Assistant(_))
    }

    /// Plain text view used by prompts and logging.
    pub fn content(&self) -> &str {
        match self {
            Message::System(m) => &m.content,
            Message::User(m) => &m.content,
            Message::Assistant(m) => &m.content,
            Message::Tool(m) => &m.content,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_set_roles() {
        assert!(matches!(Message::system("s"), Message::System(_)));
        assert!(matches!(Message::user("u"), Message::User(_)));
        assert!(Message::assistant("a").is_assistant());
        assert!(Message::tool("c1", "web_search", "{}", false)
            .as_tool()
            .is_some());
    }

    #[test]
    fn message_round_trips_through_json() {
        let msg = Message::Assistant(AssistantMessage {
            content: "ok".into(),
            tool_calls: vec![ToolCall {
                id: "tc1".into(),
                name: "web_search".into(),
                arguments: serde_json::json!({"query": "prague weather"}),
            }],
            usage: None,
            thinking: None,
        });
        let text = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&text).unwrap();
        assert_eq!(msg, back);
    }
}

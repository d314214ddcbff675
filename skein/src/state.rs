//! Graph state for the chat state machine.

use crate::message::{Message, ToolCall};

/// Shared state flowing through plan → chat → tools → check_tool_results.
#[derive(Clone, Debug, Default)]
pub struct ChatState {
    pub messages: Vec<Message>,
    /// Consecutive failed tool batches for this request; reset on success.
    pub tool_retries: u32,
    /// Step outline produced by the plan node; consumed (cleared) by chat.
    pub plan: Option<String>,
}

impl ChatState {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            tool_retries: 0,
            plan: None,
        }
    }

    /// Tool calls of the most recent assistant message, if any.
    pub fn last_tool_calls(&self) -> &[ToolCall] {
        self.messages
            .iter()
            .rev()
            .find_map(|m| m.as_assistant())
            .map(|m| m.tool_calls.as_slice())
            .unwrap_or(&[])
    }

    /// Tool messages produced since the most recent assistant message.
    pub fn tool_messages_since_last_assistant(&self) -> Vec<&crate::message::ToolMessage> {
        let mut out = Vec::new();
        for msg in self.messages.iter().rev() {
            match msg {
                Message::Assistant(_) => break,
                Message::Tool(t) => out.push(t),
                _ => {}
            }
        }
        out.reverse();
        out
    }

    /// Content of the latest user message (the one driving this request).
    pub fn last_user_content(&self) -> Option<&str> {
        self.messages.iter().rev().find_map(|m| match m {
            Message::User(u) => Some(u.content.as_str()),
            _ => None,
        })
    }

    /// Last assistant message with actual text content, skipping turns that
    /// only carried tool calls.
    pub fn last_assistant_text(&self) -> Option<&str> {
        self.messages.iter().rev().find_map(|m| match m {
            Message::Assistant(a) if !a.content.trim().is_empty() => Some(a.content.as_str()),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{AssistantMessage, ToolCall};

    fn assistant_with_calls(content: &str, calls: Vec<ToolCall>) -> Message {
        Message::Assistant(AssistantMessage {
            content: content.into(),
            tool_calls: calls,
            usage: None,
            thinking: None,
        })
    }

    #[test]
    fn last_tool_calls_reads_most_recent_assistant() {
        let call = ToolCall {
            id: "tc1".into(),
            name: "web_search".into(),
            arguments: serde_json::json!({}),
        };
        let state = ChatState::new(vec![
            Message::user("hi"),
            assistant_with_calls("", vec![call.clone()]),
        ]);
        assert_eq!(state.last_tool_calls(), &[call]);
    }

    #[test]
    fn tool_messages_since_last_assistant_stop_at_assistant() {
        let state = ChatState::new(vec![
            assistant_with_calls("first", vec![]),
            Message::tool("a", "web_search", "{}", false),
            assistant_with_calls("second", vec![]),
            Message::tool("b", "fetch_url", "{}", true),
            Message::tool("c", "fetch_url", "{}", false),
        ]);
        let tools = state.tool_messages_since_last_assistant();
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0].call_id, "b");
        assert_eq!(tools[1].call_id, "c");
    }

    #[test]
    fn last_assistant_text_skips_tool_call_only_turns() {
        let call = ToolCall {
            id: "tc1".into(),
            name: "web_search".into(),
            arguments: serde_json::json!({}),
        };
        let state = ChatState::new(vec![
            assistant_with_calls("real answer", vec![]),
            assistant_with_calls("", vec![call]),
        ]);
        assert_eq!(state.last_assistant_text(), Some("real answer"));
    }
}

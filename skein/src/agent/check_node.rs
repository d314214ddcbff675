//! Self-correction gate after tool execution.
//!
//! Scans the tool batch since the last assistant message. Failures bump
//! the retry counter and append guidance; past the budget the guidance
//! flips to giving up. An all-success batch resets the counter. This is
//! what turns one-shot tool orchestration into a bounded retry loop.

use async_trait::async_trait;

use crate::error::AgentError;
use crate::graph::{Next, Node};
use crate::message::Message;
use crate::retry::text_looks_transient;
use crate::state::ChatState;

const RETRY_GUIDANCE: &str = "The previous tool call failed. Try a different \
approach or different arguments instead of repeating the same call.";

const GIVE_UP_GUIDANCE: &str = "Tool calls keep failing. Stop retrying; \
answer with what you already have and explain what could not be done.";

pub struct CheckToolResultsNode {
    pub max_tool_retries: u32,
}

#[async_trait]
impl Node<ChatState> for CheckToolResultsNode {
    fn id(&self) -> &str {
        "check_tool_results"
    }

    async fn run(&self, mut state: ChatState) -> Result<(ChatState, Next), AgentError> {
        let batch = state.tool_messages_since_last_assistant();
        if batch.is_empty() {
            return Ok((state, Next::Continue));
        }

        let any_failure = batch
            .iter()
            .any(|t| t.is_error || text_looks_transient(&t.content));

        if !any_failure {
            state.tool_retries = 0;
            return Ok((state, Next::Continue));
        }

        state.tool_retries += 1;
        let guidance = if state.tool_retries > self.max_tool_retries {
            tracing::warn!(
                retries = state.tool_retries,
                "tool retry budget exhausted, instructing model to give up"
            );
            GIVE_UP_GUIDANCE
        } else {
            RETRY_GUIDANCE
        };
        state.messages.push(Message::system(guidance));
        Ok((state, Next::Continue))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node() -> CheckToolResultsNode {
        CheckToolResultsNode { max_tool_retries: 2 }
    }

    fn state_with_batch(batch: Vec<Message>, retries: u32) -> ChatState {
        let mut messages = vec![Message::assistant("calling tools")];
        messages.extend(batch);
        let mut state = ChatState::new(messages);
        state.tool_retries = retries;
        state
    }

    #[tokio::test]
    async fn success_resets_the_counter() {
        let state = state_with_batch(
            vec![Message::tool("a", "web_search", "{\"results\":[]}", false)],
            2,
        );
        let (out, _) = node().run(state).await.unwrap();
        assert_eq!(out.tool_retries, 0);
    }

    #[tokio::test]
    async fn explicit_error_increments_and_adds_guidance() {
        let state = state_with_batch(
            vec![Message::tool("a", "fetch_url", "{\"error\":\"boom\"}", true)],
            0,
        );
        let (out, _) = node().run(state).await.unwrap();
        assert_eq!(out.tool_retries, 1);
        assert!(out
            .messages
            .last()
            .unwrap()
            .content()
            .contains("different approach"));
    }

    #[tokio::test]
    async fn transient_text_counts_as_failure_even_without_error_flag() {
        let state = state_with_batch(
            vec![Message::tool(
                "a",
                "fetch_url",
                "{\"content\":\"503 Service Unavailable\"}",
                false,
            )],
            0,
        );
        let (out, _) = node().run(state).await.unwrap();
        assert_eq!(out.tool_retries, 1);
    }

    #[tokio::test]
    async fn exhausted_budget_switches_to_give_up_guidance() {
        let state = state_with_batch(
            vec![Message::tool("a", "fetch_url", "{\"error\":\"timeout\"}", true)],
            2,
        );
        let (out, _) = node().run(state).await.unwrap();
        assert_eq!(out.tool_retries, 3);
        assert!(out
            .messages
            .last()
            .unwrap()
            .content()
            .contains("Stop retrying"));
    }

    #[tokio::test]
    async fn no_tool_batch_is_a_no_op() {
        let state = ChatState::new(vec![Message::assistant("plain turn")]);
        let (out, _) = node().run(state).await.unwrap();
        assert_eq!(out.tool_retries, 0);
        assert_eq!(out.messages.len(), 1);
    }
}

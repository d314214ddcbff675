//! Plan node: classifier + outliner for long requests.
//!
//! Entered first on every run; decides internally whether planning
//! applies (enabled, empty plan, latest user message long enough). A cheap
//! classifier call answers PLAN or CHAT; on PLAN, an outliner call writes
//! a numbered step list into the state. Model errors fall through to chat.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::AgentError;
use crate::graph::{Next, Node};
use crate::llm::LlmClient;
use crate::state::ChatState;

pub struct PlanNode {
    /// Cheap classifier/outliner model, not the main chat model.
    pub llm: Arc<dyn LlmClient>,
    pub enabled: bool,
    pub min_length: usize,
}

fn classifier_prompt(request: &str) -> String {
    format!(
        "Decide whether the following request needs a step-by-step plan \
         before answering. Reply with exactly one word: PLAN or CHAT.\n\n\
         Request:\n{request}"
    )
}

fn outliner_prompt(request: &str) -> String {
    format!(
        "Write a short numbered list of steps (at most 6) for handling this \
         request. Output only the list.\n\nRequest:\n{request}"
    )
}

#[async_trait]
impl Node<ChatState> for PlanNode {
    fn id(&self) -> &str {
        "plan"
    }

    async fn run(&self, mut state: ChatState) -> Result<(ChatState, Next), AgentError> {
        if !self.enabled || state.plan.is_some() {
            return Ok((state, Next::Continue));
        }
        let Some(request) = state.last_user_content().map(str::to_string) else {
            return Ok((state, Next::Continue));
        };
        if request.chars().count() <= self.min_length {
            return Ok((state, Next::Continue));
        }

        let verdict = match self
            .llm
            .invoke(&[crate::message::Message::user(classifier_prompt(&request))], &[])
            .await
        {
            Ok(response) => response.content.trim().to_uppercase(),
            Err(error) => {
                tracing::warn!(%error, "plan classifier failed, falling through to chat");
                return Ok((state, Next::Continue));
            }
        };
        if !verdict.starts_with("PLAN") {
            return Ok((state, Next::Continue));
        }

        match self
            .llm
            .invoke(&[crate::message::Message::user(outliner_prompt(&request))], &[])
            .await
        {
            Ok(response) if !response.content.trim().is_empty() => {
                tracing::debug!("plan produced for request");
                state.plan = Some(response.content.trim().to_string());
            }
            Ok(_) => {}
            Err(error) => {
                tracing::warn!(%error, "plan outliner failed, falling through to chat");
            }
        }
        Ok((state, Next::Continue))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmResponse, MockLlm};
    use crate::message::Message;

    fn long_request() -> String {
        "please ".repeat(30)
    }

    fn state_with_user(content: String) -> ChatState {
        ChatState::new(vec![Message::user(content)])
    }

    #[tokio::test]
    async fn short_messages_skip_planning() {
        let llm = Arc::new(MockLlm::with_no_tool_calls("PLAN"));
        let node = PlanNode {
            llm: llm.clone(),
            enabled: true,
            min_length: 120,
        };
        let (out, _) = node.run(state_with_user("hi".into())).await.unwrap();
        assert!(out.plan.is_none());
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn chat_verdict_leaves_plan_empty() {
        let llm = Arc::new(MockLlm::with_no_tool_calls("CHAT"));
        let node = PlanNode {
            llm,
            enabled: true,
            min_length: 120,
        };
        let (out, _) = node.run(state_with_user(long_request())).await.unwrap();
        assert!(out.plan.is_none());
    }

    #[tokio::test]
    async fn plan_verdict_writes_the_outline() {
        let llm = Arc::new(MockLlm::with_script(vec![
            LlmResponse {
                content: "PLAN".into(),
                ..Default::default()
            },
            LlmResponse {
                content: "1. Research\n2. Summarize".into(),
                ..Default::default()
            },
        ]));
        let node = PlanNode {
            llm,
            enabled: true,
            min_length: 120,
        };
        let (out, _) = node.run(state_with_user(long_request())).await.unwrap();
        assert_eq!(out.plan.as_deref(), Some("1. Research\n2. Summarize"));
    }

    #[tokio::test]
    async fn classifier_error_falls_through_to_chat() {
        let llm = Arc::new(MockLlm::failing("503 service unavailable"));
        let node = PlanNode {
            llm,
            enabled: true,
            min_length: 120,
        };
        let (out, next) = node.run(state_with_user(long_request())).await.unwrap();
        assert!(out.plan.is_none());
        assert_eq!(next, Next::Continue);
    }

    #[tokio::test]
    async fn existing_plan_is_not_overwritten() {
        let llm = Arc::new(MockLlm::with_no_tool_calls("PLAN"));
        let node = PlanNode {
            llm: llm.clone(),
            enabled: true,
            min_length: 120,
        };
        let mut state = state_with_user(long_request());
        state.plan = Some("already planned".into());
        let (out, _) = node.run(state).await.unwrap();
        assert_eq!(out.plan.as_deref(), Some("already planned"));
        assert_eq!(llm.call_count(), 0);
    }
}

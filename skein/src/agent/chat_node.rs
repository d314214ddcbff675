//! Chat node: the main model call.
//!
//! Injects a pending plan into the message list (then clears it), invokes
//! the bound model through the transient-retry wrapper, and appends the
//! assistant message. When streaming, token/thinking fragments are
//! forwarded as they arrive and tool calls are announced once their
//! arguments resolve.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::AgentError;
use crate::graph::{Next, Node, RunContext};
use crate::llm::{LlmChunk, LlmClient, LlmResponse};
use crate::message::{AssistantMessage, Message};
use crate::retry::{with_retry, RetryConfig};
use crate::state::ChatState;
use crate::stream::StreamEvent;
use crate::tools::ToolSpec;

const EMPTY_RESPONSE_FALLBACK: &str =
    "No text response from the model. Please try again or check the API.";

pub struct ChatNode {
    pub llm: Arc<dyn LlmClient>,
    pub tools: Vec<ToolSpec>,
    pub retry: RetryConfig,
}

impl ChatNode {
    fn apply_response(&self, mut state: ChatState, response: LlmResponse) -> ChatState {
        let content = if response.content.is_empty() && response.tool_calls.is_empty() {
            EMPTY_RESPONSE_FALLBACK.to_string()
        } else {
            response.content
        };
        state.messages.push(Message::Assistant(AssistantMessage {
            content,
            tool_calls: response.tool_calls,
            usage: response.usage,
            thinking: response.thinking,
        }));
        state
    }

    fn inject_plan(&self, state: &mut ChatState) {
        if let Some(plan) = state.plan.take() {
            state.messages.push(Message::system(format!(
                "Work through the request following this plan, adapting as \
                 needed:\n{plan}"
            )));
        }
    }
}

#[async_trait]
impl Node<ChatState> for ChatNode {
    fn id(&self) -> &str {
        "chat"
    }

    async fn run(&self, mut state: ChatState) -> Result<(ChatState, Next), AgentError> {
        self.inject_plan(&mut state);
        let messages = state.messages.clone();
        let response = with_retry(&self.retry, || {
            let llm = self.llm.clone();
            let messages = messages.clone();
            let specs = self.tools.clone();
            async move { llm.invoke(&messages, &specs).await }
        })
        .await?;
        Ok((self.apply_response(state, response), Next::Continue))
    }

    async fn run_with_context(
        &self,
        mut state: ChatState,
        ctx: &RunContext,
    ) -> Result<(ChatState, Next), AgentError> {
        let Some(stream_tx) = ctx.stream_tx.clone() else {
            return self.run(state).await;
        };

        self.inject_plan(&mut state);
        let messages = state.messages.clone();
        let (chunk_tx, mut chunk_rx) = mpsc::channel::<LlmChunk>(64);

        let forward_tx = stream_tx.clone();
        let forward = async move {
            let mut streamed = 0usize;
            while let Some(chunk) = chunk_rx.recv().await {
                let event = match chunk {
                    LlmChunk::Text(text) => {
                        streamed += 1;
                        StreamEvent::Token { text }
                    }
                    LlmChunk::Thinking(text) => StreamEvent::Thinking { text },
                };
                let _ = forward_tx.send(event).await;
            }
            streamed
        };

        let invoke = async {
            let result = with_retry(&self.retry, || {
                let llm = self.llm.clone();
                let messages = messages.clone();
                let specs = self.tools.clone();
                let tx = chunk_tx.clone();
                async move { llm.invoke_stream(&messages, &specs, Some(tx)).await }
            })
            .await;
            // Close the channel so the forwarder drains and exits.
            drop(chunk_tx);
            result
        };

        let (result, streamed_chunks) = tokio::join!(invoke, forward);
        let response = result?;

        // A model that streamed nothing still gets its content delivered.
        let fallback_needed = response.content.is_empty() && response.tool_calls.is_empty();
        if fallback_needed {
            let _ = stream_tx
                .send(StreamEvent::Token {
                    text: EMPTY_RESPONSE_FALLBACK.to_string(),
                })
                .await;
        } else if streamed_chunks == 0 && !response.content.is_empty() {
            let _ = stream_tx
                .send(StreamEvent::Token {
                    text: response.content.clone(),
                })
                .await;
        }

        for call in &response.tool_calls {
            let _ = stream_tx
                .send(StreamEvent::ToolCall {
                    name: call.name.clone(),
                    arguments: call.arguments.clone(),
                })
                .await;
        }
        if let Some(usage) = &response.usage {
            let _ = stream_tx
                .send(StreamEvent::Usage {
                    usage: usage.clone(),
                })
                .await;
        }

        Ok((self.apply_response(state, response), Next::Continue))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmUsage, MockLlm};
    use crate::message::ToolCall;

    fn node(llm: Arc<dyn LlmClient>) -> ChatNode {
        ChatNode {
            llm,
            tools: vec![],
            retry: RetryConfig {
                max_retries: 0,
                base_delay: std::time::Duration::from_millis(1),
                max_delay: std::time::Duration::from_millis(1),
            },
        }
    }

    #[tokio::test]
    async fn plan_is_injected_once_and_cleared() {
        let llm = Arc::new(MockLlm::with_no_tool_calls("done"));
        let node = node(llm);
        let mut state = ChatState::new(vec![Message::user("hi")]);
        state.plan = Some("1. answer".into());

        let (out, _) = node.run(state).await.unwrap();
        assert!(out.plan.is_none());
        let has_plan_directive = out
            .messages
            .iter()
            .any(|m| matches!(m, Message::System(s) if s.content.contains("1. answer")));
        assert!(has_plan_directive);
    }

    #[tokio::test]
    async fn empty_response_gets_fallback_content() {
        let llm = Arc::new(MockLlm::with_no_tool_calls(""));
        let node = node(llm);
        let (out, _) = node
            .run(ChatState::new(vec![Message::user("hi")]))
            .await
            .unwrap();
        assert_eq!(
            out.messages.last().unwrap().content(),
            EMPTY_RESPONSE_FALLBACK
        );
    }

    #[tokio::test]
    async fn streaming_emits_tool_calls_and_usage() {
        let llm = Arc::new(MockLlm::with_script(vec![LlmResponse {
            content: String::new(),
            tool_calls: vec![ToolCall {
                id: "tc1".into(),
                name: "web_search".into(),
                arguments: serde_json::json!({"query": "x"}),
            }],
            usage: Some(LlmUsage {
                input_tokens: 5,
                output_tokens: 2,
            }),
            thinking: None,
        }]));
        let node = node(llm);
        let (tx, mut rx) = mpsc::channel(16);
        let ctx = RunContext::default().with_stream(tx);

        let (out, _) = node
            .run_with_context(ChatState::new(vec![Message::user("hi")]), &ctx)
            .await
            .unwrap();
        drop(ctx);
        assert_eq!(out.last_tool_calls().len(), 1);

        let mut saw_tool_call = false;
        let mut saw_usage = false;
        while let Some(event) = rx.recv().await {
            match event {
                StreamEvent::ToolCall { name, .. } => {
                    assert_eq!(name, "web_search");
                    saw_tool_call = true;
                }
                StreamEvent::Usage { usage } => {
                    assert_eq!(usage.input_tokens, 5);
                    saw_usage = true;
                }
                _ => {}
            }
        }
        assert!(saw_tool_call && saw_usage);
    }
}

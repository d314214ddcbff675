//! LLM client abstraction for the chat node.
//!
//! The chat node depends on a callable that returns assistant text,
//! optional thinking, and optional tool calls; this module defines the
//! trait, a scripted mock for tests, and a Gemini REST implementation.
//!
//! # Streaming
//!
//! `invoke_stream()` accepts an optional `Sender<LlmChunk>`; implementations
//! that stream (like `GeminiChat`) send text/thinking fragments as they
//! arrive and still return the complete `LlmResponse` at the end. The
//! default implementation calls `invoke()` and sends the full content as a
//! single chunk.

mod gemini;
mod mock;

pub use gemini::{GeminiChat, GeminiImage, GeneratedImage, ImageGenerator};
pub use mock::{MockImageGenerator, MockLlm};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::AgentError;
use crate::message::{Message, ToolCall};
use crate::tools::ToolSpec;

/// Token usage for one LLM call.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl LlmUsage {
    pub fn add(&mut self, other: &LlmUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

/// One streamed fragment from the model.
#[derive(Clone, Debug)]
pub enum LlmChunk {
    Text(String),
    /// Reasoning text, only when the model exposes thoughts.
    Thinking(String),
}

/// Response from one completion: assistant text, optional thinking,
/// optional tool calls, optional usage.
#[derive(Clone, Debug, Default)]
pub struct LlmResponse {
    pub content: String,
    pub thinking: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<LlmUsage>,
}

/// LLM client: given messages and bound tool specs, returns assistant
/// content and optional tool calls.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// One turn: read messages, return assistant content and tool calls.
    async fn invoke(
        &self,
        messages: &[Message],
        tools: &[ToolSpec],
    ) -> Result<LlmResponse, AgentError>;

    /// Streaming variant. When `chunk_tx` is `Some`, implementations send
    /// fragments through the channel as they arrive; the complete response
    /// is still returned. Send failures are ignored: a gone receiver must
    /// not abort the model call (the cleanup path still needs the content).
    async fn invoke_stream(
        &self,
        messages: &[Message],
        tools: &[ToolSpec],
        chunk_tx: Option<mpsc::Sender<LlmChunk>>,
    ) -> Result<LlmResponse, AgentError> {
        let response = self.invoke(messages, tools).await?;
        if let Some(tx) = chunk_tx {
            if let Some(thinking) = &response.thinking {
                let _ = tx.send(LlmChunk::Thinking(thinking.clone())).await;
            }
            if !response.content.is_empty() {
                let _ = tx.send(LlmChunk::Text(response.content.clone())).await;
            }
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn default_invoke_stream_sends_one_chunk() {
        let llm = MockLlm::with_no_tool_calls("hello world");
        let (tx, mut rx) = mpsc::channel(8);
        let response = llm
            .invoke_stream(&[Message::user("hi")], &[], Some(tx))
            .await
            .unwrap();
        assert_eq!(response.content, "hello world");
        match rx.recv().await {
            Some(LlmChunk::Text(text)) => assert_eq!(text, "hello world"),
            other => panic!("expected text chunk, got {other:?}"),
        }
    }

    #[test]
    fn usage_add_accumulates() {
        let mut total = LlmUsage::default();
        total.add(&LlmUsage {
            input_tokens: 10,
            output_tokens: 5,
        });
        total.add(&LlmUsage {
            input_tokens: 3,
            output_tokens: 2,
        });
        assert_eq!(total.input_tokens, 13);
        assert_eq!(total.output_tokens, 7);
    }
}

//! Scripted mock LLM for tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::AgentError;
use crate::message::Message;
use crate::tools::ToolSpec;

use super::{GeneratedImage, ImageGenerator, LlmResponse, LlmUsage};

/// Mock client that replays a script of responses, then falls back to a
/// fixed no-tool-call reply. Invocation history is recorded for assertions.
pub struct MockLlm {
    script: Mutex<VecDeque<LlmResponse>>,
    fallback: String,
    /// Message counts per invocation, for assertions on prompt assembly.
    invocations: Mutex<Vec<usize>>,
    /// When set, every call fails with this error message.
    fail_with: Option<String>,
}

impl MockLlm {
    /// Always replies with `content` and no tool calls.
    pub fn with_no_tool_calls(content: impl Into<String>) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: content.into(),
            invocations: Mutex::new(Vec::new()),
            fail_with: None,
        }
    }

    /// Replays `responses` in order, then falls back to an empty reply.
    pub fn with_script(responses: Vec<LlmResponse>) -> Self {
        Self {
            script: Mutex::new(responses.into()),
            fallback: String::new(),
            invocations: Mutex::new(Vec::new()),
            fail_with: None,
        }
    }

    /// Every call fails with the given error message.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: String::new(),
            invocations: Mutex::new(Vec::new()),
            fail_with: Some(message.into()),
        }
    }

    /// Number of invocations observed so far.
    pub fn call_count(&self) -> usize {
        self.invocations.lock().unwrap().len()
    }
}

#[async_trait]
impl super::LlmClient for MockLlm {
    async fn invoke(
        &self,
        messages: &[Message],
        _tools: &[ToolSpec],
    ) -> Result<LlmResponse, AgentError> {
        self.invocations.lock().unwrap().push(messages.len());
        if let Some(msg) = &self.fail_with {
            return Err(AgentError::Llm(msg.clone()));
        }
        if let Some(next) = self.script.lock().unwrap().pop_front() {
            return Ok(next);
        }
        Ok(LlmResponse {
            content: self.fallback.clone(),
            thinking: None,
            tool_calls: vec![],
            usage: Some(LlmUsage {
                input_tokens: 1,
                output_tokens: 1,
            }),
        })
    }
}

/// Mock image generator returning a tiny fixed payload.
pub struct MockImageGenerator;

#[async_trait]
impl ImageGenerator for MockImageGenerator {
    async fn generate(
        &self,
        _prompt: &str,
        _aspect_ratio: Option<&str>,
    ) -> Result<GeneratedImage, AgentError> {
        Ok(GeneratedImage {
            mime_type: "image/png".into(),
            data: "aGVsbG8=".into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmClient;
    use crate::message::ToolCall;

    #[tokio::test]
    async fn script_plays_in_order_then_falls_back() {
        let llm = MockLlm::with_script(vec![
            LlmResponse {
                content: "first".into(),
                ..Default::default()
            },
            LlmResponse {
                content: String::new(),
                tool_calls: vec![ToolCall {
                    id: "tc1".into(),
                    name: "web_search".into(),
                    arguments: serde_json::json!({"query": "x"}),
                }],
                ..Default::default()
            },
        ]);
        let msgs = [Message::user("hi")];
        assert_eq!(llm.invoke(&msgs, &[]).await.unwrap().content, "first");
        assert_eq!(llm.invoke(&msgs, &[]).await.unwrap().tool_calls.len(), 1);
        assert_eq!(llm.invoke(&msgs, &[]).await.unwrap().content, "");
        assert_eq!(llm.call_count(), 3);
    }

    #[tokio::test]
    async fn failing_mock_returns_llm_error() {
        let llm = MockLlm::failing("503 service unavailable");
        let err = llm.invoke(&[Message::user("hi")], &[]).await.unwrap_err();
        assert!(matches!(err, AgentError::Llm(_)));
    }
}

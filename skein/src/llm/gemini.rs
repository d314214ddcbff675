//! Gemini REST client: chat completions with function calling, SSE
//! streaming, and image generation.
//!
//! Talks to the Generative Language API directly over reqwest, keeping the
//! wire shapes local so the `LlmClient` trait stays vendor-neutral. HTTP
//! failures are surfaced with the status line in the message so the retry
//! layer can classify 429/503 as transient.

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::error::AgentError;
use crate::message::{ContentBlock, Message, ToolCall};
use crate::tools::ToolSpec;

use super::{LlmChunk, LlmClient, LlmResponse, LlmUsage};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Chat client for one Gemini model.
pub struct GeminiChat {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    temperature: Option<f32>,
    include_thoughts: bool,
}

impl GeminiChat {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            temperature: None,
            include_thoughts: false,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_thoughts(mut self, include_thoughts: bool) -> Self {
        self.include_thoughts = include_thoughts;
        self
    }

    /// Overrides the API endpoint (tests, proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn endpoint(&self, method: &str) -> String {
        format!(
            "{}/models/{}:{}?key={}",
            self.base_url, self.model, method, self.api_key
        )
    }
}

/// Converts crate messages into the Gemini `contents` array plus an
/// optional `systemInstruction`.
fn build_contents(messages: &[Message]) -> (Vec<Value>, Option<Value>) {
    let mut system_parts: Vec<Value> = Vec::new();
    let mut contents: Vec<Value> = Vec::new();

    for message in messages {
        match message {
            Message::System(body) => {
                system_parts.push(json!({"text": body.content}));
            }
            Message::User(user) => {
                let mut parts = Vec::new();
                if !user.content.is_empty() {
                    parts.push(json!({"text": user.content}));
                }
                for block in &user.blocks {
                    match block {
                        ContentBlock::Text { text } => parts.push(json!({"text": text})),
                        ContentBlock::Inline { mime_type, data } => parts.push(json!({
                            "inlineData": {"mimeType": mime_type, "data": data}
                        })),
                    }
                }
                if parts.is_empty() {
                    parts.push(json!({"text": ""}));
                }
                contents.push(json!({"role": "user", "parts": parts}));
            }
            Message::Assistant(assistant) => {
                let mut parts = Vec::new();
                if !assistant.content.is_empty() {
                    parts.push(json!({"text": assistant.content}));
                }
                for call in &assistant.tool_calls {
                    parts.push(json!({
                        "functionCall": {"name": call.name, "args": call.arguments}
                    }));
                }
                if parts.is_empty() {
                    parts.push(json!({"text": ""}));
                }
                contents.push(json!({"role": "model", "parts": parts}));
            }
            Message::Tool(tool) => {
                let response: Value = serde_json::from_str(&tool.content)
                    .unwrap_or_else(|_| json!({"result": tool.content}));
                contents.push(json!({
                    "role": "user",
                    "parts": [{"functionResponse": {"name": tool.tool, "response": response}}]
                }));
            }
        }
    }

    let system = if system_parts.is_empty() {
        None
    } else {
        Some(json!({"parts": system_parts}))
    };
    (contents, system)
}

fn build_request(
    messages: &[Message],
    tools: &[ToolSpec],
    temperature: Option<f32>,
    include_thoughts: bool,
) -> Value {
    let (contents, system) = build_contents(messages);
    let mut body = json!({"contents": contents});
    if let Some(system) = system {
        body["systemInstruction"] = system;
    }
    if !tools.is_empty() {
        let declarations: Vec<Value> = tools
            .iter()
            .map(|spec| {
                json!({
                    "name": spec.name,
                    "description": spec.description,
                    "parameters": spec.input_schema,
                })
            })
            .collect();
        body["tools"] = json!([{"functionDeclarations": declarations}]);
    }
    let mut generation = serde_json::Map::new();
    if let Some(t) = temperature {
        generation.insert("temperature".into(), json!(t));
    }
    if include_thoughts {
        generation.insert(
            "thinkingConfig".into(),
            json!({"includeThoughts": true}),
        );
    }
    if !generation.is_empty() {
        body["generationConfig"] = Value::Object(generation);
    }
    body
}

/// Extracts content/thinking/tool calls/usage from one response payload.
fn parse_response(value: &Value) -> LlmResponse {
    let mut response = LlmResponse::default();
    let parts = value
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut thinking = String::new();
    for part in &parts {
        if part.get("thought").and_then(Value::as_bool).unwrap_or(false) {
            if let Some(text) = part.get("text").and_then(Value::as_str) {
                thinking.push_str(text);
            }
            continue;
        }
        if let Some(text) = part.get("text").and_then(Value::as_str) {
            response.content.push_str(text);
        }
        if let Some(call) = part.get("functionCall") {
            let name = call
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let arguments = call.get("args").cloned().unwrap_or(json!({}));
            response.tool_calls.push(ToolCall {
                id: format!("call-{}", response.tool_calls.len()),
                name,
                arguments,
            });
        }
    }
    if !thinking.is_empty() {
        response.thinking = Some(thinking);
    }

    if let Some(meta) = value.get("usageMetadata") {
        response.usage = Some(LlmUsage {
            input_tokens: meta
                .get("promptTokenCount")
                .and_then(Value::as_u64)
                .unwrap_or(0) as u32,
            output_tokens: meta
                .get("candidatesTokenCount")
                .and_then(Value::as_u64)
                .unwrap_or(0) as u32,
        });
    }
    response
}

/// Splits complete `data: {json}` SSE lines out of the receive buffer,
/// returning parsed payloads and leaving any partial tail in place.
fn drain_sse_buffer(buffer: &mut String) -> Vec<Value> {
    let mut payloads = Vec::new();
    while let Some(pos) = buffer.find('\n') {
        let line: String = buffer.drain(..=pos).collect();
        let line = line.trim();
        if let Some(payload) = line.strip_prefix("data: ") {
            if let Ok(value) = serde_json::from_str::<Value>(payload) {
                payloads.push(value);
            }
        }
    }
    payloads
}

#[async_trait]
impl LlmClient for GeminiChat {
    async fn invoke(
        &self,
        messages: &[Message],
        tools: &[ToolSpec],
    ) -> Result<LlmResponse, AgentError> {
        let body = build_request(messages, tools, self.temperature, self.include_thoughts);
        let http = self
            .client
            .post(self.endpoint("generateContent"))
            .json(&body)
            .send()
            .await
            .map_err(|e| AgentError::Llm(e.to_string()))?;
        let status = http.status();
        let payload: Value = if status.is_success() {
            http.json().await.map_err(|e| AgentError::Llm(e.to_string()))?
        } else {
            let text = http.text().await.unwrap_or_default();
            return Err(AgentError::Llm(format!("{status}: {text}")));
        };
        Ok(parse_response(&payload))
    }

    async fn invoke_stream(
        &self,
        messages: &[Message],
        tools: &[ToolSpec],
        chunk_tx: Option<mpsc::Sender<LlmChunk>>,
    ) -> Result<LlmResponse, AgentError> {
        let body = build_request(messages, tools, self.temperature, self.include_thoughts);
        let url = format!("{}&alt=sse", self.endpoint("streamGenerateContent"));
        let http = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| AgentError::Llm(e.to_string()))?;
        let status = http.status();
        if !status.is_success() {
            let text = http.text().await.unwrap_or_default();
            return Err(AgentError::Llm(format!("{status}: {text}")));
        }

        let mut total = LlmResponse::default();
        let mut thinking = String::new();
        let mut buffer = String::new();
        let mut stream = http.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let bytes = chunk.map_err(|e| AgentError::Llm(e.to_string()))?;
            buffer.push_str(&String::from_utf8_lossy(&bytes));
            for payload in drain_sse_buffer(&mut buffer) {
                let partial = parse_response(&payload);
                if let Some(t) = &partial.thinking {
                    thinking.push_str(t);
                    if let Some(tx) = &chunk_tx {
                        let _ = tx.send(LlmChunk::Thinking(t.clone())).await;
                    }
                }
                if !partial.content.is_empty() {
                    total.content.push_str(&partial.content);
                    if let Some(tx) = &chunk_tx {
                        let _ = tx.send(LlmChunk::Text(partial.content.clone())).await;
                    }
                }
                total.tool_calls.extend(partial.tool_calls);
                if let Some(usage) = partial.usage {
                    // Gemini repeats cumulative usage per chunk; keep the latest.
                    total.usage = Some(usage);
                }
            }
        }
        // Re-key accumulated calls so ids stay unique across chunks.
        for (index, call) in total.tool_calls.iter_mut().enumerate() {
            call.id = format!("call-{index}");
        }
        if !thinking.is_empty() {
            total.thinking = Some(thinking);
        }
        Ok(total)
    }
}

/// One generated image payload (binary as base64).
#[derive(Clone, Debug)]
pub struct GeneratedImage {
    pub mime_type: String,
    pub data: String,
}

/// Image generation seam for the `generate_image` tool.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        aspect_ratio: Option<&str>,
    ) -> Result<GeneratedImage, AgentError>;
}

/// Gemini image generation client.
pub struct GeminiImage {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiImage {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl ImageGenerator for GeminiImage {
    async fn generate(
        &self,
        prompt: &str,
        aspect_ratio: Option<&str>,
    ) -> Result<GeneratedImage, AgentError> {
        let mut generation = json!({"responseModalities": ["IMAGE"]});
        if let Some(ratio) = aspect_ratio {
            generation["imageConfig"] = json!({"aspectRatio": ratio});
        }
        let body = json!({
            "contents": [{"role": "user", "parts": [{"text": prompt}]}],
            "generationConfig": generation,
        });
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );
        let http = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| AgentError::Llm(e.to_string()))?;
        let status = http.status();
        if !status.is_success() {
            let text = http.text().await.unwrap_or_default();
            return Err(AgentError::Llm(format!("{status}: {text}")));
        }
        let payload: Value = http.json().await.map_err(|e| AgentError::Llm(e.to_string()))?;
        let parts = payload
            .pointer("/candidates/0/content/parts")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for part in parts {
            if let Some(inline) = part.get("inlineData") {
                let mime_type = inline
                    .get("mimeType")
                    .and_then(Value::as_str)
                    .unwrap_or("image/png")
                    .to_string();
                let data = inline
                    .get("data")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                return Ok(GeneratedImage { mime_type, data });
            }
        }
        Err(AgentError::Llm("no image in generation response".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::AssistantMessage;

    #[test]
    fn system_messages_become_system_instruction() {
        let messages = [Message::system("be brief"), Message::user("hi")];
        let body = build_request(&messages, &[], None, false);
        assert_eq!(
            body["systemInstruction"]["parts"][0]["text"],
            "be brief"
        );
        assert_eq!(body["contents"].as_array().unwrap().len(), 1);
        assert_eq!(body["contents"][0]["role"], "user");
    }

    #[test]
    fn assistant_tool_calls_become_function_call_parts() {
        let messages = [Message::Assistant(AssistantMessage {
            content: String::new(),
            tool_calls: vec![ToolCall {
                id: "tc1".into(),
                name: "web_search".into(),
                arguments: json!({"query": "prague"}),
            }],
            usage: None,
            thinking: None,
        })];
        let body = build_request(&messages, &[], None, false);
        assert_eq!(
            body["contents"][0]["parts"][0]["functionCall"]["name"],
            "web_search"
        );
    }

    #[test]
    fn tool_specs_become_function_declarations() {
        let specs = [ToolSpec {
            name: "fetch_url".into(),
            description: "Fetch a URL".into(),
            input_schema: json!({"type": "object"}),
        }];
        let body = build_request(&[Message::user("x")], &specs, Some(0.3), false);
        assert_eq!(
            body["tools"][0]["functionDeclarations"][0]["name"],
            "fetch_url"
        );
        assert_eq!(body["generationConfig"]["temperature"], 0.3);
    }

    #[test]
    fn parse_response_splits_thought_and_text_and_calls() {
        let payload = json!({
            "candidates": [{"content": {"parts": [
                {"thought": true, "text": "let me think"},
                {"text": "Prague is sunny."},
                {"functionCall": {"name": "cite_sources", "args": {"sources": []}}}
            ]}}],
            "usageMetadata": {"promptTokenCount": 12, "candidatesTokenCount": 7}
        });
        let response = parse_response(&payload);
        assert_eq!(response.thinking.as_deref(), Some("let me think"));
        assert_eq!(response.content, "Prague is sunny.");
        assert_eq!(response.tool_calls.len(), 1);
        let usage = response.usage.unwrap();
        assert_eq!(usage.input_tokens, 12);
        assert_eq!(usage.output_tokens, 7);
    }

    #[test]
    fn drain_sse_buffer_keeps_partial_tail() {
        let mut buffer = String::from(
            "data: {\"candidates\":[]}\n\ndata: {\"candi",
        );
        let payloads = drain_sse_buffer(&mut buffer);
        assert_eq!(payloads.len(), 1);
        assert_eq!(buffer, "data: {\"candi");
    }
}

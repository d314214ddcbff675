//! Chat agent facade: one graph, three entry points.
//!
//! `chat_batch` runs to completion and extracts the answer; `stream_chat`
//! yields plain text tokens; `stream_chat_events` yields structured
//! events (thinking / tool_start / tool_end / token / final). All three
//! share message construction: system prompt assembly, the history
//! metadata prelude, and multimodal content blocks.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::mpsc;

use sse_event::ChatEvent;

use crate::db::models::MessageRole;
use crate::error::AgentError;
use crate::graph::{CompiledStateGraph, RunContext};
use crate::llm::{LlmClient, LlmUsage};
use crate::message::{ContentBlock, Message};
use crate::scope::{FileAttachment, RequestScope};
use crate::state::ChatState;
use crate::stream::StreamEvent;
use crate::tool_buffer::ToolResultBuffer;
use crate::tools::{extract_tool_detail, tool_display_meta, tools_for_request, ToolSet};

use super::content::{
    clean_tool_call_json, extract_metadata_from_response, format_message_with_metadata,
    HistoryMetadata, METADATA_MARKER,
};
use super::graph::{create_chat_graph, ChatGraphConfig};
use super::prompts::{assemble_system_prompt, PromptInputs};

/// Construction-time settings for one agent instance.
#[derive(Clone, Debug)]
pub struct ChatAgentConfig {
    pub model: String,
    pub with_tools: bool,
    pub include_thoughts: bool,
    pub anonymous_mode: bool,
    pub is_planning: bool,
    pub graph: ChatGraphConfig,
}

impl Default for ChatAgentConfig {
    fn default() -> Self {
        Self {
            model: "gemini-3-flash-preview".into(),
            with_tools: true,
            include_thoughts: false,
            anonymous_mode: false,
            is_planning: false,
            graph: ChatGraphConfig::default(),
        }
    }
}

/// One history message with its prelude metadata and attachments.
#[derive(Clone, Debug, Default)]
pub struct HistoryMessage {
    pub role: MessageRole,
    pub content: String,
    pub metadata: HistoryMetadata,
    pub files: Vec<FileAttachment>,
}

/// Request envelope shared by all three entry points.
#[derive(Clone, Debug, Default)]
pub struct ChatRequest {
    pub text: String,
    pub files: Vec<FileAttachment>,
    pub history: Vec<HistoryMessage>,
    pub force_tools: Option<Vec<String>>,
    pub user_name: Option<String>,
    pub user_id: Option<String>,
    pub custom_instructions: Option<String>,
    pub dashboard: Option<Value>,
}

/// Everything the server needs after a run: clean content, legacy-marker
/// metadata, ordered (stripped) tool results, aggregated usage, and the
/// final message list for save-time extraction.
#[derive(Clone, Debug, Default)]
pub struct FinalPayload {
    pub content: String,
    pub metadata: Value,
    pub tool_results: Vec<Value>,
    pub usage: LlmUsage,
    pub messages: Vec<Message>,
}

impl FinalPayload {
    pub fn usage_info(&self) -> Value {
        json!({
            "input_tokens": self.usage.input_tokens,
            "output_tokens": self.usage.output_tokens,
        })
    }
}

/// Rewrites stored rows as facade history: timestamps, relative age,
/// session-gap hints, stable file ids, and a tools-used summary derived
/// from saved sources. Shared by the interactive route and the executor.
pub fn history_from_stored(
    stored: &[crate::db::models::StoredMessage],
    now: chrono::NaiveDateTime,
) -> Vec<HistoryMessage> {
    use super::content::{relative_time, session_gap, FileRef};

    let mut history = Vec::with_capacity(stored.len());
    let mut previous_at: Option<chrono::NaiveDateTime> = None;
    for message in stored {
        let mut metadata = HistoryMetadata {
            timestamp: Some(message.created_at.format("%Y-%m-%dT%H:%M:%S").to_string()),
            relative_time: Some(relative_time(message.created_at, now)),
            ..Default::default()
        };
        if let Some(previous) = previous_at {
            metadata.session_gap = session_gap(previous, message.created_at);
        }
        previous_at = Some(message.created_at);
        for (index, file) in message.files.iter().enumerate() {
            metadata.files.push(FileRef {
                name: file.name.clone(),
                mime_type: file.mime_type.clone(),
                id: format!("{}:{}", message.id, index),
            });
        }
        if message
            .sources
            .as_ref()
            .map(|s| !s.is_empty())
            .unwrap_or(false)
        {
            metadata.tools_used = vec!["web_search".to_string()];
        }
        history.push(HistoryMessage {
            role: message.role,
            content: message.content.clone(),
            metadata,
            files: Vec::new(),
        });
    }
    history
}

pub struct ChatAgent {
    config: ChatAgentConfig,
    graph: CompiledStateGraph<ChatState>,
    scope: RequestScope,
}

impl ChatAgent {
    /// Builds the agent: filters the tool registry for this mode, then
    /// compiles the graph with the main and assist models.
    pub fn new(
        llm: Arc<dyn LlmClient>,
        assist_llm: Arc<dyn LlmClient>,
        tools: ToolSet,
        buffer: ToolResultBuffer,
        config: ChatAgentConfig,
        scope: RequestScope,
    ) -> Result<Self, AgentError> {
        Self::with_checkpointer(llm, assist_llm, tools, buffer, config, scope, None)
    }

    /// Like [`ChatAgent::new`], additionally checkpointing final graph
    /// state per conversation id.
    pub fn with_checkpointer(
        llm: Arc<dyn LlmClient>,
        assist_llm: Arc<dyn LlmClient>,
        tools: ToolSet,
        buffer: ToolResultBuffer,
        config: ChatAgentConfig,
        scope: RequestScope,
        checkpointer: Option<Arc<dyn crate::graph::Checkpointer<ChatState>>>,
    ) -> Result<Self, AgentError> {
        let active_tools = if config.with_tools {
            tools_for_request(&tools, config.anonymous_mode, config.is_planning)
        } else {
            ToolSet::new()
        };
        tracing::debug!(
            model = %config.model,
            with_tools = config.with_tools,
            anonymous = config.anonymous_mode,
            planning = config.is_planning,
            tools = ?active_tools.names(),
            "creating chat agent"
        );
        let graph = create_chat_graph(
            llm,
            assist_llm,
            active_tools,
            buffer,
            &config.graph,
            checkpointer,
        )?;
        Ok(Self {
            config,
            graph,
            scope,
        })
    }

    /// Run context for this request: the conversation id (when the scope
    /// carries one) doubles as the checkpoint thread id.
    fn run_context(&self) -> RunContext {
        let mut ctx = RunContext::new(self.scope.clone());
        if let Some((conversation_id, _)) = self.scope.conversation() {
            ctx.thread_id = Some(conversation_id);
        }
        ctx
    }

    fn content_blocks(files: &[FileAttachment]) -> Vec<ContentBlock> {
        use base64::Engine;
        let mut blocks = Vec::new();
        for file in files {
            if file.mime_type.starts_with("image/") || file.mime_type == "application/pdf" {
                blocks.push(ContentBlock::Inline {
                    mime_type: file.mime_type.clone(),
                    data: file.data.clone(),
                });
            } else if let Ok(bytes) =
                base64::engine::general_purpose::STANDARD.decode(&file.data)
            {
                if let Ok(text) = String::from_utf8(bytes) {
                    blocks.push(ContentBlock::Text {
                        text: format!(
                            "\n--- Content of {name} ---\n{text}\n--- End of {name} ---\n",
                            name = file.name
                        ),
                    });
                }
                // Undecodable files are skipped rather than failing the turn.
            }
        }
        blocks
    }

    fn build_messages(&self, request: &ChatRequest) -> Vec<Message> {
        let refreshed_dashboard = self.scope.planner_dashboard();
        let agent_context = self.scope.agent_context();
        let system = assemble_system_prompt(&PromptInputs {
            with_tools: self.config.with_tools,
            force_tools: request.force_tools.as_deref(),
            user_name: request.user_name.as_deref(),
            user_id: request.user_id.as_deref(),
            custom_instructions: request.custom_instructions.as_deref(),
            anonymous_mode: self.config.anonymous_mode,
            is_planning: self.config.is_planning,
            dashboard: request.dashboard.as_ref(),
            refreshed_dashboard: refreshed_dashboard.as_ref(),
            agent_context: agent_context.as_ref(),
        });

        let mut messages = vec![Message::system(system)];
        for entry in &request.history {
            let formatted = format_message_with_metadata(&entry.content, &entry.metadata);
            match entry.role {
                MessageRole::User => messages.push(Message::user_with_blocks(
                    formatted,
                    Self::content_blocks(&entry.files),
                )),
                MessageRole::Assistant => messages.push(Message::assistant(formatted)),
                // Raw tool transcripts are not replayed into the prompt;
                // their effect is summarized in the prelude.
                MessageRole::Tool => {}
            }
        }
        messages.push(Message::user_with_blocks(
            request.text.clone(),
            Self::content_blocks(&request.files),
        ));
        messages
    }

    fn collect_payload(state: &ChatState, content: String, metadata: Value) -> FinalPayload {
        let tool_results: Vec<Value> = state
            .messages
            .iter()
            .filter_map(|m| m.as_tool())
            .map(|t| json!({"type": "tool", "content": t.content}))
            .collect();
        let mut usage = LlmUsage::default();
        for message in &state.messages {
            if let Some(assistant) = message.as_assistant() {
                if let Some(u) = &assistant.usage {
                    usage.add(u);
                }
            }
        }
        FinalPayload {
            content,
            metadata,
            tool_results,
            usage,
            messages: state.messages.clone(),
        }
    }

    /// Runs the graph to completion and extracts the final answer: last
    /// assistant message with actual text (tool-call-only turns skipped),
    /// ordered tool results, and summed usage.
    pub async fn chat_batch(&self, request: &ChatRequest) -> Result<FinalPayload, AgentError> {
        let state = ChatState::new(self.build_messages(request));
        let ctx = self.run_context();
        let final_state = self.graph.invoke_with_context(state, &ctx).await?;

        let mut response_text = String::new();
        for message in final_state.messages.iter().rev() {
            if let Some(assistant) = message.as_assistant() {
                if !assistant.tool_calls.is_empty() && assistant.content.trim().is_empty() {
                    continue;
                }
                let cleaned = clean_tool_call_json(&assistant.content);
                if !cleaned.is_empty() {
                    response_text = cleaned;
                    break;
                }
            }
        }
        let (content, metadata) = extract_metadata_from_response(&response_text);
        Ok(Self::collect_payload(&final_state, content, metadata))
    }

    /// Structured event stream. Events go into `event_tx` as the run
    /// progresses; the final payload is also returned to the caller.
    pub async fn stream_chat_events(
        &self,
        request: &ChatRequest,
        event_tx: mpsc::Sender<ChatEvent>,
    ) -> Result<FinalPayload, AgentError> {
        let state = ChatState::new(self.build_messages(request));
        let (stream_tx, stream_rx) = mpsc::channel::<StreamEvent>(64);
        let ctx = self.run_context().with_stream(stream_tx);

        let forward = forward_stream(stream_rx, event_tx.clone());
        let invoke = async {
            let result = self.graph.invoke_with_context(state, &ctx).await;
            drop(ctx);
            result
        };
        let (result, tally) = tokio::join!(invoke, forward);

        let final_state = match result {
            Ok(state) => Some(state),
            Err(error) if error.is_benign_shutdown() => {
                tracing::warn!(
                    %error,
                    partial_len = tally.full_response.len(),
                    "stream interrupted by runtime shutdown; keeping partial content"
                );
                None
            }
            Err(error) => return Err(error),
        };

        let (content, metadata) = extract_metadata_from_response(&tally.full_response);
        if tally.usage.input_tokens == 0 && tally.usage.output_tokens == 0 && tally.chunks > 0 {
            tracing::warn!(
                chunks = tally.chunks,
                "no usage metadata in streaming chunks; cost tracking will record zero"
            );
        }

        let mut payload = match &final_state {
            Some(state) => Self::collect_payload(state, content, metadata),
            None => FinalPayload {
                content,
                metadata,
                tool_results: tally.tool_results.clone(),
                usage: tally.usage.clone(),
                messages: Vec::new(),
            },
        };
        // Stream tallies are authoritative for tool order and usage.
        payload.tool_results = tally.tool_results;
        payload.usage = tally.usage;

        let _ = event_tx
            .send(ChatEvent::Final {
                content: payload.content.clone(),
                metadata: payload.metadata.clone(),
                tool_results: payload.tool_results.clone(),
                usage_info: payload.usage_info(),
            })
            .await;
        Ok(payload)
    }

    /// Token-only stream: plain text fragments into `token_tx`.
    pub async fn stream_chat(
        &self,
        request: &ChatRequest,
        token_tx: mpsc::Sender<String>,
    ) -> Result<FinalPayload, AgentError> {
        let (event_tx, mut event_rx) = mpsc::channel::<ChatEvent>(64);
        let pump = async move {
            while let Some(event) = event_rx.recv().await {
                if let ChatEvent::Token { text } = event {
                    let _ = token_tx.send(text).await;
                }
            }
        };
        let (payload, ()) = tokio::join!(self.stream_chat_events(request, event_tx), pump);
        payload
    }
}

/// Running tallies the forwarder accumulates while mapping internal
/// stream events to wire events.
#[derive(Debug, Default)]
struct StreamTally {
    full_response: String,
    usage: LlmUsage,
    tool_results: Vec<Value>,
    chunks: usize,
}

/// Maps internal events to wire events, holding tokens back until the
/// window cannot start the legacy metadata marker.
async fn forward_stream(
    mut rx: mpsc::Receiver<StreamEvent>,
    event_tx: mpsc::Sender<ChatEvent>,
) -> StreamTally {
    let mut tally = StreamTally::default();
    let mut buffer = String::new();
    let mut in_metadata = false;
    let mut accumulated_thinking = String::new();
    let mut pending_tools: Vec<String> = Vec::new();

    while let Some(event) = rx.recv().await {
        match event {
            StreamEvent::Token { text } => {
                tally.chunks += 1;
                tally.full_response.push_str(&text);
                if in_metadata {
                    continue;
                }
                buffer.push_str(&text);
                if let Some(pos) = buffer.find(METADATA_MARKER) {
                    if pos > 0 {
                        let head = buffer[..pos].trim_end().to_string();
                        if !head.is_empty() {
                            let _ = event_tx.send(ChatEvent::Token { text: head }).await;
                        }
                    }
                    in_metadata = true;
                    buffer.clear();
                } else if buffer.len() > METADATA_MARKER.len() {
                    let mut safe = buffer.len() - METADATA_MARKER.len();
                    while !buffer.is_char_boundary(safe) {
                        safe -= 1;
                    }
                    if safe > 0 {
                        let head: String = buffer.drain(..safe).collect();
                        let _ = event_tx.send(ChatEvent::Token { text: head }).await;
                    }
                }
            }
            StreamEvent::Thinking { text } => {
                accumulated_thinking.push_str(&text);
                let _ = event_tx
                    .send(ChatEvent::Thinking {
                        text: accumulated_thinking.clone(),
                    })
                    .await;
            }
            StreamEvent::ToolCall { name, arguments } => {
                if pending_tools.contains(&name) {
                    continue;
                }
                pending_tools.push(name.clone());
                let _ = event_tx
                    .send(ChatEvent::ToolStart {
                        detail: extract_tool_detail(&name, &arguments),
                        metadata: tool_display_meta(&name),
                        tool: name,
                    })
                    .await;
            }
            StreamEvent::ToolEnd { tool } => {
                if let Some(index) = pending_tools.iter().position(|t| t == &tool) {
                    pending_tools.remove(index);
                    let _ = event_tx.send(ChatEvent::ToolEnd { tool }).await;
                }
            }
            StreamEvent::ToolResult { content } => {
                tally
                    .tool_results
                    .push(json!({"type": "tool", "content": content}));
            }
            StreamEvent::Usage { usage } => {
                tally.usage.add(&usage);
            }
        }
    }

    if !buffer.is_empty() && !in_metadata {
        let (clean, _) = extract_metadata_from_response(&buffer);
        if !clean.trim().is_empty() {
            let _ = event_tx.send(ChatEvent::Token { text: clean }).await;
        }
    }
    tally
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmResponse, MockLlm};
    use crate::message::ToolCall;
    use crate::tools::test_support::EchoTool;
    use std::time::Duration;

    fn agent_with(llm: MockLlm, tools: ToolSet) -> ChatAgent {
        ChatAgent::new(
            Arc::new(llm),
            Arc::new(MockLlm::with_no_tool_calls("CHAT")),
            tools,
            ToolResultBuffer::new(Duration::from_secs(60)),
            ChatAgentConfig::default(),
            RequestScope::new(),
        )
        .unwrap()
    }

    fn search_then_answer_script() -> MockLlm {
        MockLlm::with_script(vec![
            LlmResponse {
                content: String::new(),
                tool_calls: vec![ToolCall {
                    id: "tc1".into(),
                    name: "web_search".into(),
                    arguments: json!({"query": "prague weather"}),
                }],
                usage: Some(LlmUsage {
                    input_tokens: 10,
                    output_tokens: 2,
                }),
                thinking: None,
            },
            LlmResponse {
                content: "It is sunny in Prague.".into(),
                tool_calls: vec![],
                usage: Some(LlmUsage {
                    input_tokens: 20,
                    output_tokens: 8,
                }),
                thinking: None,
            },
        ])
    }

    #[tokio::test]
    async fn batch_extracts_answer_tools_and_summed_usage() {
        let tools = ToolSet::new().with(Arc::new(EchoTool::named("web_search")));
        let agent = agent_with(search_then_answer_script(), tools);
        let payload = agent
            .chat_batch(&ChatRequest {
                text: "weather in Prague".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(payload.content, "It is sunny in Prague.");
        assert_eq!(payload.tool_results.len(), 1);
        assert_eq!(payload.usage.input_tokens, 30);
        assert_eq!(payload.usage.output_tokens, 10);
    }

    #[tokio::test]
    async fn event_stream_orders_tool_events_before_final() {
        let tools = ToolSet::new().with(Arc::new(EchoTool::named("web_search")));
        let agent = agent_with(search_then_answer_script(), tools);
        let (tx, mut rx) = mpsc::channel(64);
        let payload = agent
            .stream_chat_events(
                &ChatRequest {
                    text: "weather in Prague".into(),
                    ..Default::default()
                },
                tx,
            )
            .await
            .unwrap();
        assert_eq!(payload.content, "It is sunny in Prague.");

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(match event {
                ChatEvent::ToolStart { .. } => "tool_start",
                ChatEvent::ToolEnd { .. } => "tool_end",
                ChatEvent::Token { .. } => "token",
                ChatEvent::Final { .. } => "final",
                _ => "other",
            });
        }
        let start = kinds.iter().position(|k| *k == "tool_start").unwrap();
        let end = kinds.iter().position(|k| *k == "tool_end").unwrap();
        assert!(start < end);
        assert_eq!(*kinds.last().unwrap(), "final");
    }

    #[tokio::test]
    async fn legacy_metadata_marker_is_held_back_from_tokens() {
        let reply = format!(
            "Here is the answer.{METADATA_MARKER} {{\"sources\": []}} -->"
        );
        let agent = agent_with(MockLlm::with_no_tool_calls(reply), ToolSet::new());
        let (tx, mut rx) = mpsc::channel(64);
        let payload = agent
            .stream_chat(
                &ChatRequest {
                    text: "hi".into(),
                    ..Default::default()
                },
                tx,
            )
            .await
            .unwrap();
        assert_eq!(payload.content, "Here is the answer.");

        let mut streamed = String::new();
        while let Ok(token) = rx.try_recv() {
            streamed.push_str(&token);
        }
        assert!(!streamed.contains("METADATA"));
    }

    #[tokio::test]
    async fn checkpointer_saves_final_state_per_conversation() {
        use crate::graph::{Checkpointer, MemorySaver};

        let saver = Arc::new(MemorySaver::<ChatState>::new());
        let scope = RequestScope::new();
        scope.set_conversation(Some(("conv-7".into(), "u-1".into())));
        let agent = ChatAgent::with_checkpointer(
            Arc::new(MockLlm::with_no_tool_calls("saved reply")),
            Arc::new(MockLlm::with_no_tool_calls("CHAT")),
            ToolSet::new(),
            ToolResultBuffer::new(Duration::from_secs(60)),
            ChatAgentConfig::default(),
            scope,
            Some(saver.clone() as Arc<dyn Checkpointer<ChatState>>),
        )
        .unwrap();

        agent
            .chat_batch(&ChatRequest {
                text: "hi".into(),
                ..Default::default()
            })
            .await
            .unwrap();

        let state = saver.get("conv-7").await.unwrap().unwrap();
        assert!(state.messages.iter().any(|m| m.content() == "saved reply"));
        assert!(saver.get("conv-8").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn history_gets_metadata_prelude_and_system_prompt_personalization() {
        let agent = agent_with(MockLlm::with_no_tool_calls("ok"), ToolSet::new());
        let request = ChatRequest {
            text: "next".into(),
            user_name: Some("Alice".into()),
            user_id: Some("u-1".into()),
            history: vec![HistoryMessage {
                role: MessageRole::User,
                content: "see the file".into(),
                metadata: HistoryMetadata {
                    relative_time: Some("yesterday".into()),
                    files: vec![super::super::content::FileRef {
                        name: "a.pdf".into(),
                        mime_type: "application/pdf".into(),
                        id: "m1:0".into(),
                    }],
                    ..Default::default()
                },
                files: vec![],
            }],
            ..Default::default()
        };
        let messages = agent.build_messages(&request);
        assert!(matches!(&messages[0], Message::System(s) if s.content.contains("Alice")));
        assert!(messages[1].content().starts_with(METADATA_MARKER));
        assert!(messages[1].content().contains("m1:0"));
        assert_eq!(messages[2].content(), "next");
    }
}

//! SSE chat streaming pipeline.
//!
//! Production and delivery are separate: a producer task runs the event
//! stream and feeds a bounded queue; the SSE consumer formats frames and
//! saves on the `done` sentinel; a cleanup task guarantees that if
//! production completed, the assistant message is persisted even when the
//! client disconnected mid-stream. A disconnect never cancels the
//! producer.

use std::convert::Infallible;
use std::sync::{Arc, Mutex};

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use base64::Engine;
use futures::Stream;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use sse_event::ChatEvent;

use skein::agent::content::{
    detect_response_language, extract_code_output_files_from_tool_results,
    extract_generated_images_from_tool_results, extract_metadata_tool_args,
    extract_sources_fallback_from_tool_results, GeneratedFile,
};
use skein::agent::{history_from_stored, ChatAgent, ChatAgentConfig, ChatRequest, FinalPayload};
use skein::cost::calculate_and_save_message_cost;
use skein::db::models::{GeneratedImageMeta, MessageRole, Source, StoredFile};
use skein::db::{Database, NewMessage};
use skein::llm::LlmClient;
use skein::memory_ops::process_memory_operations;
use skein::tools::{
    CiteSourcesTool, FetchUrlTool, GenerateImageTool, ManageMemoryTool,
    RefreshPlannerDashboardTool, RetrieveFileTool, StaticDashboard, ToolSet, WebSearchTool,
    TOOL_WEB_SEARCH,
};
use skein::{
    generate_title, AgentError, ChatGraphConfig, Config, FileAttachment, RequestScope,
    ToolResultBuffer,
};

use crate::app::AppState;
use crate::error::ApiError;
use crate::routes::user_id_from_headers;

const DEFAULT_TITLE: &str = "New Conversation";

#[derive(Debug, Deserialize)]
pub struct FilePayload {
    pub name: String,
    pub mime_type: String,
    /// Base64 payload.
    pub data: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatBody {
    pub message: String,
    #[serde(default)]
    pub files: Vec<FilePayload>,
    #[serde(default)]
    pub force_tools: Option<Vec<String>>,
    #[serde(default)]
    pub anonymous_mode: bool,
}

/// Item on the producer → consumer queue. `Done` always follows the last
/// event; `Failed` replaces it on error.
enum QueueItem {
    Event(ChatEvent),
    Done,
    Failed(String),
}

/// Shared slot the producer fills when it sees the final payload; read by
/// whichever of consumer/cleanup saves first.
type FinalResults = Arc<Mutex<Option<FinalPayload>>>;

/// Everything both save paths need.
pub struct StreamSession {
    pub db: Database,
    pub buffer: ToolResultBuffer,
    pub assist_llm: Arc<dyn LlmClient>,
    pub config: Config,
    pub scope: RequestScope,
    pub conversation_id: String,
    pub user_id: String,
    pub request_id: String,
    pub model: String,
    pub message_text: String,
    pub placeholder_id: Option<String>,
    pub anonymous_mode: bool,
}

/// Outcome of one successful save, for the `done` event.
pub struct SaveResult {
    pub message_id: String,
    pub title: Option<String>,
    pub sources: Vec<Source>,
    pub generated_images: Vec<GeneratedImageMeta>,
    pub language: Option<String>,
}

fn interactive_tools(state: &AppState) -> ToolSet {
    ToolSet::new()
        .with(Arc::new(WebSearchTool::new()))
        .with(Arc::new(FetchUrlTool::new()))
        .with(Arc::new(RetrieveFileTool::new(state.db.clone())))
        .with(Arc::new(GenerateImageTool::new(
            state.image_generator.clone(),
            2000,
        )))
        .with(Arc::new(CiteSourcesTool))
        .with(Arc::new(ManageMemoryTool))
        .with(Arc::new(RefreshPlannerDashboardTool::new(Arc::new(
            StaticDashboard(json!({})),
        ))))
}

fn sse_frame(event: &ChatEvent) -> Event {
    match serde_json::to_string(event) {
        Ok(payload) => Event::default().data(payload),
        Err(error) => {
            tracing::error!(%error, "unserializable stream event");
            Event::default().data("{\"type\":\"error\",\"message\":\"serialization\"}")
        }
    }
}

/// True when the conversation's last message is a persisted assistant
/// reply: non-empty content or an approval marker. An unfinalized
/// placeholder (empty content) does not count.
pub async fn assistant_already_saved(db: &Database, conversation_id: &str) -> bool {
    match db.last_message(conversation_id).await {
        Ok(Some(message)) => {
            message.role == MessageRole::Assistant
                && (!message.content.is_empty()
                    || skein::parse_approval_marker(&message.content).is_some())
        }
        _ => false,
    }
}

/// Persists the assistant message from the final payload. Drains the tool
/// result buffer (POP semantics, call once per request), writes blobs
/// for generated files, applies memory operations, records cost, and
/// auto-titles first conversations.
pub async fn save_message(
    session: &StreamSession,
    payload: &FinalPayload,
) -> Result<SaveResult, AgentError> {
    let extracted = extract_metadata_tool_args(&payload.messages);
    let mut sources = extracted.sources.clone();
    if sources.is_empty() {
        let used_web_search = payload
            .messages
            .iter()
            .filter_map(|m| m.as_assistant())
            .flat_map(|a| a.tool_calls.iter())
            .any(|c| c.name == TOOL_WEB_SEARCH);
        if used_web_search {
            let parsed: Vec<Value> = payload
                .tool_results
                .iter()
                .filter_map(|r| r.get("content"))
                .filter_map(Value::as_str)
                .filter_map(|s| serde_json::from_str(s).ok())
                .collect();
            sources = extract_sources_fallback_from_tool_results(&parsed);
        }
    }

    if !session.anonymous_mode && !extracted.memory_operations.is_empty() {
        process_memory_operations(&session.db, &session.user_id, &extracted.memory_operations)
            .await?;
    }

    let full_results = session.buffer.take(&session.request_id);
    session.scope.clear_all();

    let mut generated: Vec<GeneratedFile> =
        extract_generated_images_from_tool_results(&full_results);
    generated.extend(extract_code_output_files_from_tool_results(&full_results));
    let files: Vec<StoredFile> = generated
        .iter()
        .map(|f| StoredFile {
            name: f.name.clone(),
            mime_type: f.mime_type.clone(),
            size: None,
        })
        .collect();
    let generated_images: Vec<GeneratedImageMeta> = extracted
        .image_prompts
        .iter()
        .map(|p| GeneratedImageMeta { prompt: p.clone() })
        .collect();
    let language = detect_response_language(&payload.content);

    let message_id = match &session.placeholder_id {
        Some(placeholder_id) => {
            session
                .db
                .finalize_message(
                    placeholder_id,
                    &payload.content,
                    &files,
                    (!sources.is_empty()).then_some(sources.as_slice()),
                    (!generated_images.is_empty()).then_some(generated_images.as_slice()),
                    language.as_deref(),
                )
                .await?;
            placeholder_id.clone()
        }
        None => {
            let mut new_message = NewMessage::new(
                &session.conversation_id,
                MessageRole::Assistant,
                &payload.content,
            );
            new_message.files = files;
            if !sources.is_empty() {
                new_message.sources = Some(sources.clone());
            }
            if !generated_images.is_empty() {
                new_message.generated_images = Some(generated_images.clone());
            }
            new_message.language = language.clone();
            session.db.add_message(new_message).await?.id
        }
    };

    for (index, file) in generated.iter().enumerate() {
        match base64::engine::general_purpose::STANDARD.decode(&file.data) {
            Ok(bytes) => {
                session
                    .db
                    .put_blob(&format!("{message_id}:{index}"), bytes)
                    .await?;
            }
            Err(error) => {
                tracing::warn!(file = %file.name, %error, "generated file had invalid base64");
            }
        }
    }

    calculate_and_save_message_cost(
        &session.db,
        &message_id,
        &session.conversation_id,
        &session.user_id,
        &session.model,
        &payload.usage,
        &full_results,
        "stream",
    )
    .await?;

    let mut title = None;
    if let Some(conversation) = session
        .db
        .get_conversation(&session.conversation_id, &session.user_id)
        .await?
    {
        if conversation.title == DEFAULT_TITLE {
            let generated_title = generate_title(
                session.assist_llm.clone(),
                &session.message_text,
                &payload.content,
                session.config.title_context_max_length,
                session.config.title_max_length,
            )
            .await;
            session
                .db
                .update_conversation_title(&session.conversation_id, &generated_title)
                .await?;
            title = Some(generated_title);
        }
    }

    tracing::info!(
        conversation_id = %session.conversation_id,
        %message_id,
        response_length = payload.content.len(),
        "stream chat completed and saved"
    );
    Ok(SaveResult {
        message_id,
        title,
        sources,
        generated_images,
        language,
    })
}

/// Failure finalization: the placeholder is deleted, the buffer drained,
/// and the scope cleared. Safe to call from either path; all steps are
/// no-ops the second time.
pub async fn failure_cleanup(session: &StreamSession) {
    if let Some(placeholder_id) = &session.placeholder_id {
        if let Err(error) = session.db.delete_message(placeholder_id).await {
            tracing::error!(%error, "failed to delete placeholder message");
        }
    }
    let dropped = session.buffer.take(&session.request_id).len();
    if dropped > 0 {
        tracing::debug!(dropped, "discarded tool results for failed stream");
    }
    session.scope.clear_all();
}

/// Waits for the producer, gives the consumer a moment to commit, then
/// saves iff nothing did. This is what makes early disconnects lossless.
pub async fn cleanup_and_save(
    session: Arc<StreamSession>,
    producer: tokio::task::JoinHandle<()>,
    final_results: FinalResults,
) {
    if tokio::time::timeout(session.config.stream_cleanup_thread_timeout, producer)
        .await
        .is_err()
    {
        tracing::error!(
            conversation_id = %session.conversation_id,
            "stream producer did not complete within timeout"
        );
        return;
    }
    tokio::time::sleep(session.config.stream_cleanup_wait_delay).await;

    let payload = final_results.lock().unwrap_or_else(|e| e.into_inner()).clone();
    match payload {
        None => failure_cleanup(&session).await,
        Some(payload) => {
            if assistant_already_saved(&session.db, &session.conversation_id).await {
                return;
            }
            tracing::info!(
                conversation_id = %session.conversation_id,
                "consumer stopped early (client disconnected), saving in cleanup task"
            );
            if let Err(error) = save_message(&session, &payload).await {
                tracing::error!(%error, "cleanup-path save failed");
                failure_cleanup(&session).await;
            }
        }
    }
}

/// POST /api/conversations/{id}/chat: the SSE endpoint.
pub async fn chat_stream(
    State(state): State<Arc<AppState>>,
    Path(conversation_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<ChatBody>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let user_id = user_id_from_headers(&headers)?;
    let user = state
        .db
        .get_user_by_id(&user_id)
        .await?
        .ok_or_else(|| ApiError::forbidden("unknown user"))?;
    let conversation = state
        .db
        .get_conversation(&conversation_id, &user_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("conversation {conversation_id} not found")))?;
    if body.message.trim().is_empty() {
        return Err(ApiError::bad_request("message must not be empty"));
    }

    // History snapshot excludes the message being added now.
    let prior = state.db.get_messages(&conversation.id).await?;
    let history = history_from_stored(&prior, chrono::Utc::now().naive_utc());

    let attachments: Vec<FileAttachment> = body
        .files
        .iter()
        .map(|f| FileAttachment {
            name: f.name.clone(),
            mime_type: f.mime_type.clone(),
            data: f.data.clone(),
        })
        .collect();
    let mut user_message = NewMessage::new(&conversation.id, MessageRole::User, &body.message);
    user_message.files = body
        .files
        .iter()
        .map(|f| StoredFile {
            name: f.name.clone(),
            mime_type: f.mime_type.clone(),
            size: None,
        })
        .collect();
    let user_message = state.db.add_message(user_message).await?;
    for (index, file) in body.files.iter().enumerate() {
        if let Ok(bytes) = base64::engine::general_purpose::STANDARD.decode(&file.data) {
            state
                .db
                .put_blob(&format!("{}:{}", user_message.id, index), bytes)
                .await?;
        }
    }

    let placeholder_id = if state.config.stream_placeholder_enabled {
        Some(
            state
                .db
                .add_message(NewMessage::new(
                    &conversation.id,
                    MessageRole::Assistant,
                    "",
                ))
                .await?
                .id,
        )
    } else {
        None
    };

    let request_id = uuid::Uuid::new_v4().to_string();
    let scope = RequestScope::new();
    scope.set_request_id(Some(request_id.clone()));
    scope.set_conversation(Some((conversation.id.clone(), user_id.clone())));
    scope.set_files(attachments.clone());

    let chat_agent = ChatAgent::new(
        (state.llm_factory)(&conversation.model),
        state.assist_llm.clone(),
        interactive_tools(&state),
        state.buffer.clone(),
        ChatAgentConfig {
            model: conversation.model.clone(),
            with_tools: true,
            include_thoughts: true,
            anonymous_mode: body.anonymous_mode,
            is_planning: conversation.is_planning,
            graph: ChatGraphConfig {
                planning_enabled: state.config.planning_enabled,
                planning_min_length: state.config.planning_min_length,
                max_tool_retries: state.config.max_tool_retries,
                recursion_limit: state.config.recursion_limit,
                retry: skein::retry::RetryConfig {
                    max_retries: state.config.agent_max_retries,
                    base_delay: state.config.agent_retry_base_delay,
                    max_delay: state.config.agent_retry_max_delay,
                },
            },
        },
        scope.clone(),
    )?;

    let request = ChatRequest {
        text: body.message.clone(),
        files: attachments,
        history,
        force_tools: body.force_tools.clone(),
        user_name: Some(user.name.clone()),
        user_id: Some(user_id.clone()),
        custom_instructions: user.custom_instructions.clone(),
        dashboard: None,
    };

    let session = Arc::new(StreamSession {
        db: state.db.clone(),
        buffer: state.buffer.clone(),
        assist_llm: state.assist_llm.clone(),
        config: state.config.clone(),
        scope,
        conversation_id: conversation.id.clone(),
        user_id,
        request_id,
        model: conversation.model.clone(),
        message_text: body.message.clone(),
        placeholder_id: placeholder_id.clone(),
        anonymous_mode: body.anonymous_mode,
    });

    let final_results: FinalResults = Arc::new(Mutex::new(None));
    let (queue_tx, mut queue_rx) =
        mpsc::channel::<QueueItem>(state.config.stream_queue_capacity);

    // Producer: runs the graph to completion regardless of the consumer.
    let producer = {
        let final_results = final_results.clone();
        tokio::spawn(async move {
            let (event_tx, mut event_rx) = mpsc::channel::<ChatEvent>(64);
            let pump = async {
                while let Some(event) = event_rx.recv().await {
                    // A closed queue means the consumer is gone; keep
                    // draining so the graph still finishes.
                    let _ = queue_tx.send(QueueItem::Event(event)).await;
                }
            };
            let run = chat_agent.stream_chat_events(&request, event_tx);
            let (result, ()) = tokio::join!(run, pump);
            match result {
                Ok(payload) => {
                    final_results
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .replace(payload);
                    let _ = queue_tx.send(QueueItem::Done).await;
                }
                Err(error) => {
                    tracing::error!(%error, "stream producer error");
                    let _ = queue_tx.send(QueueItem::Failed(error.to_string())).await;
                }
            }
        })
    };

    tokio::spawn(cleanup_and_save(
        session.clone(),
        producer,
        final_results.clone(),
    ));

    let stream = async_stream::stream! {
        if let Some(placeholder_id) = &session.placeholder_id {
            yield Ok(sse_frame(&ChatEvent::Placeholder {
                message_id: placeholder_id.clone(),
            }));
        }
        while let Some(item) = queue_rx.recv().await {
            match item {
                QueueItem::Event(event) => yield Ok(sse_frame(&event)),
                QueueItem::Done => {
                    let payload = final_results
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .clone();
                    if let Some(payload) = payload {
                        match save_message(&session, &payload).await {
                            Ok(saved) => {
                                yield Ok(sse_frame(&ChatEvent::Done {
                                    message_id: saved.message_id,
                                    title: saved.title,
                                    sources: saved
                                        .sources
                                        .iter()
                                        .filter_map(|s| serde_json::to_value(s).ok())
                                        .collect(),
                                    generated_images: saved
                                        .generated_images
                                        .iter()
                                        .filter_map(|g| serde_json::to_value(g).ok())
                                        .collect(),
                                }));
                            }
                            Err(error) => {
                                tracing::error!(%error, "consumer-path save failed");
                                yield Ok(sse_frame(&ChatEvent::Error {
                                    message: "failed to save response".into(),
                                }));
                            }
                        }
                    }
                    break;
                }
                QueueItem::Failed(message) => {
                    failure_cleanup(&session).await;
                    yield Ok(sse_frame(&ChatEvent::Error { message }));
                    break;
                }
            }
        }
    };
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

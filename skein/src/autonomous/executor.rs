//! Autonomous agent executor: one run of one named agent.
//!
//! The run outcome is a plain enum, not an exception: approval suspension
//! is control flow. The executor owns budget enforcement, best-effort
//! compaction, the trigger message, scope setup (including the trigger
//! chain), the retried batch invocation, and result processing. Ambient
//! scope is cleared on every exit path.

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use serde_json::Value;

use crate::agent::content::{
    detect_response_language, extract_code_output_files_from_tool_results,
    extract_generated_images_from_tool_results, extract_metadata_tool_args,
    extract_sources_fallback_from_tool_results, GeneratedFile,
};
use crate::agent::{
    history_from_stored, ChatAgent, ChatAgentConfig, ChatGraphConfig, ChatRequest, FinalPayload,
};
use crate::approval::build_approval_message;
use crate::config::Config;
use crate::cost::calculate_and_save_message_cost;
use crate::cron_schedule::next_run_after;
use crate::db::models::{
    Agent, ExecutionStatus, GeneratedImageMeta, MessageRole, StoredFile, TriggerType, User,
};
use crate::db::{Database, NewMessage};
use crate::error::AgentError;
use crate::llm::{ImageGenerator, LlmClient};
use crate::memory_ops::process_memory_operations;
use crate::retry::{with_retry, RetryConfig};
use crate::scope::{AgentContext, RequestScope};
use crate::tool_buffer::ToolResultBuffer;
use crate::tools::{
    CiteSourcesTool, FetchUrlTool, GenerateImageTool, ManageMemoryTool, RequestApprovalTool,
    RetrieveFileTool, SubAgentRunner, ToolSet, TriggerAgentTool, WebSearchTool, TOOL_WEB_SEARCH,
};

/// Produces the chat client for a given model name.
pub type LlmFactory = Arc<dyn Fn(&str) -> Arc<dyn LlmClient> + Send + Sync>;

/// Terminal state of one run.
#[derive(Clone, Debug, PartialEq)]
pub enum RunOutcome {
    Completed,
    WaitingApproval {
        approval_id: String,
        description: String,
    },
    Failed(String),
}

pub struct AgentExecutor {
    db: Database,
    buffer: ToolResultBuffer,
    llm_factory: LlmFactory,
    assist_llm: Arc<dyn LlmClient>,
    image_generator: Arc<dyn ImageGenerator>,
    config: Config,
}

impl AgentExecutor {
    pub fn new(
        db: Database,
        buffer: ToolResultBuffer,
        llm_factory: LlmFactory,
        assist_llm: Arc<dyn LlmClient>,
        image_generator: Arc<dyn ImageGenerator>,
        config: Config,
    ) -> Self {
        Self {
            db,
            buffer,
            llm_factory,
            assist_llm,
            image_generator,
            config,
        }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    fn trigger_text(trigger: TriggerType, note: Option<&str>) -> String {
        let now = crate::db::now_utc().format("%Y-%m-%d %H:%M UTC");
        let base = match trigger {
            TriggerType::Scheduled => format!("[Scheduled run at {now}]"),
            TriggerType::Manual => format!("[Manual trigger at {now}]"),
            TriggerType::AgentTrigger => format!("[Triggered by another agent at {now}]"),
        };
        match note {
            Some(note) if !note.trim().is_empty() => format!("{base} {note}"),
            _ => base,
        }
    }

    fn autonomous_tools(this: &Arc<Self>) -> ToolSet {
        ToolSet::new()
            .with(Arc::new(WebSearchTool::new()))
            .with(Arc::new(FetchUrlTool::new()))
            .with(Arc::new(RetrieveFileTool::new(this.db.clone())))
            .with(Arc::new(GenerateImageTool::new(
                this.image_generator.clone(),
                2000,
            )))
            .with(Arc::new(CiteSourcesTool))
            .with(Arc::new(ManageMemoryTool))
            .with(Arc::new(RequestApprovalTool::new(this.db.clone())))
            .with(Arc::new(TriggerAgentTool::new(
                this.db.clone(),
                Arc::new(TriggerRunner(this.clone())),
            )))
    }

    /// Runs one agent execution to a terminal outcome. `execution_id` is
    /// the already-created execution row; `parent_chain` is empty for
    /// scheduler/manual runs.
    pub async fn execute(
        self: Arc<Self>,
        agent: &Agent,
        user: &User,
        trigger: TriggerType,
        execution_id: &str,
        parent_chain: &[String],
        note: Option<&str>,
    ) -> RunOutcome {
        let scope = RequestScope::new();
        let result =
            Self::execute_inner(&self, agent, user, trigger, execution_id, parent_chain, note, &scope)
                .await;
        scope.clear_all();
        match result {
            Ok(outcome) => outcome,
            Err(error) => {
                tracing::error!(
                    agent_id = %agent.id,
                    agent_name = %agent.name,
                    %error,
                    "agent execution error"
                );
                RunOutcome::Failed(error.to_string())
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute_inner(
        this: &Arc<Self>,
        agent: &Agent,
        user: &User,
        trigger: TriggerType,
        execution_id: &str,
        parent_chain: &[String],
        note: Option<&str>,
        scope: &RequestScope,
    ) -> Result<RunOutcome, AgentError> {
        // Budget precondition; no model call happens past the limit.
        if let Some(limit) = agent.budget_limit {
            let day_start = crate::db::now_utc().date().and_time(chrono::NaiveTime::MIN);
            let spent = this
                .db
                .conversation_cost_since(&agent.conversation_id, day_start)
                .await?;
            if spent > limit {
                return Ok(RunOutcome::Failed(format!(
                    "Agent exceeded daily budget limit (spent ${spent:.4}, limit ${limit:.2})"
                )));
            }
        }

        // Compaction is best-effort; a failure must not block the run.
        if let Err(error) = super::compaction::compact_conversation(
            &this.db,
            this.assist_llm.clone(),
            agent,
            this.config.compaction_threshold,
            this.config.compaction_keep_recent,
        )
        .await
        {
            tracing::warn!(agent_id = %agent.id, %error, "compaction failed (non-fatal)");
        }

        let trigger_text = Self::trigger_text(trigger, note);
        let trigger_message = this
            .db
            .add_message(NewMessage::new(
                &agent.conversation_id,
                MessageRole::User,
                &trigger_text,
            ))
            .await?;

        let now = crate::db::now_utc();
        let stored: Vec<_> = this
            .db
            .get_messages(&agent.conversation_id)
            .await?
            .into_iter()
            .filter(|m| m.id != trigger_message.id)
            .collect();
        let history = history_from_stored(&stored, now);

        let mut chain = parent_chain.to_vec();
        if !chain.contains(&agent.id) {
            chain.push(agent.id.clone());
        }
        scope.set_request_id(Some(execution_id.to_string()));
        scope.set_files(Vec::new());
        scope.set_conversation(Some((agent.conversation_id.clone(), user.id.clone())));
        scope.set_agent_context(Some(AgentContext {
            agent: agent.clone(),
            user: user.clone(),
            trigger_chain: chain,
        }));

        let chat_agent = ChatAgent::new(
            (this.llm_factory)(&agent.model),
            this.assist_llm.clone(),
            Self::autonomous_tools(this),
            this.buffer.clone(),
            ChatAgentConfig {
                model: agent.model.clone(),
                with_tools: true,
                include_thoughts: false,
                anonymous_mode: false,
                is_planning: false,
                graph: ChatGraphConfig {
                    planning_enabled: false,
                    planning_min_length: this.config.planning_min_length,
                    max_tool_retries: this.config.max_tool_retries,
                    recursion_limit: this.config.recursion_limit,
                    retry: this.retry_config(),
                },
            },
            scope.clone(),
        )?;

        let request = ChatRequest {
            text: trigger_text,
            history,
            user_name: Some(user.name.clone()),
            user_id: Some(user.id.clone()),
            custom_instructions: user.custom_instructions.clone(),
            ..Default::default()
        };

        // Only transient errors retry; permission blocks surface inside the
        // graph and approval requests propagate immediately.
        let retry = this.retry_config();
        let result = with_retry(&retry, || {
            let chat_agent = &chat_agent;
            let request = request.clone();
            async move { chat_agent.chat_batch(&request).await }
        })
        .await;

        match result {
            Ok(payload) => {
                this.process_result(agent, user, execution_id, payload).await?;
                Ok(RunOutcome::Completed)
            }
            Err(AgentError::ApprovalRequested {
                approval_id,
                description,
                tool_name,
            }) => {
                this.db
                    .update_execution(execution_id, ExecutionStatus::WaitingApproval, None)
                    .await?;
                this.db
                    .add_message(NewMessage::new(
                        &agent.conversation_id,
                        MessageRole::Assistant,
                        build_approval_message(&approval_id, &description, &tool_name),
                    ))
                    .await?;
                tracing::info!(
                    agent_id = %agent.id,
                    %approval_id,
                    "agent suspended waiting for approval"
                );
                Ok(RunOutcome::WaitingApproval {
                    approval_id,
                    description,
                })
            }
            Err(error) => Err(error),
        }
    }

    fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.config.agent_max_retries,
            base_delay: self.config.agent_retry_base_delay,
            max_delay: self.config.agent_retry_max_delay,
        }
    }

    async fn process_result(
        &self,
        agent: &Agent,
        user: &User,
        execution_id: &str,
        payload: FinalPayload,
    ) -> Result<(), AgentError> {
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

        // POP semantics: this is the single read of the full results.
        let full_results = self.buffer.take(execution_id);
        let mut generated: Vec<GeneratedFile> =
            extract_generated_images_from_tool_results(&full_results);
        generated.extend(extract_code_output_files_from_tool_results(&full_results));

        let language = detect_response_language(&payload.content);
        let mut new_message = NewMessage::new(
            &agent.conversation_id,
            MessageRole::Assistant,
            &payload.content,
        );
        new_message.files = generated
            .iter()
            .map(|f| StoredFile {
                name: f.name.clone(),
                mime_type: f.mime_type.clone(),
                size: None,
            })
            .collect();
        if !sources.is_empty() {
            new_message.sources = Some(sources);
        }
        if !extracted.image_prompts.is_empty() {
            new_message.generated_images = Some(
                extracted
                    .image_prompts
                    .iter()
                    .map(|p| GeneratedImageMeta { prompt: p.clone() })
                    .collect(),
            );
        }
        new_message.language = language;
        let saved = self.db.add_message(new_message).await?;

        for (index, file) in generated.iter().enumerate() {
            match base64::engine::general_purpose::STANDARD.decode(&file.data) {
                Ok(bytes) => {
                    self.db
                        .put_blob(&format!("{}:{}", saved.id, index), bytes)
                        .await?;
                }
                Err(error) => {
                    tracing::warn!(file = %file.name, %error, "generated file had invalid base64");
                }
            }
        }

        process_memory_operations(&self.db, &user.id, &extracted.memory_operations).await?;

        calculate_and_save_message_cost(
            &self.db,
            &saved.id,
            &agent.conversation_id,
            &user.id,
            &agent.model,
            &payload.usage,
            &full_results,
            "agent",
        )
        .await?;

        let now = crate::db::now_utc();
        let next_run = match &agent.schedule {
            Some(schedule) => next_run_after(schedule, &agent.timezone, now)?,
            None => None,
        };
        self.db
            .update_agent_last_run(&agent.id, now, next_run)
            .await?;
        Ok(())
    }
}

/// Bridges the trigger_agent tool to the executor: creates the child
/// execution row, runs it synchronously with the extended chain, and maps
/// the outcome to a status phrase.
pub struct TriggerRunner(pub Arc<AgentExecutor>);

#[async_trait]
impl SubAgentRunner for TriggerRunner {
    async fn run_triggered(&self, target: &Agent, parent: &AgentContext, message: &str) -> String {
        let execution = match self
            .0
            .db
            .create_execution(&target.id, TriggerType::AgentTrigger, Some(&parent.agent.id))
            .await
        {
            Ok(execution) => execution,
            Err(error) => return format!("could not start: {error}"),
        };

        let outcome = self
            .0
            .clone()
            .execute(
                target,
                &parent.user,
                TriggerType::AgentTrigger,
                &execution.id,
                &parent.trigger_chain,
                Some(message),
            )
            .await;

        match outcome {
            RunOutcome::Completed => {
                let _ = self
                    .0
                    .db
                    .update_execution(&execution.id, ExecutionStatus::Completed, None)
                    .await;
                "completed successfully".to_string()
            }
            RunOutcome::WaitingApproval { .. } => "is waiting for user approval".to_string(),
            RunOutcome::Failed(error) => {
                let _ = self
                    .0
                    .db
                    .update_execution(&execution.id, ExecutionStatus::Failed, Some(&error))
                    .await;
                format!("failed: {error}")
            }
        }
    }
}

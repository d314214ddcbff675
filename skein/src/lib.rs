//! # Skein
//!
//! Core of a multi-tenant conversational AI service with two execution
//! modes: **interactive** (a user streams tokens through a graph-
//! structured agent with tool use) and **autonomous** (named, scheduled
//! agents run on cron triggers, may trigger each other, and suspend for
//! user approval before sensitive actions).
//!
//! ## Main modules
//!
//! - [`graph`]: [`StateGraph`], [`CompiledStateGraph`], [`Node`], [`Next`],
//!   [`RunContext`] — build and run state graphs with conditional edges,
//!   a recursion limit, and optional per-conversation checkpointing.
//! - [`agent`]: the chat graph (plan / chat / tools / check_tool_results),
//!   the [`ChatAgent`] facade (batch, token stream, event stream), content
//!   helpers, prompts, title generation.
//! - [`autonomous`]: [`AgentExecutor`] (budget, compaction, approval
//!   suspension, trigger chains) and [`Scheduler`] (zombie recovery, due
//!   query, retry-storm-safe next-run advancement).
//! - [`tools`]: the [`Tool`] trait, the built-in tool set, display
//!   metadata, permission-relevant groupings.
//! - [`tool_buffer`]: the request-scoped side channel for full tool
//!   results (`_full_result` payloads) with a TTL janitor.
//! - [`scope`]: explicit per-request ambient state ([`RequestScope`]).
//! - [`llm`]: [`LlmClient`] trait, [`MockLlm`], Gemini REST clients.
//! - [`db`]: sqlite persistence for users, conversations, messages,
//!   agents, executions, approvals, costs, blobs, memories.
//! - [`retry`]: transient-error classification and exponential backoff.
//! - [`cron_schedule`]: five-field cron in IANA zones, stored naive UTC.
//!
//! Key types are re-exported at the crate root:
//! `use skein::{ChatAgent, AgentExecutor, Scheduler, RequestScope};`.

pub mod agent;
pub mod approval;
pub mod autonomous;
pub mod config;
pub mod cost;
pub mod cron_schedule;
pub mod db;
pub mod error;
pub mod graph;
pub mod llm;
pub mod memory_ops;
pub mod message;
pub mod permissions;
pub mod retry;
pub mod scope;
pub mod state;
pub mod stream;
pub mod tool_buffer;
pub mod tools;

pub use agent::{
    generate_title, ChatAgent, ChatAgentConfig, ChatGraphConfig, ChatRequest, FinalPayload,
    HistoryMessage,
};
pub use approval::{build_approval_message, parse_approval_marker};
pub use autonomous::{AgentExecutor, LlmFactory, RunOutcome, Scheduler, SchedulerResult};
pub use config::Config;
pub use error::AgentError;
pub use graph::{
    CompilationError, CompiledStateGraph, MemorySaver, Next, Node, RunContext, StateGraph, END,
    START,
};
pub use llm::{GeminiChat, GeminiImage, ImageGenerator, LlmClient, LlmResponse, LlmUsage, MockLlm};
pub use message::{AssistantMessage, ContentBlock, Message, ToolCall, ToolMessage, UserMessage};
pub use permissions::{check_tool_permission, PermissionResult};
pub use scope::{AgentContext, FileAttachment, RequestScope};
pub use state::ChatState;
pub use tool_buffer::ToolResultBuffer;
pub use tools::{Tool, ToolSet, ToolSpec};

/// When running `cargo test -p skein`, initializes tracing from `RUST_LOG`
/// so unit tests can print logs with `--nocapture`.
#[cfg(test)]
mod test_logging {
    use ctor::ctor;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::Layer;

    #[ctor]
    fn init() {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_test_writer()
                    .with_filter(filter),
            )
            .try_init();
    }
}

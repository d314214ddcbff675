//! Error taxonomy for the whole crate.
//!
//! One enum flows through every node, tool, and executor signature.
//! Three variants are control flow rather than failures: `ToolBlocked` is
//! converted into an error tool message so the model can self-correct,
//! `ApprovalRequested` suspends an autonomous run, and `BudgetExceeded`
//! short-circuits execution before any LLM call.

use thiserror::Error;

/// Crate-wide error type.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Malformed input (empty prompt, invalid cron, bad arguments). Maps to 400.
    #[error("validation error: {0}")]
    Validation(String),

    /// Missing conversation/message/agent for this user. Maps to 404.
    #[error("not found: {0}")]
    NotFound(String),

    /// Caller is not allowed to touch the resource. Maps to 403.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// LLM invocation failure (network, vendor error, malformed reply).
    /// May be transient; see `retry::is_transient`.
    #[error("llm error: {0}")]
    Llm(String),

    /// Tool execution failure that is not one of the distinguished cases.
    #[error("tool error: {0}")]
    Tool(String),

    /// Agent permissions deny the tool. The graph turns this into an error
    /// tool message; it never aborts the run.
    #[error("tool blocked: {tool}")]
    ToolBlocked { tool: String },

    /// An autonomous agent called `request_approval`. Control flow, not a
    /// failure: the executor maps it to `RunOutcome::WaitingApproval`.
    #[error("approval requested: {description}")]
    ApprovalRequested {
        approval_id: String,
        description: String,
        tool_name: String,
    },

    /// Daily spend over the agent's budget limit; checked before execution.
    #[error("budget exceeded: {0}")]
    BudgetExceeded(String),

    /// Persistence failure (sqlite, blob store).
    #[error("storage error: {0}")]
    Storage(String),

    /// Graph exceeded the node-visit cap for one request.
    #[error("recursion limit of {limit} node visits exceeded")]
    RecursionLimit { limit: u32 },

    /// Graph construction error surfaced at runtime boundaries.
    #[error("graph compilation error: {0}")]
    Compile(String),

    /// Anything unexpected; logged with full context and mapped to a failed
    /// execution or a 500.
    #[error("{0}")]
    Fatal(String),
}

impl AgentError {
    /// True for the benign producer-shutdown race: the async runtime is
    /// tearing down mid-stream. Callers keep partial content instead of
    /// treating the run as crashed.
    pub fn is_benign_shutdown(&self) -> bool {
        let msg = self.to_string().to_lowercase();
        msg.contains("shutdown")
            && (msg.contains("cannot schedule new futures") || msg.contains("runtime"))
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(e: serde_json::Error) -> Self {
        AgentError::Validation(format!("invalid json: {e}"))
    }
}

impl From<rusqlite::Error> for AgentError {
    fn from(e: rusqlite::Error) -> Self {
        AgentError::Storage(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_blocked_message_names_the_tool() {
        let err = AgentError::ToolBlocked {
            tool: "send_email".into(),
        };
        assert_eq!(err.to_string(), "tool blocked: send_email");
    }

    #[test]
    fn benign_shutdown_matches_executor_teardown_message() {
        let err = AgentError::Fatal(
            "cannot schedule new futures after interpreter shutdown".into(),
        );
        assert!(err.is_benign_shutdown());

        let err = AgentError::Fatal("runtime is being shutdown".into());
        assert!(err.is_benign_shutdown());

        let err = AgentError::Llm("connection reset".into());
        assert!(!err.is_benign_shutdown());
    }
}

//! Agent-to-agent triggering.
//!
//! Looks up the target by name within the same user, refuses disabled
//! targets and anything already in the trigger chain, then hands off to a
//! [`SubAgentRunner`] for the synchronous child run. The return value to
//! the model is always a short status phrase; child failures are mapped to
//! text, never raised.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::db::models::Agent;
use crate::db::Database;
use crate::error::AgentError;
use crate::scope::{AgentContext, RequestScope};

use super::{Tool, ToolSpec, TOOL_TRIGGER_AGENT};

/// Runs one triggered child agent. Implemented by the autonomous executor;
/// the seam keeps tools independent of executor internals.
#[async_trait]
pub trait SubAgentRunner: Send + Sync {
    /// Executes `target` as a child of `parent` (chain already validated)
    /// and returns a short status phrase such as "completed successfully",
    /// "waiting for user approval", or "failed: <reason>".
    async fn run_triggered(&self, target: &Agent, parent: &AgentContext, message: &str) -> String;
}

pub struct TriggerAgentTool {
    db: Database,
    runner: Arc<dyn SubAgentRunner>,
}

impl TriggerAgentTool {
    pub fn new(db: Database, runner: Arc<dyn SubAgentRunner>) -> Self {
        Self { db, runner }
    }
}

#[async_trait]
impl Tool for TriggerAgentTool {
    fn name(&self) -> &str {
        TOOL_TRIGGER_AGENT
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: TOOL_TRIGGER_AGENT.into(),
            description: "Trigger another of the user's agents to run now. Use to delegate \
                          tasks or coordinate multi-agent workflows. The target must be \
                          enabled and owned by the same user."
                .into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "agent_name": {"type": "string", "description": "Name of the agent to trigger"},
                    "message": {
                        "type": "string",
                        "description": "Optional message passed to the triggered agent"
                    }
                },
                "required": ["agent_name"]
            }),
        }
    }

    async fn call(&self, args: Value, scope: &RequestScope) -> Result<Value, AgentError> {
        let Some(context) = scope.agent_context() else {
            return Ok(json!({
                "status": "Error: trigger_agent can only be used by autonomous agents"
            }));
        };

        let agent_name = args
            .get("agent_name")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| {
                AgentError::Validation("trigger_agent requires an agent_name".into())
            })?;
        let message = args
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("Continue");

        let Some(target) = self
            .db
            .get_agent_by_name(&context.user.id, agent_name)
            .await?
        else {
            return Ok(json!({"status": format!("Agent '{agent_name}' not found")}));
        };
        if !target.enabled {
            return Ok(json!({"status": format!("Agent '{agent_name}' is disabled")}));
        }
        if context.trigger_chain.contains(&target.id) {
            return Ok(json!({
                "status": format!(
                    "Cannot trigger '{agent_name}' - would create circular dependency"
                )
            }));
        }

        tracing::info!(
            source_agent = %context.agent.name,
            target_agent = agent_name,
            "triggering agent"
        );
        let status = self.runner.run_triggered(&target, &context, message).await;
        Ok(json!({"status": format!("Agent '{agent_name}' {status}")}))
    }
}

//! Approval request tool for autonomous agents.
//!
//! The tool persists a pending `ApprovalRequest` and returns the
//! distinguished `ApprovalRequested` error; the executor maps it to the
//! waiting_approval outcome. In interactive mode it degrades to a plain
//! text answer telling the model to just ask the user.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::db::Database;
use crate::error::AgentError;
use crate::scope::RequestScope;

use super::{Tool, ToolSpec, TOOL_REQUEST_APPROVAL};

pub struct RequestApprovalTool {
    db: Database,
}

impl RequestApprovalTool {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Tool for RequestApprovalTool {
    fn name(&self) -> &str {
        TOOL_REQUEST_APPROVAL
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: TOOL_REQUEST_APPROVAL.into(),
            description: "Request user approval before a sensitive action: destructive or \
                          irreversible changes, messages to other people, external posts, \
                          financial commitments. After calling this you MUST stop and wait; \
                          do not proceed until the user approves."
                .into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "action_description": {
                        "type": "string",
                        "description": "What you want to do and why, specifically"
                    },
                    "tool_name": {
                        "type": "string",
                        "description": "The tool/action category (e.g. email, calendar)"
                    }
                },
                "required": ["action_description"]
            }),
        }
    }

    async fn call(&self, args: Value, scope: &RequestScope) -> Result<Value, AgentError> {
        let Some(context) = scope.agent_context() else {
            return Ok(json!({
                "status": "Error: request_approval can only be used by autonomous agents. \
                           In interactive mode, simply ask the user directly."
            }));
        };

        let description = args
            .get("action_description")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .ok_or_else(|| {
                AgentError::Validation("request_approval requires an action_description".into())
            })?;
        let tool_name = args
            .get("tool_name")
            .and_then(Value::as_str)
            .unwrap_or("custom_action");

        tracing::info!(
            agent_id = %context.agent.id,
            agent_name = %context.agent.name,
            action = description,
            tool = tool_name,
            "agent requesting approval"
        );

        let approval = self
            .db
            .create_approval_request(
                &context.agent.id,
                &context.user.id,
                tool_name,
                json!({"description": description}),
                description,
            )
            .await?;

        Err(AgentError::ApprovalRequested {
            approval_id: approval.id,
            description: description.to_string(),
            tool_name: tool_name.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::{seed_agent, seed_user, temp_db};
    use crate::scope::AgentContext;

    #[tokio::test]
    async fn interactive_call_returns_plain_status() {
        let (db, _dir) = temp_db().await;
        let tool = RequestApprovalTool::new(db);
        let out = tool
            .call(
                json!({"action_description": "send an email"}),
                &RequestScope::new(),
            )
            .await
            .unwrap();
        assert!(out["status"].as_str().unwrap().contains("autonomous agents"));
    }

    #[tokio::test]
    async fn autonomous_call_persists_and_raises() {
        let (db, _dir) = temp_db().await;
        let user = seed_user(&db).await;
        let agent = seed_agent(&db, &user, "mailer").await;
        let scope = RequestScope::new();
        scope.set_agent_context(Some(AgentContext {
            agent: agent.clone(),
            user: user.clone(),
            trigger_chain: vec![agent.id.clone()],
        }));

        let tool = RequestApprovalTool::new(db.clone());
        let err = tool
            .call(
                json!({"action_description": "send the weekly report", "tool_name": "email"}),
                &scope,
            )
            .await
            .unwrap_err();

        let AgentError::ApprovalRequested {
            approval_id,
            description,
            tool_name,
        } = err
        else {
            panic!("expected ApprovalRequested");
        };
        assert_eq!(description, "send the weekly report");
        assert_eq!(tool_name, "email");

        let stored = db.get_approval_request(&approval_id).await.unwrap().unwrap();
        assert_eq!(stored.agent_id, agent.id);
        assert_eq!(stored.description, "send the weekly report");
    }
}

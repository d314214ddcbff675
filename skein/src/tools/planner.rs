//! Planner dashboard refresh: overwrites the ambient dashboard snapshot so
//! the NEXT turn's system prompt sees fresh data. Planner mode only.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::AgentError;
use crate::scope::RequestScope;

use super::{Tool, ToolSpec, TOOL_REFRESH_PLANNER_DASHBOARD};

/// Produces the current dashboard snapshot for a user.
#[async_trait]
pub trait DashboardProvider: Send + Sync {
    async fn fetch(&self, user_id: &str) -> Result<Value, AgentError>;
}

/// Fixed snapshot, for tests and single-tenant setups.
pub struct StaticDashboard(pub Value);

#[async_trait]
impl DashboardProvider for StaticDashboard {
    async fn fetch(&self, _user_id: &str) -> Result<Value, AgentError> {
        Ok(self.0.clone())
    }
}

pub struct RefreshPlannerDashboardTool {
    provider: Arc<dyn DashboardProvider>,
}

impl RefreshPlannerDashboardTool {
    pub fn new(provider: Arc<dyn DashboardProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Tool for RefreshPlannerDashboardTool {
    fn name(&self) -> &str {
        TOOL_REFRESH_PLANNER_DASHBOARD
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: TOOL_REFRESH_PLANNER_DASHBOARD.into(),
            description: "Reload the planner dashboard after changing tasks or events, so \
                          your next reply reflects the current state."
                .into(),
            input_schema: json!({"type": "object", "properties": {}}),
        }
    }

    async fn call(&self, _args: Value, scope: &RequestScope) -> Result<Value, AgentError> {
        let (_conversation_id, user_id) = scope.conversation().ok_or_else(|| {
            AgentError::Validation(
                "refresh_planner_dashboard requires a conversation context".into(),
            )
        })?;
        let dashboard = self.provider.fetch(&user_id).await?;
        scope.set_planner_dashboard(Some(dashboard));
        Ok(json!({"status": "Dashboard refreshed"}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn refresh_overwrites_the_scope_snapshot() {
        let scope = RequestScope::new();
        scope.set_conversation(Some(("conv".into(), "user".into())));
        scope.set_planner_dashboard(Some(json!({"tasks": 1})));

        let tool = RefreshPlannerDashboardTool::new(Arc::new(StaticDashboard(
            json!({"tasks": 5}),
        )));
        tool.call(json!({}), &scope).await.unwrap();
        assert_eq!(scope.planner_dashboard(), Some(json!({"tasks": 5})));
    }

    #[tokio::test]
    async fn refresh_requires_conversation_context() {
        let tool = RefreshPlannerDashboardTool::new(Arc::new(StaticDashboard(json!({}))));
        let err = tool.call(json!({}), &RequestScope::new()).await.unwrap_err();
        assert!(matches!(err, AgentError::Validation(_)));
    }
}

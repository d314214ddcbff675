//! Tools available to the model.
//!
//! A [`Tool`] executes one schema-described call against the ambient
//! [`RequestScope`](crate::scope::RequestScope); a [`ToolSet`] is the
//! registry bound to one request. Two tool families get special routing:
//! always-safe tools bypass the autonomous permission guard, and metadata
//! tools (data sinks) terminate the graph instead of producing another
//! model turn.

mod display;
mod generate_image;
mod metadata;
mod planner;
mod request_approval;
mod retrieve_file;
mod trigger_agent;
mod web;

pub use display::{extract_tool_detail, tool_display_meta};
pub use generate_image::GenerateImageTool;
pub use metadata::{CiteSourcesTool, ManageMemoryTool};
pub use planner::{DashboardProvider, RefreshPlannerDashboardTool, StaticDashboard};
pub use request_approval::RequestApprovalTool;
pub use retrieve_file::RetrieveFileTool;
pub use trigger_agent::{SubAgentRunner, TriggerAgentTool};
pub use web::{FetchUrlTool, WebSearchTool};

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::AgentError;
use crate::scope::RequestScope;

pub const TOOL_WEB_SEARCH: &str = "web_search";
pub const TOOL_FETCH_URL: &str = "fetch_url";
pub const TOOL_RETRIEVE_FILE: &str = "retrieve_file";
pub const TOOL_GENERATE_IMAGE: &str = "generate_image";
pub const TOOL_CITE_SOURCES: &str = "cite_sources";
pub const TOOL_MANAGE_MEMORY: &str = "manage_memory";
pub const TOOL_REQUEST_APPROVAL: &str = "request_approval";
pub const TOOL_TRIGGER_AGENT: &str = "trigger_agent";
pub const TOOL_REFRESH_PLANNER_DASHBOARD: &str = "refresh_planner_dashboard";

/// Read-only (or purely advisory) tools that bypass the autonomous
/// permission guard unconditionally.
pub const ALWAYS_SAFE_TOOLS: [&str; 4] = [
    TOOL_WEB_SEARCH,
    TOOL_FETCH_URL,
    TOOL_RETRIEVE_FILE,
    TOOL_REQUEST_APPROVAL,
];

/// Data sinks: their "answer" is the structured argument, so a turn that
/// only calls these terminates the graph.
pub const METADATA_TOOL_NAMES: [&str; 2] = [TOOL_CITE_SOURCES, TOOL_MANAGE_MEMORY];

pub fn is_metadata_tool(name: &str) -> bool {
    METADATA_TOOL_NAMES.contains(&name)
}

/// Key under which tools place large payloads (image bytes, file
/// contents). The tools node captures the original into the tool result
/// buffer, then strips this key before the model sees the result again.
pub const FULL_RESULT_KEY: &str = "_full_result";

/// Schema for one tool as presented to the model.
#[derive(Clone, Debug)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// One callable tool.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn spec(&self) -> ToolSpec;
    async fn call(&self, args: Value, scope: &RequestScope) -> Result<Value, AgentError>;
}

/// Registry of tools bound to one request.
#[derive(Clone, Default)]
pub struct ToolSet {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, tool: Arc<dyn Tool>) -> Self {
        self.register(tool);
        self
    }

    /// Registers a tool; replaces any tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.retain(|t| t.name() != tool.name());
        self.tools.push(tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name).cloned()
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools.iter().map(|t| t.spec()).collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name().to_string()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Keeps only tools the predicate accepts.
    pub fn retain(&mut self, mut predicate: impl FnMut(&str) -> bool) {
        self.tools.retain(|t| predicate(t.name()));
    }
}

impl std::fmt::Debug for ToolSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolSet").field("tools", &self.names()).finish()
    }
}

/// External-integration tools excluded in anonymous mode. The built-in set
/// has none; deployments that register calendar/task-tracker tools list
/// them here via config.
pub const INTEGRATION_TOOLS: [&str; 0] = [];

/// Narrows a base registry for one request: anonymous mode drops
/// integrations, and the planner dashboard tool is planner-mode only.
pub fn tools_for_request(base: &ToolSet, anonymous_mode: bool, is_planning: bool) -> ToolSet {
    let mut tools = base.clone();
    if anonymous_mode {
        tools.retain(|name| !INTEGRATION_TOOLS.contains(&name));
    }
    if !is_planning {
        tools.retain(|name| name != TOOL_REFRESH_PLANNER_DASHBOARD);
    }
    tools
}


#[cfg(test)]
mod tests {
    use super::test_support::EchoTool;
    use super::*;

    #[test]
    fn register_replaces_same_name() {
        let mut tools = ToolSet::new();
        tools.register(Arc::new(EchoTool::named("a")));
        tools.register(Arc::new(EchoTool::named("a")));
        assert_eq!(tools.names(), vec!["a"]);
    }

    #[test]
    fn planner_tool_is_planning_mode_only() {
        let base = ToolSet::new()
            .with(Arc::new(EchoTool::named(TOOL_WEB_SEARCH)))
            .with(Arc::new(EchoTool::named(TOOL_REFRESH_PLANNER_DASHBOARD)));

        let regular = tools_for_request(&base, false, false);
        assert_eq!(regular.names(), vec![TOOL_WEB_SEARCH]);

        let planner = tools_for_request(&base, false, true);
        assert!(planner.names().contains(&TOOL_REFRESH_PLANNER_DASHBOARD.to_string()));
    }

    #[test]
    fn metadata_tools_are_the_two_data_sinks() {
        assert!(is_metadata_tool(TOOL_CITE_SOURCES));
        assert!(is_metadata_tool(TOOL_MANAGE_MEMORY));
        assert!(!is_metadata_tool(TOOL_WEB_SEARCH));
        assert!(!is_metadata_tool(TOOL_GENERATE_IMAGE));
    }
}

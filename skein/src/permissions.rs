//! Permission checking for autonomous agent tool calls.
//!
//! Whether an agent may use a tool follows from its configured allow-list.
//! The approval system is LLM-driven (agents decide when to call
//! `request_approval`); this module only enforces the block/allow binary.

use crate::db::models::Agent;
use crate::tools::ALWAYS_SAFE_TOOLS;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PermissionResult {
    Allowed,
    Blocked,
}

/// Checks one tool call for an autonomous agent.
///
/// 1. Always-safe tools proceed unconditionally.
/// 2. With an allow-list present (even empty), only listed tools proceed.
/// 3. Otherwise allow.
pub fn check_tool_permission(agent: &Agent, tool_name: &str) -> PermissionResult {
    if ALWAYS_SAFE_TOOLS.contains(&tool_name) {
        return PermissionResult::Allowed;
    }
    if let Some(allowed) = &agent.tool_permissions {
        if !allowed.iter().any(|t| t == tool_name) {
            tracing::info!(
                agent_id = %agent.id,
                tool = tool_name,
                "tool blocked - not in agent's permissions"
            );
            return PermissionResult::Blocked;
        }
    }
    PermissionResult::Allowed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::Agent;

    fn agent_with_permissions(permissions: Option<Vec<&str>>) -> Agent {
        Agent {
            id: "agent-1".into(),
            user_id: "user-1".into(),
            name: "worker".into(),
            description: None,
            system_prompt: String::new(),
            schedule: None,
            timezone: "UTC".into(),
            model: "m".into(),
            enabled: true,
            tool_permissions: permissions
                .map(|p| p.into_iter().map(str::to_string).collect()),
            budget_limit: None,
            next_run_at: None,
            last_run_at: None,
            conversation_id: "conv-1".into(),
            created_at: chrono::DateTime::<chrono::Utc>::UNIX_EPOCH.naive_utc(),
        }
    }

    #[test]
    fn always_safe_tools_bypass_the_allow_list() {
        let agent = agent_with_permissions(Some(vec![]));
        for tool in ["web_search", "fetch_url", "retrieve_file", "request_approval"] {
            assert_eq!(
                check_tool_permission(&agent, tool),
                PermissionResult::Allowed,
                "{tool} should always be allowed"
            );
        }
    }

    #[test]
    fn empty_allow_list_blocks_everything_else() {
        let agent = agent_with_permissions(Some(vec![]));
        assert_eq!(
            check_tool_permission(&agent, "generate_image"),
            PermissionResult::Blocked
        );
        assert_eq!(
            check_tool_permission(&agent, "trigger_agent"),
            PermissionResult::Blocked
        );
    }

    #[test]
    fn listed_tools_are_allowed() {
        let agent = agent_with_permissions(Some(vec!["generate_image"]));
        assert_eq!(
            check_tool_permission(&agent, "generate_image"),
            PermissionResult::Allowed
        );
        assert_eq!(
            check_tool_permission(&agent, "trigger_agent"),
            PermissionResult::Blocked
        );
    }

    #[test]
    fn no_allow_list_means_everything_allowed() {
        let agent = agent_with_permissions(None);
        assert_eq!(
            check_tool_permission(&agent, "trigger_agent"),
            PermissionResult::Allowed
        );
    }
}

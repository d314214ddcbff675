//! System prompt assembly.
//!
//! One function builds the full system prompt from its layers: base
//! instructions, tool rules, user personalization, planner context, and
//! autonomous agent context. Product wording lives here only.

use serde_json::Value;

use crate::scope::AgentContext;

const BASE_INSTRUCTIONS: &str = "\
You are a helpful assistant in an ongoing conversation. Be accurate and \
concise. Reply in the language the user used. When you do not know \
something current, use the available tools rather than guessing.";

const TOOL_RULES: &str = "\
Tool rules:\n\
- Use web_search for anything recent or factual you are unsure about, then \
cite what you used with cite_sources.\n\
- History messages may start with an HTML comment containing metadata \
(timestamps, file ids, tools used). Never echo that comment back; use file \
ids with retrieve_file when the user refers to an earlier upload.\n\
- When you learn a durable fact about the user, record it with \
manage_memory.\n\
- If a tool fails, consider a different approach before giving up.";

const PLANNER_RULES: &str = "\
You are operating the user's daily planner. Ground every answer in the \
dashboard snapshot below. After you change tasks or events, call \
refresh_planner_dashboard so the next turn sees the result.";

/// Inputs for one prompt assembly.
#[derive(Debug, Default)]
pub struct PromptInputs<'a> {
    pub with_tools: bool,
    pub force_tools: Option<&'a [String]>,
    pub user_name: Option<&'a str>,
    pub user_id: Option<&'a str>,
    pub custom_instructions: Option<&'a str>,
    pub anonymous_mode: bool,
    pub is_planning: bool,
    /// Snapshot passed in by the request.
    pub dashboard: Option<&'a Value>,
    /// Refreshed snapshot from the scope; wins over `dashboard`.
    pub refreshed_dashboard: Option<&'a Value>,
    pub agent_context: Option<&'a AgentContext>,
}

/// Builds the system prompt for one turn.
pub fn assemble_system_prompt(inputs: &PromptInputs<'_>) -> String {
    let mut sections = vec![BASE_INSTRUCTIONS.to_string()];

    if inputs.with_tools {
        sections.push(TOOL_RULES.to_string());
        if let Some(forced) = inputs.force_tools {
            if !forced.is_empty() {
                sections.push(format!(
                    "For this request you MUST use the following tool(s): {}.",
                    forced.join(", ")
                ));
            }
        }
    }

    if !inputs.anonymous_mode {
        let mut personal = Vec::new();
        if let Some(name) = inputs.user_name {
            personal.push(format!("The user's name is {name}."));
        }
        if let Some(id) = inputs.user_id {
            personal.push(format!("User id: {id}."));
        }
        if let Some(instructions) = inputs.custom_instructions {
            if !instructions.trim().is_empty() {
                personal.push(format!(
                    "The user asked you to follow these instructions:\n{instructions}"
                ));
            }
        }
        if !personal.is_empty() {
            sections.push(personal.join("\n"));
        }
    }

    if inputs.is_planning {
        sections.push(PLANNER_RULES.to_string());
        let snapshot = inputs.refreshed_dashboard.or(inputs.dashboard);
        if let Some(dashboard) = snapshot {
            sections.push(format!("Planner dashboard:\n{dashboard}"));
        }
    }

    if let Some(context) = inputs.agent_context {
        sections.push(format!(
            "You are running autonomously as the agent \"{}\" (no user is \
             watching this conversation live). Agent instructions:\n{}",
            context.agent.name, context.agent.system_prompt
        ));
        if context.trigger_chain.len() > 1 {
            sections.push(format!(
                "This run was triggered by another agent (chain depth {}).",
                context.trigger_chain.len()
            ));
        }
    }

    sections.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymous_mode_suppresses_personalization() {
        let inputs = PromptInputs {
            with_tools: true,
            user_name: Some("Alice"),
            user_id: Some("u-1"),
            custom_instructions: Some("be terse"),
            anonymous_mode: true,
            ..Default::default()
        };
        let prompt = assemble_system_prompt(&inputs);
        assert!(!prompt.contains("Alice"));
        assert!(!prompt.contains("be terse"));
        assert!(prompt.contains("Tool rules"));
    }

    #[test]
    fn refreshed_dashboard_wins_over_request_snapshot() {
        let stale = serde_json::json!({"tasks": 1});
        let fresh = serde_json::json!({"tasks": 9});
        let inputs = PromptInputs {
            is_planning: true,
            dashboard: Some(&stale),
            refreshed_dashboard: Some(&fresh),
            ..Default::default()
        };
        let prompt = assemble_system_prompt(&inputs);
        assert!(prompt.contains("\"tasks\":9"));
        assert!(!prompt.contains("\"tasks\":1"));
    }

    #[test]
    fn forced_tools_are_spelled_out() {
        let forced = vec!["web_search".to_string()];
        let inputs = PromptInputs {
            with_tools: true,
            force_tools: Some(&forced),
            ..Default::default()
        };
        let prompt = assemble_system_prompt(&inputs);
        assert!(prompt.contains("MUST use the following tool(s): web_search"));
    }
}

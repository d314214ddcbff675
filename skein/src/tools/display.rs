//! Display metadata and human-readable detail for tool_start events.

use serde_json::Value;
use sse_event::{ToolDisplayMeta, ToolIcon};

use super::{
    TOOL_CITE_SOURCES, TOOL_FETCH_URL, TOOL_GENERATE_IMAGE, TOOL_MANAGE_MEMORY,
    TOOL_REFRESH_PLANNER_DASHBOARD, TOOL_REQUEST_APPROVAL, TOOL_RETRIEVE_FILE,
    TOOL_TRIGGER_AGENT, TOOL_WEB_SEARCH,
};

fn meta(label: &str, past_label: &str, icon: ToolIcon) -> ToolDisplayMeta {
    ToolDisplayMeta {
        label: label.to_string(),
        past_label: past_label.to_string(),
        icon,
    }
}

/// Display metadata for the frontend, per tool name.
pub fn tool_display_meta(tool: &str) -> Option<ToolDisplayMeta> {
    match tool {
        TOOL_WEB_SEARCH => Some(meta("Searching the web", "Searched the web", ToolIcon::Search)),
        TOOL_FETCH_URL => Some(meta("Reading a page", "Read a page", ToolIcon::Link)),
        TOOL_GENERATE_IMAGE => Some(meta(
            "Generating an image",
            "Generated an image",
            ToolIcon::Sparkles,
        )),
        TOOL_RETRIEVE_FILE => Some(meta("Opening a file", "Opened a file", ToolIcon::Code)),
        TOOL_MANAGE_MEMORY => Some(meta("Updating memory", "Updated memory", ToolIcon::Checklist)),
        TOOL_CITE_SOURCES => Some(meta("Citing sources", "Cited sources", ToolIcon::Link)),
        TOOL_REFRESH_PLANNER_DASHBOARD => Some(meta(
            "Refreshing the dashboard",
            "Refreshed the dashboard",
            ToolIcon::Refresh,
        )),
        TOOL_TRIGGER_AGENT => Some(meta(
            "Triggering an agent",
            "Triggered an agent",
            ToolIcon::Calendar,
        )),
        TOOL_REQUEST_APPROVAL => Some(meta(
            "Requesting approval",
            "Requested approval",
            ToolIcon::Checklist,
        )),
        _ => None,
    }
}

fn str_arg(args: &Value, key: &str) -> Option<String> {
    args.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn truncate(text: String, max: usize) -> String {
    if text.chars().count() <= max {
        text
    } else {
        let cut: String = text.chars().take(max).collect();
        format!("{cut}…")
    }
}

/// Human-readable detail from complete tool arguments, when there is one
/// worth showing.
pub fn extract_tool_detail(tool: &str, args: &Value) -> Option<String> {
    match tool {
        TOOL_WEB_SEARCH => str_arg(args, "query"),
        TOOL_FETCH_URL => str_arg(args, "url"),
        TOOL_GENERATE_IMAGE => str_arg(args, "prompt").map(|p| truncate(p, 80)),
        TOOL_RETRIEVE_FILE => str_arg(args, "file_id"),
        TOOL_TRIGGER_AGENT => str_arg(args, "agent_name"),
        TOOL_REQUEST_APPROVAL => {
            str_arg(args, "action_description").map(|d| truncate(d, 80))
        }
        _ => None,
    }
}

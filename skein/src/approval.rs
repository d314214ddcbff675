//! Approval marker messages.
//!
//! Assistant messages whose content begins with the literal
//! `[approval-request:<id>]\n` are rendered by the UI as inline
//! approve/reject controls. The byte-exact prefix is load-bearing.

/// Builds the assistant message written when an agent suspends for
/// approval. Shared by the executor and the streaming save path so the
/// format stays consistent.
pub fn build_approval_message(approval_id: &str, description: &str, tool_name: &str) -> String {
    let tool_line = if tool_name.is_empty() {
        String::new()
    } else {
        format!("\n\nTool: `{tool_name}`")
    };
    format!(
        "[approval-request:{approval_id}]\n\
         **Action requires approval**\n\n\
         I need your permission to: **{description}**{tool_line}\n\n\
         Please approve or reject this request."
    )
}

/// Extracts the approval id when `content` carries the marker.
pub fn parse_approval_marker(content: &str) -> Option<&str> {
    let rest = content.strip_prefix("[approval-request:")?;
    let (id, tail) = rest.split_once(']')?;
    if !tail.starts_with('\n') || id.is_empty() {
        return None;
    }
    Some(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_starts_with_byte_exact_marker() {
        let message = build_approval_message("ap-123", "send the report", "email");
        assert!(message.starts_with("[approval-request:ap-123]\n"));
        assert!(message.contains("**Action requires approval**"));
        assert!(message.contains("Tool: `email`"));
    }

    #[test]
    fn tool_line_is_omitted_when_unknown() {
        let message = build_approval_message("ap-1", "do the thing", "");
        assert!(!message.contains("Tool:"));
    }

    #[test]
    fn marker_round_trips_through_parse() {
        let message = build_approval_message("ap-9", "act", "calendar");
        assert_eq!(parse_approval_marker(&message), Some("ap-9"));
    }

    #[test]
    fn parse_rejects_lookalikes() {
        assert_eq!(parse_approval_marker("plain text"), None);
        assert_eq!(parse_approval_marker("[approval-request:]\nx"), None);
        assert_eq!(parse_approval_marker("[approval-request:abc] same line"), None);
    }
}

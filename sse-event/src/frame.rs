//! SSE frame formatting: `data: {json}\n\n`.

use crate::event::ChatEvent;

/// Terminator of one SSE frame (blank line).
pub const SSE_FRAME_TERMINATOR: &str = "\n\n";

/// Formats one event as a complete SSE frame. Payload JSON is compact and
/// single-line, so no `data:` continuation lines are ever produced.
pub fn write_sse_frame(event: &ChatEvent) -> Result<String, serde_json::Error> {
    let payload = serde_json::to_string(event)?;
    Ok(format!("data: {payload}{SSE_FRAME_TERMINATOR}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_has_data_prefix_and_blank_line() {
        let frame = write_sse_frame(&ChatEvent::Token { text: "hi".into() }).unwrap();
        assert!(frame.starts_with("data: {"));
        assert!(frame.ends_with("\n\n"));
        assert_eq!(frame.matches('\n').count(), 2);
    }

    #[test]
    fn frame_payload_is_parseable_json() {
        let frame = write_sse_frame(&ChatEvent::ToolEnd {
            tool: "fetch_url".into(),
        })
        .unwrap();
        let payload = frame
            .strip_prefix("data: ")
            .and_then(|s| s.strip_suffix("\n\n"))
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(payload).unwrap();
        assert_eq!(value["type"], "tool_end");
    }
}

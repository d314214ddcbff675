//! Content extraction and rewriting for model responses and history.
//!
//! Covers the legacy `<!-- METADATA: -->` marker (being phased out in
//! favor of metadata tools), leaked tool-call JSON cleanup, the history
//! metadata prelude, `_full_result` stripping, and the save-time
//! extraction of sources / memory operations / generated files.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::db::models::Source;
use crate::message::Message;
use crate::tools::{FULL_RESULT_KEY, TOOL_CITE_SOURCES, TOOL_GENERATE_IMAGE, TOOL_MANAGE_MEMORY};

/// Legacy in-band metadata marker. Streams hold tokens back until a
/// window of this length is known not to start the marker.
pub const METADATA_MARKER: &str = "<!-- METADATA:";

/// Splits trailing in-band metadata off a full response. Returns the clean
/// content and the parsed metadata object (empty when absent or invalid).
pub fn extract_metadata_from_response(full: &str) -> (String, Value) {
    let Some(pos) = full.find(METADATA_MARKER) else {
        return (full.trim().to_string(), json!({}));
    };
    let clean = full[..pos].trim_end().to_string();
    let rest = &full[pos + METADATA_MARKER.len()..];
    let metadata = match rest.find("-->") {
        Some(end) => serde_json::from_str(rest[..end].trim()).unwrap_or_else(|_| json!({})),
        None => json!({}),
    };
    (clean, metadata)
}

fn balanced_end(s: &str, start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, c) in s[start..].char_indices() {
        let index = start + offset;
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(index);
                }
            }
            _ => {}
        }
    }
    None
}

fn is_tool_call_artifact(block: &str) -> bool {
    serde_json::from_str::<Value>(block)
        .map(|v| {
            v.get("action").is_some()
                && v.get("action_input").is_some()
                && v.as_object().map(|o| o.len() == 2).unwrap_or(false)
        })
        .unwrap_or(false)
}

/// Removes `{"action": …, "action_input": …}` blocks the model sometimes
/// emits as text alongside real function calls.
pub fn clean_tool_call_json(response: &str) -> String {
    let mut out = String::with_capacity(response.len());
    let mut i = 0;
    while i < response.len() {
        let c = response[i..].chars().next().expect("in-bounds char");
        if c == '{' {
            if let Some(end) = balanced_end(response, i) {
                if is_tool_call_artifact(&response[i..=end]) {
                    while out.ends_with('\n') {
                        out.pop();
                    }
                    i = end + 1;
                    continue;
                }
            }
        }
        out.push(c);
        i += c.len_utf8();
    }
    out.trim().to_string()
}

/// Strips the `_full_result` field from tool result JSON so large payloads
/// never travel back to the model. Non-JSON content passes through.
pub fn strip_full_result(content: &str) -> String {
    match serde_json::from_str::<Value>(content) {
        Ok(Value::Object(mut map)) if map.contains_key(FULL_RESULT_KEY) => {
            map.remove(FULL_RESULT_KEY);
            Value::Object(map).to_string()
        }
        _ => content.to_string(),
    }
}

/// One file reference in the history prelude: id is
/// `<message_id>:<file_index>` so the model can hand it to retrieve_file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FileRef {
    pub name: String,
    #[serde(rename = "type")]
    pub mime_type: String,
    pub id: String,
}

/// Context attached to one history message before it reaches the model.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HistoryMetadata {
    pub session_gap: Option<String>,
    pub timestamp: Option<String>,
    pub relative_time: Option<String>,
    pub files: Vec<FileRef>,
    pub tools_used: Vec<String>,
    pub tool_summary: Option<String>,
}

impl HistoryMetadata {
    fn is_empty(&self) -> bool {
        self.session_gap.is_none()
            && self.timestamp.is_none()
            && self.relative_time.is_none()
            && self.files.is_empty()
            && self.tools_used.is_empty()
            && self.tool_summary.is_none()
    }
}

/// Prefixes content with the compact metadata prelude, when any metadata
/// is present. This is the model's only stable way to reference prior
/// uploads by id.
pub fn format_message_with_metadata(content: &str, metadata: &HistoryMetadata) -> String {
    if metadata.is_empty() {
        return content.to_string();
    }
    let mut map = Map::new();
    if let Some(gap) = &metadata.session_gap {
        map.insert("session_gap".into(), json!(gap));
    }
    if let Some(timestamp) = &metadata.timestamp {
        map.insert("timestamp".into(), json!(timestamp));
    }
    if let Some(relative) = &metadata.relative_time {
        map.insert("relative_time".into(), json!(relative));
    }
    if !metadata.files.is_empty() {
        map.insert("files".into(), json!(metadata.files));
    }
    if !metadata.tools_used.is_empty() {
        map.insert("tools_used".into(), json!(metadata.tools_used));
    }
    if let Some(summary) = &metadata.tool_summary {
        map.insert("tool_summary".into(), json!(summary));
    }
    let compact = Value::Object(map).to_string();
    format!("{METADATA_MARKER} {compact} -->\n{content}")
}

/// One memory operation extracted from `manage_memory` arguments.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MemoryOperation {
    pub action: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
}

/// Drops operations that could not be applied; each problem is reported
/// so the model's mistake is visible in logs.
pub fn validate_memory_operations(operations: Vec<MemoryOperation>) -> Vec<MemoryOperation> {
    operations
        .into_iter()
        .filter(|op| {
            let valid = match op.action.as_str() {
                "add" => op.content.is_some(),
                "update" => op.id.is_some() && op.content.is_some(),
                "delete" => op.id.is_some(),
                _ => false,
            };
            if !valid {
                tracing::warn!(action = %op.action, "dropping invalid memory operation");
            }
            valid
        })
        .collect()
}

/// Side-band data read off assistant tool calls at save time. No JSON
/// reparsing: the vendor validated the arguments against the schema.
#[derive(Clone, Debug, Default)]
pub struct ExtractedMetadata {
    pub sources: Vec<Source>,
    pub memory_operations: Vec<MemoryOperation>,
    pub image_prompts: Vec<String>,
}

/// Scans assistant messages for metadata tool calls. The most recent
/// `cite_sources` / `manage_memory` call wins; image prompts accumulate
/// across the whole run.
pub fn extract_metadata_tool_args(messages: &[Message]) -> ExtractedMetadata {
    let mut extracted = ExtractedMetadata::default();
    for message in messages {
        let Some(assistant) = message.as_assistant() else {
            continue;
        };
        for call in &assistant.tool_calls {
            match call.name.as_str() {
                TOOL_CITE_SOURCES => {
                    if let Some(sources) = call.arguments.get("sources") {
                        if let Ok(parsed) = serde_json::from_value(sources.clone()) {
                            extracted.sources = parsed;
                        }
                    }
                }
                TOOL_MANAGE_MEMORY => {
                    if let Some(operations) = call.arguments.get("operations") {
                        if let Ok(parsed) =
                            serde_json::from_value::<Vec<MemoryOperation>>(operations.clone())
                        {
                            extracted.memory_operations = validate_memory_operations(parsed);
                        }
                    }
                }
                TOOL_GENERATE_IMAGE => {
                    if let Some(prompt) = call.arguments.get("prompt").and_then(Value::as_str) {
                        extracted.image_prompts.push(prompt.to_string());
                    }
                }
                _ => {}
            }
        }
    }
    extracted
}

/// Fallback when the model used web_search but never called cite_sources:
/// synthesize sources from raw `(title, href)` result pairs so they are
/// not silently lost.
pub fn extract_sources_fallback_from_tool_results(tool_results: &[Value]) -> Vec<Source> {
    let mut sources = Vec::new();
    for result in tool_results {
        let Some(rows) = result.get("results").and_then(Value::as_array) else {
            continue;
        };
        for row in rows {
            let (Some(title), Some(href)) = (
                row.get("title").and_then(Value::as_str),
                row.get("href").and_then(Value::as_str),
            ) else {
                continue;
            };
            if href.is_empty() || sources.iter().any(|s: &Source| s.url == href) {
                continue;
            }
            sources.push(Source {
                title: title.to_string(),
                url: href.to_string(),
            });
        }
    }
    sources
}

/// One generated file extracted from full tool results (base64 payload).
#[derive(Clone, Debug, PartialEq)]
pub struct GeneratedFile {
    pub name: String,
    pub mime_type: String,
    pub data: String,
}

fn extension_for(mime_type: &str) -> &'static str {
    match mime_type {
        "image/jpeg" => "jpg",
        "image/webp" => "webp",
        "image/gif" => "gif",
        _ => "png",
    }
}

/// Generated images from `_full_result.images` entries.
pub fn extract_generated_images_from_tool_results(full: &[Value]) -> Vec<GeneratedFile> {
    let mut files = Vec::new();
    for result in full {
        let Some(images) = result
            .pointer(&format!("/{FULL_RESULT_KEY}/images"))
            .and_then(Value::as_array)
        else {
            continue;
        };
        for image in images {
            let mime_type = image
                .get("mime_type")
                .and_then(Value::as_str)
                .unwrap_or("image/png")
                .to_string();
            let Some(data) = image.get("data").and_then(Value::as_str) else {
                continue;
            };
            let name = format!(
                "generated-image-{}.{}",
                files.len() + 1,
                extension_for(&mime_type)
            );
            files.push(GeneratedFile {
                name,
                mime_type,
                data: data.to_string(),
            });
        }
    }
    files
}

/// Output files from code-execution style tools
/// (`_full_result.output_files` entries with explicit names).
pub fn extract_code_output_files_from_tool_results(full: &[Value]) -> Vec<GeneratedFile> {
    let mut files = Vec::new();
    for result in full {
        let Some(outputs) = result
            .pointer(&format!("/{FULL_RESULT_KEY}/output_files"))
            .and_then(Value::as_array)
        else {
            continue;
        };
        for output in outputs {
            let (Some(name), Some(data)) = (
                output.get("name").and_then(Value::as_str),
                output.get("data").and_then(Value::as_str),
            ) else {
                continue;
            };
            files.push(GeneratedFile {
                name: name.to_string(),
                mime_type: output
                    .get("mime_type")
                    .and_then(Value::as_str)
                    .unwrap_or("application/octet-stream")
                    .to_string(),
                data: data.to_string(),
            });
        }
    }
    files
}

/// Humanized age of a message for the history prelude.
pub fn relative_time(created_at: chrono::NaiveDateTime, now: chrono::NaiveDateTime) -> String {
    let delta = now.signed_duration_since(created_at);
    let minutes = delta.num_minutes();
    if minutes < 1 {
        "just now".to_string()
    } else if minutes < 60 {
        format!("{minutes} minutes ago")
    } else if delta.num_hours() < 24 {
        format!("{} hours ago", delta.num_hours())
    } else {
        format!("{} days ago", delta.num_days())
    }
}

/// Gap hint when the previous message is old enough that the model should
/// treat this as a new session.
pub fn session_gap(
    previous: chrono::NaiveDateTime,
    current: chrono::NaiveDateTime,
) -> Option<String> {
    let hours = current.signed_duration_since(previous).num_hours();
    if hours >= 4 {
        Some(format!("{hours} hours since previous message"))
    } else {
        None
    }
}

/// Minimum content length before language detection is attempted.
const LANGUAGE_MIN_CHARS: usize = 20;

/// Detects the response language; short or ambiguous content yields None.
pub fn detect_response_language(content: &str) -> Option<String> {
    let trimmed = content.trim();
    if trimmed.chars().count() < LANGUAGE_MIN_CHARS {
        return None;
    }
    let info = whatlang::detect(trimmed)?;
    if !info.is_reliable() {
        return None;
    }
    Some(info.lang().code().to_string())
}

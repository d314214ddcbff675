//! Web tools: search and URL fetch.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::AgentError;
use crate::scope::RequestScope;

use super::{Tool, ToolSpec, TOOL_FETCH_URL, TOOL_WEB_SEARCH};

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);
/// Fetched pages are truncated to keep tool results inside context limits.
const MAX_FETCH_CHARS: usize = 20_000;
const MAX_SEARCH_RESULTS: usize = 8;

fn default_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(FETCH_TIMEOUT)
        .user_agent("skein/0.1")
        .build()
        .unwrap_or_default()
}

/// Web search over the DuckDuckGo instant-answer API. Results carry
/// `(title, href)` pairs the citation fallback can read.
pub struct WebSearchTool {
    client: reqwest::Client,
    endpoint: String,
}

impl WebSearchTool {
    pub fn new() -> Self {
        Self {
            client: default_client(),
            endpoint: "https://api.duckduckgo.com".into(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

impl Default for WebSearchTool {
    fn default() -> Self {
        Self::new()
    }
}

/// Flattens the instant-answer payload into `{title, href, snippet}` rows.
fn parse_search_results(payload: &Value) -> Vec<Value> {
    let mut results = Vec::new();
    if let Some(abstract_text) = payload.get("AbstractText").and_then(Value::as_str) {
        if !abstract_text.is_empty() {
            results.push(json!({
                "title": payload.get("Heading").and_then(Value::as_str).unwrap_or(""),
                "href": payload.get("AbstractURL").and_then(Value::as_str).unwrap_or(""),
                "snippet": abstract_text,
            }));
        }
    }
    let topics = payload
        .get("RelatedTopics")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    for topic in topics {
        if let (Some(text), Some(url)) = (
            topic.get("Text").and_then(Value::as_str),
            topic.get("FirstURL").and_then(Value::as_str),
        ) {
            results.push(json!({
                "title": text.split(" - ").next().unwrap_or(text),
                "href": url,
                "snippet": text,
            }));
        }
        if results.len() >= MAX_SEARCH_RESULTS {
            break;
        }
    }
    results.truncate(MAX_SEARCH_RESULTS);
    results
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        TOOL_WEB_SEARCH
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: TOOL_WEB_SEARCH.into(),
            description: "Search the web. Returns result titles, URLs, and snippets. \
                          After using results in your answer, call cite_sources."
                .into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "Search query"}
                },
                "required": ["query"]
            }),
        }
    }

    async fn call(&self, args: Value, _scope: &RequestScope) -> Result<Value, AgentError> {
        let query = args
            .get("query")
            .and_then(Value::as_str)
            .filter(|q| !q.trim().is_empty())
            .ok_or_else(|| AgentError::Validation("web_search requires a query".into()))?;

        let response = self
            .client
            .get(format!("{}/", self.endpoint))
            .query(&[("q", query), ("format", "json"), ("no_html", "1")])
            .send()
            .await
            .map_err(|e| AgentError::Tool(format!("web search failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(AgentError::Tool(format!("web search failed: {status}")));
        }
        let payload: Value = response
            .json()
            .await
            .map_err(|e| AgentError::Tool(format!("web search returned invalid json: {e}")))?;

        Ok(json!({"query": query, "results": parse_search_results(&payload)}))
    }
}

/// Fetches one URL and returns its (truncated) text content.
pub struct FetchUrlTool {
    client: reqwest::Client,
}

impl FetchUrlTool {
    pub fn new() -> Self {
        Self {
            client: default_client(),
        }
    }
}

impl Default for FetchUrlTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for FetchUrlTool {
    fn name(&self) -> &str {
        TOOL_FETCH_URL
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: TOOL_FETCH_URL.into(),
            description: "Fetch the content of a URL (HTML is returned as text, truncated)."
                .into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "url": {"type": "string", "description": "Absolute http(s) URL"}
                },
                "required": ["url"]
            }),
        }
    }

    async fn call(&self, args: Value, _scope: &RequestScope) -> Result<Value, AgentError> {
        let url = args
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| AgentError::Validation("fetch_url requires a url".into()))?;
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(AgentError::Validation(format!(
                "fetch_url only supports http(s) URLs, got: {url}"
            )));
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AgentError::Tool(format!("fetch failed: {e}")))?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let body = response
            .text()
            .await
            .map_err(|e| AgentError::Tool(format!("fetch body failed: {e}")))?;
        let truncated = body.chars().count() > MAX_FETCH_CHARS;
        let content: String = body.chars().take(MAX_FETCH_CHARS).collect();

        Ok(json!({
            "url": url,
            "status": status,
            "content_type": content_type,
            "truncated": truncated,
            "content": content,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_search_results_reads_abstract_and_topics() {
        let payload = json!({
            "Heading": "Prague",
            "AbstractText": "Prague is the capital of Czechia.",
            "AbstractURL": "https://en.wikipedia.org/wiki/Prague",
            "RelatedTopics": [
                {"Text": "Prague Castle - a castle complex", "FirstURL": "https://example.com/castle"},
                {"Name": "category without text"}
            ]
        });
        let results = parse_search_results(&payload);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0]["href"], "https://en.wikipedia.org/wiki/Prague");
        assert_eq!(results[1]["title"], "Prague Castle");
    }

    #[tokio::test]
    async fn web_search_rejects_empty_query() {
        let tool = WebSearchTool::new();
        let err = tool
            .call(json!({"query": "  "}), &RequestScope::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Validation(_)));
    }

    #[tokio::test]
    async fn fetch_url_rejects_non_http_schemes() {
        let tool = FetchUrlTool::new();
        let err = tool
            .call(json!({"url": "file:///etc/passwd"}), &RequestScope::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Validation(_)));
    }
}

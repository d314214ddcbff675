//! Conversation title generation from the first turn.

use std::sync::Arc;

use crate::llm::LlmClient;
use crate::message::Message;

/// Title for a brand-new conversation, via the cheap assist model.
/// Falls back to a truncated user message on any model error.
pub async fn generate_title(
    llm: Arc<dyn LlmClient>,
    user_message: &str,
    assistant_response: &str,
    context_max: usize,
    title_max: usize,
) -> String {
    let user_excerpt: String = user_message.chars().take(context_max).collect();
    let assistant_excerpt: String = assistant_response.chars().take(context_max).collect();
    let prompt = format!(
        "Generate a very short, concise title (3-6 words max) for this \
         conversation. Capture the main topic or intent. Do NOT use quotes \
         and do NOT include prefixes like \"Title:\". Output the title text \
         only.\n\nUser: {user_excerpt}\nAssistant: {assistant_excerpt}\n\nTitle:"
    );

    let fallback = || {
        let mut short: String = user_message.chars().take(title_max).collect();
        if user_message.chars().count() > title_max {
            short.push_str("...");
        }
        short
    };

    match llm.invoke(&[Message::user(prompt)], &[]).await {
        Ok(response) => {
            let mut title = response.content.trim().trim_matches(['"', '\'']).to_string();
            if title.is_char_boundary(6) && title.len() >= 6 && title[..6].eq_ignore_ascii_case("title:")
            {
                title = title[6..].trim().to_string();
            }
            if title.chars().count() > title_max {
                title = title.chars().take(title_max.saturating_sub(3)).collect();
                title.push_str("...");
            }
            if title.is_empty() {
                fallback()
            } else {
                title
            }
        }
        Err(error) => {
            tracing::warn!(%error, "title generation failed, using fallback");
            fallback()
        }
    }
}

//! Conversation compaction for long-running agents.
//!
//! When an agent's conversation grows past the threshold, everything but
//! the most recent messages is replaced with one LLM-written summary. The
//! summary is labeled as compacted history so the model treats it as
//! context, not a replayable action log.

use std::sync::Arc;

use crate::db::models::{Agent, MessageRole, StoredMessage};
use crate::db::Database;
use crate::error::AgentError;
use crate::llm::LlmClient;
use crate::message::Message;

/// Prefix that marks the synthetic summary message.
pub const COMPACTED_HISTORY_LABEL: &str = "[Compacted history]";

const SUMMARY_FALLBACK: &str =
    "Previous conversation history has been compacted due to length.";

pub async fn needs_compaction(
    db: &Database,
    agent: &Agent,
    threshold: usize,
) -> Result<bool, AgentError> {
    Ok(db.message_count(&agent.conversation_id).await? > threshold)
}

fn summary_prompt(agent: &Agent, messages: &[StoredMessage]) -> String {
    let mut conversation_text = String::new();
    for message in messages {
        let speaker = match message.role {
            MessageRole::Assistant => "Agent",
            _ => "Trigger",
        };
        let excerpt: String = message.content.chars().take(500).collect();
        conversation_text.push_str(&format!("{speaker}: {excerpt}...\n\n"));
    }
    format!(
        "Summarize this autonomous agent conversation history concisely.\n\
         Focus on:\n\
         1. Key actions taken by the agent\n\
         2. Important information discovered\n\
         3. Ongoing tasks or goals\n\
         4. Any errors or issues encountered\n\n\
         Keep the summary under 500 words. Write in past tense.\n\n\
         Agent: {}\nDescription: {}\n\nConversation:\n{}\n\nSummary:",
        agent.name,
        agent.description.as_deref().unwrap_or("N/A"),
        conversation_text
    )
}

/// LLM summary of the messages to drop; any model error degrades to a
/// fixed placeholder rather than blocking the run.
pub async fn generate_summary(
    llm: Arc<dyn LlmClient>,
    agent: &Agent,
    messages: &[StoredMessage],
) -> String {
    match llm
        .invoke(&[Message::user(summary_prompt(agent, messages))], &[])
        .await
    {
        Ok(response) if !response.content.trim().is_empty() => {
            response.content.trim().to_string()
        }
        Ok(_) => SUMMARY_FALLBACK.to_string(),
        Err(error) => {
            tracing::error!(agent_id = %agent.id, %error, "failed to generate summary");
            SUMMARY_FALLBACK.to_string()
        }
    }
}

/// Compacts when needed. Returns true when messages were replaced.
pub async fn compact_conversation(
    db: &Database,
    llm: Arc<dyn LlmClient>,
    agent: &Agent,
    threshold: usize,
    keep_recent: usize,
) -> Result<bool, AgentError> {
    if !needs_compaction(db, agent, threshold).await? {
        return Ok(false);
    }
    tracing::info!(agent_id = %agent.id, agent_name = %agent.name, "starting compaction");

    let messages = db.get_messages(&agent.conversation_id).await?;
    if messages.len() <= keep_recent {
        return Ok(false);
    }
    let to_summarize = &messages[..messages.len() - keep_recent];
    let summary = generate_summary(llm, agent, to_summarize).await;
    let labeled = format!("{COMPACTED_HISTORY_LABEL}\n{summary}");

    let deleted = db
        .compact_agent_conversation(&agent.conversation_id, &labeled, keep_recent)
        .await?;
    tracing::info!(
        agent_id = %agent.id,
        messages_deleted = deleted,
        summary_length = summary.len(),
        "compaction completed"
    );
    Ok(deleted > 0)
}

//! Cost rows and the user memory store.

use chrono::NaiveDateTime;
use rusqlite::{params, OptionalExtension, Row};

use crate::error::AgentError;

use super::models::MemoryEntry;
use super::{fmt_ts, new_id, now_utc, parse_ts, Database};

fn row_to_memory(row: &Row<'_>) -> Result<MemoryEntry, rusqlite::Error> {
    Ok(MemoryEntry {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        content: row.get("content")?,
        category: row.get("category")?,
        created_at: parse_ts(&row.get::<_, String>("created_at")?),
        updated_at: parse_ts(&row.get::<_, String>("updated_at")?),
    })
}

impl Database {
    // Costs (append-only)

    #[allow(clippy::too_many_arguments)]
    pub async fn save_message_cost(
        &self,
        message_id: &str,
        conversation_id: &str,
        user_id: &str,
        model: &str,
        input_tokens: u32,
        output_tokens: u32,
        cost_usd: f64,
        image_cost_usd: Option<f64>,
    ) -> Result<(), AgentError> {
        let message_id = message_id.to_string();
        let conversation_id = conversation_id.to_string();
        let user_id = user_id.to_string();
        let model = model.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                r#"
                INSERT INTO message_costs
                (id, message_id, conversation_id, user_id, model, input_tokens, output_tokens,
                 cost_usd, image_cost_usd, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                "#,
                params![
                    new_id(),
                    message_id,
                    conversation_id,
                    user_id,
                    model,
                    input_tokens,
                    output_tokens,
                    cost_usd,
                    image_cost_usd,
                    fmt_ts(now_utc()),
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// Lifetime USD total for one conversation (survives deletes).
    pub async fn conversation_cost_total(
        &self,
        conversation_id: &str,
    ) -> Result<f64, AgentError> {
        let conversation_id = conversation_id.to_string();
        self.with_conn(move |conn| {
            let total: Option<f64> = conn
                .query_row(
                    "SELECT SUM(cost_usd + COALESCE(image_cost_usd, 0)) \
                     FROM message_costs WHERE conversation_id = ?1",
                    params![conversation_id],
                    |row| row.get(0),
                )
                .optional()?
                .flatten();
            Ok(total.unwrap_or(0.0))
        })
        .await
    }

    /// USD spent in one conversation since `since` (the agent budget window).
    pub async fn conversation_cost_since(
        &self,
        conversation_id: &str,
        since: NaiveDateTime,
    ) -> Result<f64, AgentError> {
        let conversation_id = conversation_id.to_string();
        self.with_conn(move |conn| {
            let total: Option<f64> = conn
                .query_row(
                    "SELECT SUM(cost_usd + COALESCE(image_cost_usd, 0)) \
                     FROM message_costs WHERE conversation_id = ?1 AND created_at >= ?2",
                    params![conversation_id, fmt_ts(since)],
                    |row| row.get(0),
                )
                .optional()?
                .flatten();
            Ok(total.unwrap_or(0.0))
        })
        .await
    }

    // Memories

    pub async fn add_memory(
        &self,
        user_id: &str,
        content: &str,
        category: Option<&str>,
    ) -> Result<MemoryEntry, AgentError> {
        let user_id = user_id.to_string();
        let content = content.to_string();
        let category = category.map(str::to_string);
        self.with_conn(move |conn| {
            let id = format!("mem-{}", new_id());
            let now = now_utc();
            conn.execute(
                "INSERT INTO memories (id, user_id, content, category, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![id, user_id, content, category, fmt_ts(now), fmt_ts(now)],
            )?;
            Ok(MemoryEntry {
                id,
                user_id,
                content,
                category,
                created_at: now,
                updated_at: now,
            })
        })
        .await
    }

    pub async fn update_memory(
        &self,
        user_id: &str,
        memory_id: &str,
        content: &str,
    ) -> Result<bool, AgentError> {
        let user_id = user_id.to_string();
        let memory_id = memory_id.to_string();
        let content = content.to_string();
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE memories SET content = ?1, updated_at = ?2 \
                 WHERE id = ?3 AND user_id = ?4",
                params![content, fmt_ts(now_utc()), memory_id, user_id],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    pub async fn delete_memory(&self, user_id: &str, memory_id: &str) -> Result<bool, AgentError> {
        let user_id = user_id.to_string();
        let memory_id = memory_id.to_string();
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "DELETE FROM memories WHERE id = ?1 AND user_id = ?2",
                params![memory_id, user_id],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    pub async fn list_memories(&self, user_id: &str) -> Result<Vec<MemoryEntry>, AgentError> {
        let user_id = user_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM memories WHERE user_id = ?1 ORDER BY created_at",
            )?;
            let rows = stmt.query_map(params![user_id], row_to_memory)?;
            let mut memories = Vec::new();
            for row in rows {
                memories.push(row?);
            }
            Ok(memories)
        })
        .await
    }
}

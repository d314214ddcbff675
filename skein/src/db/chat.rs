//! Users, conversations, messages, and the blob store.

use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::AgentError;

use super::models::{
    Conversation, GeneratedImageMeta, MessageRole, Source, StoredFile, StoredMessage, User,
};
use super::{fmt_ts, new_id, now_utc, parse_ts, Database};

/// Fields for one message insert.
#[derive(Clone, Debug)]
pub struct NewMessage {
    pub conversation_id: String,
    pub role: MessageRole,
    pub content: String,
    pub files: Vec<StoredFile>,
    pub sources: Option<Vec<Source>>,
    pub generated_images: Option<Vec<GeneratedImageMeta>>,
    pub language: Option<String>,
}

impl NewMessage {
    pub fn new(
        conversation_id: impl Into<String>,
        role: MessageRole,
        content: impl Into<String>,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            role,
            content: content.into(),
            files: Vec::new(),
            sources: None,
            generated_images: None,
            language: None,
        }
    }
}

fn row_to_user(row: &Row<'_>) -> Result<User, rusqlite::Error> {
    Ok(User {
        id: row.get("id")?,
        email: row.get("email")?,
        name: row.get("name")?,
        picture: row.get("picture")?,
        custom_instructions: row.get("custom_instructions")?,
        created_at: parse_ts(&row.get::<_, String>("created_at")?),
    })
}

fn row_to_conversation(row: &Row<'_>) -> Result<Conversation, rusqlite::Error> {
    Ok(Conversation {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        title: row.get("title")?,
        model: row.get("model")?,
        is_planning: row.get::<_, i64>("is_planning")? != 0,
        is_agent: row.get::<_, i64>("is_agent")? != 0,
        created_at: parse_ts(&row.get::<_, String>("created_at")?),
        updated_at: parse_ts(&row.get::<_, String>("updated_at")?),
    })
}

fn row_to_message(row: &Row<'_>) -> Result<StoredMessage, rusqlite::Error> {
    let role_text: String = row.get("role")?;
    let files_json: Option<String> = row.get("files_json")?;
    let sources_json: Option<String> = row.get("sources_json")?;
    let images_json: Option<String> = row.get("generated_images_json")?;
    Ok(StoredMessage {
        id: row.get("id")?,
        conversation_id: row.get("conversation_id")?,
        role: MessageRole::parse(&role_text).unwrap_or(MessageRole::Assistant),
        content: row.get("content")?,
        created_at: parse_ts(&row.get::<_, String>("created_at")?),
        files: files_json
            .and_then(|j| serde_json::from_str(&j).ok())
            .unwrap_or_default(),
        sources: sources_json.and_then(|j| serde_json::from_str(&j).ok()),
        generated_images: images_json.and_then(|j| serde_json::from_str(&j).ok()),
        language: row.get("language")?,
    })
}

fn insert_message(conn: &Connection, message: &NewMessage) -> Result<StoredMessage, AgentError> {
    let id = new_id();
    let created_at = now_utc();
    let files_json = if message.files.is_empty() {
        None
    } else {
        Some(serde_json::to_string(&message.files)?)
    };
    let sources_json = message
        .sources
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    let images_json = message
        .generated_images
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    conn.execute(
        r#"
        INSERT INTO messages
        (id, conversation_id, role, content, created_at, files_json, sources_json,
         generated_images_json, language)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        "#,
        params![
            id,
            message.conversation_id,
            message.role.as_str(),
            message.content,
            fmt_ts(created_at),
            files_json,
            sources_json,
            images_json,
            message.language,
        ],
    )?;
    // Same transaction scope as the insert: updated_at is never behind a
    // message's created_at.
    conn.execute(
        "UPDATE conversations SET updated_at = ?1 WHERE id = ?2",
        params![fmt_ts(created_at), message.conversation_id],
    )?;

    Ok(StoredMessage {
        id,
        conversation_id: message.conversation_id.clone(),
        role: message.role,
        content: message.content.clone(),
        created_at,
        files: message.files.clone(),
        sources: message.sources.clone(),
        generated_images: message.generated_images.clone(),
        language: message.language.clone(),
    })
}

impl Database {
    // Users

    pub async fn get_or_create_user(
        &self,
        email: &str,
        name: &str,
        picture: Option<&str>,
    ) -> Result<User, AgentError> {
        let email = email.to_string();
        let name = name.to_string();
        let picture = picture.map(str::to_string);
        self.with_conn(move |conn| {
            if let Some(user) = conn
                .query_row("SELECT * FROM users WHERE email = ?1", params![email], row_to_user)
                .optional()?
            {
                return Ok(user);
            }
            let id = new_id();
            let created_at = now_utc();
            conn.execute(
                "INSERT INTO users (id, email, name, picture, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, email, name, picture, fmt_ts(created_at)],
            )?;
            tracing::info!(user_id = %id, %email, "user created");
            Ok(User {
                id,
                email,
                name,
                picture,
                custom_instructions: None,
                created_at,
            })
        })
        .await
    }

    pub async fn get_user_by_id(&self, user_id: &str) -> Result<Option<User>, AgentError> {
        let user_id = user_id.to_string();
        self.with_conn(move |conn| {
            Ok(conn
                .query_row("SELECT * FROM users WHERE id = ?1", params![user_id], row_to_user)
                .optional()?)
        })
        .await
    }

    pub async fn set_custom_instructions(
        &self,
        user_id: &str,
        instructions: Option<&str>,
    ) -> Result<(), AgentError> {
        let user_id = user_id.to_string();
        let instructions = instructions.map(str::to_string);
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE users SET custom_instructions = ?1 WHERE id = ?2",
                params![instructions, user_id],
            )?;
            Ok(())
        })
        .await
    }

    // Conversations

    pub async fn create_conversation(
        &self,
        user_id: &str,
        title: &str,
        model: &str,
        is_planning: bool,
        is_agent: bool,
    ) -> Result<Conversation, AgentError> {
        if is_planning && is_agent {
            return Err(AgentError::Validation(
                "a conversation cannot be both planning and agent-owned".into(),
            ));
        }
        let user_id = user_id.to_string();
        let title = title.to_string();
        let model = model.to_string();
        self.with_conn(move |conn| {
            let id = new_id();
            let now = now_utc();
            conn.execute(
                r#"
                INSERT INTO conversations
                (id, user_id, title, model, is_planning, is_agent, created_at, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
                params![
                    id,
                    user_id,
                    title,
                    model,
                    is_planning as i64,
                    is_agent as i64,
                    fmt_ts(now),
                    fmt_ts(now),
                ],
            )?;
            Ok(Conversation {
                id,
                user_id,
                title,
                model,
                is_planning,
                is_agent,
                created_at: now,
                updated_at: now,
            })
        })
        .await
    }

    /// Conversation scoped to its owner; `None` when missing or not theirs.
    pub async fn get_conversation(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> Result<Option<Conversation>, AgentError> {
        let conversation_id = conversation_id.to_string();
        let user_id = user_id.to_string();
        self.with_conn(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT * FROM conversations WHERE id = ?1 AND user_id = ?2",
                    params![conversation_id, user_id],
                    row_to_conversation,
                )
                .optional()?)
        })
        .await
    }

    pub async fn update_conversation_title(
        &self,
        conversation_id: &str,
        title: &str,
    ) -> Result<bool, AgentError> {
        let conversation_id = conversation_id.to_string();
        let title = title.to_string();
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE conversations SET title = ?1, updated_at = ?2 WHERE id = ?3",
                params![title, fmt_ts(now_utc()), conversation_id],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    /// Deletes a conversation and its messages. Cost rows are preserved.
    pub async fn delete_conversation(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> Result<bool, AgentError> {
        let conversation_id = conversation_id.to_string();
        let user_id = user_id.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "DELETE FROM messages WHERE conversation_id = ?1",
                params![conversation_id],
            )?;
            let changed = tx.execute(
                "DELETE FROM conversations WHERE id = ?1 AND user_id = ?2",
                params![conversation_id, user_id],
            )?;
            tx.commit()?;
            Ok(changed > 0)
        })
        .await
    }

    // Messages

    pub async fn add_message(&self, message: NewMessage) -> Result<StoredMessage, AgentError> {
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let stored = insert_message(&tx, &message)?;
            tx.commit()?;
            Ok(stored)
        })
        .await
    }

    /// All messages of a conversation, ordered by creation time with id as
    /// tiebreaker.
    pub async fn get_messages(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<StoredMessage>, AgentError> {
        let conversation_id = conversation_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM messages WHERE conversation_id = ?1 ORDER BY created_at, id",
            )?;
            let rows = stmt.query_map(params![conversation_id], row_to_message)?;
            let mut messages = Vec::new();
            for row in rows {
                messages.push(row?);
            }
            Ok(messages)
        })
        .await
    }

    pub async fn get_message_by_id(
        &self,
        message_id: &str,
    ) -> Result<Option<StoredMessage>, AgentError> {
        let message_id = message_id.to_string();
        self.with_conn(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT * FROM messages WHERE id = ?1",
                    params![message_id],
                    row_to_message,
                )
                .optional()?)
        })
        .await
    }

    pub async fn message_count(&self, conversation_id: &str) -> Result<usize, AgentError> {
        let conversation_id = conversation_id.to_string();
        self.with_conn(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
                params![conversation_id],
                |row| row.get(0),
            )?;
            Ok(count as usize)
        })
        .await
    }

    pub async fn last_message(
        &self,
        conversation_id: &str,
    ) -> Result<Option<StoredMessage>, AgentError> {
        let conversation_id = conversation_id.to_string();
        self.with_conn(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT * FROM messages WHERE conversation_id = ?1 \
                     ORDER BY created_at DESC, id DESC LIMIT 1",
                    params![conversation_id],
                    row_to_message,
                )
                .optional()?)
        })
        .await
    }

    pub async fn update_message_content(
        &self,
        message_id: &str,
        content: &str,
    ) -> Result<bool, AgentError> {
        let message_id = message_id.to_string();
        let content = content.to_string();
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE messages SET content = ?1 WHERE id = ?2",
                params![content, message_id],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    /// Finalizes a placeholder in place: content plus everything extracted
    /// at save time.
    pub async fn finalize_message(
        &self,
        message_id: &str,
        content: &str,
        files: &[StoredFile],
        sources: Option<&[Source]>,
        generated_images: Option<&[GeneratedImageMeta]>,
        language: Option<&str>,
    ) -> Result<bool, AgentError> {
        let message_id = message_id.to_string();
        let content = content.to_string();
        let files_json = if files.is_empty() {
            None
        } else {
            Some(serde_json::to_string(files)?)
        };
        let sources_json = sources.map(serde_json::to_string).transpose()?;
        let images_json = generated_images.map(serde_json::to_string).transpose()?;
        let language = language.map(str::to_string);
        self.with_conn(move |conn| {
            let changed = conn.execute(
                r#"
                UPDATE messages
                SET content = ?1, files_json = ?2, sources_json = ?3,
                    generated_images_json = ?4, language = ?5
                WHERE id = ?6
                "#,
                params![content, files_json, sources_json, images_json, language, message_id],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    pub async fn delete_message(&self, message_id: &str) -> Result<bool, AgentError> {
        let message_id = message_id.to_string();
        self.with_conn(move |conn| {
            let changed = conn.execute("DELETE FROM messages WHERE id = ?1", params![message_id])?;
            Ok(changed > 0)
        })
        .await
    }

    // Blob store

    pub async fn put_blob(&self, key: &str, content: Vec<u8>) -> Result<(), AgentError> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO blobs (key, content, created_at) VALUES (?1, ?2, ?3)",
                params![key, content, fmt_ts(now_utc())],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_blob(&self, key: &str) -> Result<Option<Vec<u8>>, AgentError> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT content FROM blobs WHERE key = ?1",
                    params![key],
                    |row| row.get::<_, Vec<u8>>(0),
                )
                .optional()?)
        })
        .await
    }
}

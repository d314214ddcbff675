//! File retrieval: lets the model open a previously uploaded file by the
//! stable id `<message_id>:<file_index>` from the history metadata prelude.

use async_trait::async_trait;
use base64::Engine;
use serde_json::{json, Value};

use crate::db::Database;
use crate::error::AgentError;
use crate::scope::RequestScope;

use super::{Tool, ToolSpec, FULL_RESULT_KEY, TOOL_RETRIEVE_FILE};

pub struct RetrieveFileTool {
    db: Database,
}

impl RetrieveFileTool {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

fn parse_file_id(file_id: &str) -> Result<(String, usize), AgentError> {
    let (message_id, index) = file_id.rsplit_once(':').ok_or_else(|| {
        AgentError::Validation(format!(
            "invalid file id '{file_id}': expected <message_id>:<file_index>"
        ))
    })?;
    let index: usize = index.parse().map_err(|_| {
        AgentError::Validation(format!("invalid file index in '{file_id}'"))
    })?;
    Ok((message_id.to_string(), index))
}

fn is_binary_envelope(mime_type: &str) -> bool {
    mime_type.starts_with("image/") || mime_type == "application/pdf"
}

#[async_trait]
impl Tool for RetrieveFileTool {
    fn name(&self) -> &str {
        TOOL_RETRIEVE_FILE
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: TOOL_RETRIEVE_FILE.into(),
            description: "Retrieve a file attached earlier in this conversation by its id \
                          (message_id:file_index, as listed in message metadata)."
                .into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "file_id": {
                        "type": "string",
                        "description": "File id of the form <message_id>:<file_index>"
                    }
                },
                "required": ["file_id"]
            }),
        }
    }

    async fn call(&self, args: Value, scope: &RequestScope) -> Result<Value, AgentError> {
        let (conversation_id, _user_id) = scope.conversation().ok_or_else(|| {
            AgentError::Validation(
                "retrieve_file requires a conversation context; none is set for this request"
                    .into(),
            )
        })?;

        let file_id = args
            .get("file_id")
            .and_then(Value::as_str)
            .ok_or_else(|| AgentError::Validation("retrieve_file requires a file_id".into()))?;
        let (message_id, index) = parse_file_id(file_id)?;

        let message = self
            .db
            .get_message_by_id(&message_id)
            .await?
            .ok_or_else(|| AgentError::NotFound(format!("message {message_id} not found")))?;
        if message.conversation_id != conversation_id {
            return Err(AgentError::Forbidden(
                "file belongs to a different conversation".into(),
            ));
        }
        let file = message
            .files
            .get(index)
            .ok_or_else(|| AgentError::NotFound(format!("no file at index {index}")))?
            .clone();

        let blob = self
            .db
            .get_blob(&format!("{message_id}:{index}"))
            .await?
            .ok_or_else(|| AgentError::NotFound(format!("file content missing for {file_id}")))?;

        if is_binary_envelope(&file.mime_type) {
            // The model sees only the descriptor; the binary travels via the
            // tool result buffer into the multimodal envelope.
            let data = base64::engine::general_purpose::STANDARD.encode(&blob);
            Ok(json!({
                "file_id": file_id,
                "name": file.name,
                "mime_type": file.mime_type,
                "size": blob.len(),
                FULL_RESULT_KEY: {
                    "file": {"name": file.name, "mime_type": file.mime_type, "data": data}
                },
            }))
        } else {
            let text = String::from_utf8_lossy(&blob).into_owned();
            Ok(json!({
                "file_id": file_id,
                "name": file.name,
                "mime_type": file.mime_type,
                "content": text,
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{MessageRole, StoredFile};
    use crate::db::test_support::{seed_user, temp_db};
    use crate::db::NewMessage;

    async fn seed_message_with_file(
        db: &Database,
        mime_type: &str,
        content: &[u8],
    ) -> (String, String, String) {
        let user = seed_user(db).await;
        let conversation = db
            .create_conversation(&user.id, "t", "m", false, false)
            .await
            .unwrap();
        let mut new_message = NewMessage::new(&conversation.id, MessageRole::User, "with file");
        new_message.files = vec![StoredFile {
            name: "upload.bin".into(),
            mime_type: mime_type.into(),
            size: Some(content.len() as u64),
        }];
        let message = db.add_message(new_message).await.unwrap();
        db.put_blob(&format!("{}:0", message.id), content.to_vec())
            .await
            .unwrap();
        (conversation.id, user.id, message.id)
    }

    #[tokio::test]
    async fn fails_without_conversation_context() {
        let (db, _dir) = temp_db().await;
        let tool = RetrieveFileTool::new(db);
        let err = tool
            .call(json!({"file_id": "m:0"}), &RequestScope::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("conversation context"));
    }

    #[tokio::test]
    async fn text_files_come_back_inline() {
        let (db, _dir) = temp_db().await;
        let (conversation_id, user_id, message_id) =
            seed_message_with_file(&db, "text/plain", b"hello file").await;
        let scope = RequestScope::new();
        scope.set_conversation(Some((conversation_id, user_id)));

        let tool = RetrieveFileTool::new(db);
        let out = tool
            .call(json!({"file_id": format!("{message_id}:0")}), &scope)
            .await
            .unwrap();
        assert_eq!(out["content"], "hello file");
        assert!(out.get(FULL_RESULT_KEY).is_none());
    }

    #[tokio::test]
    async fn binary_files_ride_in_full_result() {
        let (db, _dir) = temp_db().await;
        let original = b"\x89PNG fake bytes".to_vec();
        let (conversation_id, user_id, message_id) =
            seed_message_with_file(&db, "image/png", &original).await;
        let scope = RequestScope::new();
        scope.set_conversation(Some((conversation_id, user_id)));

        let tool = RetrieveFileTool::new(db);
        let out = tool
            .call(json!({"file_id": format!("{message_id}:0")}), &scope)
            .await
            .unwrap();
        let data = out[FULL_RESULT_KEY]["file"]["data"].as_str().unwrap();
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(data)
            .unwrap();
        assert_eq!(decoded, original);
    }

    #[tokio::test]
    async fn cross_conversation_access_is_forbidden() {
        let (db, _dir) = temp_db().await;
        let (_conv, user_id, message_id) =
            seed_message_with_file(&db, "text/plain", b"secret").await;
        let scope = RequestScope::new();
        scope.set_conversation(Some(("another-conversation".into(), user_id)));

        let tool = RetrieveFileTool::new(db);
        let err = tool
            .call(json!({"file_id": format!("{message_id}:0")}), &scope)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Forbidden(_)));
    }
}

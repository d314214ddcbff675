//! Applies `manage_memory` operations to the user's long-term store.

use crate::agent::content::MemoryOperation;
use crate::db::Database;
use crate::error::AgentError;

/// Applies validated operations; individual failures are logged and
/// skipped so one bad id never loses the rest.
pub async fn process_memory_operations(
    db: &Database,
    user_id: &str,
    operations: &[MemoryOperation],
) -> Result<(), AgentError> {
    for op in operations {
        let result = match op.action.as_str() {
            "add" => match &op.content {
                Some(content) => db
                    .add_memory(user_id, content, op.category.as_deref())
                    .await
                    .map(|_| true),
                None => Ok(false),
            },
            "update" => match (&op.id, &op.content) {
                (Some(id), Some(content)) => db.update_memory(user_id, id, content).await,
                _ => Ok(false),
            },
            "delete" => match &op.id {
                Some(id) => db.delete_memory(user_id, id).await,
                None => Ok(false),
            },
            _ => Ok(false),
        };
        match result {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(action = %op.action, id = ?op.id, "memory operation had no effect")
            }
            Err(error) => {
                tracing::error!(action = %op.action, %error, "memory operation failed")
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::{seed_user, temp_db};

    #[tokio::test]
    async fn add_update_delete_round_trip() {
        let (db, _dir) = temp_db().await;
        let user = seed_user(&db).await;

        process_memory_operations(
            &db,
            &user.id,
            &[MemoryOperation {
                action: "add".into(),
                content: Some("drinks espresso".into()),
                category: Some("preference".into()),
                id: None,
            }],
        )
        .await
        .unwrap();
        let memories = db.list_memories(&user.id).await.unwrap();
        assert_eq!(memories.len(), 1);

        let id = memories[0].id.clone();
        process_memory_operations(
            &db,
            &user.id,
            &[
                MemoryOperation {
                    action: "update".into(),
                    content: Some("drinks tea now".into()),
                    category: None,
                    id: Some(id.clone()),
                },
                MemoryOperation {
                    action: "delete".into(),
                    content: None,
                    category: None,
                    id: Some("mem-nonexistent".into()),
                },
            ],
        )
        .await
        .unwrap();
        let memories = db.list_memories(&user.id).await.unwrap();
        assert_eq!(memories[0].content, "drinks tea now");
    }
}

//! Per-thread state checkpointing.
//!
//! Threads are keyed by conversation id and isolated from each other. The
//! in-memory saver covers a single process; persistence across restarts is
//! a different concern (the conversation store is the durable record).

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::AgentError;

/// Saves and loads graph state per thread id.
#[async_trait]
pub trait Checkpointer<S>: Send + Sync {
    async fn put(&self, thread_id: &str, state: &S) -> Result<(), AgentError>;
    async fn get(&self, thread_id: &str) -> Result<Option<S>, AgentError>;
}

/// In-memory checkpointer.
pub struct MemorySaver<S> {
    inner: Mutex<HashMap<String, S>>,
}

impl<S> MemorySaver<S> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }
}

impl<S> Default for MemorySaver<S> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<S> Checkpointer<S> for MemorySaver<S>
where
    S: Clone + Send + Sync + Debug + 'static,
{
    async fn put(&self, thread_id: &str, state: &S) -> Result<(), AgentError> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(thread_id.to_string(), state.clone());
        Ok(())
    }

    async fn get(&self, thread_id: &str) -> Result<Option<S>, AgentError> {
        Ok(self
            .inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(thread_id)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn threads_are_isolated() {
        let saver = MemorySaver::<String>::new();
        saver.put("conv-a", &"state-a".to_string()).await.unwrap();
        saver.put("conv-b", &"state-b".to_string()).await.unwrap();
        assert_eq!(
            saver.get("conv-a").await.unwrap(),
            Some("state-a".to_string())
        );
        assert_eq!(
            saver.get("conv-b").await.unwrap(),
            Some("state-b".to_string())
        );
        assert_eq!(saver.get("conv-c").await.unwrap(), None);
    }
}

//! Tool result side channel.
//!
//! The tools node strips `_full_result` before messages reach the model,
//! but the server needs the originals (inline image display, file
//! materialization). This buffer keeps them, keyed by request id, until
//! the save path drains them with pop semantics. A janitor task bounds
//! growth when `take` is missed (client disconnect, error path).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::Value;

struct Entry {
    created_at: Instant,
    results: Vec<Value>,
}

/// Process-wide map `request_id → ordered full tool results`.
#[derive(Clone)]
pub struct ToolResultBuffer {
    inner: Arc<Mutex<HashMap<String, Entry>>>,
    ttl: Duration,
}

impl ToolResultBuffer {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            ttl,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Appends one full result for the request, creating the entry if absent.
    pub fn store(&self, request_id: &str, content: Value) {
        let mut map = self.lock();
        map.entry(request_id.to_string())
            .or_insert_with(|| Entry {
                created_at: Instant::now(),
                results: Vec::new(),
            })
            .results
            .push(content);
    }

    /// Atomically removes and returns the ordered results for the request.
    /// Exactly one reader gets the list; later calls return empty.
    pub fn take(&self, request_id: &str) -> Vec<Value> {
        self.lock()
            .remove(request_id)
            .map(|e| e.results)
            .unwrap_or_default()
    }

    /// Removes entries older than the TTL; returns how many were dropped.
    /// This is the janitor's whole job, factored out so tests can drive it.
    pub fn sweep(&self) -> usize {
        let ttl = self.ttl;
        let mut map = self.lock();
        let before = map.len();
        map.retain(|_, entry| entry.created_at.elapsed() < ttl);
        before - map.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Starts the long-running janitor: wakes every `interval` and sweeps.
    /// Started lazily on the first request; stops when the runtime does.
    pub fn spawn_janitor(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let buffer = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick fires immediately; skip it so a fresh entry is
            // never swept in the same instant it was created.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = buffer.sweep();
                if removed > 0 {
                    tracing::info!(removed, "tool result buffer janitor swept stale entries");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn take_returns_stored_results_in_order_then_empty() {
        let buffer = ToolResultBuffer::new(Duration::from_secs(60));
        buffer.store("req-1", json!({"n": 1}));
        buffer.store("req-1", json!({"n": 2}));
        buffer.store("req-2", json!({"n": 3}));

        let taken = buffer.take("req-1");
        assert_eq!(taken, vec![json!({"n": 1}), json!({"n": 2})]);
        assert!(buffer.take("req-1").is_empty());
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn take_of_unknown_request_is_empty() {
        let buffer = ToolResultBuffer::new(Duration::from_secs(60));
        assert!(buffer.take("missing").is_empty());
    }

    #[test]
    fn sweep_removes_only_expired_entries() {
        let buffer = ToolResultBuffer::new(Duration::from_millis(0));
        buffer.store("old", json!({}));
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(buffer.sweep(), 1);
        assert!(buffer.is_empty());

        let buffer = ToolResultBuffer::new(Duration::from_secs(60));
        buffer.store("fresh", json!({}));
        assert_eq!(buffer.sweep(), 0);
        assert_eq!(buffer.len(), 1);
    }

    #[tokio::test]
    async fn janitor_sweeps_in_background() {
        let buffer = ToolResultBuffer::new(Duration::from_millis(10));
        buffer.store("req", json!({}));
        let handle = buffer.spawn_janitor(Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(buffer.is_empty());
        handle.abort();
    }
}

//! Run-scoped context handed to every node.

use tokio::sync::mpsc;

use crate::scope::RequestScope;
use crate::stream::StreamEvent;

/// Context for one graph run: optional stream channel, the ambient request
/// scope, and an optional checkpoint thread id (the conversation id).
#[derive(Clone, Debug, Default)]
pub struct RunContext {
    /// When set, nodes push incremental events here. Senders must ignore
    /// send failures: a gone receiver never aborts the run.
    pub stream_tx: Option<mpsc::Sender<StreamEvent>>,
    pub scope: RequestScope,
    pub thread_id: Option<String>,
}

impl RunContext {
    pub fn new(scope: RequestScope) -> Self {
        Self {
            stream_tx: None,
            scope,
            thread_id: None,
        }
    }

    pub fn with_stream(mut self, tx: mpsc::Sender<StreamEvent>) -> Self {
        self.stream_tx = Some(tx);
        self
    }

    pub fn with_thread_id(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    /// Sends one event if streaming is enabled, ignoring channel errors.
    pub async fn emit(&self, event: StreamEvent) {
        if let Some(tx) = &self.stream_tx {
            let _ = tx.send(event).await;
        }
    }
}

//! Per-request ambient state, as an explicit handle.
//!
//! Instead of thread-locals, a [`RequestScope`] is a cheap `Clone` over
//! shared slots. Spawned tasks receive a clone at spawn time (snapshot of
//! the handle), so context survives pool hops without relying on
//! parent-thread inheritance. Tools that need context read the scope they
//! were handed and fail with a clear error when a slot is unset.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db::models::{Agent, User};

/// A file attached to the current user message (binary as base64).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FileAttachment {
    pub name: String,
    pub mime_type: String,
    pub data: String,
}

/// Identity of the running autonomous agent plus the trigger chain that
/// led here. The chain (ordered agent ids, self included) is the basis for
/// circular-trigger detection.
#[derive(Clone, Debug)]
pub struct AgentContext {
    pub agent: Agent,
    pub user: User,
    pub trigger_chain: Vec<String>,
}

#[derive(Debug, Default)]
struct Slots {
    request_id: Option<String>,
    /// `(conversation_id, user_id)`.
    conversation: Option<(String, String)>,
    files: Vec<FileAttachment>,
    agent: Option<AgentContext>,
    /// Planner dashboard snapshot; `refresh_planner_dashboard` overwrites
    /// it mid-conversation so the next turn's system prompt sees fresh data.
    planner_dashboard: Option<Value>,
}

/// Handle to the ambient per-request slots. Clones share the same slots.
#[derive(Clone, Debug, Default)]
pub struct RequestScope {
    inner: Arc<Mutex<Slots>>,
}

impl RequestScope {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Slots> {
        // Slots hold plain data; a poisoned lock only means a panicked
        // writer, and the data is still the latest consistent snapshot.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_request_id(&self, id: Option<String>) {
        self.lock().request_id = id;
    }

    pub fn request_id(&self) -> Option<String> {
        self.lock().request_id.clone()
    }

    pub fn set_conversation(&self, conversation_id: Option<(String, String)>) {
        self.lock().conversation = conversation_id;
    }

    /// `(conversation_id, user_id)` of the current request.
    pub fn conversation(&self) -> Option<(String, String)> {
        self.lock().conversation.clone()
    }

    pub fn set_files(&self, files: Vec<FileAttachment>) {
        self.lock().files = files;
    }

    pub fn files(&self) -> Vec<FileAttachment> {
        self.lock().files.clone()
    }

    pub fn set_agent_context(&self, ctx: Option<AgentContext>) {
        self.lock().agent = ctx;
    }

    pub fn agent_context(&self) -> Option<AgentContext> {
        self.lock().agent.clone()
    }

    /// Trigger chain of the current autonomous run; empty outside one.
    pub fn trigger_chain(&self) -> Vec<String> {
        self.lock()
            .agent
            .as_ref()
            .map(|a| a.trigger_chain.clone())
            .unwrap_or_default()
    }

    pub fn set_planner_dashboard(&self, dashboard: Option<Value>) {
        self.lock().planner_dashboard = dashboard;
    }

    pub fn planner_dashboard(&self) -> Option<Value> {
        self.lock().planner_dashboard.clone()
    }

    /// Clears every slot. Called on every exit path of a request.
    pub fn clear_all(&self) {
        *self.lock() = Slots::default();
    }
}

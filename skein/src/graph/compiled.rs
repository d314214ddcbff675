//! Executable graph produced by `StateGraph::compile`.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use crate::error::AgentError;

use super::checkpoint::Checkpointer;
use super::next::Next;
use super::node::Node;
use super::run_context::RunContext;
use super::state_graph::{ConditionalRouterFn, END};

/// Conditional router: path function plus optional key → node map.
pub struct Router<S> {
    pub path: ConditionalRouterFn<S>,
    pub path_map: Option<HashMap<String, String>>,
}

impl<S> Router<S> {
    fn resolve(&self, key: String) -> String {
        match &self.path_map {
            Some(map) => map.get(&key).cloned().unwrap_or(key),
            None => key,
        }
    }
}

/// Outgoing routing for one node.
pub enum NextEntry<S> {
    Unconditional(String),
    Conditional(Router<S>),
}

/// Immutable, runnable graph.
pub struct CompiledStateGraph<S> {
    nodes: HashMap<String, Arc<dyn Node<S>>>,
    first_node_id: String,
    next_map: HashMap<String, NextEntry<S>>,
    recursion_limit: u32,
    checkpointer: Option<Arc<dyn Checkpointer<S>>>,
}

impl<S> CompiledStateGraph<S>
where
    S: Clone + Send + Sync + Debug + 'static,
{
    pub(super) fn new(
        nodes: HashMap<String, Arc<dyn Node<S>>>,
        first_node_id: String,
        next_map: HashMap<String, NextEntry<S>>,
        recursion_limit: u32,
        checkpointer: Option<Arc<dyn Checkpointer<S>>>,
    ) -> Self {
        Self {
            nodes,
            first_node_id,
            next_map,
            recursion_limit,
            checkpointer,
        }
    }

    /// Runs the graph to END with a default context.
    pub async fn invoke(&self, state: S) -> Result<S, AgentError> {
        self.invoke_with_context(state, &RunContext::default()).await
    }

    /// Runs the graph to END. Node visits beyond the recursion limit are a
    /// fatal error for the request. When a checkpointer and thread id are
    /// both present, the final state is saved after the run.
    pub async fn invoke_with_context(
        &self,
        mut state: S,
        ctx: &RunContext,
    ) -> Result<S, AgentError> {
        let mut current = self.first_node_id.clone();
        let mut visits: u32 = 0;

        loop {
            visits += 1;
            if visits > self.recursion_limit {
                return Err(AgentError::RecursionLimit {
                    limit: self.recursion_limit,
                });
            }
            let node = self
                .nodes
                .get(&current)
                .ok_or_else(|| AgentError::Compile(format!("unknown node: {current}")))?;
            tracing::debug!(node = %current, visit = visits, "graph node start");
            let (next_state, next) = node.run_with_context(state, ctx).await?;
            state = next_state;
            tracing::debug!(node = %current, "graph node complete");

            current = match next {
                Next::End => break,
                Next::Node(id) => id,
                Next::Continue => match self.next_map.get(&current) {
                    None => break,
                    Some(NextEntry::Unconditional(to)) => {
                        if to == END {
                            break;
                        }
                        to.clone()
                    }
                    Some(NextEntry::Conditional(router)) => {
                        let target = router.resolve((router.path)(&state));
                        if target == END {
                            break;
                        }
                        target
                    }
                },
            };
        }

        if let (Some(checkpointer), Some(thread_id)) = (&self.checkpointer, &ctx.thread_id) {
            checkpointer.put(thread_id, &state).await?;
        }
        Ok(state)
    }

    /// Latest checkpointed state for a thread, when checkpointing is on.
    pub async fn checkpointed_state(&self, thread_id: &str) -> Result<Option<S>, AgentError> {
        match &self.checkpointer {
            Some(checkpointer) => checkpointer.get(thread_id).await,
            None => Ok(None),
        }
    }
}

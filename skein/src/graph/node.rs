//! Graph node trait: one step in a StateGraph.
//!
//! Receives state `S`, returns updated `S` and `Next` (continue, jump, or
//! end). Nodes that stream or need ambient request context implement
//! `run_with_context`; the default forwards to `run`.

use std::fmt::Debug;

use async_trait::async_trait;

use crate::error::AgentError;

use super::{Next, RunContext};

/// One step in a graph: state in, (state out, next step).
#[async_trait]
pub trait Node<S>: Send + Sync
where
    S: Clone + Send + Sync + Debug + 'static,
{
    /// Node id (e.g. `"chat"`, `"tools"`). Unique within a graph.
    fn id(&self) -> &str;

    async fn run(&self, state: S) -> Result<(S, Next), AgentError>;

    /// Variant with run context (stream channel, request scope).
    async fn run_with_context(
        &self,
        state: S,
        _ctx: &RunContext,
    ) -> Result<(S, Next), AgentError> {
        self.run(state).await
    }
}

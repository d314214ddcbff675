//! Errors raised while compiling a StateGraph.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CompilationError {
    #[error("edge references unknown node: {0}")]
    NodeNotFound(String),

    #[error("no edge from START")]
    MissingStart,

    #[error("no path reaches END")]
    MissingEnd,

    #[error("conditional path map references unknown node: {0}")]
    InvalidConditionalPathMap(String),

    #[error("node has both an outgoing edge and conditional edges: {0}")]
    NodeHasBothEdgeAndConditional(String),

    #[error("invalid chain: {0}")]
    InvalidChain(String),
}

impl From<CompilationError> for crate::error::AgentError {
    fn from(e: CompilationError) -> Self {
        crate::error::AgentError::Compile(e.to_string())
    }
}

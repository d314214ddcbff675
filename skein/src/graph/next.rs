//! Routing decision returned by each node.

/// What the runner does after a node completes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Next {
    /// Follow the graph's edges (unconditional or conditional).
    Continue,
    /// Jump directly to the named node, ignoring edges.
    Node(String),
    /// Stop the run.
    End,
}

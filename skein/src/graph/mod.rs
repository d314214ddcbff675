//! State graph: nodes + explicit edges, compile and invoke.
//!
//! Add nodes with `add_node`, define the chain with `add_edge(from, to)`
//! using `START` and `END`, route on state with `add_conditional_edges`,
//! then `compile()` (or `compile_with_checkpointer`) into a
//! `CompiledStateGraph` and `invoke` it. Node visits are capped by the
//! graph's recursion limit, separate from tool-failure budgeting.

mod checkpoint;
mod compile_error;
mod compiled;
mod next;
mod node;
mod run_context;
mod state_graph;

pub use checkpoint::{Checkpointer, MemorySaver};
pub use compile_error::CompilationError;
pub use compiled::CompiledStateGraph;
pub use next::Next;
pub use node::Node;
pub use run_context::RunContext;
pub use state_graph::{ConditionalRouterFn, StateGraph, END, START};

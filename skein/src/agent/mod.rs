//! Interactive chat agent: graph nodes, facade, content helpers.
//!
//! # Main types
//!
//! - [`ChatAgent`]: facade over the compiled graph — batch, token stream,
//!   event stream.
//! - [`PlanNode`] / [`ChatNode`] / [`ToolsNode`] / [`CheckToolResultsNode`]:
//!   the four graph nodes.
//! - [`create_chat_graph`]: wires nodes and edges, including the
//!   metadata-only termination route.
//! - [`content`]: metadata prelude, `_full_result` stripping, save-time
//!   extraction, language detection.

pub mod content;
pub mod prompts;

mod chat_agent;
mod chat_node;
mod check_node;
mod graph;
mod plan_node;
mod title;
mod tools_node;

pub use chat_agent::{
    history_from_stored, ChatAgent, ChatAgentConfig, ChatRequest, FinalPayload, HistoryMessage,
};
pub use chat_node::ChatNode;
pub use check_node::CheckToolResultsNode;
pub use graph::{create_chat_graph, route_after_chat, ChatGraphConfig};
pub use plan_node::PlanNode;
pub use title::generate_title;
pub use tools_node::ToolsNode;

//! Chat graph construction: plan → chat ⇄ (tools → check_tool_results).

use std::collections::HashMap;
use std::sync::Arc;

use crate::graph::{CompilationError, CompiledStateGraph, StateGraph, END, START};
use crate::llm::LlmClient;
use crate::retry::RetryConfig;
use crate::state::ChatState;
use crate::tool_buffer::ToolResultBuffer;
use crate::tools::{is_metadata_tool, ToolSet};

use super::chat_node::ChatNode;
use super::check_node::CheckToolResultsNode;
use super::plan_node::PlanNode;
use super::tools_node::ToolsNode;

/// Knobs for one graph build.
#[derive(Clone, Debug)]
pub struct ChatGraphConfig {
    pub planning_enabled: bool,
    pub planning_min_length: usize,
    pub max_tool_retries: u32,
    pub recursion_limit: u32,
    pub retry: RetryConfig,
}

impl Default for ChatGraphConfig {
    fn default() -> Self {
        Self {
            planning_enabled: true,
            planning_min_length: 120,
            max_tool_retries: 2,
            recursion_limit: 25,
            retry: RetryConfig::default(),
        }
    }
}

/// Routing after chat: a turn whose tool calls are all metadata sinks is
/// terminal; their "answer" is the structured argument, not another model
/// turn.
pub fn route_after_chat(state: &ChatState) -> String {
    let calls = state.last_tool_calls();
    if calls.is_empty() || calls.iter().all(|c| is_metadata_tool(&c.name)) {
        END.to_string()
    } else {
        "tools".to_string()
    }
}

/// Builds and compiles the chat graph.
///
/// `llm` is the main chat model (already bound to this request's tool
/// specs via `tools`); `assist_llm` is the cheap model used by the plan
/// classifier/outliner. With a checkpointer, final state is saved per
/// thread (the conversation id on the run context); threads are isolated.
pub fn create_chat_graph(
    llm: Arc<dyn LlmClient>,
    assist_llm: Arc<dyn LlmClient>,
    tools: ToolSet,
    buffer: ToolResultBuffer,
    config: &ChatGraphConfig,
    checkpointer: Option<Arc<dyn crate::graph::Checkpointer<ChatState>>>,
) -> Result<CompiledStateGraph<ChatState>, CompilationError> {
    let specs = tools.specs();
    let mut graph = StateGraph::<ChatState>::new();
    graph.add_node(
        "plan",
        Arc::new(PlanNode {
            llm: assist_llm,
            enabled: config.planning_enabled,
            min_length: config.planning_min_length,
        }),
    );
    graph.add_node(
        "chat",
        Arc::new(ChatNode {
            llm,
            tools: specs,
            retry: config.retry.clone(),
        }),
    );
    graph.add_node("tools", Arc::new(ToolsNode { tools, buffer }));
    graph.add_node(
        "check_tool_results",
        Arc::new(CheckToolResultsNode {
            max_tool_retries: config.max_tool_retries,
        }),
    );

    graph.add_edge(START, "plan");
    graph.add_edge("plan", "chat");
    graph.add_conditional_edges(
        "chat",
        Arc::new(route_after_chat),
        Some(HashMap::from([
            ("tools".to_string(), "tools".to_string()),
            (END.to_string(), END.to_string()),
        ])),
    );
    graph.add_edge("tools", "check_tool_results");
    graph.add_edge("check_tool_results", "chat");

    let mut graph = graph.with_recursion_limit(config.recursion_limit);
    if let Some(checkpointer) = checkpointer {
        graph = graph.with_checkpointer(checkpointer);
    }
    graph.compile()
}

//! Tools node: executes every tool call in the last assistant message.
//!
//! For each output, the ORIGINAL JSON goes into the tool result buffer
//! (keyed by the ambient request id) before `_full_result` is stripped
//! from what the model will see next turn. In autonomous mode the
//! permission guard runs first; a blocked tool becomes an error tool
//! message the model can self-correct on. `ApprovalRequested` is the one
//! error that propagates.

use async_trait::async_trait;
use serde_json::json;

use crate::agent::content::strip_full_result;
use crate::error::AgentError;
use crate::graph::{Next, Node, RunContext};
use crate::message::Message;
use crate::permissions::{check_tool_permission, PermissionResult};
use crate::state::ChatState;
use crate::stream::StreamEvent;
use crate::tool_buffer::ToolResultBuffer;
use crate::tools::ToolSet;

pub struct ToolsNode {
    pub tools: ToolSet,
    pub buffer: ToolResultBuffer,
}

#[async_trait]
impl Node<ChatState> for ToolsNode {
    fn id(&self) -> &str {
        "tools"
    }

    async fn run(&self, state: ChatState) -> Result<(ChatState, Next), AgentError> {
        self.run_with_context(state, &RunContext::default()).await
    }

    async fn run_with_context(
        &self,
        mut state: ChatState,
        ctx: &RunContext,
    ) -> Result<(ChatState, Next), AgentError> {
        let calls = state.last_tool_calls().to_vec();
        let agent_context = ctx.scope.agent_context();
        let request_id = ctx.scope.request_id();

        for call in calls {
            if let Some(context) = &agent_context {
                if check_tool_permission(&context.agent, &call.name) == PermissionResult::Blocked {
                    let error = AgentError::ToolBlocked {
                        tool: call.name.clone(),
                    };
                    state.messages.push(Message::tool(
                        &call.id,
                        &call.name,
                        json!({"error": error.to_string()}).to_string(),
                        true,
                    ));
                    ctx.emit(StreamEvent::ToolEnd {
                        tool: call.name.clone(),
                    })
                    .await;
                    continue;
                }
            }

            let Some(tool) = self.tools.get(&call.name) else {
                state.messages.push(Message::tool(
                    &call.id,
                    &call.name,
                    json!({"error": format!("unknown tool: {}", call.name)}).to_string(),
                    true,
                ));
                ctx.emit(StreamEvent::ToolEnd {
                    tool: call.name.clone(),
                })
                .await;
                continue;
            };

            let (content, is_error) = match tool.call(call.arguments.clone(), &ctx.scope).await {
                Ok(value) => {
                    if let Some(request_id) = &request_id {
                        self.buffer.store(request_id, value.clone());
                    }
                    (strip_full_result(&value.to_string()), false)
                }
                Err(AgentError::ApprovalRequested {
                    approval_id,
                    description,
                    tool_name,
                }) => {
                    return Err(AgentError::ApprovalRequested {
                        approval_id,
                        description,
                        tool_name,
                    })
                }
                Err(error) => {
                    tracing::warn!(tool = %call.name, %error, "tool execution failed");
                    (json!({"error": error.to_string()}).to_string(), true)
                }
            };

            ctx.emit(StreamEvent::ToolEnd {
                tool: call.name.clone(),
            })
            .await;
            ctx.emit(StreamEvent::ToolResult {
                content: content.clone(),
            })
            .await;
            state
                .messages
                .push(Message::tool(&call.id, &call.name, content, is_error));
        }

        Ok((state, Next::Continue))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::{seed_agent, seed_user, temp_db};
    use crate::message::{AssistantMessage, ToolCall};
    use crate::scope::{AgentContext, RequestScope};
    use crate::tools::test_support::{EchoTool, FailingTool};
    use crate::tools::FULL_RESULT_KEY;
    use std::sync::Arc;
    use std::time::Duration;

    fn state_with_calls(calls: Vec<ToolCall>) -> ChatState {
        ChatState::new(vec![Message::Assistant(AssistantMessage {
            content: String::new(),
            tool_calls: calls,
            usage: None,
            thinking: None,
        })])
    }

    fn call(name: &str) -> ToolCall {
        ToolCall {
            id: format!("call-{name}"),
            name: name.into(),
            arguments: json!({"q": 1}),
        }
    }

    #[tokio::test]
    async fn full_result_is_buffered_then_stripped() {
        let buffer = ToolResultBuffer::new(Duration::from_secs(60));
        let mut tools = ToolSet::new();
        tools.register(Arc::new(EchoTool {
            tool_name: "big_tool".into(),
            full_result: Some(json!({"images": [{"data": "xxlarge"}]})),
        }));
        let node = ToolsNode {
            tools,
            buffer: buffer.clone(),
        };

        let scope = RequestScope::new();
        scope.set_request_id(Some("req-1".into()));
        let ctx = RunContext::new(scope);

        let (out, _) = node
            .run_with_context(state_with_calls(vec![call("big_tool")]), &ctx)
            .await
            .unwrap();

        let tool_message = out.messages.last().unwrap().as_tool().unwrap();
        assert!(!tool_message.is_error);
        assert!(!tool_message.content.contains(FULL_RESULT_KEY));

        let full = buffer.take("req-1");
        assert_eq!(full.len(), 1);
        assert_eq!(full[0][FULL_RESULT_KEY]["images"][0]["data"], "xxlarge");
    }

    #[tokio::test]
    async fn failing_tool_becomes_error_message() {
        let buffer = ToolResultBuffer::new(Duration::from_secs(60));
        let mut tools = ToolSet::new();
        tools.register(Arc::new(FailingTool {
            tool_name: "flaky".into(),
            message: "rate limit exceeded".into(),
        }));
        let node = ToolsNode { tools, buffer };

        let (out, _) = node
            .run(state_with_calls(vec![call("flaky")]))
            .await
            .unwrap();
        let tool_message = out.messages.last().unwrap().as_tool().unwrap();
        assert!(tool_message.is_error);
        assert!(tool_message.content.contains("rate limit exceeded"));
    }

    #[tokio::test]
    async fn unknown_tool_becomes_error_message() {
        let node = ToolsNode {
            tools: ToolSet::new(),
            buffer: ToolResultBuffer::new(Duration::from_secs(60)),
        };
        let (out, _) = node
            .run(state_with_calls(vec![call("ghost")]))
            .await
            .unwrap();
        let tool_message = out.messages.last().unwrap().as_tool().unwrap();
        assert!(tool_message.is_error);
        assert!(tool_message.content.contains("unknown tool"));
    }

    #[tokio::test]
    async fn blocked_tool_is_an_error_message_not_a_failure() {
        let (db, _dir) = temp_db().await;
        let user = seed_user(&db).await;
        let mut agent = seed_agent(&db, &user, "restricted").await;
        agent.tool_permissions = Some(vec![]);

        let mut tools = ToolSet::new();
        tools.register(Arc::new(EchoTool::named("send_email")));
        let node = ToolsNode {
            tools,
            buffer: ToolResultBuffer::new(Duration::from_secs(60)),
        };

        let scope = RequestScope::new();
        scope.set_agent_context(Some(AgentContext {
            agent: agent.clone(),
            user,
            trigger_chain: vec![agent.id.clone()],
        }));
        let ctx = RunContext::new(scope);

        let (out, _) = node
            .run_with_context(state_with_calls(vec![call("send_email")]), &ctx)
            .await
            .unwrap();
        let tool_message = out.messages.last().unwrap().as_tool().unwrap();
        assert!(tool_message.is_error);
        assert!(tool_message.content.contains("tool blocked: send_email"));
    }

    #[tokio::test]
    async fn results_are_appended_in_call_order() {
        let buffer = ToolResultBuffer::new(Duration::from_secs(60));
        let mut tools = ToolSet::new();
        tools.register(Arc::new(EchoTool::named("first")));
        tools.register(Arc::new(EchoTool::named("second")));
        let node = ToolsNode {
            tools,
            buffer: buffer.clone(),
        };
        let scope = RequestScope::new();
        scope.set_request_id(Some("req-2".into()));
        let ctx = RunContext::new(scope);

        let (out, _) = node
            .run_with_context(state_with_calls(vec![call("first"), call("second")]), &ctx)
            .await
            .unwrap();
        let tools_in_state: Vec<_> = out
            .messages
            .iter()
            .filter_map(|m| m.as_tool())
            .map(|t| t.tool.clone())
            .collect();
        assert_eq!(tools_in_state, vec!["first", "second"]);
        assert_eq!(buffer.take("req-2").len(), 2);
    }
}

//! The tool-call loop: a reasoning node alternates between a reasoning round
//! trip and local execution of the tools it asked for, until the model
//! finishes, the iteration bound is hit or the total timeout elapses.

mod config;
mod function;
mod registry;

pub use config::{parse_duration, ToolCallConfig, ToolCallMode};
pub use function::{FunctionDefinition, FunctionKind, OpenApiAuth, OpenApiOperation};
pub use registry::FunctionRegistry;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use weft_core::error::{Result, WeftError};
use weft_core::event::ExecutionEvent;
use weft_core::traits::ReasoningClient;
use weft_core::types::{
    ChatMessage, ConversationHistory, NodeContext, ReasoningRequest, ReasoningResponse, ToolCall,
    ToolDefinition, ToolExecutionResult,
};

use crate::runtime::Runtime;

/// Why the loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoppedReason {
    Finish,
    MaxIterations,
    Timeout,
}

/// Output of an `auto` reasoning node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolLoopOutput {
    pub content: String,
    pub messages: Vec<ChatMessage>,
    pub tool_executions: Vec<ToolExecutionResult>,
    pub total_iterations: u32,
    pub stopped_reason: StoppedReason,
}

/// Read the node's `functions` array.
pub fn parse_functions(node_id: &str, config: &Value) -> Result<Vec<FunctionDefinition>> {
    match config.get("functions") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(value) => Vec::<FunctionDefinition>::deserialize(value)
            .map_err(|e| WeftError::invalid_config(node_id, format!("functions: {}", e))),
    }
}

/// Opening messages: `system_prompt` (or `instruction`) as the system message,
/// then `prompt` as the user message, falling back to the serialized input.
pub fn seed_messages(config: &Value, input: &Value) -> Vec<ChatMessage> {
    let text = |key: &str| {
        config
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
    };

    let mut messages = Vec::with_capacity(2);
    if let Some(system) = text("system_prompt").or_else(|| text("instruction")) {
        messages.push(ChatMessage::system(system));
    }
    let user = match text("prompt") {
        Some(prompt) => prompt.to_string(),
        None => match input {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        },
    };
    messages.push(ChatMessage::user(user));
    messages
}

/// `manual` mode: one reasoning call, tool calls returned unexecuted.
pub async fn single_call(
    client: &dyn ReasoningClient,
    config: &ToolCallConfig,
    functions: &[FunctionDefinition],
    ctx: NodeContext,
    node_config: Value,
    input: Value,
) -> Result<Value> {
    let mut messages = seed_messages(&node_config, &input);
    let request = ReasoningRequest {
        node_id: ctx.node_id.clone(),
        config: node_config,
        messages: messages.clone(),
        tools: functions.iter().map(FunctionDefinition::tool_definition).collect(),
    };

    let response = tokio::select! {
        _ = ctx.cancel.cancelled() => return Err(WeftError::Cancelled),
        r = tokio::time::timeout(config.total_timeout, client.complete(request)) => {
            r.map_err(|_| WeftError::Timeout { timeout_ms: config.total_timeout.as_millis() as u64 })??
        }
    };

    messages.push(ChatMessage::assistant(
        response.content.clone(),
        response.tool_calls.clone(),
    ));
    Ok(json!({
        "content": response.content,
        "tool_calls": response.tool_calls,
        "finish_reason": response.finish_reason,
        "messages": messages,
    }))
}

/// `auto` mode driver for one node execution.
pub struct ToolCallLoop {
    runtime: Arc<Runtime>,
    client: Arc<dyn ReasoningClient>,
    config: ToolCallConfig,
    functions: Vec<FunctionDefinition>,
}

impl ToolCallLoop {
    pub fn new(
        runtime: Arc<Runtime>,
        client: Arc<dyn ReasoningClient>,
        config: ToolCallConfig,
        functions: Vec<FunctionDefinition>,
    ) -> Self {
        Self {
            runtime,
            client,
            config,
            functions,
        }
    }

    pub async fn run(&self, ctx: NodeContext, node_config: Value, input: Value) -> Result<ToolLoopOutput> {
        let deadline = Instant::now() + self.config.total_timeout;
        let tools: Vec<ToolDefinition> = self
            .functions
            .iter()
            .map(FunctionDefinition::tool_definition)
            .collect();

        let mut history = ConversationHistory::default();
        for message in seed_messages(&node_config, &input) {
            history.push(message);
        }

        let mut content = String::new();
        let mut stopped = StoppedReason::MaxIterations;

        while history.total_iterations < self.config.max_iterations {
            if ctx.cancel.is_cancelled() {
                return Err(WeftError::Cancelled);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                stopped = StoppedReason::Timeout;
                break;
            }

            debug!(node_id = %ctx.node_id, iteration = history.total_iterations + 1, "Reasoning call");
            let request = ReasoningRequest {
                node_id: ctx.node_id.clone(),
                config: node_config.clone(),
                messages: history.messages.clone(),
                tools: tools.clone(),
            };

            let response: ReasoningResponse = tokio::select! {
                _ = ctx.cancel.cancelled() => return Err(WeftError::Cancelled),
                r = tokio::time::timeout(remaining, self.client.complete(request)) => match r {
                    Ok(response) => response?,
                    Err(_) => {
                        warn!(node_id = %ctx.node_id, "Total timeout elapsed during reasoning call");
                        stopped = StoppedReason::Timeout;
                        break;
                    }
                },
            };

            history.total_iterations += 1;
            content = response.content.clone();
            history.push(ChatMessage::assistant(
                response.content.clone(),
                response.tool_calls.clone(),
            ));

            if !response.wants_tools() {
                stopped = StoppedReason::Finish;
                break;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            let per_call = self.config.timeout_per_tool.min(remaining);
            let results = self.execute_calls(&ctx, &response.tool_calls, per_call).await;

            let mut first_failure: Option<ToolExecutionResult> = None;
            for result in results {
                let message = match (&result.result, &result.error) {
                    (_, Some(error)) => format!("Error: {}", error),
                    (Some(value), None) => tool_message(value),
                    (None, None) => String::new(),
                };
                history.push(ChatMessage::tool_result(result.tool_call_id.clone(), message));
                self.runtime.notify(ExecutionEvent::ToolCallCompleted {
                    execution_id: ctx.execution_id.clone(),
                    node_id: ctx.node_id.clone(),
                    function_name: result.function_name.clone(),
                    failed: result.failed(),
                });
                if result.failed() && first_failure.is_none() {
                    first_failure = Some(result.clone());
                }
                history.record(result);
            }

            if self.config.stop_on_tool_failure {
                if let Some(failure) = first_failure {
                    error!(
                        node_id = %ctx.node_id,
                        function = %failure.function_name,
                        "Tool failed, stopping loop"
                    );
                    return Err(WeftError::ToolExecution {
                        tool: failure.function_name,
                        message: failure.error.unwrap_or_default(),
                    });
                }
            }
        }

        info!(
            node_id = %ctx.node_id,
            iterations = history.total_iterations,
            tool_calls = history.tool_executions.len(),
            stopped_reason = ?stopped,
            "Tool-call loop finished"
        );

        Ok(ToolLoopOutput {
            content,
            messages: history.messages,
            tool_executions: history.tool_executions,
            total_iterations: history.total_iterations,
            stopped_reason: stopped,
        })
    }

    /// Execute one iteration's calls, in request order.
    async fn execute_calls(
        &self,
        ctx: &NodeContext,
        calls: &[ToolCall],
        per_call: Duration,
    ) -> Vec<ToolExecutionResult> {
        if self.config.parallel_tools && calls.len() > 1 {
            let futs: Vec<_> = calls
                .iter()
                .map(|call| self.execute_call(ctx.clone(), call, per_call))
                .collect();
            futures::future::join_all(futs).await
        } else {
            let mut results = Vec::with_capacity(calls.len());
            for call in calls {
                results.push(self.execute_call(ctx.clone(), call, per_call).await);
            }
            results
        }
    }

    async fn execute_call(
        &self,
        ctx: NodeContext,
        call: &ToolCall,
        timeout: Duration,
    ) -> ToolExecutionResult {
        let started = Instant::now();
        let outcome = match self.functions.iter().find(|f| f.name == call.name) {
            None => Err(WeftError::ToolNotFound(call.name.clone())),
            Some(function) => {
                let invocation = function.invoke(&self.runtime, call.arguments.clone(), ctx);
                match tokio::time::timeout(timeout, invocation).await {
                    Ok(result) => result,
                    Err(_) => Err(WeftError::ToolTimeout {
                        tool: call.name.clone(),
                        timeout_ms: timeout.as_millis() as u64,
                    }),
                }
            }
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(value) => ToolExecutionResult {
                tool_call_id: call.id.clone(),
                function_name: call.name.clone(),
                result: Some(value),
                error: None,
                duration_ms,
            },
            Err(e) => {
                warn!(function = %call.name, error = %e, "Tool call failed");
                ToolExecutionResult {
                    tool_call_id: call.id.clone(),
                    function_name: call.name.clone(),
                    result: None,
                    error: Some(e.to_string()),
                    duration_ms,
                }
            }
        }
    }
}

fn tool_message(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

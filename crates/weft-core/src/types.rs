use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// What a capability produces for one node execution.
///
/// `value` feeds edges without a source handle. Multi-output nodes put each
/// labeled output in `handles`; an edge naming a handle that is absent never
/// activates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeOutput {
    pub value: Value,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub handles: BTreeMap<String, Value>,
}

impl NodeOutput {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            handles: BTreeMap::new(),
        }
    }

    /// Emit `value` on a labeled handle.
    pub fn with_handle(mut self, handle: impl Into<String>, value: Value) -> Self {
        self.handles.insert(handle.into(), value);
        self
    }

    /// A branch result: `value` is both the main output and the output on `handle`.
    pub fn branch(handle: impl Into<String>, value: Value) -> Self {
        Self::new(value.clone()).with_handle(handle, value)
    }
}

impl From<Value> for NodeOutput {
    fn from(value: Value) -> Self {
        Self::new(value)
    }
}

/// Per-invocation context handed to a capability.
#[derive(Debug, Clone)]
pub struct NodeContext {
    pub execution_id: String,
    pub workflow_id: String,
    pub node_id: String,
    /// Sub-workflow nesting level; 0 for a top-level run.
    pub depth: usize,
    /// Cancelled when the owning run aborts. Long-running capabilities should observe it.
    pub cancel: CancellationToken,
}

impl NodeContext {
    pub fn new(
        execution_id: impl Into<String>,
        workflow_id: impl Into<String>,
        node_id: impl Into<String>,
    ) -> Self {
        Self {
            execution_id: execution_id.into(),
            workflow_id: workflow_id.into(),
            node_id: node_id.into(),
            depth: 0,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_depth(mut self, depth: usize) -> Self {
        self.depth = depth;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Role in a conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A tool invocation requested by a reasoning call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// A chat message in the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    /// Calls requested by an assistant message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// For tool-role messages, the call this message answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ChatMessage {
    fn with_role(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: vec![],
            tool_call_id: None,
            timestamp: Some(Utc::now()),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::with_role(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::with_role(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        let mut msg = Self::with_role(Role::Assistant, text);
        msg.tool_calls = tool_calls;
        msg
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        let mut msg = Self::with_role(Role::Tool, content);
        msg.tool_call_id = Some(tool_call_id.into());
        msg
    }
}

/// Why the reasoning provider stopped generating.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    #[default]
    Stop,
    ToolUse,
    Length,
}

/// Tool definition advertised to the reasoning provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// One round trip to a reasoning provider.
#[derive(Debug, Clone)]
pub struct ReasoningRequest {
    pub node_id: String,
    /// The node's resolved config (model, temperature, and so on).
    pub config: Value,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolDefinition>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReasoningResponse {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub finish_reason: FinishReason,
}

impl ReasoningResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: vec![],
            finish_reason: FinishReason::Stop,
        }
    }

    pub fn tool_use(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            content: String::new(),
            tool_calls,
            finish_reason: FinishReason::ToolUse,
        }
    }

    pub fn wants_tools(&self) -> bool {
        self.finish_reason == FinishReason::ToolUse && !self.tool_calls.is_empty()
    }
}

/// Outcome of a single tool call inside the tool-call loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolExecutionResult {
    pub tool_call_id: String,
    pub function_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl ToolExecutionResult {
    pub fn failed(&self) -> bool {
        self.error.is_some()
    }
}

/// The full record of a tool-call loop run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationHistory {
    pub messages: Vec<ChatMessage>,
    pub tool_executions: Vec<ToolExecutionResult>,
    pub total_iterations: u32,
}

impl ConversationHistory {
    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    pub fn record(&mut self, result: ToolExecutionResult) {
        self.tool_executions.push(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn branch_output_sets_value_and_handle() {
        let out = NodeOutput::branch("true", json!({"n": 1}));
        assert_eq!(out.value, json!({"n": 1}));
        assert_eq!(out.handles.get("true"), Some(&json!({"n": 1})));
        assert!(!out.handles.contains_key("false"));
    }

    #[test]
    fn tool_message_references_call() {
        let msg = ChatMessage::tool_result("call_1", "42");
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn wants_tools_requires_calls() {
        let mut resp = ReasoningResponse::tool_use(vec![]);
        assert!(!resp.wants_tools());
        resp.tool_calls.push(ToolCall {
            id: "c".into(),
            name: "f".into(),
            arguments: json!({}),
        });
        assert!(resp.wants_tools());
        assert!(!ReasoningResponse::text("done").wants_tools());
    }

    #[test]
    fn finish_reason_wire_names() {
        assert_eq!(serde_json::to_value(FinishReason::ToolUse).unwrap(), "tool_use");
        let resp: ReasoningResponse = serde_json::from_value(json!({"content": "hi"})).unwrap();
        assert_eq!(resp.finish_reason, FinishReason::Stop);
    }
}

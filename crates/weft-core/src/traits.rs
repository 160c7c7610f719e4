use futures::future::BoxFuture;
use serde_json::Value;

use crate::error::Result;
use crate::event::ExecutionEvent;
use crate::types::*;
use crate::workflow::Workflow;

/// The executor behind one node type.
pub trait Capability: Send + Sync + 'static {
    /// Run the node with its (template-resolved) config and composed input.
    fn execute(
        &self,
        ctx: NodeContext,
        config: Value,
        input: Value,
    ) -> BoxFuture<'_, Result<NodeOutput>>;

    /// Reject a malformed config before the run starts.
    fn validate(&self, config: &Value) -> Result<()> {
        let _ = config;
        Ok(())
    }
}

/// Resolves child workflows for fan-out and nested calls.
pub trait WorkflowLoader: Send + Sync + 'static {
    fn load(&self, workflow_id: &str) -> BoxFuture<'_, Result<Workflow>>;
}

/// Receives per-node and per-run lifecycle events.
pub trait Notifier: Send + Sync + 'static {
    fn notify(&self, event: ExecutionEvent);
}

/// Notifier that drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, _event: ExecutionEvent) {}
}

/// Substitutes placeholders in a config string.
pub trait TemplateResolver: Send + Sync + 'static {
    fn resolve(&self, template: &str, variables: &Value) -> Result<String>;
}

/// One remote inference round trip.
pub trait ReasoningClient: Send + Sync + 'static {
    fn complete(&self, request: ReasoningRequest) -> BoxFuture<'_, Result<ReasoningResponse>>;
}

/// Built-in tool function callable from the tool-call loop.
pub trait ToolFunction: Send + Sync + 'static {
    /// Function name (used in tool calls).
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str;

    /// JSON Schema for the call arguments.
    fn parameters(&self) -> Value;

    fn call(&self, arguments: Value, ctx: NodeContext) -> BoxFuture<'_, Result<Value>>;
}

//! Test doubles shared by the Weft crates' tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::Value;

use weft_core::error::{Result, WeftError};
use weft_core::event::ExecutionEvent;
use weft_core::traits::{Capability, Notifier, ReasoningClient};
use weft_core::types::{NodeContext, NodeOutput, ReasoningRequest, ReasoningResponse, ToolCall};
use weft_core::workflow::{Edge, Node, Workflow};

type CapabilityFn = dyn Fn(&Value, &Value) -> Result<NodeOutput> + Send + Sync;

/// Capability backed by a closure over `(config, input)`.
///
/// Counts calls and can sleep before answering, which makes concurrency and
/// cancellation observable.
pub struct FnCapability {
    f: Arc<CapabilityFn>,
    delay: Option<Duration>,
    calls: Arc<AtomicUsize>,
}

impl FnCapability {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Value, &Value) -> Result<NodeOutput> + Send + Sync + 'static,
    {
        Self {
            f: Arc::new(f),
            delay: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Returns its input unchanged.
    pub fn echo() -> Self {
        Self::new(|_, input| Ok(NodeOutput::new(input.clone())))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Shared call counter; clone it before handing the capability over.
    pub fn counter(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

impl Capability for FnCapability {
    fn execute(
        &self,
        _ctx: NodeContext,
        config: Value,
        input: Value,
    ) -> BoxFuture<'_, Result<NodeOutput>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            (self.f)(&config, &input)
        })
    }
}

/// Capability that always fails with `message`.
pub struct FailingCapability {
    message: String,
}

impl FailingCapability {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl Capability for FailingCapability {
    fn execute(
        &self,
        ctx: NodeContext,
        _config: Value,
        _input: Value,
    ) -> BoxFuture<'_, Result<NodeOutput>> {
        Box::pin(async move { Err(WeftError::node(ctx.node_id, &self.message)) })
    }
}

/// Reasoning client that replays scripted responses in order.
///
/// Once the script runs out, the last response repeats.
pub struct ScriptedReasoner {
    script: Mutex<VecDeque<ReasoningResponse>>,
    last: Mutex<Option<ReasoningResponse>>,
    delay: Option<Duration>,
    calls: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<ReasoningRequest>>>,
}

impl ScriptedReasoner {
    pub fn new(responses: Vec<ReasoningResponse>) -> Self {
        Self {
            script: Mutex::new(responses.into()),
            last: Mutex::new(None),
            delay: None,
            calls: Arc::new(AtomicUsize::new(0)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Answers every call with `response`.
    pub fn always(response: ReasoningResponse) -> Self {
        Self::new(vec![response])
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn counter(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }

    /// Every request received, in order.
    pub fn requests(&self) -> Arc<Mutex<Vec<ReasoningRequest>>> {
        self.requests.clone()
    }

    fn next_response(&self) -> ReasoningResponse {
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        match self.script.lock().unwrap_or_else(PoisonError::into_inner).pop_front() {
            Some(response) => {
                *last = Some(response.clone());
                response
            }
            None => last.clone().unwrap_or_else(|| ReasoningResponse::text("")),
        }
    }
}

impl ReasoningClient for ScriptedReasoner {
    fn complete(&self, request: ReasoningRequest) -> BoxFuture<'_, Result<ReasoningResponse>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.requests.lock().unwrap_or_else(PoisonError::into_inner).push(request);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            Ok(self.next_response())
        })
    }
}

/// Notifier that keeps every event it receives.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    events: Arc<Mutex<Vec<ExecutionEvent>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ExecutionEvent> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, event: ExecutionEvent) {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).push(event);
    }
}

/// Shorthand for a `ToolCall`.
pub fn tool_call(id: &str, name: &str, arguments: Value) -> ToolCall {
    ToolCall {
        id: id.to_string(),
        name: name.to_string(),
        arguments,
    }
}

/// `ids[0] -> ids[1] -> ...`, every node of type `node_type`.
pub fn chain(workflow_id: &str, node_type: &str, ids: &[&str]) -> Workflow {
    let mut workflow = Workflow::new(workflow_id, workflow_id);
    for id in ids {
        workflow = workflow.with_node(Node::new(*id, node_type));
    }
    for pair in ids.windows(2) {
        workflow = workflow.with_edge(Edge::new(pair[0], pair[1]));
    }
    workflow
}

use serde::Serialize;

use crate::traits::Notifier;
use crate::workflow::NodeStatus;

/// Lifecycle event emitted by the executor.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ExecutionEvent {
    RunStarted {
        execution_id: String,
        workflow_id: String,
        depth: usize,
    },
    RunCompleted {
        execution_id: String,
        workflow_id: String,
        duration_ms: u64,
    },
    RunFailed {
        execution_id: String,
        workflow_id: String,
        error: String,
    },
    NodeStarted {
        execution_id: String,
        node_id: String,
        node_type: String,
        wave: usize,
    },
    NodeCompleted {
        execution_id: String,
        node_id: String,
        duration_ms: u64,
    },
    NodeFailed {
        execution_id: String,
        node_id: String,
        error: String,
    },
    NodeSkipped {
        execution_id: String,
        node_id: String,
    },
    LoopIteration {
        execution_id: String,
        edge_id: String,
        iteration: u32,
    },
    FanOutItem {
        execution_id: String,
        node_id: String,
        index: usize,
        status: NodeStatus,
    },
    ToolCallCompleted {
        execution_id: String,
        node_id: String,
        function_name: String,
        failed: bool,
    },
}

/// Event bus using tokio broadcast channel.
/// All subscribers receive all events.
pub struct EventBus {
    tx: tokio::sync::broadcast::Sender<ExecutionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = tokio::sync::broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: ExecutionEvent) {
        // Ignore error if no receivers
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<ExecutionEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl Notifier for EventBus {
    fn notify(&self, event: ExecutionEvent) {
        self.publish(event);
    }
}

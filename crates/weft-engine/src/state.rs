use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::warn;
use uuid::Uuid;

use weft_core::types::NodeOutput;
use weft_core::workflow::{NodeStatus, Workflow};

/// What the run knows about one node.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NodeRecord {
    pub status: NodeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub handles: BTreeMap<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// How many times the node has started (loop re-runs count again).
    pub executions: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

/// Serializable view of a run.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionSnapshot {
    pub execution_id: String,
    pub workflow_id: String,
    pub input: Value,
    pub variables: HashMap<String, Value>,
    pub nodes: BTreeMap<String, NodeRecord>,
    pub started_at: DateTime<Utc>,
    pub sealed: bool,
}

/// The shared, mutable record of one run.
///
/// Many node tasks complete concurrently. Each writes only its own node's
/// entry, but the map itself grows and is read by activation checks, so it
/// sits behind a lock. Once the run terminates the state is sealed and later
/// writes are dropped.
#[derive(Debug)]
pub struct ExecutionState {
    execution_id: String,
    workflow_id: String,
    input: Value,
    variables: RwLock<HashMap<String, Value>>,
    nodes: RwLock<HashMap<String, NodeRecord>>,
    started_at: DateTime<Utc>,
    sealed: AtomicBool,
}

impl ExecutionState {
    /// Fresh state for one run of `workflow`. Workflow variables are copied in;
    /// execution variables passed later overlay them.
    pub fn new(workflow: &Workflow, input: Value) -> Self {
        Self {
            execution_id: Uuid::new_v4().to_string(),
            workflow_id: workflow.id.clone(),
            input,
            variables: RwLock::new(workflow.variables.clone()),
            nodes: RwLock::new(HashMap::new()),
            started_at: Utc::now(),
            sealed: AtomicBool::new(false),
        }
    }

    /// Overlay execution-scoped variables on the workflow's.
    pub fn with_variables(mut self, variables: HashMap<String, Value>) -> Self {
        self.variables
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(variables);
        self
    }

    /// Overlay execution-scoped variables once the state is already shared.
    pub fn overlay_variables(&self, variables: HashMap<String, Value>) {
        if variables.is_empty() {
            return;
        }
        self.variables
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(variables);
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    pub fn input(&self) -> &Value {
        &self.input
    }

    pub fn variables(&self) -> HashMap<String, Value> {
        self.variables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Variables as a JSON object, the shape expressions and templates see.
    pub fn variables_json(&self) -> Value {
        Value::Object(self.variables().into_iter().collect())
    }

    /// Output of a completed node.
    pub fn get_node_output(&self, node_id: &str) -> Option<Value> {
        self.read().get(node_id).and_then(|r| r.output.clone())
    }

    /// Output a node emitted on a labeled handle.
    pub fn get_handle_output(&self, node_id: &str, handle: &str) -> Option<Value> {
        self.read().get(node_id).and_then(|r| r.handles.get(handle).cloned())
    }

    pub fn node_status(&self, node_id: &str) -> NodeStatus {
        self.read().get(node_id).map(|r| r.status).unwrap_or_default()
    }

    pub fn node_record(&self, node_id: &str) -> Option<NodeRecord> {
        self.read().get(node_id).cloned()
    }

    /// Number of nodes with an entry.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Outputs of every node that currently has one.
    pub fn outputs(&self) -> Map<String, Value> {
        self.read()
            .iter()
            .filter_map(|(id, r)| r.output.clone().map(|o| (id.clone(), o)))
            .collect()
    }

    pub fn count_with_status(&self, status: NodeStatus) -> usize {
        self.read().values().filter(|r| r.status == status).count()
    }

    pub fn mark_running(&self, node_id: &str) {
        self.write_record(node_id, |r| {
            r.status = NodeStatus::Running;
            r.error = None;
            r.executions += 1;
            r.started_at = Some(Utc::now());
            r.finished_at = None;
        });
    }

    pub fn complete(&self, node_id: &str, output: NodeOutput) {
        self.write_record(node_id, |r| {
            r.status = NodeStatus::Completed;
            r.output = Some(output.value);
            r.handles = output.handles;
            r.error = None;
            r.finished_at = Some(Utc::now());
        });
    }

    pub fn fail(&self, node_id: &str, error: impl Into<String>) {
        let error = error.into();
        self.write_record(node_id, |r| {
            r.status = NodeStatus::Failed;
            r.output = None;
            r.handles.clear();
            r.error = Some(error);
            r.finished_at = Some(Utc::now());
        });
    }

    /// Mark skipped and clear any output left from an earlier loop iteration.
    pub fn skip(&self, node_id: &str) {
        self.write_record(node_id, |r| {
            r.status = NodeStatus::Skipped;
            r.output = None;
            r.handles.clear();
            r.error = None;
            r.finished_at = Some(Utc::now());
        });
    }

    /// Freeze the state; the run has terminated.
    pub fn seal(&self) {
        self.sealed.store(true, Ordering::SeqCst);
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::SeqCst)
    }

    /// The run's result: outputs of completed sink nodes. One sink yields its
    /// value directly; several yield an object keyed by node id.
    pub fn final_output(&self, workflow: &Workflow) -> Value {
        let nodes = self.read();
        let mut outputs: Map<String, Value> = workflow
            .sinks()
            .into_iter()
            .filter_map(|n| {
                nodes
                    .get(&n.id)
                    .filter(|r| r.status == NodeStatus::Completed)
                    .and_then(|r| r.output.clone())
                    .map(|o| (n.id.clone(), o))
            })
            .collect();

        if outputs.len() == 1 {
            let key = outputs.keys().next().cloned().unwrap_or_default();
            outputs.remove(&key).unwrap_or(Value::Null)
        } else {
            Value::Object(outputs)
        }
    }

    pub fn snapshot(&self) -> ExecutionSnapshot {
        ExecutionSnapshot {
            execution_id: self.execution_id.clone(),
            workflow_id: self.workflow_id.clone(),
            input: self.input.clone(),
            variables: self.variables(),
            nodes: self.read().iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            started_at: self.started_at,
            sealed: self.is_sealed(),
        }
    }

    fn write_record(&self, node_id: &str, update: impl FnOnce(&mut NodeRecord)) {
        if self.is_sealed() {
            warn!(
                execution_id = %self.execution_id,
                node_id,
                "Ignoring write to sealed execution state"
            );
            return;
        }
        let mut nodes = self.write();
        update(nodes.entry(node_id.to_string()).or_default());
    }

    // A panicking writer cannot leave a record half-updated, so a poisoned
    // lock still guards consistent data.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, NodeRecord>> {
        self.nodes.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, NodeRecord>> {
        self.nodes.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use weft_core::workflow::{Edge, Node};

    fn workflow() -> Workflow {
        Workflow::new("wf", "test")
            .with_node(Node::new("a", "passthrough"))
            .with_node(Node::new("b", "passthrough"))
            .with_node(Node::new("c", "passthrough"))
            .with_edge(Edge::new("a", "b"))
            .with_edge(Edge::new("a", "c"))
            .with_variable("region", json!("eu"))
    }

    #[test]
    fn lifecycle_updates_record() {
        let state = ExecutionState::new(&workflow(), json!({"x": 1}));
        assert_eq!(state.node_status("a"), NodeStatus::Pending);

        state.mark_running("a");
        assert_eq!(state.node_status("a"), NodeStatus::Running);

        state.complete("a", NodeOutput::branch("true", json!(7)));
        assert_eq!(state.get_node_output("a"), Some(json!(7)));
        assert_eq!(state.get_handle_output("a", "true"), Some(json!(7)));
        assert_eq!(state.get_handle_output("a", "false"), None);
        assert_eq!(state.node_record("a").unwrap().executions, 1);
    }

    #[test]
    fn skip_clears_stale_output() {
        let state = ExecutionState::new(&workflow(), Value::Null);
        state.mark_running("b");
        state.complete("b", NodeOutput::new(json!("old")));
        state.skip("b");
        assert_eq!(state.node_status("b"), NodeStatus::Skipped);
        assert_eq!(state.get_node_output("b"), None);
    }

    #[test]
    fn variables_overlay_workflow_variables() {
        let mut vars = HashMap::new();
        vars.insert("region".to_string(), json!("us"));
        vars.insert("tier".to_string(), json!(2));
        let state = ExecutionState::new(&workflow(), Value::Null).with_variables(vars);
        assert_eq!(state.variables()["region"], json!("us"));
        assert_eq!(state.variables()["tier"], json!(2));

        let mut late = HashMap::new();
        late.insert("tier".to_string(), json!(3));
        state.overlay_variables(late);
        assert_eq!(state.variables_json()["tier"], json!(3));
    }

    #[test]
    fn sealed_state_ignores_writes() {
        let state = ExecutionState::new(&workflow(), Value::Null);
        state.complete("a", NodeOutput::new(json!(1)));
        state.seal();
        state.complete("a", NodeOutput::new(json!(2)));
        state.fail("b", "late");
        assert_eq!(state.get_node_output("a"), Some(json!(1)));
        assert_eq!(state.node_status("b"), NodeStatus::Pending);
        assert!(state.snapshot().sealed);
    }

    #[test]
    fn final_output_collects_sinks() {
        let wf = workflow();
        let state = ExecutionState::new(&wf, Value::Null);
        state.complete("a", NodeOutput::new(json!("root")));
        state.complete("b", NodeOutput::new(json!("left")));
        assert_eq!(state.final_output(&wf), json!("left"));

        state.complete("c", NodeOutput::new(json!("right")));
        assert_eq!(state.final_output(&wf), json!({"b": "left", "c": "right"}));
    }

    #[test]
    fn concurrent_writers_on_disjoint_keys() {
        let state = Arc::new(ExecutionState::new(&workflow(), Value::Null));
        let handles: Vec<_> = (0..32)
            .map(|i| {
                let state = Arc::clone(&state);
                std::thread::spawn(move || {
                    let id = format!("n{}", i);
                    state.mark_running(&id);
                    state.complete(&id, NodeOutput::new(json!(i)));
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(state.len(), 32);
        assert_eq!(state.count_with_status(NodeStatus::Completed), 32);
        assert_eq!(state.get_node_output("n17"), Some(json!(17)));
    }
}

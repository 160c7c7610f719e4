//! Wave-by-wave workflow execution.
//!
//! Each wave's active nodes run concurrently as tokio tasks. Loop edges are
//! checked once their source's wave finishes; a firing loop edge sends the
//! executor back to the target's wave and the range up to the source's wave
//! runs again. The first node failure cancels the run.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::{Map, Value};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use weft_core::error::{Result, WeftError};
use weft_core::event::ExecutionEvent;
use weft_core::types::NodeContext;
use weft_core::workflow::{Edge, Node, NodeStatus, Workflow};

use crate::condition::{condition_context, ConditionEvaluator};
use crate::node_executor::NodeExecutor;
use crate::runtime::Runtime;
use crate::scheduler::{self, Schedule};
use crate::state::ExecutionState;

const ABORTED: &str = "cancelled: run aborted after an earlier failure";

/// Per-run knobs supplied by the caller.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Whole-run limit. Top-level runs fall back to `engine.run_timeout_secs`.
    pub timeout: Option<Duration>,
    /// Parent cancellation; the run observes a child of this token.
    pub cancel: Option<CancellationToken>,
    /// Execution-scoped variables, overlaid on the workflow's.
    pub variables: HashMap<String, Value>,
    /// Nesting level; 0 for a top-level run.
    pub depth: usize,
}

impl RunOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn with_variable(mut self, key: impl Into<String>, value: Value) -> Self {
        self.variables.insert(key.into(), value);
        self
    }

    pub fn with_depth(mut self, depth: usize) -> Self {
        self.depth = depth;
        self
    }
}

/// Runs workflows against a shared [`Runtime`].
#[derive(Clone)]
pub struct DagExecutor {
    runtime: Arc<Runtime>,
    nodes: NodeExecutor,
}

impl DagExecutor {
    pub fn new(runtime: Arc<Runtime>) -> Self {
        Self {
            nodes: NodeExecutor::new(runtime.clone()),
            runtime,
        }
    }

    /// Structural and config validation, then the wave schedule.
    pub fn plan(&self, workflow: &Workflow) -> Result<Schedule> {
        workflow.validate()?;
        let schedule = scheduler::schedule(&workflow.nodes, &workflow.edges)?;
        for node in &workflow.nodes {
            self.nodes.validate(node)?;
        }
        Ok(schedule)
    }

    /// Run `workflow` to completion, recording into `state`.
    ///
    /// Returns the first node error (fail-fast), `Timeout` when the run limit
    /// elapses, or `Cancelled` when the parent token fires. The state is sealed
    /// on every exit path.
    pub fn execute(
        &self,
        workflow: Arc<Workflow>,
        state: Arc<ExecutionState>,
        options: RunOptions,
    ) -> BoxFuture<'static, Result<()>> {
        let this = self.clone();
        Box::pin(async move {
            let max_depth = this.runtime.config().engine.max_depth;
            if options.depth > max_depth {
                state.seal();
                return Err(WeftError::MaxDepthExceeded(max_depth));
            }

            let schedule = match this.plan(&workflow) {
                Ok(schedule) => schedule,
                Err(e) => {
                    error!(workflow_id = %workflow.id, error = %e, "Workflow rejected before run");
                    state.seal();
                    return Err(e);
                }
            };

            state.overlay_variables(options.variables.clone());
            let cancel = options
                .cancel
                .as_ref()
                .map(CancellationToken::child_token)
                .unwrap_or_default();
            let timeout = options.timeout.or_else(|| {
                (options.depth == 0)
                    .then(|| this.runtime.config().engine.run_timeout())
                    .flatten()
            });

            let mut run = WaveRun::new(&this, workflow, state.clone(), schedule, cancel.clone(), options.depth);
            this.runtime.notify(ExecutionEvent::RunStarted {
                execution_id: state.execution_id().to_string(),
                workflow_id: state.workflow_id().to_string(),
                depth: options.depth,
            });
            info!(
                execution_id = %state.execution_id(),
                workflow_id = %state.workflow_id(),
                depth = options.depth,
                waves = run.schedule.len(),
                "Run started"
            );

            let started = Instant::now();
            let result = match timeout {
                Some(limit) => {
                    let outcome = tokio::time::timeout(limit, run.drive()).await;
                    outcome.unwrap_or_else(|_| {
                        cancel.cancel();
                        Err(WeftError::Timeout {
                            timeout_ms: limit.as_millis() as u64,
                        })
                    })
                }
                None => run.drive().await,
            };

            match &result {
                Ok(()) => {
                    state.seal();
                    let duration_ms = started.elapsed().as_millis() as u64;
                    info!(execution_id = %state.execution_id(), duration_ms, "Run completed");
                    this.runtime.notify(ExecutionEvent::RunCompleted {
                        execution_id: state.execution_id().to_string(),
                        workflow_id: state.workflow_id().to_string(),
                        duration_ms,
                    });
                }
                Err(e) => {
                    run.fail_in_flight(&e.to_string());
                    state.seal();
                    error!(execution_id = %state.execution_id(), error = %e, "Run failed");
                    this.runtime.notify(ExecutionEvent::RunFailed {
                        execution_id: state.execution_id().to_string(),
                        workflow_id: state.workflow_id().to_string(),
                        error: e.to_string(),
                    });
                }
            }
            result
        })
    }

    /// Convenience wrapper: fresh state for `input`, run, return the state.
    pub async fn run(
        &self,
        workflow: Workflow,
        input: Value,
        options: RunOptions,
    ) -> Result<Arc<ExecutionState>> {
        let workflow = Arc::new(workflow);
        let state = Arc::new(ExecutionState::new(&workflow, input));
        self.execute(workflow, state.clone(), options).await?;
        Ok(state)
    }
}

/// A loop edge whose target wave is not after its source wave.
struct LoopEdge {
    edge: Edge,
    source_wave: usize,
    target_wave: usize,
}

/// Mutable bookkeeping for one run.
struct WaveRun {
    runtime: Arc<Runtime>,
    nodes: NodeExecutor,
    workflow: Arc<Workflow>,
    state: Arc<ExecutionState>,
    schedule: Schedule,
    cancel: CancellationToken,
    depth: usize,
    loops: Vec<LoopEdge>,
    loop_counters: HashMap<String, u32>,
    /// Values carried by fired loop edges, keyed by target node.
    loop_inputs: HashMap<String, (String, Value)>,
}

impl WaveRun {
    fn new(
        executor: &DagExecutor,
        workflow: Arc<Workflow>,
        state: Arc<ExecutionState>,
        schedule: Schedule,
        cancel: CancellationToken,
        depth: usize,
    ) -> Self {
        let loops = workflow
            .loop_edges()
            .filter_map(|edge| {
                let source_wave = schedule.wave_of(&edge.from)?;
                let target_wave = schedule.wave_of(&edge.to)?;
                if target_wave > source_wave {
                    warn!(
                        edge_id = %edge.id,
                        source_wave,
                        target_wave,
                        "Ignoring loop edge that points forward"
                    );
                    return None;
                }
                Some(LoopEdge {
                    edge: edge.clone(),
                    source_wave,
                    target_wave,
                })
            })
            .collect();

        Self {
            runtime: executor.runtime.clone(),
            nodes: executor.nodes.clone(),
            workflow,
            state,
            schedule,
            cancel,
            depth,
            loops,
            loop_counters: HashMap::new(),
            loop_inputs: HashMap::new(),
        }
    }

    async fn drive(&mut self) -> Result<()> {
        let mut index = 0;
        while index < self.schedule.len() {
            if self.cancel.is_cancelled() {
                return Err(WeftError::Cancelled);
            }
            self.run_wave(index).await?;
            index = match self.fire_loop(index)? {
                Some(target) => target,
                None => index + 1,
            };
        }
        Ok(())
    }

    async fn run_wave(&mut self, index: usize) -> Result<()> {
        let wave: Vec<String> = self
            .schedule
            .wave(index)
            .map(<[String]>::to_vec)
            .unwrap_or_default();
        let runtime = self.runtime.clone();
        let evaluator = ConditionEvaluator::new(runtime.expressions());
        let context = condition_context(&self.state);

        let mut ready: Vec<(Node, Value)> = Vec::with_capacity(wave.len());
        for node_id in &wave {
            let Some(node) = self.workflow.node(node_id) else {
                continue;
            };
            let loop_input = self.loop_inputs.remove(node_id);
            match self.activation(node, loop_input, &evaluator, &context) {
                Ok(Some(input)) => ready.push((node.clone(), input)),
                Ok(None) => {
                    debug!(node_id = %node_id, wave = index, "No active incoming edge, skipping");
                    self.state.skip(node_id);
                    self.runtime.notify(ExecutionEvent::NodeSkipped {
                        execution_id: self.state.execution_id().to_string(),
                        node_id: node_id.clone(),
                    });
                }
                Err(e) => {
                    self.record_failure(node_id, e.to_string());
                    return Err(e);
                }
            }
        }

        info!(
            execution_id = %self.state.execution_id(),
            wave = index,
            active = ready.len(),
            skipped = wave.len() - ready.len(),
            "Running wave"
        );

        let mut set = JoinSet::new();
        for (node, input) in ready {
            self.state.mark_running(&node.id);
            self.runtime.notify(ExecutionEvent::NodeStarted {
                execution_id: self.state.execution_id().to_string(),
                node_id: node.id.clone(),
                node_type: node.node_type.clone(),
                wave: index,
            });

            let ctx = NodeContext::new(self.state.execution_id(), self.state.workflow_id(), &node.id)
                .with_depth(self.depth)
                .with_cancel(self.cancel.clone());
            let work = self.nodes.execute(ctx, &node, input, self.state.clone());
            let cancel = self.cancel.clone();
            let node_id = node.id;

            set.spawn(async move {
                let started = Instant::now();
                let result = tokio::select! {
                    _ = cancel.cancelled() => Err(WeftError::Cancelled),
                    r = AssertUnwindSafe(work).catch_unwind() => {
                        r.unwrap_or_else(|_| Err(WeftError::node(&node_id, "node task panicked")))
                    }
                };
                (node_id, result, started.elapsed())
            });
        }

        let mut first_error: Option<WeftError> = None;
        while let Some(joined) = set.join_next().await {
            let (node_id, result, elapsed) = match joined {
                Ok(done) => done,
                Err(e) => {
                    warn!(error = %e, "Node task did not finish");
                    continue;
                }
            };
            let duration_ms = elapsed.as_millis() as u64;

            match result {
                Ok(output) if first_error.is_none() => {
                    debug!(node_id = %node_id, duration_ms, "Node completed");
                    self.state.complete(&node_id, output);
                    self.runtime.notify(ExecutionEvent::NodeCompleted {
                        execution_id: self.state.execution_id().to_string(),
                        node_id,
                        duration_ms,
                    });
                }
                Ok(_) => self.record_failure(&node_id, ABORTED.to_string()),
                Err(err) => {
                    let message = match (&first_error, &err) {
                        (Some(_), WeftError::Cancelled) => ABORTED.to_string(),
                        _ => err.to_string(),
                    };
                    self.record_failure(&node_id, message);
                    if first_error.is_none() {
                        error!(node_id = %node_id, error = %err, "Node failed, cancelling siblings");
                        self.cancel.cancel();
                        first_error = Some(err);
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// The node's composed input, or `None` when no incoming edge is active.
    fn activation(
        &self,
        node: &Node,
        loop_input: Option<(String, Value)>,
        evaluator: &ConditionEvaluator<'_>,
        context: &Map<String, Value>,
    ) -> Result<Option<Value>> {
        let incoming = self.workflow.incoming(&node.id);
        if incoming.is_empty() && loop_input.is_none() {
            return Ok(Some(self.state.input().clone()));
        }

        let mut contributions: Vec<(String, Value)> = Vec::new();
        for edge in incoming {
            let Some(value) = ConditionEvaluator::edge_value(edge, &self.state) else {
                debug!(edge_id = %edge.id, "Source carries no value");
                continue;
            };
            if evaluator.evaluate(edge, Some(&value), context)? {
                contributions.push((contribution_key(edge), value));
            }
        }
        contributions.extend(loop_input);

        Ok(match contributions.len() {
            0 => None,
            1 => contributions.pop().map(|(_, value)| value),
            _ => Some(Value::Object(contributions.into_iter().collect())),
        })
    }

    /// Check loop edges leaving `wave_index`. Returns the wave to jump back to.
    fn fire_loop(&mut self, wave_index: usize) -> Result<Option<usize>> {
        let runtime = self.runtime.clone();
        let evaluator = ConditionEvaluator::new(runtime.expressions());
        let context = condition_context(&self.state);

        for lp in self.loops.iter().filter(|l| l.source_wave == wave_index) {
            let edge = &lp.edge;
            let max = edge.loop_spec.map(|s| s.max_iterations).unwrap_or(0);
            let count = self.loop_counters.get(&edge.id).copied().unwrap_or(0);
            if count >= max {
                debug!(edge_id = %edge.id, max, "Loop exhausted");
                continue;
            }

            let Some(value) = ConditionEvaluator::edge_value(edge, &self.state) else {
                continue;
            };
            if !evaluator.evaluate(edge, Some(&value), &context)? {
                continue;
            }

            let iteration = count + 1;
            self.loop_counters.insert(edge.id.clone(), iteration);
            self.loop_inputs
                .insert(edge.to.clone(), (contribution_key(edge), value));
            info!(
                execution_id = %self.state.execution_id(),
                edge_id = %edge.id,
                iteration,
                max,
                target_wave = lp.target_wave,
                "Loop edge fired"
            );
            self.runtime.notify(ExecutionEvent::LoopIteration {
                execution_id: self.state.execution_id().to_string(),
                edge_id: edge.id.clone(),
                iteration,
            });
            return Ok(Some(lp.target_wave));
        }
        Ok(None)
    }

    fn record_failure(&self, node_id: &str, message: String) {
        self.state.fail(node_id, message.clone());
        self.runtime.notify(ExecutionEvent::NodeFailed {
            execution_id: self.state.execution_id().to_string(),
            node_id: node_id.to_string(),
            error: message,
        });
    }

    /// Nodes still marked running when the run ends (timeout) are failed.
    fn fail_in_flight(&self, reason: &str) {
        for node in &self.workflow.nodes {
            if self.state.node_status(&node.id) == NodeStatus::Running {
                self.record_failure(&node.id, format!("cancelled: {}", reason));
            }
        }
    }
}

/// Key a contribution is stored under when a node has several inputs.
fn contribution_key(edge: &Edge) -> String {
    match &edge.source_handle {
        Some(handle) => format!("{}.{}", edge.from, handle),
        None => edge.from.clone(),
    }
}

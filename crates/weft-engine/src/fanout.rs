//! Sub-workflow fan-out: one child run per element of a collection, on a
//! bounded pool of workers.
//!
//! Workers pull the next unclaimed index from a shared counter and write the
//! outcome into a pre-sized slot vector at that index. Slots are disjoint, so
//! results need no lock; totals are kept in atomics.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::task::JoinSet;
use tracing::{info, warn};

use weft_core::error::{Result, WeftError};
use weft_core::event::ExecutionEvent;
use weft_core::types::NodeContext;
use weft_core::workflow::NodeStatus;

use crate::dag::{DagExecutor, RunOptions};
use crate::runtime::Runtime;
use crate::state::ExecutionState;

/// What a fan-out does when a child run fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnError {
    /// Stop dispatching, let started items finish, surface the first error.
    #[default]
    FailFast,
    /// Run every item and report per-item outcomes.
    CollectPartial,
}

/// Config of a `sub_workflow` node.
#[derive(Debug, Clone, PartialEq)]
pub struct FanOutConfig {
    pub workflow_id: String,
    pub for_each: String,
    pub item_var: String,
    pub max_parallelism: usize,
    pub on_error: OnError,
}

#[derive(Debug, Deserialize)]
struct RawFanOutConfig {
    workflow_id: Option<String>,
    for_each: Option<String>,
    item_var: Option<String>,
    max_parallelism: Option<i64>,
    #[serde(default)]
    on_error: OnError,
}

impl FanOutConfig {
    pub fn from_node_config(
        node_id: &str,
        config: &Value,
        default_parallelism: usize,
    ) -> Result<Self> {
        let raw = RawFanOutConfig::deserialize(config)
            .map_err(|e| WeftError::invalid_config(node_id, e))?;

        let missing = |field: &str| WeftError::MissingConfig {
            node: node_id.to_string(),
            field: field.to_string(),
        };
        let workflow_id = raw
            .workflow_id
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| missing("workflow_id"))?;
        let for_each = raw
            .for_each
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| missing("for_each"))?;

        let max_parallelism = match raw.max_parallelism {
            Some(p) if p >= 1 => p as usize,
            Some(p) => {
                return Err(WeftError::invalid_config(
                    node_id,
                    format!("max_parallelism must be at least 1, got {}", p),
                ))
            }
            None => default_parallelism.max(1),
        };

        Ok(Self {
            workflow_id,
            for_each,
            item_var: raw
                .item_var
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "item".to_string()),
            max_parallelism,
            on_error: raw.on_error,
        })
    }
}

#[derive(Debug, Clone)]
enum ItemOutcome {
    Completed(Value),
    Failed(String),
}

/// Shared between the workers of one fan-out.
struct Pool {
    items: Vec<Value>,
    slots: Vec<OnceLock<ItemOutcome>>,
    next: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
    stop: AtomicBool,
    first_error: Mutex<Option<WeftError>>,
}

pub struct FanOut {
    runtime: Arc<Runtime>,
    config: FanOutConfig,
}

impl FanOut {
    pub fn new(runtime: Arc<Runtime>, config: FanOutConfig) -> Self {
        Self { runtime, config }
    }

    /// Expand `for_each` against the node's input and run the child workflow
    /// once per element.
    pub async fn run(&self, ctx: NodeContext, input: Value, state: &ExecutionState) -> Result<Value> {
        let max_depth = self.runtime.config().engine.max_depth;
        if ctx.depth + 1 > max_depth {
            return Err(WeftError::MaxDepthExceeded(max_depth));
        }

        let items = self.expand(input, state)?;
        let total = items.len();
        let workers = self.config.max_parallelism.min(total);
        info!(
            node_id = %ctx.node_id,
            workflow_id = %self.config.workflow_id,
            total,
            workers,
            "Fan-out starting"
        );

        let pool = Arc::new(Pool {
            slots: (0..total).map(|_| OnceLock::new()).collect(),
            items,
            next: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            stop: AtomicBool::new(false),
            first_error: Mutex::new(None),
        });

        let mut set = JoinSet::new();
        for _ in 0..workers {
            set.spawn(worker(
                self.runtime.clone(),
                self.config.clone(),
                ctx.clone(),
                pool.clone(),
            ));
        }
        while let Some(joined) = set.join_next().await {
            if let Err(e) = joined {
                warn!(node_id = %ctx.node_id, error = %e, "Fan-out worker did not finish");
            }
        }

        if let Some(err) = pool
            .first_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            return Err(err);
        }
        if ctx.cancel.is_cancelled() {
            return Err(WeftError::Cancelled);
        }

        let completed = pool.completed.load(Ordering::SeqCst);
        let failed = pool.failed.load(Ordering::SeqCst);
        info!(node_id = %ctx.node_id, total, completed, failed, "Fan-out finished");

        let items: Vec<Value> = pool
            .slots
            .iter()
            .enumerate()
            .map(|(index, slot)| match slot.get() {
                Some(ItemOutcome::Completed(output)) => {
                    json!({"index": index, "status": NodeStatus::Completed, "output": output})
                }
                Some(ItemOutcome::Failed(error)) => {
                    json!({"index": index, "status": NodeStatus::Failed, "error": error})
                }
                None => json!({"index": index, "status": NodeStatus::Skipped}),
            })
            .collect();

        Ok(json!({
            "summary": {"total": total, "completed": completed, "failed": failed},
            "items": items,
        }))
    }

    fn expand(&self, input: Value, state: &ExecutionState) -> Result<Vec<Value>> {
        let mut scope = Map::new();
        scope.insert("input".into(), input);
        scope.insert("variables".into(), state.variables_json());
        scope.insert("nodes".into(), Value::Object(state.outputs()));

        let expr = &self.config.for_each;
        match self.runtime.expressions().eval(expr, &scope)? {
            Value::Array(items) => Ok(items),
            other => Err(WeftError::expression(
                expr.as_str(),
                format!("for_each must yield an array, got {}", kind_of(&other)),
            )),
        }
    }
}

async fn worker(runtime: Arc<Runtime>, config: FanOutConfig, ctx: NodeContext, pool: Arc<Pool>) {
    let fail_fast = config.on_error == OnError::FailFast;

    loop {
        if pool.stop.load(Ordering::SeqCst) || ctx.cancel.is_cancelled() {
            break;
        }
        let index = pool.next.fetch_add(1, Ordering::SeqCst);
        let Some(item) = pool.items.get(index).cloned() else {
            break;
        };

        let outcome = match run_item(&runtime, &config, &ctx, item).await {
            Ok(output) => {
                pool.completed.fetch_add(1, Ordering::SeqCst);
                ItemOutcome::Completed(output)
            }
            Err(err) => {
                pool.failed.fetch_add(1, Ordering::SeqCst);
                warn!(node_id = %ctx.node_id, item_index = index, error = %err, "Fan-out item failed");
                let message = err.to_string();
                if fail_fast {
                    pool.stop.store(true, Ordering::SeqCst);
                    pool.first_error
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .get_or_insert(WeftError::node(
                            &ctx.node_id,
                            format!("item {} failed: {}", index, err),
                        ));
                }
                ItemOutcome::Failed(message)
            }
        };

        let status = match outcome {
            ItemOutcome::Completed(_) => NodeStatus::Completed,
            ItemOutcome::Failed(_) => NodeStatus::Failed,
        };
        let _ = pool.slots[index].set(outcome);
        runtime.notify(ExecutionEvent::FanOutItem {
            execution_id: ctx.execution_id.clone(),
            node_id: ctx.node_id.clone(),
            index,
            status,
        });
    }
}

async fn run_item(
    runtime: &Arc<Runtime>,
    config: &FanOutConfig,
    ctx: &NodeContext,
    item: Value,
) -> Result<Value> {
    let workflow = Arc::new(runtime.loader().load(&config.workflow_id).await?);

    let mut child_input = Map::new();
    child_input.insert(config.item_var.clone(), item);
    let state = Arc::new(ExecutionState::new(&workflow, Value::Object(child_input)));

    let options = RunOptions::default()
        .with_depth(ctx.depth + 1)
        .with_cancel(ctx.cancel.child_token());
    DagExecutor::new(runtime.clone())
        .execute(workflow.clone(), state.clone(), options)
        .await?;
    Ok(state.final_output(&workflow))
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let cfg = FanOutConfig::from_node_config(
            "fan",
            &json!({"workflow_id": "child", "for_each": "input.users"}),
            4,
        )
        .unwrap();
        assert_eq!(cfg.item_var, "item");
        assert_eq!(cfg.max_parallelism, 4);
        assert_eq!(cfg.on_error, OnError::FailFast);
    }

    #[test]
    fn config_reads_every_field() {
        let cfg = FanOutConfig::from_node_config(
            "fan",
            &json!({
                "workflow_id": "child",
                "for_each": "input.users",
                "item_var": "user",
                "max_parallelism": 2,
                "on_error": "collect_partial"
            }),
            4,
        )
        .unwrap();
        assert_eq!(cfg.item_var, "user");
        assert_eq!(cfg.max_parallelism, 2);
        assert_eq!(cfg.on_error, OnError::CollectPartial);
    }

    #[test]
    fn config_rejects_missing_and_invalid_fields() {
        let err = FanOutConfig::from_node_config("fan", &json!({"for_each": "input"}), 4).unwrap_err();
        assert!(matches!(err, WeftError::MissingConfig { ref field, .. } if field == "workflow_id"));

        let err = FanOutConfig::from_node_config(
            "fan",
            &json!({"workflow_id": "c", "for_each": "input", "max_parallelism": 0}),
            4,
        )
        .unwrap_err();
        assert!(matches!(err, WeftError::InvalidConfig { .. }));

        let err = FanOutConfig::from_node_config(
            "fan",
            &json!({"workflow_id": "c", "for_each": "input", "on_error": "shrug"}),
            4,
        )
        .unwrap_err();
        assert!(err.is_structural());
    }
}

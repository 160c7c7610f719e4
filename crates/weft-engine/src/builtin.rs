//! Built-in capabilities and tool functions every runtime starts with.

use std::sync::Arc;

use chrono::Utc;
use futures::future::BoxFuture;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use weft_core::error::{Result, WeftError};
use weft_core::traits::{Capability, ToolFunction};
use weft_core::types::{NodeContext, NodeOutput};

use crate::expression::ExpressionEngine;

// ── PassthroughCapability ───────────────────────────────────────

/// Returns `config.output` when set, otherwise forwards its input.
pub struct PassthroughCapability;

impl Capability for PassthroughCapability {
    fn execute(
        &self,
        _ctx: NodeContext,
        config: Value,
        input: Value,
    ) -> BoxFuture<'_, Result<NodeOutput>> {
        Box::pin(async move {
            let value = match config {
                Value::Object(mut map) => map.remove("output").unwrap_or(input),
                _ => input,
            };
            Ok(NodeOutput::new(value))
        })
    }
}

// ── BranchCapability ────────────────────────────────────────────

/// Two-way split. Evaluates `config.condition` with `input` bound to the
/// node's input and emits that input on handle `"true"` or `"false"`.
pub struct BranchCapability {
    expressions: Arc<ExpressionEngine>,
}

impl BranchCapability {
    pub fn new(expressions: Arc<ExpressionEngine>) -> Self {
        Self { expressions }
    }
}

impl Capability for BranchCapability {
    fn execute(
        &self,
        ctx: NodeContext,
        config: Value,
        input: Value,
    ) -> BoxFuture<'_, Result<NodeOutput>> {
        Box::pin(async move {
            let condition = condition_of(&config)?;
            let mut scope = Map::new();
            scope.insert("input".into(), input.clone());
            let taken = self.expressions.eval_bool(condition, &scope)?;
            tracing::debug!(node_id = %ctx.node_id, taken, "Branch evaluated");
            Ok(NodeOutput::branch(if taken { "true" } else { "false" }, input))
        })
    }

    fn validate(&self, config: &Value) -> Result<()> {
        condition_of(config).map(|_| ())
    }
}

fn condition_of(config: &Value) -> Result<&str> {
    config
        .get("condition")
        .and_then(Value::as_str)
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| WeftError::Config("branch requires a non-empty `condition` string".into()))
}

// ── CurrentTimeFunction ─────────────────────────────────────────

pub struct CurrentTimeFunction;

impl ToolFunction for CurrentTimeFunction {
    fn name(&self) -> &str {
        "current_time"
    }
    fn description(&self) -> &str {
        "Current UTC time as RFC 3339 and as a Unix timestamp."
    }
    fn parameters(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }
    fn call(&self, _arguments: Value, _ctx: NodeContext) -> BoxFuture<'_, Result<Value>> {
        Box::pin(async move {
            let now = Utc::now();
            Ok(json!({
                "iso": now.to_rfc3339(),
                "unix": now.timestamp(),
            }))
        })
    }
}

// ── GenerateIdFunction ──────────────────────────────────────────

pub struct GenerateIdFunction;

impl ToolFunction for GenerateIdFunction {
    fn name(&self) -> &str {
        "generate_id"
    }
    fn description(&self) -> &str {
        "Generate a random UUID, optionally with a prefix."
    }
    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "prefix": { "type": "string", "description": "Prepended as `<prefix>_<uuid>`" }
            }
        })
    }
    fn call(&self, arguments: Value, _ctx: NodeContext) -> BoxFuture<'_, Result<Value>> {
        Box::pin(async move {
            let id = Uuid::new_v4().to_string();
            let id = match arguments.get("prefix").and_then(Value::as_str) {
                Some(prefix) if !prefix.is_empty() => format!("{}_{}", prefix, id),
                _ => id,
            };
            Ok(json!({ "id": id }))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> NodeContext {
        NodeContext::new("exec", "wf", "node")
    }

    #[tokio::test]
    async fn passthrough_prefers_configured_output() {
        let out = PassthroughCapability
            .execute(ctx(), json!({"output": {"fixed": true}}), json!(1))
            .await
            .unwrap();
        assert_eq!(out.value, json!({"fixed": true}));

        let out = PassthroughCapability
            .execute(ctx(), json!({}), json!([1, 2]))
            .await
            .unwrap();
        assert_eq!(out.value, json!([1, 2]));
    }

    #[tokio::test]
    async fn branch_emits_on_matching_handle() {
        let branch = BranchCapability::new(Arc::new(ExpressionEngine::default()));
        let config = json!({"condition": "input.amount > 100"});

        let big = branch.execute(ctx(), config.clone(), json!({"amount": 500})).await.unwrap();
        assert_eq!(big.handles.get("true"), Some(&json!({"amount": 500})));
        assert!(!big.handles.contains_key("false"));

        let small = branch.execute(ctx(), config, json!({"amount": 5})).await.unwrap();
        assert!(small.handles.contains_key("false"));
    }

    #[test]
    fn branch_requires_condition() {
        let branch = BranchCapability::new(Arc::new(ExpressionEngine::default()));
        assert!(branch.validate(&json!({})).is_err());
        assert!(branch.validate(&json!({"condition": "  "})).is_err());
        assert!(branch.validate(&json!({"condition": "true"})).is_ok());
    }

    #[tokio::test]
    async fn generate_id_applies_prefix() {
        let out = GenerateIdFunction
            .call(json!({"prefix": "ord"}), ctx())
            .await
            .unwrap();
        let id = out["id"].as_str().unwrap();
        assert!(id.starts_with("ord_"));
        assert_eq!(id.len(), "ord_".len() + 36);
    }

    #[tokio::test]
    async fn current_time_reports_unix_seconds() {
        let out = CurrentTimeFunction.call(json!({}), ctx()).await.unwrap();
        assert!(out["unix"].as_i64().unwrap() > 1_600_000_000);
        assert!(out["iso"].is_string());
    }
}

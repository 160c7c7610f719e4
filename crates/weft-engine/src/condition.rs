use serde_json::{Map, Value};
use tracing::debug;

use weft_core::error::Result;
use weft_core::workflow::{Edge, NodeStatus};

use crate::expression::ExpressionEngine;
use crate::state::ExecutionState;

/// Decides whether execution flows along an edge.
pub struct ConditionEvaluator<'a> {
    expressions: &'a ExpressionEngine,
}

impl<'a> ConditionEvaluator<'a> {
    pub fn new(expressions: &'a ExpressionEngine) -> Self {
        Self { expressions }
    }

    /// The value an edge carries: the source's handle slot when the edge names
    /// one, otherwise its main output. `None` when the source did not complete
    /// (skipped, failed, not yet run) or never emitted the requested handle.
    pub fn edge_value(edge: &Edge, state: &ExecutionState) -> Option<Value> {
        if state.node_status(&edge.from) != NodeStatus::Completed {
            return None;
        }
        match &edge.source_handle {
            Some(handle) => state.get_handle_output(&edge.from, handle),
            None => state.get_node_output(&edge.from),
        }
    }

    /// Evaluate `edge` given the value it carries.
    ///
    /// A missing source value is a "no" vote, never an error. A blank condition
    /// always activates. Otherwise the condition runs with `output` bound to the
    /// carried value on top of `context` (run input, variables, node outputs).
    pub fn evaluate(
        &self,
        edge: &Edge,
        source_output: Option<&Value>,
        context: &Map<String, Value>,
    ) -> Result<bool> {
        let Some(output) = source_output else {
            debug!(edge_id = %edge.id, "Edge inactive: source produced no value");
            return Ok(false);
        };

        let Some(expr) = edge.condition_expr() else {
            return Ok(true);
        };

        let mut scope = context.clone();
        scope.insert("output".to_string(), output.clone());
        let active = self.expressions.eval_bool(expr, &scope)?;
        debug!(edge_id = %edge.id, active, "Edge condition evaluated");
        Ok(active)
    }
}

/// Names bound for every condition: `input`, `variables` and `nodes`.
pub fn condition_context(state: &ExecutionState) -> Map<String, Value> {
    let mut context = Map::new();
    context.insert("input".into(), state.input().clone());
    context.insert("variables".into(), state.variables_json());
    context.insert("nodes".into(), Value::Object(state.outputs()));
    context
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use weft_core::error::WeftError;
    use weft_core::types::NodeOutput;
    use weft_core::workflow::{Node, Workflow};

    fn state() -> ExecutionState {
        let wf = Workflow::new("wf", "t")
            .with_node(Node::new("split", "branch"))
            .with_node(Node::new("next", "passthrough"))
            .with_variable("limit", json!(10));
        ExecutionState::new(&wf, json!({"user": "ada"}))
    }

    #[test]
    fn empty_condition_always_activates() {
        let engine = ExpressionEngine::default();
        let eval = ConditionEvaluator::new(&engine);
        let edge = Edge::new("split", "next");
        assert!(eval.evaluate(&edge, Some(&json!(1)), &Map::new()).unwrap());
    }

    #[test]
    fn false_condition_never_activates() {
        let engine = ExpressionEngine::default();
        let eval = ConditionEvaluator::new(&engine);
        let edge = Edge::new("split", "next").with_condition("false");
        assert!(!eval.evaluate(&edge, Some(&json!(1)), &Map::new()).unwrap());
    }

    #[test]
    fn condition_sees_output_input_and_variables() {
        let engine = ExpressionEngine::default();
        let eval = ConditionEvaluator::new(&engine);
        let s = state();
        let ctx = condition_context(&s);
        let edge = Edge::new("split", "next")
            .with_condition(r#"output.score < variables.limit && input.user == "ada""#);
        assert!(eval.evaluate(&edge, Some(&json!({"score": 3})), &ctx).unwrap());
        assert!(!eval.evaluate(&edge, Some(&json!({"score": 30})), &ctx).unwrap());
    }

    #[test]
    fn non_boolean_condition_is_an_error() {
        let engine = ExpressionEngine::default();
        let eval = ConditionEvaluator::new(&engine);
        let edge = Edge::new("split", "next").with_condition("output.score");
        let err = eval
            .evaluate(&edge, Some(&json!({"score": 3})), &Map::new())
            .unwrap_err();
        assert!(matches!(err, WeftError::Expression { .. }));
    }

    #[test]
    fn missing_source_value_is_a_no_vote() {
        let engine = ExpressionEngine::default();
        let eval = ConditionEvaluator::new(&engine);
        // even an always-true edge stays inactive without a value
        let edge = Edge::new("split", "next");
        assert!(!eval.evaluate(&edge, None, &Map::new()).unwrap());
    }

    #[test]
    fn edge_value_follows_source_handle() {
        let s = state();
        s.complete("split", NodeOutput::branch("true", json!({"n": 1})));

        let on_true = Edge::new("split", "next").with_handle("true");
        let on_false = Edge::new("split", "next").with_handle("false");
        let plain = Edge::new("split", "next");

        assert_eq!(ConditionEvaluator::edge_value(&on_true, &s), Some(json!({"n": 1})));
        assert_eq!(ConditionEvaluator::edge_value(&on_false, &s), None);
        assert_eq!(ConditionEvaluator::edge_value(&plain, &s), Some(json!({"n": 1})));
    }

    #[test]
    fn skipped_source_carries_nothing() {
        let s = state();
        s.skip("split");
        let edge = Edge::new("split", "next");
        assert_eq!(ConditionEvaluator::edge_value(&edge, &s), None);
    }
}

//! Embedded expression language used by edge conditions, `for_each`, the
//! `branch` capability and `custom_code` tool functions.
//!
//! Expressions are rhai. Every entry of the context map is bound as a rhai
//! variable, with JSON objects and arrays exposed as rhai maps and arrays, so
//! `output.status == "ok" && input.retries < 3` reads naturally.

use rhai::{Dynamic, Engine, Scope};
use serde_json::{Map, Value};

use weft_core::error::{Result, WeftError};

pub struct ExpressionEngine {
    engine: Engine,
}

impl ExpressionEngine {
    pub fn new(max_operations: u64) -> Self {
        let mut engine = Engine::new();
        engine.set_max_operations(max_operations);
        engine.set_max_expr_depths(64, 32);
        Self { engine }
    }

    /// Evaluate a single expression and convert the result back to JSON.
    pub fn eval(&self, expr: &str, context: &Map<String, Value>) -> Result<Value> {
        let dynamic = self.eval_dynamic(expr, context)?;
        to_json(expr, &dynamic)
    }

    /// Evaluate an expression that must produce a boolean.
    pub fn eval_bool(&self, expr: &str, context: &Map<String, Value>) -> Result<bool> {
        let dynamic = self.eval_dynamic(expr, context)?;
        dynamic
            .as_bool()
            .map_err(|ty| WeftError::expression(expr, format!("expected a boolean, got {}", ty)))
    }

    /// Run a multi-statement script; the value of the last statement is returned.
    pub fn run_script(&self, code: &str, context: &Map<String, Value>) -> Result<Value> {
        let mut scope = build_scope(code, context)?;
        let dynamic = self
            .engine
            .eval_with_scope::<Dynamic>(&mut scope, code)
            .map_err(|e| WeftError::expression(summarize(code), e))?;
        to_json(code, &dynamic)
    }

    fn eval_dynamic(&self, expr: &str, context: &Map<String, Value>) -> Result<Dynamic> {
        let mut scope = build_scope(expr, context)?;
        self.engine
            .eval_expression_with_scope::<Dynamic>(&mut scope, expr)
            .map_err(|e| WeftError::expression(expr, e))
    }
}

impl Default for ExpressionEngine {
    fn default() -> Self {
        Self::new(100_000)
    }
}

fn build_scope(expr: &str, context: &Map<String, Value>) -> Result<Scope<'static>> {
    let mut scope = Scope::new();
    for (name, value) in context {
        let dynamic = rhai::serde::to_dynamic(value)
            .map_err(|e| WeftError::expression(summarize(expr), format!("binding `{}`: {}", name, e)))?;
        scope.push_dynamic(name.clone(), dynamic);
    }
    Ok(scope)
}

fn to_json(expr: &str, dynamic: &Dynamic) -> Result<Value> {
    rhai::serde::from_dynamic::<Value>(dynamic)
        .map_err(|e| WeftError::expression(summarize(expr), format!("result is not JSON: {}", e)))
}

/// First line of a script, for error messages.
fn summarize(code: &str) -> String {
    let first = code.trim().lines().next().unwrap_or_default();
    if first.len() < code.trim().len() {
        format!("{} ...", first)
    } else {
        first.to_string()
    }
}

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use weft_core::error::{Result, WeftError};
use weft_core::traits::ToolFunction;
use weft_core::types::{NodeContext, ToolDefinition};

/// Registry of built-in tool functions, referenced by `builtin` definitions.
#[derive(Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, Arc<dyn ToolFunction>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a function under its own name.
    pub fn register(&mut self, function: impl ToolFunction) {
        let name = function.name().to_string();
        self.functions.insert(name, Arc::new(function));
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        self.functions.remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolFunction>> {
        self.functions.get(name).cloned()
    }

    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Definitions for every registered function.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.functions
            .values()
            .map(|f| ToolDefinition {
                name: f.name().to_string(),
                description: f.description().to_string(),
                parameters: f.parameters(),
            })
            .collect()
    }

    /// Call a function by name, bounded by `timeout`.
    pub async fn execute(
        &self,
        name: &str,
        arguments: Value,
        ctx: NodeContext,
        timeout: Duration,
    ) -> Result<Value> {
        let function = self
            .get(name)
            .ok_or_else(|| WeftError::ToolNotFound(name.to_string()))?;

        match tokio::time::timeout(timeout, function.call(arguments, ctx)).await {
            Ok(result) => result,
            Err(_) => Err(WeftError::ToolTimeout {
                tool: name.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    /// Registry with `current_time` and `generate_id` registered.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(crate::builtin::CurrentTimeFunction);
        registry.register(crate::builtin::GenerateIdFunction);
        registry
    }
}

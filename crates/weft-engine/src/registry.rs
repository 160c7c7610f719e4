use std::collections::HashMap;
use std::sync::Arc;

use weft_core::traits::Capability;

use crate::builtin::{BranchCapability, PassthroughCapability};
use crate::expression::ExpressionEngine;

/// Registry mapping node type names to capabilities.
#[derive(Default)]
pub struct CapabilityRegistry {
    capabilities: HashMap<String, Arc<dyn Capability>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a capability under a node type name. Replaces any previous entry.
    pub fn register(&mut self, node_type: impl Into<String>, capability: impl Capability) {
        self.capabilities
            .insert(node_type.into(), Arc::new(capability));
    }

    pub fn unregister(&mut self, node_type: &str) -> bool {
        self.capabilities.remove(node_type).is_some()
    }

    pub fn get(&self, node_type: &str) -> Option<Arc<dyn Capability>> {
        self.capabilities.get(node_type).cloned()
    }

    pub fn contains(&self, node_type: &str) -> bool {
        self.capabilities.contains_key(node_type)
    }

    /// Registered node type names, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.capabilities.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Registry with `passthrough` and `branch` registered.
    pub fn with_builtins(expressions: Arc<ExpressionEngine>) -> Self {
        let mut registry = Self::new();
        registry.register("passthrough", PassthroughCapability);
        registry.register("branch", BranchCapability::new(expressions));
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_are_registered() {
        let registry = CapabilityRegistry::with_builtins(Arc::new(ExpressionEngine::default()));
        assert_eq!(registry.list(), vec!["branch", "passthrough"]);
        assert!(registry.contains("branch"));
        assert!(registry.get("http").is_none());
    }

    #[test]
    fn unregister_removes_entry() {
        let mut registry = CapabilityRegistry::new();
        registry.register("passthrough", PassthroughCapability);
        assert!(registry.unregister("passthrough"));
        assert!(!registry.unregister("passthrough"));
        assert!(registry.list().is_empty());
    }
}

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use weft_core::config::WeftConfig;
use weft_core::error::{Result, WeftError};
use weft_core::event::ExecutionEvent;
use weft_core::traits::{
    Capability, NoopNotifier, Notifier, ReasoningClient, TemplateResolver, ToolFunction,
    WorkflowLoader,
};

use crate::expression::ExpressionEngine;
use crate::loader::InMemoryLoader;
use crate::registry::CapabilityRegistry;
use crate::template::PlaceholderResolver;
use crate::tool_loop::FunctionRegistry;

/// Everything a run needs besides the workflow itself. Built once per engine
/// instance and shared by reference with every executor, including nested ones.
pub struct Runtime {
    capabilities: CapabilityRegistry,
    reasoners: HashMap<String, Arc<dyn ReasoningClient>>,
    functions: FunctionRegistry,
    loader: Arc<dyn WorkflowLoader>,
    notifier: Arc<dyn Notifier>,
    resolver: Arc<dyn TemplateResolver>,
    expressions: Arc<ExpressionEngine>,
    http: reqwest::Client,
    config: WeftConfig,
}

impl Runtime {
    pub fn builder(config: WeftConfig) -> RuntimeBuilder {
        RuntimeBuilder::new(config)
    }

    pub fn capabilities(&self) -> &CapabilityRegistry {
        &self.capabilities
    }

    pub fn reasoner(&self, node_type: &str) -> Option<Arc<dyn ReasoningClient>> {
        self.reasoners.get(node_type).cloned()
    }

    pub fn functions(&self) -> &FunctionRegistry {
        &self.functions
    }

    pub fn loader(&self) -> &Arc<dyn WorkflowLoader> {
        &self.loader
    }

    pub fn resolver(&self) -> &Arc<dyn TemplateResolver> {
        &self.resolver
    }

    pub fn expressions(&self) -> &ExpressionEngine {
        &self.expressions
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn config(&self) -> &WeftConfig {
        &self.config
    }

    pub fn notify(&self, event: ExecutionEvent) {
        self.notifier.notify(event);
    }
}

/// Builder for [`Runtime`]. Starts with the built-in capabilities and tool
/// functions, an empty in-memory loader and a no-op notifier.
pub struct RuntimeBuilder {
    config: WeftConfig,
    expressions: Arc<ExpressionEngine>,
    capabilities: CapabilityRegistry,
    reasoners: HashMap<String, Arc<dyn ReasoningClient>>,
    functions: FunctionRegistry,
    loader: Option<Arc<dyn WorkflowLoader>>,
    notifier: Option<Arc<dyn Notifier>>,
    resolver: Option<Arc<dyn TemplateResolver>>,
}

impl RuntimeBuilder {
    pub fn new(config: WeftConfig) -> Self {
        let expressions = Arc::new(ExpressionEngine::new(config.expressions.max_operations));
        Self {
            capabilities: CapabilityRegistry::with_builtins(expressions.clone()),
            functions: FunctionRegistry::with_builtins(),
            expressions,
            config,
            reasoners: HashMap::new(),
            loader: None,
            notifier: None,
            resolver: None,
        }
    }

    pub fn capability(mut self, node_type: impl Into<String>, capability: impl Capability) -> Self {
        self.capabilities.register(node_type, capability);
        self
    }

    /// Make `node_type` a reasoning node type backed by `client`.
    pub fn reasoner(mut self, node_type: impl Into<String>, client: impl ReasoningClient) -> Self {
        self.reasoners.insert(node_type.into(), Arc::new(client));
        self
    }

    pub fn function(mut self, function: impl ToolFunction) -> Self {
        self.functions.register(function);
        self
    }

    pub fn loader(self, loader: impl WorkflowLoader) -> Self {
        self.loader_arc(Arc::new(loader))
    }

    pub fn loader_arc(mut self, loader: Arc<dyn WorkflowLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    pub fn notifier(self, notifier: impl Notifier) -> Self {
        self.notifier_arc(Arc::new(notifier))
    }

    pub fn notifier_arc(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn resolver(mut self, resolver: impl TemplateResolver) -> Self {
        self.resolver = Some(Arc::new(resolver));
        self
    }

    pub fn build(self) -> Result<Arc<Runtime>> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.config.http.timeout_secs))
            .user_agent(self.config.http.user_agent.clone())
            .build()
            .map_err(|e| WeftError::Http(e.to_string()))?;

        let strict = self.config.engine.strict_templates;
        Ok(Arc::new(Runtime {
            capabilities: self.capabilities,
            reasoners: self.reasoners,
            functions: self.functions,
            loader: self
                .loader
                .unwrap_or_else(|| Arc::new(InMemoryLoader::new())),
            notifier: self.notifier.unwrap_or_else(|| Arc::new(NoopNotifier)),
            resolver: self
                .resolver
                .unwrap_or_else(|| Arc::new(PlaceholderResolver::new(strict))),
            expressions: self.expressions,
            http,
            config: self.config,
        }))
    }
}

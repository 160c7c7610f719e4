use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;
use tracing::debug;

use weft_core::error::{Result, WeftError};
use weft_core::traits::{Capability, ReasoningClient};
use weft_core::types::{NodeContext, NodeOutput};
use weft_core::workflow::Node;

use crate::fanout::{FanOut, FanOutConfig};
use crate::runtime::Runtime;
use crate::state::ExecutionState;
use crate::template::{resolve_config, template_variables, Templated};
use crate::tool_loop::{self, ToolCallConfig, ToolCallLoop, ToolCallMode};

/// Node type handled by the fan-out strategy rather than a capability.
pub const SUB_WORKFLOW: &str = "sub_workflow";

/// How a node type is executed.
pub enum NodeKind {
    SubWorkflow,
    Reasoning(Arc<dyn ReasoningClient>),
    Capability(Arc<dyn Capability>),
}

/// Dispatches one node to its strategy: fan-out, reasoning (single call or
/// tool-call loop), or a registered capability behind the template stage.
#[derive(Clone)]
pub struct NodeExecutor {
    runtime: Arc<Runtime>,
}

impl NodeExecutor {
    pub fn new(runtime: Arc<Runtime>) -> Self {
        Self { runtime }
    }

    /// Resolve a node type. `sub_workflow` wins, then reasoning clients, then capabilities.
    pub fn kind_of(&self, node_type: &str) -> Option<NodeKind> {
        if node_type == SUB_WORKFLOW {
            return Some(NodeKind::SubWorkflow);
        }
        if let Some(client) = self.runtime.reasoner(node_type) {
            return Some(NodeKind::Reasoning(client));
        }
        self.runtime
            .capabilities()
            .get(node_type)
            .map(NodeKind::Capability)
    }

    /// Pre-run check of a node's type and config.
    pub fn validate(&self, node: &Node) -> Result<()> {
        let config = node.config_value();
        match self.kind_of(&node.node_type) {
            None => Err(WeftError::UnknownNodeType {
                node: node.id.clone(),
                node_type: node.node_type.clone(),
            }),
            Some(NodeKind::SubWorkflow) => {
                FanOutConfig::from_node_config(
                    &node.id,
                    &config,
                    self.runtime.config().engine.default_max_parallelism,
                )?;
                Ok(())
            }
            Some(NodeKind::Reasoning(_)) => {
                ToolCallConfig::from_node_config(&node.id, &config, &self.runtime.config().tool_calls)?;
                let functions = tool_loop::parse_functions(&node.id, &config)?;
                for f in &functions {
                    f.validate(&node.id, &self.runtime)?;
                }
                Ok(())
            }
            Some(NodeKind::Capability(capability)) => {
                capability.validate(&config).map_err(|e| {
                    if e.is_structural() {
                        e
                    } else {
                        WeftError::invalid_config(&node.id, e)
                    }
                })
            }
        }
    }

    /// Execute `node` with its composed `input`. Config templates are resolved
    /// against `state` as it stands when the node starts.
    pub fn execute(
        &self,
        ctx: NodeContext,
        node: &Node,
        input: Value,
        state: Arc<ExecutionState>,
    ) -> BoxFuture<'static, Result<NodeOutput>> {
        let runtime = self.runtime.clone();
        let kind = self.kind_of(&node.node_type);
        let node = node.clone();

        Box::pin(async move {
            let variables = template_variables(&state, &input);
            let config = node.config_value();

            match kind {
                None => Err(WeftError::UnknownNodeType {
                    node: node.id,
                    node_type: node.node_type,
                }),
                Some(NodeKind::Capability(capability)) => {
                    let templated =
                        Templated::new(capability, runtime.resolver().clone(), variables);
                    templated.execute(ctx, config, input).await
                }
                Some(NodeKind::SubWorkflow) => {
                    let config = resolve_config(runtime.resolver().as_ref(), &config, &variables)?;
                    let fanout_config = FanOutConfig::from_node_config(
                        &node.id,
                        &config,
                        runtime.config().engine.default_max_parallelism,
                    )?;
                    let value = FanOut::new(runtime, fanout_config)
                        .run(ctx, input, &state)
                        .await?;
                    Ok(NodeOutput::new(value))
                }
                Some(NodeKind::Reasoning(client)) => {
                    let config = resolve_config(runtime.resolver().as_ref(), &config, &variables)?;
                    let call_config = ToolCallConfig::from_node_config(
                        &node.id,
                        &config,
                        &runtime.config().tool_calls,
                    )?;
                    let functions = tool_loop::parse_functions(&node.id, &config)?;
                    debug!(node_id = %node.id, mode = ?call_config.mode, "Reasoning node");

                    let value = match call_config.mode {
                        ToolCallMode::Auto => {
                            let output = ToolCallLoop::new(runtime, client, call_config, functions)
                                .run(ctx, config, input)
                                .await?;
                            serde_json::to_value(output)?
                        }
                        ToolCallMode::Manual => {
                            tool_loop::single_call(
                                client.as_ref(),
                                &call_config,
                                &functions,
                                ctx,
                                config,
                                input,
                            )
                            .await?
                        }
                    };
                    Ok(NodeOutput::new(value))
                }
            }
        })
    }
}

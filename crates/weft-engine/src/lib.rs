pub mod builtin;
pub mod condition;
pub mod dag;
pub mod expression;
pub mod fanout;
pub mod loader;
pub mod node_executor;
pub mod path;
pub mod registry;
pub mod runtime;
pub mod scheduler;
pub mod state;
pub mod template;
pub mod tool_loop;

pub use condition::ConditionEvaluator;
pub use dag::{DagExecutor, RunOptions};
pub use expression::ExpressionEngine;
pub use fanout::{FanOut, FanOutConfig, OnError};
pub use loader::{DirectoryLoader, InMemoryLoader};
pub use node_executor::{NodeExecutor, NodeKind, SUB_WORKFLOW};
pub use registry::CapabilityRegistry;
pub use runtime::{Runtime, RuntimeBuilder};
pub use scheduler::{schedule, Schedule};
pub use state::{ExecutionSnapshot, ExecutionState, NodeRecord};
pub use template::{PlaceholderResolver, Templated};
pub use tool_loop::{
    FunctionDefinition, FunctionKind, FunctionRegistry, StoppedReason, ToolCallConfig,
    ToolCallLoop, ToolCallMode, ToolLoopOutput,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WeftError {
    // Structural / validation errors
    #[error("Duplicate node id: {0}")]
    DuplicateNode(String),

    #[error("Duplicate edge id: {0}")]
    DuplicateEdge(String),

    #[error("Edge {edge} references unknown node: {node}")]
    DanglingEdge { edge: String, node: String },

    #[error("Workflow contains a cycle among non-loop edges: {}", .0.join(", "))]
    Cycle(Vec<String>),

    #[error("Invalid loop edge {edge}: {message}")]
    InvalidLoop { edge: String, message: String },

    #[error("Unknown node type: {node_type} (node {node})")]
    UnknownNodeType { node: String, node_type: String },

    #[error("Node {node} is missing required config field: {field}")]
    MissingConfig { node: String, field: String },

    #[error("Invalid config for node {node}: {message}")]
    InvalidConfig { node: String, message: String },

    #[error("Sub-workflow nesting exceeded max depth ({0})")]
    MaxDepthExceeded(usize),

    #[error("Workflow not found: {0}")]
    WorkflowNotFound(String),

    // Expression errors
    #[error("Expression `{expr}` failed: {message}")]
    Expression { expr: String, message: String },

    // Execution errors
    #[error("Node {node} failed: {message}")]
    NodeExecution { node: String, message: String },

    #[error("Reasoning call failed: {0}")]
    Reasoning(String),

    #[error("Template error: {0}")]
    Template(String),

    #[error("HTTP error: {0}")]
    Http(String),

    // Tool errors
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool execution failed: {tool}: {message}")]
    ToolExecution { tool: String, message: String },

    #[error("Tool timeout after {timeout_ms}ms: {tool}")]
    ToolTimeout { tool: String, timeout_ms: u64 },

    // Run control
    #[error("Run exceeded timeout ({timeout_ms}ms)")]
    Timeout { timeout_ms: u64 },

    #[error("Execution cancelled")]
    Cancelled,

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl WeftError {
    /// Malformed graph or config: detected before a run starts, never retried.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::DuplicateNode(_)
                | Self::DuplicateEdge(_)
                | Self::DanglingEdge { .. }
                | Self::Cycle(_)
                | Self::InvalidLoop { .. }
                | Self::UnknownNodeType { .. }
                | Self::MissingConfig { .. }
                | Self::InvalidConfig { .. }
                | Self::MaxDepthExceeded(_)
                | Self::WorkflowNotFound(_)
        )
    }

    pub fn node(node: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::NodeExecution {
            node: node.into(),
            message: message.to_string(),
        }
    }

    pub fn expression(expr: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Expression {
            expr: expr.into(),
            message: message.to_string(),
        }
    }

    pub fn invalid_config(node: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::InvalidConfig {
            node: node.into(),
            message: message.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, WeftError>;

pub mod config;
pub mod error;
pub mod event;
pub mod traits;
pub mod types;
pub mod workflow;

pub use config::WeftConfig;
pub use error::{Result, WeftError};
pub use event::{EventBus, ExecutionEvent};
pub use types::*;
pub use workflow::{Edge, LoopSpec, Node, NodeStatus, Position, Workflow};

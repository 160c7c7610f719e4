use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WeftError};

/// Top-level Weft configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WeftConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub tool_calls: ToolCallDefaults,
    #[serde(default)]
    pub expressions: ExpressionConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub workflows: WorkflowsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum sub-workflow nesting.
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    /// Fan-out worker count when a node does not set `max_parallelism`.
    #[serde(default = "default_max_parallelism")]
    pub default_max_parallelism: usize,
    /// Applied to top-level runs that do not pass their own timeout.
    #[serde(default)]
    pub run_timeout_secs: Option<u64>,
    /// Unresolved template placeholders are an error instead of an empty string.
    #[serde(default)]
    pub strict_templates: bool,
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            default_max_parallelism: default_max_parallelism(),
            run_timeout_secs: None,
            strict_templates: false,
            event_capacity: default_event_capacity(),
        }
    }
}

impl EngineConfig {
    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_secs.map(Duration::from_secs)
    }
}

/// Engine-wide defaults for `tool_call_config` fields a node leaves out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallDefaults {
    #[serde(default = "default_tool_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_timeout_per_tool")]
    pub timeout_per_tool_secs: u64,
    #[serde(default = "default_total_timeout")]
    pub total_timeout_secs: u64,
}

impl Default for ToolCallDefaults {
    fn default() -> Self {
        Self {
            max_iterations: default_tool_max_iterations(),
            timeout_per_tool_secs: default_timeout_per_tool(),
            total_timeout_secs: default_total_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpressionConfig {
    /// Operation budget per expression evaluation; guards runaway scripts.
    #[serde(default = "default_max_operations")]
    pub max_operations: u64,
}

impl Default for ExpressionConfig {
    fn default() -> Self {
        Self {
            max_operations: default_max_operations(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_http_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowsConfig {
    #[serde(default = "default_workflows_dir")]
    pub dir: String,
}

impl Default for WorkflowsConfig {
    fn default() -> Self {
        Self {
            dir: default_workflows_dir(),
        }
    }
}

fn default_max_depth() -> usize { 8 }
fn default_max_parallelism() -> usize { 4 }
fn default_event_capacity() -> usize { 256 }
fn default_tool_max_iterations() -> u32 { 10 }
fn default_timeout_per_tool() -> u64 { 30 }
fn default_total_timeout() -> u64 { 300 }
fn default_max_operations() -> u64 { 100_000 }
fn default_http_timeout() -> u64 { 30 }
fn default_user_agent() -> String { format!("weft/{}", env!("CARGO_PKG_VERSION")) }
fn default_log_filter() -> String { "weft=info,warn".to_string() }
fn default_workflows_dir() -> String { "./workflows".to_string() }

impl WeftConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| WeftError::ConfigNotFound(path.display().to_string()))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(content);

        toml::from_str(&expanded).map_err(|e| WeftError::Config(e.to_string()))
    }

    /// Resolve the workflows directory (expand ~).
    pub fn workflows_dir(&self) -> PathBuf {
        let dir = &self.workflows.dir;
        if let Some(rest) = dir.strip_prefix("~/") {
            if let Some(home) = dirs_home() {
                return home.join(rest);
            }
        }
        PathBuf::from(dir)
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("TEST_WEFT_VAR", "hello");
        let result = expand_env_vars("key = \"${TEST_WEFT_VAR}\"");
        assert_eq!(result, "key = \"hello\"");
        std::env::remove_var("TEST_WEFT_VAR");
    }

    #[test]
    fn test_expand_env_vars_missing() {
        let result = expand_env_vars("key = \"${NONEXISTENT_WEFT_VAR}\"");
        assert_eq!(result, "key = \"${NONEXISTENT_WEFT_VAR}\"");
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = WeftConfig::from_toml_str("").unwrap();
        assert_eq!(config.engine.max_depth, 8);
        assert_eq!(config.engine.default_max_parallelism, 4);
        assert!(config.engine.run_timeout().is_none());
        assert!(!config.engine.strict_templates);
        assert_eq!(config.tool_calls.max_iterations, 10);
        assert_eq!(config.tool_calls.timeout_per_tool_secs, 30);
        assert_eq!(config.tool_calls.total_timeout_secs, 300);
        assert_eq!(config.expressions.max_operations, 100_000);
        assert_eq!(config.log.filter, "weft=info,warn");
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config = WeftConfig::from_toml_str(
            r#"
[engine]
run_timeout_secs = 12

[tool_calls]
max_iterations = 4
"#,
        )
        .unwrap();
        assert_eq!(config.engine.run_timeout(), Some(Duration::from_secs(12)));
        assert_eq!(config.engine.max_depth, 8);
        assert_eq!(config.tool_calls.max_iterations, 4);
        assert_eq!(config.tool_calls.total_timeout_secs, 300);
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = WeftConfig::from_toml_str("[engine\nmax_depth = 1").unwrap_err();
        assert!(matches!(err, WeftError::Config(_)));
    }
}

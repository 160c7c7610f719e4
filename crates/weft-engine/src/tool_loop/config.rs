use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use weft_core::config::ToolCallDefaults;
use weft_core::error::{Result, WeftError};

/// Whether a reasoning node drives the tool-call loop itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallMode {
    /// Execute requested tools and call the model again until it finishes.
    Auto,
    /// One reasoning call; tool calls are returned, not executed.
    #[default]
    Manual,
}

/// Parsed `tool_call_config` of a reasoning node.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallConfig {
    pub mode: ToolCallMode,
    pub max_iterations: u32,
    pub timeout_per_tool: Duration,
    pub total_timeout: Duration,
    pub stop_on_tool_failure: bool,
    pub parallel_tools: bool,
}

impl ToolCallConfig {
    pub fn from_defaults(defaults: &ToolCallDefaults) -> Self {
        Self {
            mode: ToolCallMode::default(),
            max_iterations: defaults.max_iterations,
            timeout_per_tool: Duration::from_secs(defaults.timeout_per_tool_secs),
            total_timeout: Duration::from_secs(defaults.total_timeout_secs),
            stop_on_tool_failure: false,
            parallel_tools: false,
        }
    }

    /// Read `tool_call_config` out of a node config. Missing fields fall back
    /// to the engine defaults; a missing object means all defaults.
    pub fn from_node_config(
        node_id: &str,
        config: &Value,
        defaults: &ToolCallDefaults,
    ) -> Result<Self> {
        let mut parsed = Self::from_defaults(defaults);
        let raw = match config.get("tool_call_config") {
            None | Some(Value::Null) => return Ok(parsed),
            Some(value) => RawToolCallConfig::deserialize(value)
                .map_err(|e| WeftError::invalid_config(node_id, format!("tool_call_config: {}", e)))?,
        };

        if let Some(mode) = raw.mode {
            parsed.mode = mode;
        }
        if let Some(max) = raw.max_iterations {
            if max == 0 {
                return Err(WeftError::invalid_config(
                    node_id,
                    "tool_call_config.max_iterations must be at least 1",
                ));
            }
            parsed.max_iterations = max;
        }
        if let Some(spec) = raw.timeout_per_tool {
            parsed.timeout_per_tool = spec.to_duration(node_id, "timeout_per_tool")?;
        }
        if let Some(spec) = raw.total_timeout {
            parsed.total_timeout = spec.to_duration(node_id, "total_timeout")?;
        }
        parsed.stop_on_tool_failure = raw.stop_on_tool_failure;
        parsed.parallel_tools = raw.parallel_tools;
        Ok(parsed)
    }
}

impl Default for ToolCallConfig {
    fn default() -> Self {
        Self::from_defaults(&ToolCallDefaults::default())
    }
}

#[derive(Debug, Deserialize)]
struct RawToolCallConfig {
    #[serde(default)]
    mode: Option<ToolCallMode>,
    #[serde(default)]
    max_iterations: Option<u32>,
    #[serde(default)]
    timeout_per_tool: Option<DurationSpec>,
    #[serde(default)]
    total_timeout: Option<DurationSpec>,
    #[serde(default)]
    stop_on_tool_failure: bool,
    #[serde(default)]
    parallel_tools: bool,
}

/// Seconds as a number, or a string such as `"500ms"`, `"30s"`, `"5m"`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DurationSpec {
    Seconds(f64),
    Text(String),
}

impl DurationSpec {
    fn to_duration(&self, node_id: &str, field: &str) -> Result<Duration> {
        let parsed = match self {
            Self::Seconds(secs) if *secs > 0.0 => Duration::try_from_secs_f64(*secs).ok(),
            Self::Seconds(_) => None,
            Self::Text(text) => parse_duration(text),
        };
        parsed.ok_or_else(|| {
            WeftError::invalid_config(
                node_id,
                format!("tool_call_config.{} is not a positive duration", field),
            )
        })
    }
}

/// Parse `"250ms"`, `"30s"`, `"5m"`, `"1h"` or a bare number of seconds.
pub fn parse_duration(text: &str) -> Option<Duration> {
    let text = text.trim();
    let split = text
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(text.len());
    let (number, unit) = text.split_at(split);
    let number: f64 = number.parse().ok()?;
    if !number.is_finite() || number <= 0.0 {
        return None;
    }
    let secs = match unit.trim() {
        "ms" => number / 1000.0,
        "" | "s" => number,
        "m" => number * 60.0,
        "h" => number * 3600.0,
        _ => return None,
    };
    Duration::try_from_secs_f64(secs).ok()
}

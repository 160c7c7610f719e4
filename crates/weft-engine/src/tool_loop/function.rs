//! Tool functions a reasoning node may call.
//!
//! A `FunctionDefinition` names the function the model sees and says how a
//! call is carried out: a registered built-in, a nested workflow run, an
//! inline script, or an HTTP operation.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::debug;

use weft_core::error::{Result, WeftError};
use weft_core::types::{NodeContext, ToolDefinition};

use crate::dag::{DagExecutor, RunOptions};
use crate::path;
use crate::runtime::Runtime;
use crate::state::ExecutionState;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON Schema of the call arguments.
    #[serde(default = "default_parameters")]
    pub parameters: Value,
    #[serde(flatten)]
    pub kind: FunctionKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FunctionKind {
    /// A function from the runtime's `FunctionRegistry`; `builtin` defaults to `name`.
    Builtin {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        builtin: Option<String>,
    },
    SubWorkflow {
        workflow_id: String,
        /// Child input key to dotted path into the call arguments.
        #[serde(default)]
        input_mapping: HashMap<String, String>,
        /// Dotted path into `{nodes, output}` of the child run.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output_extractor: Option<String>,
    },
    CustomCode {
        code: String,
        #[serde(default = "default_language")]
        language: String,
    },
    Openapi {
        operation: OpenApiOperation,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        auth: Option<OpenApiAuth>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenApiOperation {
    #[serde(default = "default_method")]
    pub method: String,
    pub base_url: String,
    /// Path template; `{param}` segments are filled from the arguments.
    pub path: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OpenApiAuth {
    Bearer { token: String },
    ApiKey { header: String, value: String },
    Basic {
        username: String,
        #[serde(default)]
        password: Option<String>,
    },
}

fn default_parameters() -> Value {
    json!({ "type": "object", "properties": {} })
}

fn default_language() -> String {
    "rhai".to_string()
}

fn default_method() -> String {
    "GET".to_string()
}

impl FunctionDefinition {
    pub fn builtin(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            parameters: default_parameters(),
            kind: FunctionKind::Builtin { builtin: None },
        }
    }

    pub fn custom_code(name: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            parameters: default_parameters(),
            kind: FunctionKind::CustomCode {
                code: code.into(),
                language: default_language(),
            },
        }
    }

    pub fn sub_workflow(name: impl Into<String>, workflow_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            parameters: default_parameters(),
            kind: FunctionKind::SubWorkflow {
                workflow_id: workflow_id.into(),
                input_mapping: HashMap::new(),
                output_extractor: None,
            },
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// What the reasoning client is told about this function.
    pub fn tool_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.parameters.clone(),
        }
    }

    /// Pre-run check: built-ins must be registered, scripts must be rhai.
    pub fn validate(&self, node_id: &str, runtime: &Runtime) -> Result<()> {
        match &self.kind {
            FunctionKind::Builtin { builtin } => {
                let target = builtin.as_deref().unwrap_or(&self.name);
                if runtime.functions().get(target).is_none() {
                    return Err(WeftError::invalid_config(
                        node_id,
                        format!("function `{}` refers to unknown builtin `{}`", self.name, target),
                    ));
                }
            }
            FunctionKind::CustomCode { language, .. } if !is_rhai(language) => {
                return Err(WeftError::invalid_config(
                    node_id,
                    format!("function `{}` uses unsupported language `{}`", self.name, language),
                ));
            }
            FunctionKind::Openapi { operation, .. } => {
                parse_method(&operation.method).map_err(|e| WeftError::invalid_config(node_id, e))?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Carry out one call. The caller bounds it with the per-tool timeout.
    pub async fn invoke(
        &self,
        runtime: &Arc<Runtime>,
        arguments: Value,
        ctx: NodeContext,
    ) -> Result<Value> {
        match &self.kind {
            FunctionKind::Builtin { builtin } => {
                let target = builtin.as_deref().unwrap_or(&self.name);
                let function = runtime
                    .functions()
                    .get(target)
                    .ok_or_else(|| WeftError::ToolNotFound(target.to_string()))?;
                function.call(arguments, ctx).await
            }
            FunctionKind::SubWorkflow {
                workflow_id,
                input_mapping,
                output_extractor,
            } => {
                self.call_workflow(runtime, workflow_id, input_mapping, output_extractor.as_deref(), arguments, ctx)
                    .await
            }
            FunctionKind::CustomCode { code, language } => {
                if !is_rhai(language) {
                    return Err(self.failure(format!("unsupported language `{}`", language)));
                }
                let mut scope = Map::new();
                scope.insert("args".into(), arguments);
                runtime
                    .expressions()
                    .run_script(code, &scope)
                    .map_err(|e| self.failure(e))
            }
            FunctionKind::Openapi { operation, auth } => {
                self.call_http(runtime, operation, auth.as_ref(), arguments).await
            }
        }
    }

    async fn call_workflow(
        &self,
        runtime: &Arc<Runtime>,
        workflow_id: &str,
        input_mapping: &HashMap<String, String>,
        output_extractor: Option<&str>,
        arguments: Value,
        ctx: NodeContext,
    ) -> Result<Value> {
        let max_depth = runtime.config().engine.max_depth;
        if ctx.depth + 1 > max_depth {
            return Err(WeftError::MaxDepthExceeded(max_depth));
        }

        let workflow = Arc::new(runtime.loader().load(workflow_id).await?);
        let input = if input_mapping.is_empty() {
            arguments
        } else {
            Value::Object(
                input_mapping
                    .iter()
                    .map(|(key, from)| {
                        let value = path::lookup(&arguments, from).cloned().unwrap_or(Value::Null);
                        (key.clone(), value)
                    })
                    .collect(),
            )
        };

        let state = Arc::new(ExecutionState::new(&workflow, input));
        let options = RunOptions::default()
            .with_depth(ctx.depth + 1)
            .with_cancel(ctx.cancel.child_token());
        DagExecutor::new(runtime.clone())
            .execute(workflow.clone(), state.clone(), options)
            .await
            .map_err(|e| self.failure(e))?;

        let result = json!({
            "nodes": state.outputs(),
            "output": state.final_output(&workflow),
        });
        Ok(match output_extractor {
            Some(p) => path::lookup(&result, p).cloned().unwrap_or(Value::Null),
            None => result["output"].clone(),
        })
    }

    async fn call_http(
        &self,
        runtime: &Runtime,
        operation: &OpenApiOperation,
        auth: Option<&OpenApiAuth>,
        arguments: Value,
    ) -> Result<Value> {
        let method = parse_method(&operation.method).map_err(|e| self.failure(e))?;
        let mut remaining = match arguments {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => return Err(self.failure(format!("arguments must be an object, got {}", other))),
        };
        let path = fill_path(&operation.path, &mut remaining).map_err(|e| self.failure(e))?;
        let url = format!("{}{}", operation.base_url.trim_end_matches('/'), path);

        let mut request = runtime.http().request(method.clone(), &url);
        for (name, value) in &operation.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        request = match auth {
            Some(OpenApiAuth::Bearer { token }) => request.bearer_auth(token),
            Some(OpenApiAuth::ApiKey { header, value }) => request.header(header.as_str(), value.as_str()),
            Some(OpenApiAuth::Basic { username, password }) => {
                request.basic_auth(username, password.as_ref())
            }
            None => request,
        };
        request = if method == reqwest::Method::GET || method == reqwest::Method::DELETE {
            let query: Vec<(String, String)> = remaining
                .into_iter()
                .map(|(k, v)| (k, plain_text(&v)))
                .collect();
            request.query(&query)
        } else {
            request.json(&Value::Object(remaining))
        };

        debug!(function = %self.name, method = %method, url = %url, "Calling HTTP operation");
        let response = request
            .send()
            .await
            .map_err(|e| WeftError::Http(e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| WeftError::Http(e.to_string()))?;

        if !status.is_success() {
            return Err(self.failure(format!("HTTP {}: {}", status.as_u16(), body)));
        }
        Ok(serde_json::from_str(&body).unwrap_or(Value::String(body)))
    }

    fn failure(&self, message: impl std::fmt::Display) -> WeftError {
        WeftError::ToolExecution {
            tool: self.name.clone(),
            message: message.to_string(),
        }
    }
}

fn is_rhai(language: &str) -> bool {
    language.eq_ignore_ascii_case("rhai")
}

fn parse_method(method: &str) -> std::result::Result<reqwest::Method, String> {
    reqwest::Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .map_err(|_| format!("invalid HTTP method `{}`", method))
}

/// Substitute `{param}` segments, percent-encoded, removing used arguments.
fn fill_path(template: &str, arguments: &mut Map<String, Value>) -> std::result::Result<String, String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        let Some(close) = rest[open..].find('}').map(|c| open + c) else {
            break;
        };
        let name = &rest[open + 1..close];
        let value = arguments
            .remove(name)
            .ok_or_else(|| format!("missing path parameter `{}`", name))?;
        out.push_str(&rest[..open]);
        out.push_str(&urlencoding::encode(&plain_text(&value)));
        rest = &rest[close + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

fn plain_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_each_kind() {
        let defs: Vec<FunctionDefinition> = serde_json::from_value(json!([
            {"name": "now", "type": "builtin", "builtin": "current_time"},
            {"name": "enrich", "type": "sub_workflow", "workflow_id": "enrich-user",
             "input_mapping": {"user": "user_id"}, "output_extractor": "output.profile"},
            {"name": "add", "type": "custom_code", "code": "args.a + args.b"},
            {"name": "get_user", "type": "openapi",
             "operation": {"method": "get", "base_url": "https://api.test", "path": "/users/{id}"},
             "auth": {"type": "bearer", "token": "t"}}
        ]))
        .unwrap();

        assert!(matches!(defs[0].kind, FunctionKind::Builtin { builtin: Some(ref b) } if b == "current_time"));
        assert!(matches!(defs[1].kind, FunctionKind::SubWorkflow { ref workflow_id, .. } if workflow_id == "enrich-user"));
        assert!(matches!(defs[2].kind, FunctionKind::CustomCode { ref language, .. } if language == "rhai"));
        assert!(matches!(defs[3].kind, FunctionKind::Openapi { auth: Some(OpenApiAuth::Bearer { .. }), .. }));
        assert_eq!(defs[2].parameters["type"], "object");
    }

    #[test]
    fn fills_path_parameters() {
        let mut args = json!({"org": "acme", "id": 42, "verbose": true})
            .as_object()
            .cloned()
            .unwrap();
        let path = fill_path("/orgs/{org}/users/{id}", &mut args).unwrap();
        assert_eq!(path, "/orgs/acme/users/42");
        assert_eq!(args.len(), 1);
        assert!(args.contains_key("verbose"));
    }

    #[test]
    fn path_parameters_are_encoded_as_one_segment() {
        let mut args = json!({"id": "../admin?drop=1#x", "name": "Ada Lovelace"})
            .as_object()
            .cloned()
            .unwrap();
        let path = fill_path("/users/{id}/{name}", &mut args).unwrap();
        assert_eq!(path, "/users/..%2Fadmin%3Fdrop%3D1%23x/Ada%20Lovelace");
    }

    #[test]
    fn missing_path_parameter_is_an_error() {
        let mut args = Map::new();
        assert!(fill_path("/users/{id}", &mut args).is_err());
    }

    #[test]
    fn tool_definition_mirrors_definition() {
        let def = FunctionDefinition::custom_code("add", "args.a + args.b").with_description("adds");
        let tool = def.tool_definition();
        assert_eq!(tool.name, "add");
        assert_eq!(tool.description, "adds");
    }

    #[test]
    fn method_parsing() {
        assert_eq!(parse_method("post").unwrap(), reqwest::Method::POST);
        assert!(parse_method("NOT A METHOD").is_err());
    }
}

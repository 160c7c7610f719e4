//! Template resolution, applied as a stage between the node executor and the
//! raw capability.
//!
//! Placeholders look like `{{ nodes.fetch.body.id }}`. The variables a node
//! sees are `input` (the run input), `data` (the node's own composed input),
//! `variables` (workflow + execution variables) and `nodes` (outputs so far).

use std::sync::{Arc, OnceLock};

use futures::future::BoxFuture;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;

use weft_core::error::{Result, WeftError};
use weft_core::traits::{Capability, TemplateResolver};
use weft_core::types::{NodeContext, NodeOutput};

use crate::path;
use crate::state::ExecutionState;

fn placeholder() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z0-9_\-\.\[\]]+)\s*\}\}").expect("placeholder pattern is valid")
    })
}

/// Resolves `{{ path }}` placeholders by dotted-path lookup.
///
/// Strings are inserted verbatim, other JSON values in their compact JSON form.
/// Missing or null values become an empty string, or an error when `strict`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaceholderResolver {
    strict: bool,
}

impl PlaceholderResolver {
    pub fn new(strict: bool) -> Self {
        Self { strict }
    }
}

impl TemplateResolver for PlaceholderResolver {
    fn resolve(&self, template: &str, variables: &Value) -> Result<String> {
        let mut out = String::with_capacity(template.len());
        let mut last = 0;

        for caps in placeholder().captures_iter(template) {
            let (Some(whole), Some(path)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            out.push_str(&template[last..whole.start()]);
            last = whole.end();

            match path::lookup(variables, path.as_str()) {
                Some(Value::String(s)) => out.push_str(s),
                Some(Value::Null) | None => {
                    if self.strict {
                        return Err(WeftError::Template(format!(
                            "unresolved placeholder `{}`",
                            path.as_str()
                        )));
                    }
                    debug!(placeholder = path.as_str(), "Unresolved placeholder left empty");
                }
                Some(other) => out.push_str(&other.to_string()),
            }
        }

        out.push_str(&template[last..]);
        Ok(out)
    }
}

/// Resolve every string leaf of `config`. Strings without `{{` are left alone.
pub fn resolve_config(
    resolver: &dyn TemplateResolver,
    config: &Value,
    variables: &Value,
) -> Result<Value> {
    Ok(match config {
        Value::String(s) if s.contains("{{") => Value::String(resolver.resolve(s, variables)?),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| resolve_config(resolver, v, variables))
                .collect::<Result<_>>()?,
        ),
        Value::Object(map) => {
            let mut resolved = Map::with_capacity(map.len());
            for (k, v) in map {
                resolved.insert(k.clone(), resolve_config(resolver, v, variables)?);
            }
            Value::Object(resolved)
        }
        other => other.clone(),
    })
}

/// The variables visible to a node's templates.
pub fn template_variables(state: &ExecutionState, data: &Value) -> Value {
    let mut vars = Map::new();
    vars.insert("input".into(), state.input().clone());
    vars.insert("data".into(), data.clone());
    vars.insert("variables".into(), state.variables_json());
    vars.insert("nodes".into(), Value::Object(state.outputs()));
    Value::Object(vars)
}

/// Capability decorator: resolves the config's templates, then delegates.
pub struct Templated {
    inner: Arc<dyn Capability>,
    resolver: Arc<dyn TemplateResolver>,
    variables: Value,
}

impl Templated {
    pub fn new(
        inner: Arc<dyn Capability>,
        resolver: Arc<dyn TemplateResolver>,
        variables: Value,
    ) -> Self {
        Self {
            inner,
            resolver,
            variables,
        }
    }
}

impl Capability for Templated {
    fn execute(
        &self,
        ctx: NodeContext,
        config: Value,
        input: Value,
    ) -> BoxFuture<'_, Result<NodeOutput>> {
        Box::pin(async move {
            let resolved = resolve_config(self.resolver.as_ref(), &config, &self.variables)?;
            self.inner.execute(ctx, resolved, input).await
        })
    }

    fn validate(&self, config: &Value) -> Result<()> {
        self.inner.validate(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars() -> Value {
        json!({
            "input": {"user": {"name": "Ada"}},
            "nodes": {"fetch": {"ids": [4, 5]}},
            "variables": {"base": "https://api.example.com"}
        })
    }

    #[test]
    fn substitutes_strings_and_json() {
        let r = PlaceholderResolver::default();
        assert_eq!(
            r.resolve("Hello {{ input.user.name }}!", &vars()).unwrap(),
            "Hello Ada!"
        );
        assert_eq!(
            r.resolve("{{variables.base}}/items/{{ nodes.fetch.ids[1] }}", &vars()).unwrap(),
            "https://api.example.com/items/5"
        );
        assert_eq!(r.resolve("ids={{ nodes.fetch.ids }}", &vars()).unwrap(), "ids=[4,5]");
    }

    #[test]
    fn missing_placeholder_lenient_and_strict() {
        assert_eq!(
            PlaceholderResolver::new(false)
                .resolve("x{{ nodes.nope }}y", &vars())
                .unwrap(),
            "xy"
        );
        let err = PlaceholderResolver::new(true)
            .resolve("x{{ nodes.nope }}y", &vars())
            .unwrap_err();
        assert!(matches!(err, WeftError::Template(_)));
    }

    #[test]
    fn resolves_nested_config() {
        let r = PlaceholderResolver::default();
        let config = json!({
            "url": "{{ variables.base }}/users",
            "headers": [{"x-user": "{{ input.user.name }}"}],
            "retries": 3
        });
        let resolved = resolve_config(&r, &config, &vars()).unwrap();
        assert_eq!(
            resolved,
            json!({
                "url": "https://api.example.com/users",
                "headers": [{"x-user": "Ada"}],
                "retries": 3
            })
        );
    }

    struct Echo;

    impl Capability for Echo {
        fn execute(
            &self,
            _ctx: NodeContext,
            config: Value,
            _input: Value,
        ) -> BoxFuture<'_, Result<NodeOutput>> {
            Box::pin(async move { Ok(NodeOutput::new(config)) })
        }
    }

    #[tokio::test]
    async fn decorator_resolves_before_delegating() {
        let cap = Templated::new(
            Arc::new(Echo),
            Arc::new(PlaceholderResolver::default()),
            vars(),
        );
        let out = cap
            .execute(
                NodeContext::new("e", "w", "n"),
                json!({"greeting": "hi {{ input.user.name }}"}),
                Value::Null,
            )
            .await
            .unwrap();
        assert_eq!(out.value, json!({"greeting": "hi Ada"}));
    }
}

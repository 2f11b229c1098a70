//! Rendering of `{{ ... }}` expressions in node configuration.
//!
//! Supported forms:
//! - `{{key}}` / `{{ key.sub.0 }}` - value lookup against the run context
//! - `{{json key}}` - the value as pretty-printed JSON text
//! - `{{{key}}}` - same as `{{key}}`; output is never HTML-escaped
//!
//! `this` refers to the whole context. A key that does not resolve renders
//! as an empty string rather than failing the node.

use crate::Context;
use regex::{Captures, Regex};
use serde_json::Value;
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::OnceLock;

/// A helper turns a resolved value (or `None` when the lookup missed) into
/// the text that replaces the expression.
pub type Helper = fn(Option<&Value>) -> String;

fn expression_regex() -> &'static Regex {
    static EXPRESSION: OnceLock<Regex> = OnceLock::new();
    EXPRESSION.get_or_init(|| {
        Regex::new(r"\{\{\{?\s*(?:([A-Za-z_][A-Za-z0-9_]*)\s+)?([^\s{}]+)\s*\}?\}\}")
            .expect("valid regex")
    })
}

/// Template renderer with its helper table.
///
/// Built once per engine and passed to every executor call; helpers cannot
/// be added after construction.
#[derive(Clone)]
pub struct TemplateEngine {
    helpers: HashMap<&'static str, Helper>,
}

impl TemplateEngine {
    /// Engine with the standard helpers (`json`).
    pub fn new() -> Self {
        Self::builder().helper("json", json_helper).build()
    }

    pub fn builder() -> TemplateEngineBuilder {
        TemplateEngineBuilder {
            helpers: HashMap::new(),
        }
    }

    pub fn has_helper(&self, name: &str) -> bool {
        self.helpers.contains_key(name)
    }

    /// Substitute every expression in `template` against `context`.
    pub fn render(&self, template: &str, context: &Context) -> String {
        expression_regex()
            .replace_all(template, |caps: &Captures| {
                let path = &caps[2];
                let value = lookup(context, path);
                match caps.get(1) {
                    Some(helper_name) => match self.helpers.get(helper_name.as_str()) {
                        Some(helper) => helper(value.as_deref()),
                        None => {
                            tracing::warn!(
                                "Template references unknown helper '{}', rendering nothing",
                                helper_name.as_str()
                            );
                            String::new()
                        }
                    },
                    None => value.as_deref().map(display_value).unwrap_or_default(),
                }
            })
            .into_owned()
    }

    /// Render an optional field, keeping `None` as `None`.
    pub fn render_opt(&self, template: Option<&str>, context: &Context) -> Option<String> {
        template.map(|t| self.render(t, context))
    }
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

pub struct TemplateEngineBuilder {
    helpers: HashMap<&'static str, Helper>,
}

impl TemplateEngineBuilder {
    pub fn helper(mut self, name: &'static str, helper: Helper) -> Self {
        self.helpers.insert(name, helper);
        self
    }

    pub fn build(self) -> TemplateEngine {
        TemplateEngine {
            helpers: self.helpers,
        }
    }
}

fn lookup<'a>(context: &'a Context, path: &str) -> Option<Cow<'a, Value>> {
    let mut segments = path.split('.');
    let head = segments.next()?;

    let mut current: Cow<'a, Value> = if head == "this" {
        Cow::Owned(Value::Object(context.as_map().clone()))
    } else {
        Cow::Borrowed(context.get(head)?)
    };

    for segment in segments {
        current = match current {
            Cow::Borrowed(value) => Cow::Borrowed(child(value, segment)?),
            Cow::Owned(value) => Cow::Owned(child(&value, segment)?.clone()),
        };
    }
    Some(current)
}

fn child<'v>(value: &'v Value, segment: &str) -> Option<&'v Value> {
    match value {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

fn json_helper(value: Option<&Value>) -> String {
    value
        .and_then(|v| serde_json::to_string_pretty(v).ok())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context() -> Context {
        Context::new()
            .with(
                "googleForm",
                json!({
                    "respondentEmail": "ada@example.com",
                    "responses": {"Name": "Ada"},
                    "tags": ["a", "b"]
                }),
            )
            .with("count", json!(3))
    }

    #[test]
    fn test_renders_nested_paths() {
        let engine = TemplateEngine::new();
        let out = engine.render(
            "Hi {{googleForm.responses.Name}} <{{ googleForm.respondentEmail }}>, tag {{googleForm.tags.1}}",
            &context(),
        );
        assert_eq!(out, "Hi Ada <ada@example.com>, tag b");
    }

    #[test]
    fn test_missing_keys_render_empty() {
        let engine = TemplateEngine::new();
        let out = engine.render("[{{nope}}][{{googleForm.missing.deeper}}]", &context());
        assert_eq!(out, "[][]");
    }

    #[test]
    fn test_json_helper_embeds_pretty_json() {
        let engine = TemplateEngine::new();
        let out = engine.render("{{json googleForm.responses}}", &context());
        assert_eq!(out, "{\n  \"Name\": \"Ada\"\n}");

        let whole = engine.render("{{json this}}", &Context::new().with("n", json!(1)));
        assert_eq!(whole, "{\n  \"n\": 1\n}");
    }

    #[test]
    fn test_triple_stash_is_not_escaped() {
        let engine = TemplateEngine::new();
        let ctx = Context::new().with("html", json!("<b>&</b>"));
        assert_eq!(engine.render("{{{html}}}|{{html}}", &ctx), "<b>&</b>|<b>&</b>");
    }

    #[test]
    fn test_scalars_and_objects() {
        let engine = TemplateEngine::new();
        assert_eq!(engine.render("{{count}}", &context()), "3");
        assert_eq!(
            engine.render("{{googleForm.responses}}", &context()),
            "{\"Name\":\"Ada\"}"
        );
    }

    #[test]
    fn test_unknown_helper_renders_nothing() {
        let engine = TemplateEngine::new();
        assert!(engine.has_helper("json"));
        assert_eq!(engine.render("a{{upper count}}b", &context()), "ab");
    }

    #[test]
    fn test_custom_helper_registered_at_construction() {
        let engine = TemplateEngine::builder()
            .helper("len", |v| {
                v.and_then(|v| v.as_array())
                    .map(|a| a.len().to_string())
                    .unwrap_or_default()
            })
            .build();
        assert_eq!(engine.render("{{len googleForm.tags}}", &context()), "2");
        assert!(!engine.has_helper("json"));
    }
}

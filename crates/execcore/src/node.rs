use crate::{Context, NodeConfig, NodeError, NodeType, StepRunner, TemplateEngine};
use async_trait::async_trait;
use serde_json::Value;

/// Core trait that every node type implements.
///
/// Implementations validate their configuration, render templated fields
/// and perform their side effect through [`NodeInvocation::steps`]. Status
/// publication and context merging are handled by the caller, identically
/// for every node type.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    fn node_type(&self) -> NodeType;

    async fn execute(&self, invocation: &NodeInvocation<'_>) -> Result<NodeOutcome, NodeError>;

    fn description(&self) -> &str {
        "A workflow node"
    }
}

/// What a node contributes to the run context.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeOutcome {
    /// Context flows through untouched (triggers).
    PassThrough,
    /// `value` is stored under `variable`.
    Output { variable: String, value: Value },
}

impl NodeOutcome {
    pub fn output(variable: impl Into<String>, value: Value) -> Self {
        NodeOutcome::Output {
            variable: variable.into(),
            value,
        }
    }

    /// Apply this outcome to the context produced by earlier nodes.
    pub fn apply(self, context: &Context) -> Context {
        match self {
            NodeOutcome::PassThrough => context.clone(),
            NodeOutcome::Output { variable, value } => context.clone().with(variable, value),
        }
    }
}

/// Everything an executor sees for one node of one run.
pub struct NodeInvocation<'a> {
    pub node_id: &'a str,
    pub node_type: NodeType,
    pub config: &'a NodeConfig,
    pub context: &'a Context,
    /// User the workflow runs on behalf of.
    pub user_id: &'a str,
    pub steps: &'a dyn StepRunner,
    pub templates: &'a TemplateEngine,
}

impl<'a> NodeInvocation<'a> {
    /// Step name scoped to this node, so two nodes of the same type never
    /// share a memoized result.
    pub fn step_name(&self, step: &str) -> String {
        format!("{}:{}", self.node_id, step)
    }

    /// Non-empty string config value, or a configuration error.
    pub fn require_str(&self, key: &str, message: &str) -> Result<&'a str, NodeError> {
        self.optional_str(key)
            .ok_or_else(|| NodeError::Configuration(message.to_string()))
    }

    /// String config value; empty or whitespace-only strings count as absent.
    pub fn optional_str(&self, key: &str) -> Option<&'a str> {
        self.config
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
    }

    /// The configured variable name the node's output is stored under.
    pub fn variable_name(&self) -> Result<&'a str, NodeError> {
        self.require_str("variableName", "Variable name is required.")
    }

    /// Render a template against the current context.
    pub fn render(&self, template: &str) -> String {
        self.templates.render(template, self.context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_outcome_apply() {
        let ctx = Context::new().with("a", json!(1));
        assert_eq!(NodeOutcome::PassThrough.apply(&ctx), ctx);

        let next = NodeOutcome::output("b", json!(2)).apply(&ctx);
        assert_eq!(next.get("a"), Some(&json!(1)));
        assert_eq!(next.get("b"), Some(&json!(2)));
    }
}

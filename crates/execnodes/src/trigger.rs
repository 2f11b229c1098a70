use async_trait::async_trait;
use execcore::{NodeError, NodeExecutor, NodeInvocation, NodeOutcome, NodeType};

/// Entry point of a workflow. Trigger nodes perform no side effect; the
/// trigger payload is already in the context when they run.
pub struct TriggerExecutor {
    node_type: NodeType,
}

impl TriggerExecutor {
    pub fn new(node_type: NodeType) -> Self {
        debug_assert!(node_type.is_trigger());
        Self { node_type }
    }
}

#[async_trait]
impl NodeExecutor for TriggerExecutor {
    fn node_type(&self) -> NodeType {
        self.node_type
    }

    async fn execute(&self, _invocation: &NodeInvocation<'_>) -> Result<NodeOutcome, NodeError> {
        Ok(NodeOutcome::PassThrough)
    }

    fn description(&self) -> &str {
        match self.node_type {
            NodeType::GoogleFormTrigger => "Starts the workflow when a Google Form is submitted",
            NodeType::StripeTrigger => "Starts the workflow on a Stripe event",
            _ => "Starts the workflow manually",
        }
    }
}

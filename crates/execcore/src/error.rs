use thiserror::Error;

/// Top-level error for a workflow run.
#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Invalid trigger: {0}")]
    InvalidTrigger(String),

    #[error("Run {0} is being executed by another worker")]
    RunInProgress(String),

    #[error("Node {node_id} failed: {source}")]
    Node {
        node_id: String,
        #[source]
        source: NodeError,
    },

    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Step failed: {0}")]
    Step(NodeError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl FlowError {
    /// Whether redelivering the triggering event could change the outcome.
    pub fn is_retriable(&self) -> bool {
        match self {
            FlowError::InvalidTrigger(_) => false,
            FlowError::RunInProgress(_) => true,
            FlowError::Node { source, .. } => source.is_retriable(),
            FlowError::Workflow(_) => false,
            FlowError::Store(e) => e.is_retriable(),
            FlowError::Step(e) => e.is_retriable(),
            FlowError::Serialization(_) => false,
        }
    }

    /// Render the error and its source chain, one cause per line.
    pub fn chain(&self) -> String {
        let mut out = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            out.push_str("\n  caused by: ");
            out.push_str(&cause.to_string());
            source = cause.source();
        }
        out
    }
}

impl From<NodeError> for FlowError {
    fn from(error: NodeError) -> Self {
        match error {
            NodeError::Workflow(e) => FlowError::Workflow(e),
            NodeError::Store(e) => FlowError::Store(e),
            other => FlowError::Step(other),
        }
    }
}

/// Failure raised by a node executor or by a step inside the step runner.
#[derive(Error, Debug, Clone)]
pub enum NodeError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Credential not found: {0}")]
    CredentialNotFound(String),

    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Remote service rejected the request with status {status}: {message}")]
    Remote { status: u16, message: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl NodeError {
    pub fn is_retriable(&self) -> bool {
        match self {
            NodeError::Transient(_) => true,
            NodeError::Store(e) => e.is_retriable(),
            NodeError::Configuration(_)
            | NodeError::CredentialNotFound(_)
            | NodeError::Remote { .. }
            | NodeError::Serialization(_)
            | NodeError::Workflow(_) => false,
        }
    }

    /// Classify an HTTP status from a remote service.
    ///
    /// 408, 429 and 5xx are transient; any other non-success status is a
    /// rejection that retrying will not fix.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        if status == 408 || status == 429 || status >= 500 {
            NodeError::Transient(format!("HTTP {}: {}", status, message))
        } else {
            NodeError::Remote { status, message }
        }
    }
}

/// Defects in the workflow definition itself. Never retriable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("Workflow not found: {0}")]
    NotFound(String),

    #[error("Workflow has cyclic dependencies among nodes")]
    CyclicDependency,

    #[error("Connection {connection_id} references unknown node {node_id}")]
    DanglingConnection {
        connection_id: String,
        node_id: String,
    },

    #[error("Duplicate node id: {0}")]
    DuplicateNode(String),

    #[error("Unknown node type: {0}")]
    UnknownNodeType(String),
}

/// Persistent store failures.
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Stored data is corrupt: {0}")]
    Integrity(String),

    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_retriable(&self) -> bool {
        matches!(self, StoreError::Backend(_))
    }
}

/// Realtime subscription failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("Unknown subscription token")]
    UnknownToken,

    #[error("Subscription token expired")]
    TokenExpired,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(NodeError::from_status(503, "unavailable").is_retriable());
        assert!(NodeError::from_status(429, "slow down").is_retriable());
        assert!(NodeError::from_status(408, "timeout").is_retriable());
        assert!(!NodeError::from_status(400, "bad request").is_retriable());
        assert!(!NodeError::from_status(404, "missing").is_retriable());
    }

    #[test]
    fn test_node_error_conversion_keeps_workflow_errors() {
        let flow: FlowError = NodeError::Workflow(WorkflowError::CyclicDependency).into();
        assert!(matches!(flow, FlowError::Workflow(WorkflowError::CyclicDependency)));
        assert!(!flow.is_retriable());

        let flow: FlowError = NodeError::Transient("reset".into()).into();
        assert!(matches!(flow, FlowError::Step(_)));
        assert!(flow.is_retriable());
    }

    #[test]
    fn test_chain_includes_source() {
        let error = FlowError::Node {
            node_id: "http-1".into(),
            source: NodeError::Configuration("Endpoint is required.".into()),
        };
        let chain = error.chain();
        assert!(chain.starts_with("Node http-1 failed"));
        assert!(chain.contains("caused by: Configuration error: Endpoint is required."));
    }
}

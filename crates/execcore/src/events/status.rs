use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Lifecycle status of a node as seen by live observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Loading,
    Success,
    Error,
}

/// Message published on a node type's topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusMessage {
    pub node_id: String,
    pub status: NodeStatus,
}

impl StatusMessage {
    pub fn new(node_id: impl Into<String>, status: NodeStatus) -> Self {
        Self {
            node_id: node_id.into(),
            status,
        }
    }
}

/// Sink for node status updates.
///
/// Delivery is best effort toward observers; a failed publish must never
/// fail the node, so the method has no error channel.
#[async_trait]
pub trait StatusPublisher: Send + Sync {
    async fn publish(&self, topic: &str, message: StatusMessage);
}

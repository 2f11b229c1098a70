use crate::NodeType;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub type WorkflowId = String;
pub type NodeId = String;

/// Free-form node configuration as authored in the editor.
pub type NodeConfig = Map<String, Value>;

/// Immutable snapshot of a workflow used for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowGraph {
    pub id: WorkflowId,
    pub name: String,
    /// Owner of the workflow; executors act on behalf of this user.
    pub user_id: String,
    #[serde(default)]
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub connections: Vec<Connection>,
}

impl WorkflowGraph {
    pub fn new(id: impl Into<String>, name: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            user_id: user_id.into(),
            nodes: Vec::new(),
            connections: Vec::new(),
        }
    }

    pub fn add_node(&mut self, node: NodeSpec) -> NodeId {
        let id = node.id.clone();
        self.nodes.push(node);
        id
    }

    /// Connect `from` to `to` using the editor's default port labels.
    pub fn connect(&mut self, from: impl Into<String>, to: impl Into<String>) {
        let from = from.into();
        let to = to.into();
        self.connections.push(Connection {
            id: format!("{}->{}", from, to),
            from_node_id: from,
            to_node_id: to,
            from_output: "source-1".to_string(),
            to_input: "target-1".to_string(),
        });
    }

    pub fn find_node(&self, id: &str) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

/// Node specification in a workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    #[serde(default, alias = "data")]
    pub config: NodeConfig,
}

impl NodeSpec {
    pub fn new(id: impl Into<String>, node_type: NodeType) -> Self {
        Self {
            id: id.into(),
            node_type,
            config: Map::new(),
        }
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }
}

/// Directed dependency between two nodes.
///
/// The port labels are carried for the editor; ordering only looks at the
/// endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub id: String,
    pub from_node_id: NodeId,
    pub to_node_id: NodeId,
    #[serde(default)]
    pub from_output: String,
    #[serde(default)]
    pub to_input: String,
}

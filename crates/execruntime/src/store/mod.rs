//! Store implementations: an in-memory one for tests and one-shot runs, and
//! a SQLite one that survives restarts.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use execcore::{NodeType, StoreError, WorkflowError, WorkflowGraph};
use serde_json::Value;

/// Parse a workflow definition from JSON.
///
/// Node type tags are checked before decoding, so an unknown tag surfaces
/// as [`WorkflowError::UnknownNodeType`] rather than a generic decode error.
pub fn parse_workflow(json: &str) -> Result<WorkflowGraph, StoreError> {
    let value: Value = serde_json::from_str(json)
        .map_err(|e| StoreError::Integrity(format!("Invalid workflow JSON: {}", e)))?;

    if let Some(nodes) = value.get("nodes").and_then(Value::as_array) {
        for node in nodes {
            if let Some(tag) = node.get("type").and_then(Value::as_str) {
                tag.parse::<NodeType>()?;
            }
        }
    }

    serde_json::from_value(value)
        .map_err(|e| StoreError::Integrity(format!("Invalid workflow definition: {}", e)))
}

pub(crate) fn workflow_not_found(workflow_id: &str) -> StoreError {
    StoreError::Workflow(WorkflowError::NotFound(workflow_id.to_string()))
}

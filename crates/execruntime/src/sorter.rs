use execcore::{Connection, NodeSpec, WorkflowError, WorkflowGraph};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

/// Order a workflow's nodes so every node comes after all of its
/// predecessors.
pub fn sort_workflow(workflow: &WorkflowGraph) -> Result<Vec<NodeSpec>, WorkflowError> {
    sort_nodes(&workflow.nodes, &workflow.connections)
}

/// Topologically sort `nodes` along `connections`.
///
/// Among nodes that are ready at the same time, the one listed first in
/// `nodes` is emitted first, so the result depends only on the input.
/// Without connections the input order is returned as is.
pub fn sort_nodes(
    nodes: &[NodeSpec],
    connections: &[Connection],
) -> Result<Vec<NodeSpec>, WorkflowError> {
    let graph = build_graph(nodes, connections)?;

    if connections.is_empty() {
        return Ok(nodes.to_vec());
    }

    // parallel edges are counted once per edge on both sides
    let mut in_degree: Vec<usize> = graph
        .node_indices()
        .map(|idx| graph.neighbors_directed(idx, Direction::Incoming).count())
        .collect();

    let mut ready: BinaryHeap<Reverse<usize>> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, degree)| **degree == 0)
        .map(|(position, _)| Reverse(position))
        .collect();

    let mut ordered = Vec::with_capacity(nodes.len());
    while let Some(Reverse(position)) = ready.pop() {
        let idx = NodeIndex::new(position);
        ordered.push(nodes[graph[idx]].clone());

        for next in graph.neighbors_directed(idx, Direction::Outgoing) {
            let degree = &mut in_degree[next.index()];
            *degree -= 1;
            if *degree == 0 {
                ready.push(Reverse(next.index()));
            }
        }
    }

    if ordered.len() < nodes.len() {
        tracing::warn!(
            "Workflow graph has a cycle: {} of {} nodes could be ordered",
            ordered.len(),
            nodes.len()
        );
        return Err(WorkflowError::CyclicDependency);
    }

    Ok(ordered)
}

/// Node weights are positions in `nodes`; graph indices match them.
fn build_graph(
    nodes: &[NodeSpec],
    connections: &[Connection],
) -> Result<DiGraph<usize, ()>, WorkflowError> {
    let mut graph = DiGraph::with_capacity(nodes.len(), connections.len());
    let mut node_to_index: HashMap<&str, NodeIndex> = HashMap::with_capacity(nodes.len());

    for (position, node) in nodes.iter().enumerate() {
        let idx = graph.add_node(position);
        if node_to_index.insert(node.id.as_str(), idx).is_some() {
            return Err(WorkflowError::DuplicateNode(node.id.clone()));
        }
    }

    for conn in connections {
        let endpoint = |node_id: &str| {
            node_to_index
                .get(node_id)
                .copied()
                .ok_or_else(|| WorkflowError::DanglingConnection {
                    connection_id: conn.id.clone(),
                    node_id: node_id.to_string(),
                })
        };
        let from = endpoint(conn.from_node_id.as_str())?;
        let to = endpoint(conn.to_node_id.as_str())?;
        graph.add_edge(from, to, ());
    }

    Ok(graph)
}

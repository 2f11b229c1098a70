use execcore::{
    Context, NodeError, NodeExecutor, NodeInvocation, NodeOutcome, NodeStatus, StatusMessage,
    StatusPublisher,
};

/// Run one node with the status protocol every node type shares.
///
/// Publishes `loading` before any work, then exactly one of `success` or
/// `error` on the node type's topic. On success the returned context is the
/// input context extended with the node's output.
pub async fn run_node(
    executor: &dyn NodeExecutor,
    invocation: &NodeInvocation<'_>,
    publisher: &dyn StatusPublisher,
) -> Result<Context, NodeError> {
    let topic = invocation.node_type.topic();
    let node_id = invocation.node_id;

    publisher
        .publish(topic, StatusMessage::new(node_id, NodeStatus::Loading))
        .await;

    match executor.execute(invocation).await {
        Ok(outcome) => {
            publisher
                .publish(topic, StatusMessage::new(node_id, NodeStatus::Success))
                .await;

            if let NodeOutcome::Output { variable, .. } = &outcome {
                if invocation.context.contains_key(variable) {
                    tracing::debug!(
                        "Node {} overwrites context variable '{}'",
                        node_id,
                        variable
                    );
                }
            }
            Ok(outcome.apply(invocation.context))
        }
        Err(error) => {
            publisher
                .publish(topic, StatusMessage::new(node_id, NodeStatus::Error))
                .await;
            tracing::warn!("Node {} ({}) failed: {}", node_id, invocation.node_type, error);
            Err(error)
        }
    }
}

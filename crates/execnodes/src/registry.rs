use crate::ai::AiExecutor;
use crate::base;
use crate::clients::{AiProvider, ChatModel, HttpClient, ReqwestChatModel, ReqwestHttpClient};
use crate::http::HttpRequestExecutor;
use crate::trigger::TriggerExecutor;
use crate::webhook::{ChatPlatform, ChatWebhookExecutor};
use execcore::{
    Context, CredentialStore, NodeError, NodeExecutor, NodeInvocation, NodeType, StatusPublisher,
    WorkflowError,
};
use serde::Serialize;
use std::sync::Arc;

/// Outbound dependencies shared by the executors.
#[derive(Clone)]
pub struct NodeClients {
    pub http: Arc<dyn HttpClient>,
    pub models: Arc<dyn ChatModel>,
    pub credentials: Arc<dyn CredentialStore>,
    /// Used by OpenAI nodes that select no credential.
    pub openai_api_key: Option<String>,
}

impl NodeClients {
    /// Clients backed by real network transports.
    pub fn live(credentials: Arc<dyn CredentialStore>, openai_api_key: Option<String>) -> Self {
        Self {
            http: Arc::new(ReqwestHttpClient::new()),
            models: Arc::new(ReqwestChatModel::new()),
            credentials,
            openai_api_key,
        }
    }
}

/// Metadata about a node type
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeMetadata {
    pub node_type: NodeType,
    pub description: String,
    pub category: &'static str,
    pub topic: &'static str,
}

/// Maps every node type to its executor.
///
/// Dispatch is an exhaustive match over [`NodeType`], so adding a variant
/// without an executor does not compile.
pub struct ExecutorRegistry {
    manual_trigger: TriggerExecutor,
    google_form_trigger: TriggerExecutor,
    stripe_trigger: TriggerExecutor,
    http_request: HttpRequestExecutor,
    gemini: AiExecutor,
    anthropic: AiExecutor,
    openai: AiExecutor,
    discord: ChatWebhookExecutor,
    slack: ChatWebhookExecutor,
}

impl ExecutorRegistry {
    pub fn new(clients: NodeClients) -> Self {
        let ai = |provider| {
            AiExecutor::new(provider, clients.models.clone(), clients.credentials.clone())
        };
        Self {
            manual_trigger: TriggerExecutor::new(NodeType::ManualTrigger),
            google_form_trigger: TriggerExecutor::new(NodeType::GoogleFormTrigger),
            stripe_trigger: TriggerExecutor::new(NodeType::StripeTrigger),
            http_request: HttpRequestExecutor::new(clients.http.clone()),
            gemini: ai(AiProvider::Gemini),
            anthropic: ai(AiProvider::Anthropic),
            openai: ai(AiProvider::OpenAi).with_fallback_api_key(clients.openai_api_key.clone()),
            discord: ChatWebhookExecutor::new(ChatPlatform::Discord, clients.http.clone()),
            slack: ChatWebhookExecutor::new(ChatPlatform::Slack, clients.http.clone()),
        }
    }

    pub fn get(&self, node_type: NodeType) -> &dyn NodeExecutor {
        match node_type {
            NodeType::Initial | NodeType::ManualTrigger => &self.manual_trigger,
            NodeType::GoogleFormTrigger => &self.google_form_trigger,
            NodeType::StripeTrigger => &self.stripe_trigger,
            NodeType::HttpRequest => &self.http_request,
            NodeType::Gemini => &self.gemini,
            NodeType::Anthropic => &self.anthropic,
            NodeType::OpenAi => &self.openai,
            NodeType::Discord => &self.discord,
            NodeType::Slack => &self.slack,
        }
    }

    /// Look up an executor by its wire tag.
    pub fn get_by_tag(&self, tag: &str) -> Result<&dyn NodeExecutor, WorkflowError> {
        Ok(self.get(tag.parse()?))
    }

    /// All node types with their metadata, in declaration order.
    pub fn node_types(&self) -> Vec<NodeMetadata> {
        NodeType::ALL
            .iter()
            .map(|&node_type| NodeMetadata {
                node_type,
                description: self.get(node_type).description().to_string(),
                category: if node_type.is_trigger() {
                    "trigger"
                } else {
                    "action"
                },
                topic: node_type.topic(),
            })
            .collect()
    }

    /// Execute one node, publishing its status on the node type's topic.
    pub async fn run(
        &self,
        invocation: &NodeInvocation<'_>,
        publisher: &dyn StatusPublisher,
    ) -> Result<Context, NodeError> {
        let executor = self.get(invocation.node_type);
        tracing::debug!(
            "Executing node {} with {} executor",
            invocation.node_id,
            executor.node_type()
        );
        base::run_node(executor, invocation, publisher).await
    }
}

use crate::clients::{HttpClient, HttpResponse, OutboundRequest};
use async_trait::async_trait;
use execcore::{run_step_as, NodeError, NodeExecutor, NodeInvocation, NodeOutcome, NodeType};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Discord rejects messages longer than this.
pub const DISCORD_MAX_CONTENT: usize = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatPlatform {
    Discord,
    Slack,
}

impl ChatPlatform {
    fn slug(&self) -> &'static str {
        match self {
            ChatPlatform::Discord => "discord",
            ChatPlatform::Slack => "slack",
        }
    }

    fn output_key(&self) -> &'static str {
        match self {
            ChatPlatform::Discord => "discordMessageSent",
            ChatPlatform::Slack => "slackMessageSent",
        }
    }
}

/// Posts a templated message to an incoming webhook.
pub struct ChatWebhookExecutor {
    platform: ChatPlatform,
    client: Arc<dyn HttpClient>,
}

impl ChatWebhookExecutor {
    pub fn new(platform: ChatPlatform, client: Arc<dyn HttpClient>) -> Self {
        Self { platform, client }
    }

    fn payload(&self, invocation: &NodeInvocation<'_>, content: &str) -> Value {
        let mut payload = Map::new();
        payload.insert("content".to_string(), Value::String(content.to_string()));
        if self.platform == ChatPlatform::Discord {
            if let Some(username) = invocation.optional_str("username") {
                payload.insert(
                    "username".to_string(),
                    Value::String(invocation.render(username)),
                );
            }
        }
        Value::Object(payload)
    }
}

fn truncate_chars(text: String, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((index, _)) => text[..index].to_string(),
        None => text,
    }
}

#[async_trait]
impl NodeExecutor for ChatWebhookExecutor {
    fn node_type(&self) -> NodeType {
        match self.platform {
            ChatPlatform::Discord => NodeType::Discord,
            ChatPlatform::Slack => NodeType::Slack,
        }
    }

    async fn execute(&self, invocation: &NodeInvocation<'_>) -> Result<NodeOutcome, NodeError> {
        let variable = invocation.variable_name()?;
        let webhook_url = invocation.require_str("webhookUrl", "Webhook URL is required.")?;
        let content = invocation.require_str("content", "Content is required.")?;

        let mut content = invocation.render(content);
        if self.platform == ChatPlatform::Discord {
            content = truncate_chars(content, DISCORD_MAX_CONTENT);
        }
        let request = OutboundRequest::post_json(webhook_url, self.payload(invocation, &content));

        let client = self.client.as_ref();
        let _: HttpResponse = run_step_as(
            invocation.steps,
            &invocation.step_name(&format!("{}-webhook", self.platform.slug())),
            move || {
                let request = request.clone();
                async move { client.send(request).await?.error_for_status() }
            },
        )
        .await?;

        let mut output = Map::new();
        output.insert(self.platform.output_key().to_string(), Value::String(content));
        Ok(NodeOutcome::output(variable, Value::Object(output)))
    }

    fn description(&self) -> &str {
        match self.platform {
            ChatPlatform::Discord => "Sends a message to a Discord channel webhook",
            ChatPlatform::Slack => "Sends a message to a Slack incoming webhook",
        }
    }
}

use crate::clients::{AiProvider, ChatModel, GenerateRequest};
use async_trait::async_trait;
use execcore::{
    run_step_as, CredentialStore, NodeError, NodeExecutor, NodeInvocation, NodeOutcome, NodeType,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::{Arc, OnceLock};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

/// Memoized result of a credential lookup. The secret itself is never
/// written to the step store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CredentialLookup {
    credential_id: String,
    found: bool,
}

/// Text generation node for one hosted model provider.
///
/// The API key comes from the credential referenced by `credentialId`,
/// owned by the workflow's user. OpenAI nodes may omit the credential and
/// fall back to the process-wide key.
pub struct AiExecutor {
    provider: AiProvider,
    model: Arc<dyn ChatModel>,
    credentials: Arc<dyn CredentialStore>,
    fallback_api_key: Option<String>,
}

impl AiExecutor {
    pub fn new(
        provider: AiProvider,
        model: Arc<dyn ChatModel>,
        credentials: Arc<dyn CredentialStore>,
    ) -> Self {
        Self {
            provider,
            model,
            credentials,
            fallback_api_key: None,
        }
    }

    pub fn with_fallback_api_key(mut self, api_key: Option<String>) -> Self {
        self.fallback_api_key = api_key;
        self
    }

    async fn api_key(
        &self,
        invocation: &NodeInvocation<'_>,
        credential_id: Option<&str>,
    ) -> Result<String, NodeError> {
        let Some(credential_id) = credential_id else {
            return self.fallback_api_key.clone().ok_or_else(|| {
                NodeError::Configuration(format!(
                    "No credential selected and no {} API key is configured.",
                    self.provider.slug()
                ))
            });
        };

        let credentials = self.credentials.as_ref();
        let user_id = invocation.user_id;
        let secret = OnceLock::new();
        let secret_slot = &secret;
        let lookup: CredentialLookup = run_step_as(
            invocation.steps,
            &invocation.step_name("get-credential"),
            move || async move {
                let credential = credentials.find_credential(credential_id, user_id).await?;
                let found = credential.is_some();
                if let Some(credential) = credential {
                    let _ = secret_slot.set(credential.value);
                }
                Ok::<_, NodeError>(CredentialLookup {
                    credential_id: credential_id.to_string(),
                    found,
                })
            },
        )
        .await?;

        if !lookup.found {
            return Err(NodeError::CredentialNotFound(lookup.credential_id));
        }
        if let Some(value) = secret.into_inner() {
            return Ok(value);
        }

        // lookup replayed from the store, fetch the secret again
        self.credentials
            .find_credential(credential_id, user_id)
            .await?
            .map(|credential| credential.value)
            .ok_or_else(|| NodeError::CredentialNotFound(credential_id.to_string()))
    }
}

#[async_trait]
impl NodeExecutor for AiExecutor {
    fn node_type(&self) -> NodeType {
        match self.provider {
            AiProvider::Gemini => NodeType::Gemini,
            AiProvider::Anthropic => NodeType::Anthropic,
            AiProvider::OpenAi => NodeType::OpenAi,
        }
    }

    async fn execute(&self, invocation: &NodeInvocation<'_>) -> Result<NodeOutcome, NodeError> {
        let variable = invocation.variable_name()?;
        let credential_id = invocation.optional_str("credentialId");
        if credential_id.is_none() && self.provider != AiProvider::OpenAi {
            return Err(NodeError::Configuration("Credential is required.".to_string()));
        }
        let user_prompt = invocation.require_str("userPrompt", "User prompt is required.")?;

        let system = invocation
            .optional_str("systemPrompt")
            .map(|template| invocation.render(template))
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());
        let prompt = invocation.render(user_prompt);
        let model_name = invocation
            .optional_str("model")
            .unwrap_or(self.provider.default_model())
            .to_string();

        let api_key = self.api_key(invocation, credential_id).await?;

        let request = GenerateRequest {
            provider: self.provider,
            api_key,
            model: model_name,
            system,
            prompt,
        };
        let request = &request;
        let model = self.model.as_ref();
        let text: String = run_step_as(
            invocation.steps,
            &invocation.step_name(&format!("{}-generate-text", self.provider.slug())),
            move || async move { model.generate(request).await },
        )
        .await?;

        Ok(NodeOutcome::output(variable, json!({ "aiResponse": text })))
    }

    fn description(&self) -> &str {
        match self.provider {
            AiProvider::Gemini => "Generates text with Google Gemini",
            AiProvider::Anthropic => "Generates text with Anthropic Claude",
            AiProvider::OpenAi => "Generates text with OpenAI",
        }
    }
}

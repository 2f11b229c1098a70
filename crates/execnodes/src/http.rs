use crate::clients::{HttpClient, HttpMethod, HttpResponse, OutboundRequest, RequestBody};
use async_trait::async_trait;
use execcore::{run_step_as, NodeError, NodeExecutor, NodeInvocation, NodeOutcome, NodeType};
use serde_json::Value;
use std::sync::Arc;

/// HTTP request node
///
/// Config:
/// - `variableName`: context key for the response
/// - `endpoint` (or `url`): templated target URL
/// - `method`: GET (default), POST, PUT, PATCH or DELETE
/// - `body`: templated request body, sent for POST, PUT and PATCH only
/// - `headers`: object of templated header values
pub struct HttpRequestExecutor {
    client: Arc<dyn HttpClient>,
}

impl HttpRequestExecutor {
    pub fn new(client: Arc<dyn HttpClient>) -> Self {
        Self { client }
    }

    fn build_request(&self, invocation: &NodeInvocation<'_>) -> Result<OutboundRequest, NodeError> {
        let endpoint = invocation
            .optional_str("endpoint")
            .or_else(|| invocation.optional_str("url"))
            .ok_or_else(|| NodeError::Configuration("Endpoint is required.".to_string()))?;
        let method = match invocation.optional_str("method") {
            Some(method) => method.parse::<HttpMethod>()?,
            None => HttpMethod::Get,
        };

        let url = invocation.render(endpoint);
        reqwest::Url::parse(&url).map_err(|e| {
            NodeError::Configuration(format!("Endpoint '{}' is not a valid URL: {}", url, e))
        })?;

        let mut request =
            OutboundRequest::new(method, url).with_header("Content-Type", "application/json");

        if let Some(Value::Object(headers)) = invocation.config.get("headers") {
            for (name, value) in headers {
                if let Some(value) = value.as_str() {
                    request = request.with_header(name.clone(), invocation.render(value));
                }
            }
        }

        if method.allows_body() {
            if let Some(body) = invocation.optional_str("body") {
                request = request.with_body(RequestBody::Text(invocation.render(body)));
            }
        }

        Ok(request)
    }
}

#[async_trait]
impl NodeExecutor for HttpRequestExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::HttpRequest
    }

    async fn execute(&self, invocation: &NodeInvocation<'_>) -> Result<NodeOutcome, NodeError> {
        let request = self.build_request(invocation)?;
        let variable = invocation.variable_name()?;

        tracing::info!(
            "Node {}: {} {}",
            invocation.node_id,
            request.method,
            request.url
        );

        let client = self.client.as_ref();
        let response: HttpResponse = run_step_as(
            invocation.steps,
            &invocation.step_name("http-request"),
            move || {
                let request = request.clone();
                async move { client.send(request).await }
            },
        )
        .await?;

        let value =
            serde_json::to_value(response).map_err(|e| NodeError::Serialization(e.to_string()))?;
        Ok(NodeOutcome::output(variable, value))
    }

    fn description(&self) -> &str {
        "Makes an HTTP request and stores the response"
    }
}

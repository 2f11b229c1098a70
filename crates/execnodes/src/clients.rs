//! Outbound clients used by node side effects.
//!
//! Executors talk to the outside world only through these traits, so the
//! engine can be exercised with in-process fakes.

use async_trait::async_trait;
use execcore::NodeError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const USER_AGENT: &str = concat!("execflow/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    /// Only these methods carry a request body.
    pub fn allows_body(&self) -> bool {
        matches!(self, HttpMethod::Post | HttpMethod::Put | HttpMethod::Patch)
    }

    fn as_reqwest(&self) -> reqwest::Method {
        match self {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }
}

impl FromStr for HttpMethod {
    type Err = NodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "PATCH" => Ok(HttpMethod::Patch),
            "DELETE" => Ok(HttpMethod::Delete),
            _ => Err(NodeError::Configuration(format!("Unsupported method: {}", s))),
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_reqwest().as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Text(String),
    Json(Value),
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutboundRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<RequestBody>,
}

impl OutboundRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn post_json(url: impl Into<String>, body: Value) -> Self {
        Self::new(HttpMethod::Post, url).with_body(RequestBody::Json(body))
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: RequestBody) -> Self {
        self.body = Some(body);
        self
    }
}

/// Response as stored in the run context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: Map<String, Value>,
    /// Parsed JSON for JSON responses, the raw text otherwise.
    pub data: Value,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Map a non-2xx response to the matching error kind.
    pub fn error_for_status(self) -> Result<Self, NodeError> {
        if self.is_success() {
            return Ok(self);
        }
        let message = match &self.data {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        Err(NodeError::from_status(self.status, message))
    }
}

/// HTTP transport. Non-2xx responses are returned, not raised; transport
/// failures (DNS, connect, timeout) are transient errors.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn send(&self, request: OutboundRequest) -> Result<HttpResponse, NodeError>;
}

pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    pub fn new() -> Self {
        Self {
            client: build_client(),
        }
    }
}

impl Default for ReqwestHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

fn build_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .user_agent(USER_AGENT)
        .build()
        .unwrap_or_default()
}

fn transport_error(e: reqwest::Error) -> NodeError {
    if e.is_builder() {
        NodeError::Configuration(format!("Invalid request: {}", e))
    } else {
        NodeError::Transient(format!("HTTP request failed: {}", e))
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn send(&self, request: OutboundRequest) -> Result<HttpResponse, NodeError> {
        tracing::debug!("{} {}", request.method, request.url);

        let mut builder = self.client.request(request.method.as_reqwest(), &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        builder = match request.body {
            Some(RequestBody::Text(text)) => builder.body(text),
            Some(RequestBody::Json(json)) => builder.json(&json),
            None => builder,
        };

        let response = builder.send().await.map_err(transport_error)?;

        let status = response.status();
        let headers: Map<String, Value> = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.to_str().unwrap_or("").to_string())))
            .collect();
        let is_json = headers
            .get("content-type")
            .and_then(Value::as_str)
            .is_some_and(|ct| ct.contains("application/json"));

        let text = response
            .text()
            .await
            .map_err(|e| NodeError::Transient(format!("Failed to read response: {}", e)))?;
        let data = if is_json {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        } else {
            Value::String(text)
        };

        tracing::debug!("Response status: {}", status.as_u16());

        Ok(HttpResponse {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or("").to_string(),
            headers,
            data,
        })
    }
}

/// Hosted model providers backing the AI nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AiProvider {
    Gemini,
    Anthropic,
    OpenAi,
}

impl AiProvider {
    pub fn slug(&self) -> &'static str {
        match self {
            AiProvider::Gemini => "gemini",
            AiProvider::Anthropic => "anthropic",
            AiProvider::OpenAi => "openai",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            AiProvider::Gemini => "gemini-2.0-flash",
            AiProvider::Anthropic => "claude-3-5-sonnet-latest",
            AiProvider::OpenAi => "gpt-4o-mini",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub provider: AiProvider,
    pub api_key: String,
    pub model: String,
    pub system: String,
    pub prompt: String,
}

/// Single-turn text generation.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn generate(&self, request: &GenerateRequest) -> Result<String, NodeError>;
}

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";
const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const MAX_TOKENS: u32 = 4096;

/// Calls the providers' public REST APIs.
pub struct ReqwestChatModel {
    client: reqwest::Client,
}

impl ReqwestChatModel {
    pub fn new() -> Self {
        Self {
            client: build_client(),
        }
    }

    async fn post(&self, builder: reqwest::RequestBuilder) -> Result<Value, NodeError> {
        let response = builder.send().await.map_err(transport_error)?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| NodeError::Transient(format!("Failed to read response: {}", e)))?;
        if !status.is_success() {
            return Err(NodeError::from_status(status.as_u16(), text));
        }
        serde_json::from_str(&text).map_err(|e| NodeError::Serialization(e.to_string()))
    }
}

impl Default for ReqwestChatModel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatModel for ReqwestChatModel {
    async fn generate(&self, request: &GenerateRequest) -> Result<String, NodeError> {
        tracing::debug!("Generating text with {} ({})", request.provider.slug(), request.model);

        let (builder, text_pointer) = match request.provider {
            AiProvider::Anthropic => (
                self.client
                    .post(ANTHROPIC_API_URL)
                    .header("x-api-key", &request.api_key)
                    .header("anthropic-version", ANTHROPIC_VERSION)
                    .json(&json!({
                        "model": request.model,
                        "max_tokens": MAX_TOKENS,
                        "system": request.system,
                        "messages": [{"role": "user", "content": request.prompt}],
                    })),
                "/content/0/text",
            ),
            AiProvider::OpenAi => (
                self.client
                    .post(OPENAI_API_URL)
                    .bearer_auth(&request.api_key)
                    .json(&json!({
                        "model": request.model,
                        "messages": [
                            {"role": "system", "content": request.system},
                            {"role": "user", "content": request.prompt},
                        ],
                    })),
                "/choices/0/message/content",
            ),
            AiProvider::Gemini => (
                self.client
                    .post(format!("{}/{}:generateContent", GEMINI_API_BASE, request.model))
                    .query(&[("key", request.api_key.as_str())])
                    .json(&json!({
                        "systemInstruction": {"parts": [{"text": request.system}]},
                        "contents": [{"role": "user", "parts": [{"text": request.prompt}]}],
                    })),
                "/candidates/0/content/parts/0/text",
            ),
        };

        let body = self.post(builder).await?;
        // a reply whose first block is not text yields an empty response
        Ok(body
            .pointer(text_pointer)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_parsing() {
        assert_eq!("post".parse::<HttpMethod>().unwrap(), HttpMethod::Post);
        assert!(HttpMethod::Patch.allows_body());
        assert!(!HttpMethod::Get.allows_body());
        assert!(matches!(
            "TRACE".parse::<HttpMethod>(),
            Err(NodeError::Configuration(_))
        ));
    }

    #[test]
    fn test_error_for_status() {
        let response = |status| HttpResponse {
            status,
            status_text: String::new(),
            headers: Map::new(),
            data: Value::String("nope".into()),
        };
        assert!(response(204).error_for_status().is_ok());
        assert!(response(502).error_for_status().unwrap_err().is_retriable());
        assert!(matches!(
            response(401).error_for_status(),
            Err(NodeError::Remote { status: 401, .. })
        ));
    }

    #[test]
    fn test_response_serializes_camel_case() {
        let response = HttpResponse {
            status: 200,
            status_text: "OK".into(),
            headers: Map::new(),
            data: json!({"ok": true}),
        };
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["statusText"], "OK");
        assert_eq!(value["data"]["ok"], true);
    }
}

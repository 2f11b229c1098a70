//! Standard node library
//!
//! One executor per node type, plus the clients they use for side effects.

mod ai;
mod base;
pub mod clients;
mod http;
mod registry;
mod trigger;
mod webhook;

pub use ai::{AiExecutor, DEFAULT_SYSTEM_PROMPT};
pub use base::run_node;
pub use clients::{
    AiProvider, ChatModel, GenerateRequest, HttpClient, HttpMethod, HttpResponse,
    OutboundRequest, RequestBody,
};
pub use http::HttpRequestExecutor;
pub use registry::{ExecutorRegistry, NodeClients, NodeMetadata};
pub use trigger::TriggerExecutor;
pub use webhook::{ChatPlatform, ChatWebhookExecutor, DISCORD_MAX_CONTENT};

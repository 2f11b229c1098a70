#![allow(dead_code)]

use async_trait::async_trait;
use execcore::{EventBus, NodeError, NodeSpec, NodeType, RetryPolicy, WorkflowGraph};
use execnodes::{
    ChatModel, ExecutorRegistry, GenerateRequest, HttpClient, HttpResponse, NodeClients,
    OutboundRequest,
};
use execruntime::{MemoryStore, Orchestrator, RuntimeConfig};
use serde_json::{json, Map};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// HTTP client whose behavior is scripted per URL.
#[derive(Default)]
pub struct ScriptedHttp {
    calls: Mutex<Vec<String>>,
    failures: Mutex<HashMap<String, u32>>,
    hanging: Mutex<HashSet<String>>,
    delays: Mutex<HashMap<String, Duration>>,
}

impl ScriptedHttp {
    /// Fail the next `times` calls to `url` with a transient error.
    pub fn fail_transiently(&self, url: &str, times: u32) {
        self.failures.lock().unwrap().insert(url.to_string(), times);
    }

    /// Calls to `url` never complete.
    pub fn hang(&self, url: &str) {
        self.hanging.lock().unwrap().insert(url.to_string());
    }

    /// Calls to `url` take `millis` to answer.
    pub fn delay(&self, url: &str, millis: u64) {
        self.delays
            .lock()
            .unwrap()
            .insert(url.to_string(), Duration::from_millis(millis));
    }

    pub fn release(&self, url: &str) {
        self.hanging.lock().unwrap().remove(url);
    }

    pub fn calls_to(&self, url: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|u| *u == url).count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl HttpClient for ScriptedHttp {
    async fn send(&self, request: OutboundRequest) -> Result<HttpResponse, NodeError> {
        self.calls.lock().unwrap().push(request.url.clone());

        let hangs = self.hanging.lock().unwrap().contains(&request.url);
        if hangs {
            return std::future::pending().await;
        }

        let delay = self.delays.lock().unwrap().get(&request.url).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let should_fail = {
            let mut failures = self.failures.lock().unwrap();
            match failures.get_mut(&request.url) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    true
                }
                _ => false,
            }
        };
        if should_fail {
            return Err(NodeError::Transient("connection reset".to_string()));
        }

        Ok(HttpResponse {
            status: 200,
            status_text: "OK".to_string(),
            headers: Map::new(),
            data: json!({ "url": request.url }),
        })
    }
}

pub struct EchoModel;

#[async_trait]
impl ChatModel for EchoModel {
    async fn generate(&self, request: &GenerateRequest) -> Result<String, NodeError> {
        Ok(format!("echo: {}", request.prompt))
    }
}

pub struct Engine {
    pub store: Arc<MemoryStore>,
    pub http: Arc<ScriptedHttp>,
    pub bus: Arc<EventBus>,
    pub orchestrator: Orchestrator,
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        delay_ms: 1,
        backoff_multiplier: 1.0,
    }
}

pub fn engine_with(store: Arc<MemoryStore>, http: Arc<ScriptedHttp>, retry: RetryPolicy) -> Engine {
    // short enough that an abandoned run can be taken over within a test
    let config = RuntimeConfig::default()
        .with_retry(retry)
        .with_run_lease(chrono::Duration::milliseconds(150));
    engine_with_config(store, http, &config)
}

pub fn engine_with_config(
    store: Arc<MemoryStore>,
    http: Arc<ScriptedHttp>,
    config: &RuntimeConfig,
) -> Engine {
    let registry = Arc::new(ExecutorRegistry::new(NodeClients {
        http: http.clone(),
        models: Arc::new(EchoModel),
        credentials: store.clone(),
        openai_api_key: Some("sk-test".to_string()),
    }));
    let bus = Arc::new(config.event_bus());
    let orchestrator = Orchestrator::new(store.clone(), registry, bus.clone(), config);
    Engine {
        store,
        http,
        bus,
        orchestrator,
    }
}

pub fn engine() -> Engine {
    engine_with(
        Arc::new(MemoryStore::new()),
        Arc::new(ScriptedHttp::default()),
        fast_retry(),
    )
}

pub fn trigger(id: &str) -> NodeSpec {
    NodeSpec::new(id, NodeType::ManualTrigger)
}

pub fn http_node(id: &str, variable: &str, url: &str) -> NodeSpec {
    NodeSpec::new(id, NodeType::HttpRequest)
        .with_config("variableName", variable)
        .with_config("endpoint", url)
}

pub fn workflow(id: &str, nodes: Vec<NodeSpec>, edges: &[(&str, &str)]) -> WorkflowGraph {
    let mut workflow = WorkflowGraph::new(id, "test workflow", "user-1");
    for node in nodes {
        workflow.add_node(node);
    }
    for (from, to) in edges {
        workflow.connect(*from, *to);
    }
    workflow
}

use crate::webhooks::{google_form_seed, stripe_seed};
use actix_web::{get, post, web, HttpRequest, HttpResponse, Responder, Result as ActixResult};
use actix_ws::Message;
use execcore::{ChannelError, EventBus, NodeType, TriggerEvent};
use execruntime::Orchestrator;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Attempts per accepted trigger when the run record cannot be written.
const DELIVERY_ATTEMPTS: u32 = 3;

/// Application state shared across handlers
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub bus: Arc<EventBus>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookQuery {
    workflow_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteRequest {
    #[serde(default)]
    initial_data: Option<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRequest {
    node_type: NodeType,
}

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    token: Uuid,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AcceptedResponse {
    success: bool,
    run_id: String,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    success: bool,
    error: String,
}

impl ErrorResponse {
    fn new(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
        }
    }
}

/// Start a run for `workflow_id` on its own task and return the run id.
fn dispatch(state: &AppState, workflow_id: String, initial_data: Map<String, Value>) -> String {
    let event = TriggerEvent::new(workflow_id).with_initial_data(initial_data);
    let run_id = event.id.clone();
    let orchestrator = state.orchestrator.clone();

    actix_web::rt::spawn(async move {
        for attempt in 1..=DELIVERY_ATTEMPTS {
            match orchestrator.handle(event.clone()).await {
                Ok(run) => {
                    info!("Run {} finished with status {}", run.run_id, run.status.as_str());
                    return;
                }
                Err(e) if e.is_retriable() && attempt < DELIVERY_ATTEMPTS => {
                    warn!("Redelivering {} after attempt {}: {}", event.id, attempt, e);
                    tokio::time::sleep(Duration::from_millis(500 * u64::from(attempt))).await;
                }
                Err(e) => {
                    error!("Trigger {} rejected: {}", event.id, e.chain());
                    return;
                }
            }
        }
    });

    run_id
}

fn accepted(run_id: String) -> HttpResponse {
    HttpResponse::Accepted().json(AcceptedResponse {
        success: true,
        run_id,
    })
}

fn missing_workflow_id() -> HttpResponse {
    HttpResponse::BadRequest().json(ErrorResponse::new("Missing workflowId parameter"))
}

/// Health check endpoint
#[get("/health")]
async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "execserver"
    }))
}

#[post("/api/webhooks/google-form")]
async fn google_form_webhook(
    data: web::Data<AppState>,
    query: web::Query<WebhookQuery>,
    body: web::Json<Value>,
) -> impl Responder {
    let Some(workflow_id) = query.into_inner().workflow_id else {
        return missing_workflow_id();
    };
    let run_id = dispatch(&data, workflow_id, google_form_seed(body.into_inner()));
    accepted(run_id)
}

#[post("/api/webhooks/stripe")]
async fn stripe_webhook(
    data: web::Data<AppState>,
    query: web::Query<WebhookQuery>,
    body: web::Json<Value>,
) -> impl Responder {
    let Some(workflow_id) = query.into_inner().workflow_id else {
        return missing_workflow_id();
    };
    let run_id = dispatch(&data, workflow_id, stripe_seed(body.into_inner()));
    accepted(run_id)
}

/// Manual trigger; the body is optional.
#[post("/api/workflows/{id}/execute")]
async fn execute_workflow(
    data: web::Data<AppState>,
    path: web::Path<String>,
    body: Option<web::Json<ExecuteRequest>>,
) -> impl Responder {
    let workflow_id = path.into_inner();
    let initial_data = body
        .and_then(|b| b.into_inner().initial_data)
        .unwrap_or_default();

    info!("Manual execution requested for workflow {}", workflow_id);
    accepted(dispatch(&data, workflow_id, initial_data))
}

#[get("/api/executions/{run_id}")]
async fn get_execution(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> ActixResult<impl Responder> {
    let run_id = path.into_inner();
    match data.orchestrator.get_run(&run_id).await {
        Ok(Some(run)) => Ok(HttpResponse::Ok().json(run)),
        Ok(None) => Ok(HttpResponse::NotFound().json(ErrorResponse::new(format!(
            "Execution {} not found",
            run_id
        )))),
        Err(e) => {
            error!("Failed to load execution {}: {}", run_id, e);
            Ok(HttpResponse::InternalServerError().json(ErrorResponse::new(e.to_string())))
        }
    }
}

/// List available node types
#[get("/api/nodes")]
async fn list_node_types(data: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(data.orchestrator.registry().node_types())
}

#[post("/api/realtime/token")]
async fn issue_token(data: web::Data<AppState>, req: web::Json<TokenRequest>) -> impl Responder {
    let token = data.bus.issue_token(req.node_type).await;
    HttpResponse::Ok().json(token)
}

/// WebSocket stream of status messages for the topic a token grants.
#[get("/api/realtime")]
async fn realtime(
    req: HttpRequest,
    stream: web::Payload,
    data: web::Data<AppState>,
    query: web::Query<TokenQuery>,
) -> ActixResult<HttpResponse> {
    let (topic, mut statuses) = match data.bus.subscribe(&query.token).await {
        Ok(granted) => granted,
        Err(e @ ChannelError::UnknownToken) => {
            return Ok(HttpResponse::Unauthorized().json(ErrorResponse::new(e.to_string())))
        }
        Err(e @ ChannelError::TokenExpired) => {
            return Ok(HttpResponse::Forbidden().json(ErrorResponse::new(e.to_string())))
        }
    };

    let (res, mut session, mut msg_stream) = actix_ws::handle(&req, stream)?;
    info!("WebSocket client subscribed to {}", topic);

    actix_web::rt::spawn(async move {
        loop {
            tokio::select! {
                status = statuses.recv() => {
                    match status {
                        Ok(status) => {
                            if let Ok(json) = serde_json::to_string(&status) {
                                if session.text(json).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!("Subscriber on {} lagged by {} messages", topic, skipped);
                        }
                        Err(RecvError::Closed) => break,
                    }
                }

                Some(Ok(msg)) = msg_stream.recv() => {
                    match msg {
                        Message::Ping(bytes) => {
                            if session.pong(&bytes).await.is_err() {
                                break;
                            }
                        }
                        Message::Close(_) => break,
                        _ => {}
                    }
                }

                else => break,
            }
        }

        info!("WebSocket client left {}", topic);
        let _ = session.close(None).await;
    });

    Ok(res)
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(health_check)
        .service(google_form_webhook)
        .service(stripe_webhook)
        .service(execute_workflow)
        .service(get_execution)
        .service(list_node_types)
        .service(issue_token)
        .service(realtime);
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{test, App};
    use execcore::{NodeSpec, RunStatus, WorkflowGraph};
    use execnodes::{ExecutorRegistry, NodeClients};
    use execruntime::{MemoryStore, RuntimeConfig};

    async fn state() -> web::Data<AppState> {
        let store = Arc::new(MemoryStore::new());
        let mut graph = WorkflowGraph::new("wf", "Forms", "user-1");
        graph.add_node(NodeSpec::new("T", NodeType::GoogleFormTrigger));
        store.save_workflow(graph).await;

        let config = RuntimeConfig::default();
        let bus = Arc::new(config.event_bus());
        let registry = Arc::new(ExecutorRegistry::new(NodeClients::live(store.clone(), None)));
        let orchestrator = Orchestrator::new(store, registry, bus.clone(), &config);
        web::Data::new(AppState {
            orchestrator: Arc::new(orchestrator),
            bus,
        })
    }

    #[actix_web::test]
    async fn test_health() {
        let app = test::init_service(App::new().app_data(state().await).configure(configure)).await;
        let resp: Value =
            test::call_and_read_body_json(&app, test::TestRequest::get().uri("/health").to_request())
                .await;
        assert_eq!(resp["status"], "healthy");
    }

    #[actix_web::test]
    async fn test_webhook_requires_workflow_id() {
        let app = test::init_service(App::new().app_data(state().await).configure(configure)).await;
        let req = test::TestRequest::post()
            .uri("/api/webhooks/google-form")
            .set_json(serde_json::json!({ "formId": "f1" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 400);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "Missing workflowId parameter");
    }

    #[actix_web::test]
    async fn test_google_form_webhook_runs_workflow() {
        let data = state().await;
        let app = test::init_service(App::new().app_data(data.clone()).configure(configure)).await;
        let req = test::TestRequest::post()
            .uri("/api/webhooks/google-form?workflowId=wf")
            .set_json(serde_json::json!({ "formId": "f1", "responses": { "q": "a" } }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 202);
        let body: Value = test::read_body_json(resp).await;
        let run_id = body["runId"].as_str().unwrap().to_string();

        let mut run = None;
        for _ in 0..50 {
            match data.orchestrator.get_run(&run_id).await.unwrap() {
                Some(r) if r.status.is_terminal() => {
                    run = Some(r);
                    break;
                }
                _ => tokio::time::sleep(Duration::from_millis(10)).await,
            }
        }
        let run = run.unwrap();
        assert_eq!(run.status, RunStatus::Success);
        assert_eq!(
            run.output.unwrap().get("googleForm").unwrap()["formId"],
            "f1"
        );

        let req = test::TestRequest::get()
            .uri(&format!("/api/executions/{}", run_id))
            .to_request();
        let fetched: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(fetched["status"], "SUCCESS");
    }

    #[actix_web::test]
    async fn test_unknown_execution_is_not_found() {
        let app = test::init_service(App::new().app_data(state().await).configure(configure)).await;
        let req = test::TestRequest::get()
            .uri("/api/executions/nope")
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 404);
    }

    #[actix_web::test]
    async fn test_issue_token_for_node_type() {
        let app = test::init_service(App::new().app_data(state().await).configure(configure)).await;
        let req = test::TestRequest::post()
            .uri("/api/realtime/token")
            .set_json(serde_json::json!({ "nodeType": "SLACK" }))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["topic"], NodeType::Slack.topic());
        assert!(body["token"].is_string());

        let req = test::TestRequest::post()
            .uri("/api/realtime/token")
            .set_json(serde_json::json!({ "nodeType": "TELEGRAM" }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 400);
    }

    #[actix_web::test]
    async fn test_realtime_rejects_unknown_token() {
        let app = test::init_service(App::new().app_data(state().await).configure(configure)).await;
        let req = test::TestRequest::get()
            .uri(&format!("/api/realtime?token={}", Uuid::new_v4()))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 401);
    }

    #[actix_web::test]
    async fn test_nodes_lists_every_type() {
        let app = test::init_service(App::new().app_data(state().await).configure(configure)).await;
        let req = test::TestRequest::get().uri("/api/nodes").to_request();
        let body: Vec<Value> = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body.len(), NodeType::ALL.len());
    }
}

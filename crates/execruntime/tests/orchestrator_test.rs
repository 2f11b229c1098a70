mod common;

use common::{
    engine, engine_with, engine_with_config, fast_retry, http_node, trigger, workflow,
    ScriptedHttp,
};
use execcore::{
    Credential, FlowError, NodeSpec, NodeStatus, NodeType, RetryPolicy, RunStatus, StepStore,
    TriggerEvent,
};
use execruntime::RuntimeConfig;
use execruntime::MemoryStore;
use serde_json::{json, Map};
use std::sync::Arc;

const H_URL: &str = "https://api.example.com/h";
const G_URL: &str = "https://api.example.com/g";

#[tokio::test]
async fn test_linear_workflow_runs_in_order() {
    let engine = engine();
    engine
        .store
        .save_workflow(workflow(
            "wf-a",
            vec![
                http_node("G", "g", G_URL),
                http_node("H", "h", H_URL),
                trigger("T"),
            ],
            &[("T", "H"), ("H", "G")],
        ))
        .await;

    let run = engine
        .orchestrator
        .handle(TriggerEvent::new("wf-a").with_id("evt-a"))
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Success);
    assert_eq!(run.run_id, "evt-a");
    let output = run.output.unwrap();
    assert_eq!(output.keys().collect::<Vec<_>>(), vec!["h", "g"]);
    assert_eq!(engine.http.calls_to(H_URL), 1);
    assert_eq!(engine.http.calls_to(G_URL), 1);

    let steps = engine.store.completed_steps("evt-a").await;
    let h = steps.iter().position(|s| s == "H:http-request").unwrap();
    let g = steps.iter().position(|s| s == "G:http-request").unwrap();
    assert!(h < g);
}

#[tokio::test]
async fn test_isolated_node_runs_exactly_once() {
    let engine = engine();
    let d_url = "https://api.example.com/d";
    engine
        .store
        .save_workflow(workflow(
            "wf-b",
            vec![
                http_node("D", "d", d_url),
                trigger("T"),
                http_node("H", "h", H_URL),
            ],
            &[("T", "H")],
        ))
        .await;

    let run = engine
        .orchestrator
        .handle(TriggerEvent::new("wf-b"))
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Success);
    assert_eq!(engine.http.calls_to(d_url), 1);
    assert_eq!(engine.http.calls_to(H_URL), 1);
    let output = run.output.unwrap();
    assert!(output.contains_key("d"));
    assert!(output.contains_key("h"));
}

#[tokio::test]
async fn test_cyclic_workflow_fails_without_running_nodes() {
    let engine = engine();
    engine
        .store
        .save_workflow(workflow(
            "wf-c",
            vec![
                http_node("A", "a", "https://api.example.com/a"),
                http_node("B", "b", "https://api.example.com/b"),
            ],
            &[("A", "B"), ("B", "A")],
        ))
        .await;
    let mut statuses = engine
        .bus
        .subscribe_topic(NodeType::HttpRequest.topic())
        .await;

    let run = engine
        .orchestrator
        .handle(TriggerEvent::new("wf-c"))
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.error.unwrap().contains("cyclic"));
    assert!(run.output.is_none());
    assert_eq!(engine.http.total_calls(), 0);
    assert!(statuses.try_recv().is_err());
}

#[tokio::test]
async fn test_missing_endpoint_fails_without_outbound_call() {
    let engine = engine();
    engine
        .store
        .save_workflow(workflow(
            "wf-d",
            vec![
                trigger("T"),
                NodeSpec::new("H", NodeType::HttpRequest).with_config("variableName", "h"),
            ],
            &[("T", "H")],
        ))
        .await;
    let mut statuses = engine
        .bus
        .subscribe_topic(NodeType::HttpRequest.topic())
        .await;

    let run = engine
        .orchestrator
        .handle(TriggerEvent::new("wf-d"))
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.error.unwrap().starts_with("Node H failed"));
    assert!(run.error_detail.unwrap().contains("Endpoint is required."));
    assert_eq!(engine.http.total_calls(), 0);

    let loading = statuses.recv().await.unwrap();
    let error = statuses.recv().await.unwrap();
    assert_eq!((loading.node_id.as_str(), loading.status), ("H", NodeStatus::Loading));
    assert_eq!((error.node_id.as_str(), error.status), ("H", NodeStatus::Error));
}

#[tokio::test]
async fn test_transient_failure_is_retried_without_repeating_earlier_nodes() {
    let engine = engine();
    engine.http.fail_transiently(G_URL, 1);
    engine
        .store
        .save_workflow(workflow(
            "wf-e",
            vec![http_node("H", "h", H_URL), http_node("G", "g", G_URL)],
            &[("H", "G")],
        ))
        .await;

    let run = engine
        .orchestrator
        .handle(TriggerEvent::new("wf-e"))
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Success);
    assert_eq!(engine.http.calls_to(H_URL), 1);
    assert_eq!(engine.http.calls_to(G_URL), 2);
    let output = run.output.unwrap();
    assert_eq!(output.get("h").unwrap()["data"]["url"], H_URL);
    assert_eq!(output.get("g").unwrap()["data"]["url"], G_URL);
}

#[tokio::test]
async fn test_retries_are_bounded() {
    let engine = engine();
    engine.http.fail_transiently(H_URL, 10);
    engine
        .store
        .save_workflow(workflow("wf", vec![http_node("H", "h", H_URL)], &[]))
        .await;

    let run = engine
        .orchestrator
        .handle(TriggerEvent::new("wf"))
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(engine.http.calls_to(H_URL), fast_retry().max_attempts as usize);
}

#[tokio::test]
async fn test_no_retries_without_policy() {
    let engine = engine_with(
        Arc::new(MemoryStore::new()),
        Arc::new(ScriptedHttp::default()),
        RetryPolicy::none(),
    );
    engine.http.fail_transiently(H_URL, 1);
    engine
        .store
        .save_workflow(workflow("wf", vec![http_node("H", "h", H_URL)], &[]))
        .await;

    let run = engine
        .orchestrator
        .handle(TriggerEvent::new("wf"))
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(engine.http.calls_to(H_URL), 1);
}

#[tokio::test]
async fn test_context_accumulates_and_last_writer_wins() {
    let engine = engine();
    let mut seed = Map::new();
    seed.insert("seed".to_string(), json!("from trigger"));
    engine
        .store
        .save_workflow(workflow(
            "wf",
            vec![
                trigger("T"),
                http_node("first", "shared", "https://api.example.com/1"),
                http_node("middle", "other", "https://api.example.com/{{shared.data.url}}"),
                http_node("last", "shared", "https://api.example.com/2"),
            ],
            &[("T", "first"), ("first", "middle"), ("middle", "last")],
        ))
        .await;

    let run = engine
        .orchestrator
        .handle(TriggerEvent::new("wf").with_initial_data(seed))
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Success);
    let output = run.output.unwrap();
    assert_eq!(output.get("seed"), Some(&json!("from trigger")));
    assert_eq!(
        output.get("shared").unwrap()["data"]["url"],
        "https://api.example.com/2"
    );
    // overwritten key moves to the end
    assert_eq!(
        output.keys().collect::<Vec<_>>(),
        vec!["seed", "other", "shared"]
    );
    assert_eq!(
        engine
            .http
            .calls_to("https://api.example.com/https://api.example.com/1"),
        1
    );
}

#[tokio::test]
async fn test_ai_node_reads_upstream_output() {
    let engine = engine();
    engine
        .store
        .save_credential(Credential {
            id: "cred-1".into(),
            user_id: "user-1".into(),
            name: "Gemini".into(),
            value: "key".into(),
        })
        .await;
    engine
        .store
        .save_workflow(workflow(
            "wf",
            vec![
                trigger("T"),
                NodeSpec::new("ai", NodeType::Gemini)
                    .with_config("variableName", "summary")
                    .with_config("credentialId", "cred-1")
                    .with_config("userPrompt", "Summarize {{json stripe}}"),
            ],
            &[("T", "ai")],
        ))
        .await;
    let mut seed = Map::new();
    seed.insert("stripe".to_string(), json!({ "eventType": "charge.succeeded" }));

    let run = engine
        .orchestrator
        .handle(TriggerEvent::new("wf").with_initial_data(seed))
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Success);
    let response = run.output.unwrap().get("summary").unwrap()["aiResponse"]
        .as_str()
        .unwrap()
        .to_string();
    assert!(response.starts_with("echo: Summarize"));
    assert!(response.contains("charge.succeeded"));
}

#[tokio::test]
async fn test_step_results_never_hold_credential_secrets() {
    let engine = engine();
    let secret = "sk-ant-very-secret-0042";
    engine
        .store
        .save_credential(Credential {
            id: "cred-ant".into(),
            user_id: "user-1".into(),
            name: "Anthropic".into(),
            value: secret.into(),
        })
        .await;
    engine
        .store
        .save_workflow(workflow(
            "wf",
            vec![
                trigger("T"),
                NodeSpec::new("ai", NodeType::Anthropic)
                    .with_config("variableName", "reply")
                    .with_config("credentialId", "cred-ant")
                    .with_config("userPrompt", "hello"),
            ],
            &[("T", "ai")],
        ))
        .await;

    let run = engine
        .orchestrator
        .handle(TriggerEvent::new("wf").with_id("evt-secret"))
        .await
        .unwrap();
    assert_eq!(run.status, RunStatus::Success);

    let steps = engine.store.completed_steps("evt-secret").await;
    assert!(steps.contains(&"ai:get-credential".to_string()));
    for step in &steps {
        let value = engine
            .store
            .load_step("evt-secret", step)
            .await
            .unwrap()
            .unwrap();
        assert!(!value.to_string().contains(secret), "{} stores the secret", step);
    }
}

#[tokio::test]
async fn test_prune_drops_steps_of_finished_runs() {
    let config = RuntimeConfig::default()
        .with_retry(fast_retry())
        .with_step_retention(chrono::Duration::zero());
    let engine = engine_with_config(
        Arc::new(MemoryStore::new()),
        Arc::new(ScriptedHttp::default()),
        &config,
    );
    engine
        .store
        .save_workflow(workflow("wf", vec![http_node("H", "h", H_URL)], &[]))
        .await;

    let run = engine
        .orchestrator
        .handle(TriggerEvent::new("wf").with_id("evt-old"))
        .await
        .unwrap();
    assert_eq!(run.status, RunStatus::Success);
    assert!(!engine.store.completed_steps("evt-old").await.is_empty());

    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    assert!(engine.orchestrator.prune_finished_steps().await.unwrap() > 0);
    assert!(engine.store.completed_steps("evt-old").await.is_empty());

    // a pruned finished run is still answered from its record
    let again = engine
        .orchestrator
        .handle(TriggerEvent::new("wf").with_id("evt-old"))
        .await
        .unwrap();
    assert_eq!(again.status, RunStatus::Success);
    assert_eq!(engine.http.calls_to(H_URL), 1);
}

#[tokio::test]
async fn test_redelivered_event_returns_finished_run() {
    let engine = engine();
    engine
        .store
        .save_workflow(workflow("wf", vec![http_node("H", "h", H_URL)], &[]))
        .await;

    let first = engine
        .orchestrator
        .handle(TriggerEvent::new("wf").with_id("evt-1"))
        .await
        .unwrap();
    let second = engine
        .orchestrator
        .handle(TriggerEvent::new("wf").with_id("evt-1"))
        .await
        .unwrap();

    assert_eq!(first.status, RunStatus::Success);
    assert_eq!(second.status, RunStatus::Success);
    assert_eq!(first.completed_at, second.completed_at);
    assert_eq!(engine.http.calls_to(H_URL), 1);
}

#[tokio::test]
async fn test_invalid_trigger_is_rejected_before_persisting() {
    let engine = engine();

    let missing_workflow = TriggerEvent {
        id: "evt-x".to_string(),
        workflow_id: None,
        initial_data: None,
    };
    let error = engine.orchestrator.handle(missing_workflow).await.unwrap_err();
    assert!(matches!(error, FlowError::InvalidTrigger(_)));
    assert!(!error.is_retriable());

    let blank_id = TriggerEvent::new("wf").with_id("  ");
    assert!(matches!(
        engine.orchestrator.handle(blank_id).await,
        Err(FlowError::InvalidTrigger(_))
    ));

    assert!(engine.orchestrator.get_run("evt-x").await.unwrap().is_none());
}

#[tokio::test]
async fn test_unknown_workflow_fails_run() {
    let engine = engine();

    let run = engine
        .orchestrator
        .handle(TriggerEvent::new("missing"))
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.error.unwrap().contains("Workflow not found: missing"));
}

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use execcore::{
    Credential, EventBus, NodeSpec, NodeStatus, NodeType, RunStatus, TriggerEvent, WorkflowGraph,
};
use execnodes::{ExecutorRegistry, NodeClients};
use execruntime::{
    parse_workflow, sort_workflow, Environment, MemoryStore, Orchestrator, RuntimeConfig,
    SqliteStore,
};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "exec")]
#[command(about = "Workflow execution CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a workflow file against an in-memory store
    Run {
        /// Path to workflow JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Trigger data as a JSON object
        #[arg(short, long)]
        input: Option<String>,

        /// JSON array of credentials available to the workflow owner
        #[arg(short, long)]
        credentials: Option<PathBuf>,

        /// Runtime environment (development, test, production)
        #[arg(long, env = "EXEC_ENV", default_value = "development")]
        env: Environment,

        /// API key for OpenAI nodes without a credential
        #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
        openai_api_key: Option<String>,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Validate a workflow file and print its execution order
    Validate {
        /// Path to workflow JSON file
        file: PathBuf,
    },

    /// List available node types
    Nodes,

    /// Create a new example workflow
    Init {
        /// Output file path
        #[arg(short, long, default_value = "workflow.json")]
        output: PathBuf,
    },

    /// Store a workflow in a SQLite database
    Import {
        /// Path to workflow JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// SQLite database file
        #[arg(short, long, env = "EXEC_DATABASE", default_value = "exec.db")]
        database: PathBuf,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            input,
            credentials,
            env,
            openai_api_key,
            verbose,
        } => {
            init_logging(verbose);
            let config = RuntimeConfig::for_environment(env).with_openai_api_key(openai_api_key);
            run_workflow(&file, input, credentials.as_deref(), &config).await?;
        }

        Commands::Validate { file } => {
            validate_workflow(&file)?;
        }

        Commands::Nodes => {
            list_nodes();
        }

        Commands::Init { output } => {
            create_example_workflow(&output)?;
        }

        Commands::Import { file, database } => {
            init_logging(false);
            import_workflow(&file, &database).await?;
        }
    }

    Ok(())
}

fn load_workflow(file: &Path) -> Result<WorkflowGraph> {
    let json = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    Ok(parse_workflow(&json)?)
}

fn parse_input(input: Option<String>) -> Result<Map<String, Value>> {
    match input {
        Some(raw) => match serde_json::from_str(&raw)? {
            Value::Object(map) => Ok(map),
            _ => Err(anyhow::anyhow!("Input must be a JSON object")),
        },
        None => Ok(Map::new()),
    }
}

async fn run_workflow(
    file: &Path,
    input: Option<String>,
    credentials: Option<&Path>,
    config: &RuntimeConfig,
) -> Result<()> {
    println!("🚀 Loading workflow from: {}", file.display());

    let workflow = load_workflow(file)?;
    let initial_data = parse_input(input)?;

    println!("📋 Workflow: {}", workflow.name);
    println!("   Nodes: {}", workflow.nodes.len());
    println!("   Connections: {}", workflow.connections.len());
    println!();

    let store = Arc::new(MemoryStore::new());
    if let Some(path) = credentials {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let credentials: Vec<Credential> = serde_json::from_str(&json)?;
        tracing::debug!("Loaded {} credentials from {}", credentials.len(), path.display());
        for credential in credentials {
            store.save_credential(credential).await;
        }
    }
    let workflow_id = workflow.id.clone();
    store.save_workflow(workflow).await;

    let bus = Arc::new(config.event_bus());
    let listeners = watch_statuses(&bus).await;

    let registry = Arc::new(ExecutorRegistry::new(NodeClients::live(
        store.clone(),
        config.openai_api_key.clone(),
    )));
    let orchestrator = Orchestrator::new(store, registry, bus.clone(), config);

    println!("▶️  Workflow started");
    let run = orchestrator
        .handle(TriggerEvent::new(workflow_id).with_initial_data(initial_data))
        .await?;

    // Let status listeners drain before tearing them down
    tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    for listener in listeners {
        listener.abort();
    }

    println!();
    println!("📊 Execution Summary:");
    println!("   Run ID: {}", run.run_id);
    println!("   Status: {}", run.status.as_str());

    match run.status {
        RunStatus::Success => {
            if let Some(output) = &run.output {
                println!();
                println!("📤 Context:");
                println!("{}", serde_json::to_string_pretty(output)?);
            }
            Ok(())
        }
        _ => {
            if let Some(detail) = run.error_detail.as_ref().or(run.error.as_ref()) {
                println!("💥 {}", detail);
            }
            Err(anyhow::anyhow!("Run {} did not succeed", run.run_id))
        }
    }
}

/// Print every status message published while the run is in flight.
async fn watch_statuses(bus: &EventBus) -> Vec<tokio::task::JoinHandle<()>> {
    let topics: BTreeSet<&'static str> = NodeType::ALL.iter().map(|t| t.topic()).collect();
    let mut listeners = Vec::with_capacity(topics.len());

    for topic in topics {
        let mut statuses = bus.subscribe_topic(topic).await;
        listeners.push(tokio::spawn(async move {
            while let Ok(message) = statuses.recv().await {
                match message.status {
                    NodeStatus::Loading => println!("  ⚡ Starting node: {}", message.node_id),
                    NodeStatus::Success => println!("  ✅ Node {} completed", message.node_id),
                    NodeStatus::Error => println!("  ❌ Node {} failed", message.node_id),
                }
            }
        }));
    }

    listeners
}

fn validate_workflow(file: &Path) -> Result<()> {
    println!("🔍 Validating workflow: {}", file.display());

    let workflow = load_workflow(file)?;
    let order = sort_workflow(&workflow)?;

    println!("✅ Workflow is valid:");
    println!("   Name: {}", workflow.name);
    println!("   Nodes: {}", workflow.nodes.len());
    println!("   Connections: {}", workflow.connections.len());
    println!();
    println!("🔗 Execution order:");
    for (position, node) in order.iter().enumerate() {
        println!("   {}. {} ({})", position + 1, node.id, node.node_type);
    }

    Ok(())
}

fn list_nodes() {
    println!("📦 Available Node Types:");
    println!();

    let credentials = Arc::new(MemoryStore::new());
    let registry = ExecutorRegistry::new(NodeClients::live(credentials, None));

    for metadata in registry.node_types() {
        println!("  • {} ({})", metadata.node_type, metadata.category);
        println!("    {}", metadata.description);
        println!("    topic: {}", metadata.topic);
    }
}

fn example_workflow() -> WorkflowGraph {
    let mut workflow = WorkflowGraph::new("example", "Example HTTP Workflow", "local");

    let trigger = workflow.add_node(NodeSpec::new("trigger", NodeType::ManualTrigger));
    let fetch = workflow.add_node(
        NodeSpec::new("fetch", NodeType::HttpRequest)
            .with_config("variableName", "zen")
            .with_config("endpoint", "{{url}}")
            .with_config("method", "GET"),
    );
    let notify = workflow.add_node(
        NodeSpec::new("notify", NodeType::Slack)
            .with_config("variableName", "notice")
            .with_config("webhookUrl", "https://hooks.slack.com/services/REPLACE/ME")
            .with_config("content", "Fetched: {{json zen.data}}"),
    );

    workflow.connect(trigger, fetch.clone());
    workflow.connect(fetch, notify);
    workflow
}

fn create_example_workflow(output: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(&example_workflow())?;
    std::fs::write(output, json)?;

    println!("✨ Created example workflow: {}", output.display());
    println!();
    println!("Run it with:");
    println!(
        "  exec run --file {} --input '{{\"url\": \"https://api.github.com/zen\"}}'",
        output.display()
    );

    Ok(())
}

async fn import_workflow(file: &Path, database: &Path) -> Result<()> {
    let workflow = load_workflow(file)?;
    sort_workflow(&workflow)?;

    let store = SqliteStore::open(database)?;
    store.save_workflow(&workflow).await?;

    println!(
        "💾 Imported workflow {} ({}) into {}",
        workflow.name,
        workflow.id,
        database.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_example_workflow_is_valid() {
        let workflow = example_workflow();
        let json = serde_json::to_string(&workflow).unwrap();
        let parsed = parse_workflow(&json).unwrap();
        let order: Vec<_> = sort_workflow(&parsed)
            .unwrap()
            .into_iter()
            .map(|n| n.id)
            .collect();
        assert_eq!(order, vec!["trigger", "fetch", "notify"]);
    }

    #[test]
    fn test_input_must_be_object() {
        assert!(parse_input(Some("[1, 2]".to_string())).is_err());
        assert_eq!(
            parse_input(Some(r#"{"url": "x"}"#.to_string())).unwrap()["url"],
            "x"
        );
        assert!(parse_input(None).unwrap().is_empty());
    }
}

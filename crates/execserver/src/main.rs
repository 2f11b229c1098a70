mod routes;
mod webhooks;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use clap::Parser;
use execcore::{EventBus, Store};
use execnodes::{ExecutorRegistry, NodeClients};
use execruntime::{Environment, MemoryStore, Orchestrator, RuntimeConfig, SqliteStore};
use routes::AppState;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "execserver")]
#[command(about = "Workflow execution server", long_about = None)]
struct Args {
    /// Address to listen on
    #[arg(long, env = "BIND_ADDRESS", default_value = "0.0.0.0:3000")]
    bind: String,

    /// Runtime environment (development, test, production)
    #[arg(long, env = "EXEC_ENV", default_value = "development")]
    env: Environment,

    /// SQLite database file; runs are kept in memory when omitted
    #[arg(long, env = "EXEC_DATABASE")]
    database: Option<PathBuf>,

    /// API key for OpenAI nodes without a credential
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    openai_api_key: Option<String>,
}

fn build_state<S: Store + 'static>(store: Arc<S>, config: &RuntimeConfig) -> AppState {
    let bus = Arc::new(config.event_bus());
    let registry = Arc::new(ExecutorRegistry::new(NodeClients::live(
        store.clone(),
        config.openai_api_key.clone(),
    )));
    let orchestrator = Orchestrator::new(store, registry, bus.clone(), config);
    AppState {
        orchestrator: Arc::new(orchestrator),
        bus,
    }
}

fn spawn_token_sweeper(bus: Arc<EventBus>) {
    actix_web::rt::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            let purged = bus.purge_expired_tokens().await;
            if purged > 0 {
                tracing::debug!("Purged {} expired subscription tokens", purged);
            }
        }
    });
}

fn spawn_step_pruner(orchestrator: Arc<Orchestrator>) {
    actix_web::rt::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60 * 60));
        loop {
            interval.tick().await;
            if let Err(e) = orchestrator.prune_finished_steps().await {
                tracing::warn!("Step pruning failed: {}", e);
            }
        }
    });
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    info!("🚀 Starting execution server ({})", args.env);

    let config = RuntimeConfig::for_environment(args.env).with_openai_api_key(args.openai_api_key);

    let state = match &args.database {
        Some(path) => {
            let store = Arc::new(SqliteStore::open(path)?);
            info!("✅ Using SQLite store at {}", path.display());
            build_state(store, &config)
        }
        None => {
            info!("✅ Using in-memory store");
            build_state(Arc::new(MemoryStore::new()), &config)
        }
    };
    spawn_token_sweeper(state.bus.clone());
    spawn_step_pruner(state.orchestrator.clone());

    let app_state = web::Data::new(state);

    info!("🌐 Server starting on http://{}", args.bind);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(app_state.clone())
            .wrap(cors)
            .wrap(actix_web::middleware::Logger::default())
            .configure(routes::configure)
    })
    .bind(&args.bind)?
    .run()
    .await?;

    Ok(())
}

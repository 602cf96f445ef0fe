//! The `vertex` binary.

mod config;

use clap::{Parser, Subcommand};
use config::AppConfig;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;
use vertex_core::CancelToken;
use vertex_gateway::GatewayServer;
use vertex_monitor::{
    AlertSink, LogAlertSink, ResourceMonitor, SysinfoSampler, ThresholdTier, WebhookAlertSink,
};
use vertex_orchestrator::{AuditLog, Orchestrator, SubmitRequest};
use vertex_registry::builtins::builtin_catalog;
use vertex_registry::{AlgorithmRegistry, Preloader};

#[derive(Parser)]
#[command(name = "vertex", about = "Vertex orchestration and algorithm lifecycle engine")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "vertex.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the engine behind the HTTP gateway
    Serve {
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,
        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// List the registered algorithms
    Catalog,
    /// Submit one task from a JSON file and print its final status
    Run {
        /// Submission body, same shape as `POST /tasks`
        #[arg(short, long)]
        file: PathBuf,
        /// Give up waiting after this many milliseconds
        #[arg(long, default_value_t = 60_000)]
        wait_ms: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let cli = Cli::parse();
    let mut config = AppConfig::load(&cli.config).await?;

    match cli.command {
        Commands::Serve { host, port } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }

            let shutdown = CancelToken::new();
            let orchestrator = start_engine(&config, &shutdown)?;

            let signal = shutdown.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Shutdown requested");
                }
                signal.cancel();
            });

            GatewayServer::serve(orchestrator.clone(), &config.server, shutdown.clone()).await?;
            shutdown.cancel();
            orchestrator.shutdown().await;
        }
        Commands::Catalog => {
            let catalog = builtin_catalog()?;
            let descriptors = catalog.descriptors();
            println!("Registered algorithms:");
            for d in &descriptors {
                println!(
                    "  {:<24} {:<16} {} -> {}  (~{} ms, {} KiB)",
                    d.id,
                    d.category.to_string(),
                    d.input,
                    d.output,
                    d.estimated_execution_ms,
                    d.estimated_cost.memory_bytes / 1024,
                );
            }
            println!("\nTotal: {} algorithm(s)", descriptors.len());
        }
        Commands::Run { file, wait_ms } => {
            let body = tokio::fs::read_to_string(&file).await.map_err(|e| {
                anyhow::anyhow!("Failed to read task file '{}': {e}", file.display())
            })?;
            let request: SubmitRequest = serde_json::from_str(&body)?;

            let shutdown = CancelToken::new();
            let orchestrator = start_engine(&config, &shutdown)?;
            let task_id = orchestrator.submit(request)?;
            info!(task_id = %task_id, "Task submitted");

            let status = orchestrator
                .wait_for(task_id, Duration::from_millis(wait_ms))
                .await?;
            println!("{}", serde_json::to_string_pretty(&status)?);

            shutdown.cancel();
            orchestrator.shutdown().await;
        }
    }

    Ok(())
}

/// Registry, monitor, alert sinks, preloader and orchestrator, wired together.
/// Background loops stop when `shutdown` fires.
fn start_engine(config: &AppConfig, shutdown: &CancelToken) -> anyhow::Result<Orchestrator> {
    let registry = AlgorithmRegistry::new(builtin_catalog()?, config.cache.clone());
    info!(
        algorithms = registry.descriptors().len(),
        "Algorithm catalog registered"
    );

    let mut sinks: Vec<Arc<dyn AlertSink>> = vec![Arc::new(LogAlertSink)];
    for hook in &config.alerts.webhooks {
        info!(name = %hook.name, "Webhook alert sink configured");
        sinks.push(Arc::new(WebhookAlertSink::new(hook.clone())?));
    }

    let (monitor, events) = ResourceMonitor::spawn(
        config.monitor.clone(),
        SysinfoSampler::new(),
        sinks,
        shutdown.child(),
    )?;

    let headroom = monitor.clone();
    Preloader::spawn(
        registry.clone(),
        config.preload.clone(),
        move || headroom.budget_status().tier < ThresholdTier::Throttle,
        shutdown.child(),
    );

    let mut builder =
        Orchestrator::builder(config.orchestrator.clone(), registry).monitor(monitor, events);
    if config.audit.enabled {
        let log = AuditLog::open(config.audit.dir.clone());
        info!(dir = %config.audit.dir.display(), "Audit log enabled");
        builder = builder.audit(log);
    }
    Ok(builder.start()?)
}

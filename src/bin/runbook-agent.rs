//! # Runbook Agent
//!
//! Loads the configuration, wires the queue processor, worker pool, handler and
//! result delivery together, and runs until SIGINT or SIGTERM.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use runbook_agent::config::loader::expand_home;
use runbook_agent::config::ConfigManager;
use runbook_agent::constants;
use runbook_agent::git::{GitRepositories, RepositoryProvider};
use runbook_agent::jobs::ActionMessageHandler;
use runbook_agent::logging::init_structured_logging;
use runbook_agent::messaging::{ProcessorConfig, QueueProcessor, QueueProvider};
use runbook_agent::runbook::{ActionSinks, HttpResultSender, ProcessExecutor, ResultDelivery};
use runbook_agent::worker_pool::WorkerPool;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("❌ Runbook agent failed: {:#}", e);
        eprintln!("runbook-agent: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let manager = ConfigManager::load().context("Could not load configuration")?;
    let config = manager.config();
    init_structured_logging(&config.logging());

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %manager.source().display(),
        owner_id = %config.owner_id,
        "🚀 Starting runbook agent"
    );

    let specs = config.action_specifications();
    let sinks = ActionSinks::from_mappings(specs.action_mappings.values());

    let repositories = GitRepositories::new();
    repositories.register_mappings(
        &expand_home(constants::REPOSITORY_ROOT),
        specs.action_mappings.values(),
    );
    let repositories: Option<Arc<dyn RepositoryProvider>> = if repositories.is_empty() {
        None
    } else {
        Some(Arc::new(repositories))
    };

    let executor = Arc::new(ProcessExecutor::with_timeout(config.execution_timeout()));
    let handler = Arc::new(ActionMessageHandler::new(
        repositories,
        specs,
        sinks,
        executor,
    ));

    let sender = HttpResultSender::new(
        &config.base_url,
        &config.api_key,
        Duration::from_millis(config.delivery.request_timeout_millis),
    )
    .context("Could not create result sender")?;
    let delivery = Arc::new(ResultDelivery::start(
        Arc::new(sender),
        config.delivery.clone(),
    ));

    let pool = Arc::new(WorkerPool::new(config.pool.clone()));
    pool.start().await.context("Could not start worker pool")?;

    let provider = queue_provider(config).await?;
    let processor = QueueProcessor::new(
        ProcessorConfig::from_queue_config(config.owner_id.clone(), &config.queue),
        provider,
        handler,
        pool.clone(),
        delivery,
    );
    processor.start();

    shutdown_signal().await;
    info!("🛑 Shutdown requested, draining accepted jobs");

    processor.stop().await.context("Could not stop gracefully")?;
    info!(metrics = ?pool.metrics(), "Runbook agent stopped");
    Ok(())
}

#[cfg(feature = "sqs")]
async fn queue_provider(
    config: &runbook_agent::config::AgentConfig,
) -> Result<Arc<dyn QueueProvider>> {
    let provider = runbook_agent::messaging::SqsQueueProvider::connect(&config.queue)
        .await
        .context("Could not connect to the inbound queue")?;
    Ok(Arc::new(provider))
}

#[cfg(not(feature = "sqs"))]
async fn queue_provider(
    _config: &runbook_agent::config::AgentConfig,
) -> Result<Arc<dyn QueueProvider>> {
    anyhow::bail!("built without an inbound queue provider, enable the `sqs` feature")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("❌ Could not listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("❌ Could not listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use jobengine::{DockerSettings, Executor, ExecutorSettings};
use runtime::config::RuntimeConfig;
use runtime::server;
use runtime::server::jobs::{JobDispatcher, JobService, JobStore};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = RuntimeConfig::parse();
    let addr = config.socket_addr()?;

    let settings = ExecutorSettings::from_env();
    info!(
        staging_dir = %settings.staging_dir.display(),
        cleanup_timeout = ?settings.cleanup_timeout,
        "executor configured"
    );
    let executor = Executor::docker(settings, DockerSettings::from_env());

    let store = JobStore::new();
    let dispatcher = Arc::new(JobDispatcher::new(
        Arc::new(executor),
        Arc::new(store.clone()),
    ));
    let service = Arc::new(JobService::new(store, Arc::clone(&dispatcher)));

    server::serve(addr, service, shutdown_signal()).await?;

    dispatcher.shutdown().await;
    info!("runtime stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

//! JobHub Server: runs the job system of one process.
//!
//! Wires the document store, the realtime hub and the job system together,
//! then waits for Ctrl-C and shuts down within the configured deadline.

use std::sync::Arc;

use tracing_subscriber::{EnvFilter, fmt};

use jobhub_core::config::AppConfig;
use jobhub_core::error::AppError;
use jobhub_core::traits::{DocumentStore, RealtimeHub};
use jobhub_database::MemoryStore;
use jobhub_realtime::MemoryHub;
use jobhub_worker::jobs::{LogWorker, log};
use jobhub_worker::{JobSystem, WorkerConfig};

#[tokio::main]
async fn main() {
    let env = std::env::var("JOBHUB_ENV").unwrap_or_else(|_| "development".to_string());
    let config = match AppConfig::load(&env) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config);
    tracing::info!(env = %env, "Configuration loaded");

    if let Err(e) = run(config).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}

/// Initialize tracing/logging
fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format.as_str() {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(true)
                .init();
        }
        _ => {
            fmt()
                .pretty()
                .with_env_filter(filter)
                .with_target(true)
                .init();
        }
    }
}

async fn run(config: AppConfig) -> Result<(), AppError> {
    tracing::info!("Starting JobHub v{}", env!("CARGO_PKG_VERSION"));

    let hub: Arc<dyn RealtimeHub> = Arc::new(MemoryHub::new(config.realtime.channel_buffer_size));
    let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::with_hub(Arc::clone(&hub)));

    let system = JobSystem::new(config.jobs.clone(), store, hub)
        .await
        .map_err(|e| AppError::internal(format!("Job system init failed: {}", e)))?;
    system
        .add_worker(WorkerConfig::new(log::WORKER_TYPE, Arc::new(LogWorker)))
        .await
        .map_err(|e| AppError::internal(format!("Worker registration failed: {}", e)))?;
    system
        .start()
        .await
        .map_err(|e| AppError::internal(format!("Job system start failed: {}", e)))?;

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| AppError::internal(format!("Signal handler failed: {}", e)))?;
    tracing::info!("Shutdown signal received");

    system
        .shutdown(system.shutdown_timeout())
        .await
        .map_err(|e| AppError::internal(format!("Shutdown failed: {}", e)))?;
    tracing::info!("JobHub stopped");
    Ok(())
}

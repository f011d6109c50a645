//! Stage worker binary.

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vedit_engines::HttpEngines;
use vedit_queue::TaskQueue;
use vedit_store::Store;
use vedit_worker::{EngineSet, TaskExecutor, WorkerConfig};

#[tokio::main]
async fn main() {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env().add_directive("vedit=info".parse().unwrap());

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    info!("Starting vedit-worker");

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    let store_path =
        std::env::var("STORE_DB_PATH").unwrap_or_else(|_| "data/vedit.db".to_string());
    let store = match Store::open(&store_path) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!("Failed to open store: {}", e);
            std::process::exit(1);
        }
    };
    let queue = match TaskQueue::from_env() {
        Ok(q) => Arc::new(q),
        Err(e) => {
            error!("Failed to open task queue: {}", e);
            std::process::exit(1);
        }
    };
    let engines = match HttpEngines::from_env() {
        Ok(e) => {
            let shared = Arc::new(e);
            Arc::new(EngineSet {
                suggestion: shared.clone(),
                chapters: shared.clone(),
                render: shared,
            })
        }
        Err(e) => {
            error!("Failed to build engine clients: {}", e);
            std::process::exit(1);
        }
    };

    let executor = TaskExecutor::new(config, store, queue, engines);

    // Flip the shutdown flag on ctrl-c; run() drains and returns.
    let shutdown = executor.shutdown_handle();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        shutdown.send(true).ok();
    });

    if let Err(e) = executor.run().await {
        error!("Executor error: {}", e);
        std::process::exit(1);
    }

    info!("Worker shutdown complete");
}

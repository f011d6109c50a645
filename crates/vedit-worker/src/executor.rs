//! Task executor loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{info, warn};
use uuid::Uuid;

use vedit_queue::TaskQueue;
use vedit_store::Store;

use crate::config::WorkerConfig;
use crate::error::WorkerResult;
use crate::stages::{EngineSet, StageRunner};

/// Claims tasks from the queue and runs them with bounded concurrency.
pub struct TaskExecutor {
    runner: Arc<StageRunner>,
    semaphore: Arc<Semaphore>,
    shutdown: tokio::sync::watch::Sender<bool>,
}

impl TaskExecutor {
    /// Create a new executor with a unique worker identity.
    pub fn new(
        config: WorkerConfig,
        store: Arc<Store>,
        queue: Arc<TaskQueue>,
        engines: Arc<EngineSet>,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_tasks));
        let (shutdown, _) = tokio::sync::watch::channel(false);
        let worker_id = format!("worker-{}", Uuid::new_v4().simple());
        let runner = Arc::new(StageRunner {
            store,
            queue,
            engines,
            config,
            worker_id,
        });
        Self {
            runner,
            semaphore,
            shutdown,
        }
    }

    /// Signal the run loop to stop claiming and drain.
    pub fn shutdown_handle(&self) -> tokio::sync::watch::Sender<bool> {
        self.shutdown.clone()
    }

    /// Claim-and-run loop; returns after a shutdown signal once in-flight
    /// tasks finished or the drain timeout passed.
    pub async fn run(&self) -> WorkerResult<()> {
        info!(
            worker_id = %self.runner.worker_id,
            max_concurrent = self.runner.config.max_concurrent_tasks,
            "Starting task executor"
        );
        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping executor");
                        break;
                    }
                }
                claimed = self.claim_next() => {
                    match claimed {
                        Ok(Some(task)) => {
                            let permit = match Arc::clone(&self.semaphore).acquire_owned().await {
                                Ok(permit) => permit,
                                Err(_) => break,
                            };
                            let runner = Arc::clone(&self.runner);
                            tokio::spawn(async move {
                                let _permit = permit;
                                run_with_heartbeat(runner, task).await;
                            });
                        }
                        Ok(None) => {
                            tokio::time::sleep(self.runner.config.poll_interval).await;
                        }
                        Err(err) => {
                            warn!("Claim failed: {err}");
                            tokio::time::sleep(Duration::from_secs(5)).await;
                        }
                    }
                }
            }
        }

        // Drain: wait until every permit is back.
        let total = self.runner.config.max_concurrent_tasks as u32;
        let drained = tokio::time::timeout(
            self.runner.config.shutdown_timeout,
            self.semaphore.acquire_many(total),
        )
        .await;
        match drained {
            Ok(Ok(_)) => info!("Task executor stopped"),
            _ => warn!("Shutdown timeout with tasks still in flight"),
        }
        Ok(())
    }

    async fn claim_next(&self) -> WorkerResult<Option<vedit_models::Task>> {
        // Do not claim more than we can run.
        if self.semaphore.available_permits() == 0 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            return Ok(None);
        }
        let worker = self.runner.worker_id.clone();
        self.runner.with_queue(move |queue| queue.claim(&worker)).await
    }
}

/// Run one task while renewing its lease in the background.
async fn run_with_heartbeat(runner: Arc<StageRunner>, task: vedit_models::Task) {
    let heartbeat = {
        let runner = Arc::clone(&runner);
        let task_id = task.task_id;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(runner.config.heartbeat_interval);
            interval.tick().await; // first tick is immediate
            loop {
                interval.tick().await;
                let worker = runner.worker_id.clone();
                if let Err(err) = runner
                    .with_queue(move |queue| queue.extend_lease(task_id, &worker))
                    .await
                {
                    warn!(task_id = %task_id, "lease renewal failed: {err}");
                    break;
                }
            }
        })
    };

    runner.run_task(task).await;
    heartbeat.abort();
}

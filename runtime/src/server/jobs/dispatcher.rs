use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use jobengine::{ExecutionResult, Executor, JobConfig};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Something that can run one job to completion.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(&self, config: JobConfig) -> ExecutionResult;
}

#[async_trait]
impl JobRunner for Executor {
    async fn run(&self, config: JobConfig) -> ExecutionResult {
        self.execute(config).await
    }
}

/// Where run progress is recorded.
#[async_trait]
pub trait RunSink: Send + Sync {
    async fn run_started(&self, run_id: &str) -> Result<()>;
    async fn run_finished(&self, run_id: &str, result: ExecutionResult) -> Result<()>;
}

/// Owns background executions independently of the request that queued
/// them.
pub struct JobDispatcher {
    runner: Arc<dyn JobRunner>,
    sink: Arc<dyn RunSink>,
    tasks: Mutex<JoinSet<()>>,
}

impl JobDispatcher {
    pub fn new(runner: Arc<dyn JobRunner>, sink: Arc<dyn RunSink>) -> Self {
        Self {
            runner,
            sink,
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    pub async fn submit(&self, run_id: String, config: JobConfig) {
        let runner = Arc::clone(&self.runner);
        let sink = Arc::clone(&self.sink);

        let mut tasks = self.tasks.lock().await;
        // Reap finished executions so the set only tracks live ones.
        while let Some(joined) = tasks.try_join_next() {
            if let Err(err) = joined {
                error!(error = %err, "execution task aborted");
            }
        }

        tasks.spawn(async move {
            info!(run = %run_id, language = %config.language, "starting job execution task");
            if let Err(err) = sink.run_started(&run_id).await {
                warn!(run = %run_id, error = %err, "failed to mark run as running");
            }

            let result = runner.run(config).await;
            match &result.error {
                Some(err) => warn!(run = %run_id, code = err.code(), error = %err, "job execution failed"),
                None => info!(run = %run_id, exit_code = ?result.exit_code, "job execution completed"),
            }

            if let Err(err) = sink.run_finished(&run_id, result).await {
                error!(run = %run_id, error = %err, "failed to persist run result");
            }
        });
    }

    pub async fn in_flight(&self) -> usize {
        self.tasks.lock().await.len()
    }

    /// Wait for every submitted execution to finish.
    pub async fn shutdown(&self) {
        let mut tasks = self.tasks.lock().await;
        if !tasks.is_empty() {
            info!(count = tasks.len(), "waiting for in-flight executions");
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                error!(error = %err, "execution task aborted");
            }
        }
    }
}

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use jobengine::ExecutionResult;
use tokio::sync::RwLock;

use super::dispatcher::RunSink;
use super::models::{Job, JobRun};

/// In-memory jobs and their runs.
#[derive(Debug, Clone, Default)]
pub struct JobStore {
    state: Arc<RwLock<JobDb>>,
}

#[derive(Debug, Default)]
struct JobDb {
    jobs: HashMap<String, Job>,
    runs: HashMap<String, JobRun>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_job(&self, job: Job) -> Job {
        let mut guard = self.state.write().await;
        guard.jobs.insert(job.id.clone(), job.clone());
        job
    }

    pub async fn get_job(&self, job_id: &str) -> Option<Job> {
        self.state.read().await.jobs.get(job_id).cloned()
    }

    /// Newest first.
    pub async fn list_jobs(&self) -> Vec<Job> {
        let guard = self.state.read().await;
        let mut jobs: Vec<Job> = guard.jobs.values().cloned().collect();
        jobs.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        jobs
    }

    /// Remove a job and every run recorded for it.
    pub async fn delete_job(&self, job_id: &str) -> bool {
        let mut guard = self.state.write().await;
        if guard.jobs.remove(job_id).is_none() {
            return false;
        }
        guard.runs.retain(|_, run| run.job_id != job_id);
        true
    }

    pub async fn insert_run(&self, run: JobRun) -> JobRun {
        let mut guard = self.state.write().await;
        guard.runs.insert(run.id.clone(), run.clone());
        run
    }

    pub async fn get_run(&self, run_id: &str) -> Option<JobRun> {
        self.state.read().await.runs.get(run_id).cloned()
    }

    /// Oldest first.
    pub async fn runs_for_job(&self, job_id: &str) -> Vec<JobRun> {
        let guard = self.state.read().await;
        let mut runs: Vec<JobRun> = guard
            .runs
            .values()
            .filter(|run| run.job_id == job_id)
            .cloned()
            .collect();
        runs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        runs
    }

    pub async fn update_run<F>(&self, run_id: &str, update: F) -> Option<JobRun>
    where
        F: FnOnce(&mut JobRun),
    {
        let mut guard = self.state.write().await;
        let run = guard.runs.get_mut(run_id)?;
        update(run);
        Some(run.clone())
    }
}

#[async_trait]
impl RunSink for JobStore {
    async fn run_started(&self, run_id: &str) -> Result<()> {
        self.update_run(run_id, JobRun::start)
            .await
            .with_context(|| format!("run {} not found", run_id))?;
        Ok(())
    }

    async fn run_finished(&self, run_id: &str, result: ExecutionResult) -> Result<()> {
        // The job may have been deleted while the run was in flight.
        self.update_run(run_id, |run| run.finish(result))
            .await
            .with_context(|| format!("run {} not found", run_id))?;
        Ok(())
    }
}

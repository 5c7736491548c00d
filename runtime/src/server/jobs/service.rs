use std::sync::Arc;

use anyhow::{bail, Result};
use chrono::Utc;
use jobengine::registry;
use tracing::info;
use uuid::Uuid;

use super::dispatcher::JobDispatcher;
use super::models::{CreateJobRequest, Job, JobDetail, JobRun, RunStatus};
use super::store::JobStore;

#[derive(Clone)]
pub struct JobService {
    store: JobStore,
    dispatcher: Arc<JobDispatcher>,
}

impl JobService {
    pub fn new(store: JobStore, dispatcher: Arc<JobDispatcher>) -> Self {
        Self { store, dispatcher }
    }

    pub async fn create_job(&self, request: CreateJobRequest) -> Result<Job> {
        let language = request.language.trim().to_ascii_lowercase();
        if registry::lookup(&language).is_none() {
            let supported: Vec<&str> = registry::supported_languages().collect();
            bail!(
                "unsupported language {:?}; language must be one of {}",
                request.language,
                supported.join(", ")
            );
        }
        if request.script_content.trim().is_empty() {
            bail!("script_content must not be empty");
        }
        let timeout = request.timeout()?;

        let job = Job {
            id: Uuid::new_v4().to_string(),
            language,
            image: request
                .image
                .map(|image| image.trim().to_string())
                .filter(|image| !image.is_empty()),
            script_content: request.script_content,
            timeout_ms: timeout.map(|t| t.as_millis() as u64),
            created_at: Utc::now(),
        };
        info!(job = %job.id, language = %job.language, "job created");
        Ok(self.store.insert_job(job).await)
    }

    pub async fn list_jobs(&self) -> Vec<Job> {
        self.store.list_jobs().await
    }

    pub async fn get_job(&self, job_id: &str) -> Option<JobDetail> {
        let job = self.store.get_job(job_id).await?;
        let runs = self.store.runs_for_job(job_id).await;
        Some(JobDetail { job, runs })
    }

    pub async fn delete_job(&self, job_id: &str) -> bool {
        let deleted = self.store.delete_job(job_id).await;
        if deleted {
            info!(job = %job_id, "job deleted");
        }
        deleted
    }

    /// Queue one execution of the job. `None` when the job does not exist.
    pub async fn execute(&self, job_id: &str) -> Option<JobRun> {
        let job = self.store.get_job(job_id).await?;
        let run = self
            .store
            .insert_run(JobRun::queued(Uuid::new_v4().to_string(), job.id.clone()))
            .await;

        info!(job = %job.id, run = %run.id, "run queued");
        self.dispatcher.submit(run.id.clone(), job.config()).await;
        Some(run)
    }

    /// Runs of one job, oldest first, optionally narrowed to one status.
    pub async fn list_runs(&self, job_id: &str, status: Option<RunStatus>) -> Option<Vec<JobRun>> {
        self.store.get_job(job_id).await?;
        let runs = self.store.runs_for_job(job_id).await;
        Some(
            runs.into_iter()
                .filter(|run| status.map_or(true, |wanted| run.status == wanted))
                .collect(),
        )
    }

    pub async fn get_run(&self, job_id: &str, run_id: &str) -> Option<JobRun> {
        self.store
            .get_run(run_id)
            .await
            .filter(|run| run.job_id == job_id)
    }
}

use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use jobengine::{ExecutionResult, JobConfig, Outcome, StatsSummary};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    pub language: String,
    #[serde(default)]
    pub image: Option<String>,
    pub script_content: String,
    /// Humantime text, e.g. `"90s"` or `"2m"`.
    #[serde(default)]
    pub timeout: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl CreateJobRequest {
    /// Effective timeout. Unset means the engine default applies.
    pub fn timeout(&self) -> Result<Option<Duration>> {
        match (&self.timeout, self.timeout_secs) {
            (Some(_), Some(_)) => bail!("timeout and timeout_secs cannot both be set"),
            (Some(raw), None) => humantime::parse_duration(raw.trim())
                .map(Some)
                .with_context(|| format!("timeout must be a duration like \"90s\", got {:?}", raw)),
            (None, Some(secs)) => Ok(Some(Duration::from_secs(secs))),
            (None, None) => Ok(None),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub language: String,
    #[serde(default)]
    pub image: Option<String>,
    pub script_content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    pub created_at: DateTime<Utc>,
}

impl Job {
    pub fn config(&self) -> JobConfig {
        let mut config = JobConfig::new(self.language.clone(), self.script_content.clone());
        if let Some(image) = &self.image {
            config = config.with_image(image.clone());
        }
        if let Some(ms) = self.timeout_ms {
            config = config.with_timeout(Duration::from_millis(ms));
        }
        config
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    Running,
    Completed,
    Failed,
    TimedOut,
}

impl RunStatus {
    pub const ALLOWED: [&'static str; 5] = ["queued", "running", "completed", "failed", "timed_out"];

    pub fn parse(input: &str) -> Option<Self> {
        match input.to_ascii_lowercase().as_str() {
            "queued" => Some(RunStatus::Queued),
            "running" => Some(RunStatus::Running),
            "completed" => Some(RunStatus::Completed),
            "failed" => Some(RunStatus::Failed),
            "timedout" | "timed_out" => Some(RunStatus::TimedOut),
            _ => None,
        }
    }
}

impl From<Outcome> for RunStatus {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Completed => RunStatus::Completed,
            Outcome::TimedOut => RunStatus::TimedOut,
            Outcome::Failed => RunStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRun {
    pub id: String,
    pub job_id: String,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub logs: String,
    #[serde(default)]
    pub stats: Option<StatsSummary>,
    #[serde(default)]
    pub exit_code: Option<i64>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_code: Option<String>,
}

impl JobRun {
    pub fn queued(id: String, job_id: String) -> Self {
        Self {
            id,
            job_id,
            status: RunStatus::Queued,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            logs: String::new(),
            stats: None,
            exit_code: None,
            error: None,
            error_code: None,
        }
    }

    pub fn start(&mut self) {
        self.status = RunStatus::Running;
        self.started_at = Some(Utc::now());
    }

    /// Record the terminal result of the execution.
    pub fn finish(&mut self, result: ExecutionResult) {
        self.status = result.outcome.into();
        self.completed_at = Some(Utc::now());
        self.logs = result.logs;
        self.exit_code = result.exit_code;
        if let Some(err) = &result.error {
            self.error = Some(err.to_string());
            self.error_code = Some(err.code().to_string());
        }
        self.stats = Some(result.stats);
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobDetail {
    #[serde(flatten)]
    pub job: Job,
    pub runs: Vec<JobRun>,
}

#[derive(Debug, Serialize)]
pub struct JobListResponse {
    pub jobs: Vec<Job>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListRunsQuery {
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RunListResponse {
    pub job_id: String,
    pub runs: Vec<JobRun>,
}

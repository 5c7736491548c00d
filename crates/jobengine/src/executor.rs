//! Container orchestration for one job.
//!
//! `Executor::execute` drives a job through
//! `Pending → ImagePulled → Created → Running → Completed | TimedOut | Failed → Removed`.
//! Every engine call up to and including the exit-wait is bounded by the
//! job's deadline. Removal runs on a separate cleanup budget so a timeout
//! never leaves a container behind.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::demux::{self, LogDemuxer};
use crate::docker::DockerProvider;
use crate::engine::{ContainerEngine, ContainerSpec, EngineError, EngineProvider};
use crate::error::ExecError;
use crate::job::{JobConfig, ResolvedJob};
use crate::monitor::{MonitorEvent, StatsMonitor, StatsSummary};
use crate::settings::{DockerSettings, ExecutorSettings};
use crate::staging::StagedScript;

/// Prefix of every container name the executor creates.
pub const CONTAINER_NAME_PREFIX: &str = "job";

/// Floor for how long an exited container's monitor may take to deliver its
/// last samples.
const MIN_STATS_GRACE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    Pending,
    ImagePulled,
    Created,
    Running,
    Completed,
    TimedOut,
    Failed,
    Removed,
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// How the container's own lifecycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    TimedOut,
    Failed,
}

/// Result of one execution.
///
/// `error` may accompany partial `logs` and `stats`, e.g. on timeout. A
/// container that ran to completion but could not be removed keeps
/// `Outcome::Completed` and reports `ContainerRemoveFailed` in `error`.
#[derive(Debug)]
pub struct ExecutionResult {
    pub logs: String,
    pub stats: StatsSummary,
    pub exit_code: Option<i64>,
    pub outcome: Outcome,
    pub error: Option<ExecError>,
}

impl ExecutionResult {
    fn failed(error: ExecError) -> Self {
        let outcome = if error.is_timeout() {
            Outcome::TimedOut
        } else {
            Outcome::Failed
        };
        Self {
            logs: String::new(),
            stats: StatsSummary::default(),
            exit_code: None,
            outcome,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn stats_text(&self) -> String {
        self.stats.render()
    }
}

pub struct Executor {
    provider: Arc<dyn EngineProvider>,
    settings: ExecutorSettings,
}

impl Executor {
    pub fn new(provider: Arc<dyn EngineProvider>, settings: ExecutorSettings) -> Self {
        Self { provider, settings }
    }

    /// Executor backed by a lazily connected Docker daemon.
    pub fn docker(settings: ExecutorSettings, docker: DockerSettings) -> Self {
        Self::new(Arc::new(DockerProvider::new(docker)), settings)
    }

    /// Bounded wait for the monitor after the container has exited.
    fn stats_grace(&self) -> Duration {
        (self.settings.stats_interval * 2).max(MIN_STATS_GRACE)
    }

    /// Run one job to a single terminal outcome. Never retries.
    #[instrument(skip(self, config), fields(language = %config.language))]
    pub async fn execute(&self, config: JobConfig) -> ExecutionResult {
        let job = match config.normalize() {
            Ok(job) => job,
            Err(err) => {
                warn!(error = %err, "rejected job");
                return ExecutionResult::failed(err);
            }
        };

        let engine = match self.provider.acquire().await {
            Ok(engine) => engine,
            Err(source) => return ExecutionResult::failed(ExecError::ClientInitFailed { source }),
        };

        let deadline = Instant::now() + job.timeout;
        let mut state = ExecutionState::Pending;

        match timeout_at(deadline, engine.pull_image(&job.image)).await {
            Ok(Ok(())) => advance(&mut state, ExecutionState::ImagePulled, &job.image),
            Ok(Err(source)) => {
                return ExecutionResult::failed(ExecError::ImagePullFailed {
                    image: job.image.clone(),
                    source,
                })
            }
            Err(_) => return timed_out(&job),
        }

        let staged = match StagedScript::stage(
            &self.settings.staging_dir,
            &job.script_content,
            job.profile,
        ) {
            Ok(staged) => staged,
            Err(source) => return ExecutionResult::failed(ExecError::ScriptStagingFailed { source }),
        };

        let result = self
            .run_container(&engine, &job, &staged, deadline, &mut state)
            .await;

        if staged.remove().is_err() {
            // Already logged by the stager; the job outcome stands.
            debug!("staged script left behind");
        }
        result
    }

    async fn run_container(
        &self,
        engine: &Arc<dyn ContainerEngine>,
        job: &ResolvedJob,
        staged: &StagedScript,
        deadline: Instant,
        state: &mut ExecutionState,
    ) -> ExecutionResult {
        let mount_path = job.profile.mount_path(&self.settings.mount_dir);
        let spec = ContainerSpec {
            name: format!("{}-{}", CONTAINER_NAME_PREFIX, Uuid::new_v4().simple()),
            image: job.image.clone(),
            command: job.profile.argv(&self.settings.mount_dir),
            binds: vec![staged.bind(&mount_path)],
        };

        let id = match timeout_at(deadline, engine.create_container(&spec)).await {
            Ok(Ok(id)) => id,
            Ok(Err(source)) => {
                return ExecutionResult::failed(ExecError::ContainerCreateFailed {
                    image: job.image.clone(),
                    source,
                })
            }
            Err(_) => {
                // The engine may still complete the create; the name is all we know.
                let lease = ContainerLease::new(Arc::clone(engine), spec.name.clone());
                match lease.release(self.settings.cleanup_timeout).await {
                    Ok(()) => {
                        debug!(container = %spec.name, "removed container created past the deadline")
                    }
                    Err(EngineError::NotFound(_)) => {
                        debug!(container = %spec.name, "no container to remove")
                    }
                    Err(err) => {
                        warn!(container = %spec.name, error = %err, "removal after create timeout failed")
                    }
                }
                return timed_out(job);
            }
        };
        advance(state, ExecutionState::Created, &id);

        let lease = ContainerLease::new(Arc::clone(engine), id.clone());
        let mut result = self.drive(engine, &id, job, deadline, state).await;

        match lease.release(self.settings.cleanup_timeout).await {
            Ok(()) => advance(state, ExecutionState::Removed, &id),
            Err(source) => {
                let err = ExecError::ContainerRemoveFailed {
                    container: id.clone(),
                    source,
                };
                if result.error.is_none() {
                    result.error = Some(err);
                } else {
                    warn!(container = %id, error = %err, "container removal failed after earlier error");
                }
            }
        }
        result
    }

    /// Start the container and observe it until it exits or the deadline
    /// passes.
    async fn drive(
        &self,
        engine: &Arc<dyn ContainerEngine>,
        id: &str,
        job: &ResolvedJob,
        deadline: Instant,
        state: &mut ExecutionState,
    ) -> ExecutionResult {
        match timeout_at(deadline, engine.start_container(id)).await {
            Ok(Ok(())) => advance(state, ExecutionState::Running, id),
            Ok(Err(source)) => {
                advance(state, ExecutionState::Failed, id);
                return ExecutionResult::failed(ExecError::ContainerStartFailed {
                    container: id.to_string(),
                    source,
                });
            }
            Err(_) => {
                advance(state, ExecutionState::TimedOut, id);
                return timed_out(job);
            }
        }

        let (monitor, events) = StatsMonitor::new(Arc::clone(engine), id)
            .with_interval(self.settings.stats_interval)
            .spawn(deadline);

        let waiter = {
            let engine = Arc::clone(engine);
            let id = id.to_string();
            tokio::spawn(async move { timeout_at(deadline, engine.wait_container(&id)).await })
        };

        match waiter.await {
            Ok(Ok(Ok(exit_code))) => {
                info!(container = %id, exit_code, "container exited");
                let logs = timeout_at(deadline, demux::demux_stream(engine.logs(id))).await;
                let stats = collect_stats(monitor, events, self.stats_grace()).await;

                match logs {
                    Ok(Ok(logs)) => {
                        advance(state, ExecutionState::Completed, id);
                        ExecutionResult {
                            logs,
                            stats,
                            exit_code: Some(exit_code),
                            outcome: Outcome::Completed,
                            error: None,
                        }
                    }
                    Ok(Err(source)) => {
                        advance(state, ExecutionState::Failed, id);
                        ExecutionResult {
                            logs: String::new(),
                            stats,
                            exit_code: Some(exit_code),
                            outcome: Outcome::Failed,
                            error: Some(ExecError::LogFetchFailed {
                                container: id.to_string(),
                                source,
                            }),
                        }
                    }
                    Err(_) => {
                        advance(state, ExecutionState::TimedOut, id);
                        ExecutionResult {
                            stats,
                            exit_code: Some(exit_code),
                            ..timed_out(job)
                        }
                    }
                }
            }
            Ok(Ok(Err(source))) => {
                advance(state, ExecutionState::Failed, id);
                let stats = collect_stats(monitor, events, Duration::ZERO).await;
                ExecutionResult {
                    stats,
                    ..ExecutionResult::failed(ExecError::ContainerWaitFailed {
                        container: id.to_string(),
                        source,
                    })
                }
            }
            Ok(Err(_elapsed)) => {
                advance(state, ExecutionState::TimedOut, id);
                let stats = collect_stats(monitor, events, Duration::ZERO).await;
                let logs = partial_logs(engine.as_ref(), id, self.settings.cleanup_timeout).await;
                ExecutionResult {
                    logs,
                    stats,
                    ..timed_out(job)
                }
            }
            Err(join_err) => {
                advance(state, ExecutionState::Failed, id);
                let stats = collect_stats(monitor, events, Duration::ZERO).await;
                ExecutionResult {
                    stats,
                    ..ExecutionResult::failed(ExecError::ContainerWaitFailed {
                        container: id.to_string(),
                        source: EngineError::Api(format!("wait task failed: {}", join_err)),
                    })
                }
            }
        }
    }
}

fn advance(state: &mut ExecutionState, next: ExecutionState, subject: &str) {
    debug!(from = %state, to = %next, %subject, "state transition");
    *state = next;
}

fn timed_out(job: &ResolvedJob) -> ExecutionResult {
    ExecutionResult::failed(ExecError::ExecutionTimedOut {
        timeout: job.timeout,
    })
}

/// Wait up to `grace` for the monitor to close its channel, then stop it and
/// take what it already published.
async fn collect_stats(
    monitor: JoinHandle<()>,
    mut events: UnboundedReceiver<MonitorEvent>,
    grace: Duration,
) -> StatsSummary {
    let mut stats = StatsSummary::default();
    if timeout(grace, stats.drain(&mut events)).await.is_err() {
        debug!("stats monitor still running; stopping it");
        monitor.abort();
        stats.drain_ready(&mut events);
    }
    stats
}

/// Logs of a container that has not exited: whatever decodes within the
/// cleanup budget, up to a read error or a torn frame.
async fn partial_logs(engine: &dyn ContainerEngine, id: &str, budget: Duration) -> String {
    let mut demuxer = LogDemuxer::new();
    let mut stream = engine.logs(id);
    let read = timeout(budget, async {
        while let Some(chunk) = stream.next().await {
            demuxer.push(&chunk?);
        }
        Ok::<(), EngineError>(())
    })
    .await;

    match read {
        Ok(Ok(())) => {}
        Ok(Err(err)) => debug!(container = %id, error = %err, "partial log fetch failed"),
        Err(_) => debug!(container = %id, "partial log fetch ran out of budget"),
    }
    if demuxer.pending() > 0 {
        debug!(container = %id, pending = demuxer.pending(), "partial logs ended mid-frame");
    }
    demuxer.into_text()
}

/// Ownership of a created container.
///
/// `release` removes it on the cleanup budget. If the lease is dropped
/// without being released (the execution future was cancelled or
/// panicked), removal is handed to a background task instead.
struct ContainerLease {
    engine: Arc<dyn ContainerEngine>,
    id: String,
    armed: bool,
}

impl ContainerLease {
    fn new(engine: Arc<dyn ContainerEngine>, id: String) -> Self {
        Self {
            engine,
            id,
            armed: true,
        }
    }

    async fn release(mut self, budget: Duration) -> Result<(), EngineError> {
        self.armed = false;
        match timeout(budget, self.engine.remove_container(&self.id, true)).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::Api(format!(
                "removal did not finish within {:?}",
                budget
            ))),
        }
    }
}

impl Drop for ContainerLease {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(container = %self.id, "no runtime to remove abandoned container");
            return;
        };
        let engine = Arc::clone(&self.engine);
        let id = std::mem::take(&mut self.id);
        warn!(container = %id, "removing abandoned container in background");
        handle.spawn(async move {
            if let Err(err) = engine.remove_container(&id, true).await {
                warn!(container = %id, error = %err, "background removal failed");
            }
        });
    }
}

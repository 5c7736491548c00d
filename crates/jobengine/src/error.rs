use std::time::Duration;

use thiserror::Error;

use crate::demux::DemuxError;
use crate::engine::EngineError;

/// Failure of one job execution.
///
/// Every engine-facing variant names the operation that failed and keeps the
/// engine error as its source. Apart from `UnsupportedLanguage`, a failure may
/// still come with partial logs and stats in the surrounding result.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("unsupported language: {language}")]
    UnsupportedLanguage { language: String },

    #[error("failed to initialize container engine client: {source}")]
    ClientInitFailed { source: EngineError },

    #[error("failed to pull image {image}: {source}")]
    ImagePullFailed { image: String, source: EngineError },

    #[error("failed to stage script: {source}")]
    ScriptStagingFailed { source: std::io::Error },

    #[error("failed to create container from {image}: {source}")]
    ContainerCreateFailed { image: String, source: EngineError },

    #[error("failed to start container {container}: {source}")]
    ContainerStartFailed {
        container: String,
        source: EngineError,
    },

    #[error("container wait error for {container}: {source}")]
    ContainerWaitFailed {
        container: String,
        source: EngineError,
    },

    #[error("failed to fetch logs for container {container}: {source}")]
    LogFetchFailed {
        container: String,
        source: DemuxError,
    },

    #[error("failed to remove container {container}: {source}")]
    ContainerRemoveFailed {
        container: String,
        source: EngineError,
    },

    #[error("execution timed out after {}", human(.timeout))]
    ExecutionTimedOut { timeout: Duration },
}

fn human(duration: &Duration) -> humantime::FormattedDuration {
    humantime::format_duration(*duration)
}

impl ExecError {
    pub fn code(&self) -> &'static str {
        match self {
            ExecError::UnsupportedLanguage { .. } => "JOB_UNSUPPORTED_LANGUAGE",
            ExecError::ClientInitFailed { .. } => "JOB_CLIENT_INIT_FAILED",
            ExecError::ImagePullFailed { .. } => "JOB_IMAGE_PULL_FAILED",
            ExecError::ScriptStagingFailed { .. } => "JOB_SCRIPT_STAGING_FAILED",
            ExecError::ContainerCreateFailed { .. } => "JOB_CONTAINER_CREATE_FAILED",
            ExecError::ContainerStartFailed { .. } => "JOB_CONTAINER_START_FAILED",
            ExecError::ContainerWaitFailed { .. } => "JOB_CONTAINER_WAIT_FAILED",
            ExecError::LogFetchFailed { .. } => "JOB_LOG_FETCH_FAILED",
            ExecError::ContainerRemoveFailed { .. } => "JOB_CONTAINER_REMOVE_FAILED",
            ExecError::ExecutionTimedOut { .. } => "JOB_EXECUTION_TIMED_OUT",
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ExecError::ExecutionTimedOut { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_message_uses_human_duration() {
        let err = ExecError::ExecutionTimedOut {
            timeout: Duration::from_secs(90),
        };
        assert_eq!(err.to_string(), "execution timed out after 1m 30s");
        assert!(err.is_timeout());
        assert_eq!(err.code(), "JOB_EXECUTION_TIMED_OUT");
    }

    #[test]
    fn engine_failures_name_the_operation() {
        let err = ExecError::ImagePullFailed {
            image: "python:3.10".to_string(),
            source: EngineError::Api("manifest unknown".to_string()),
        };
        let message = err.to_string();
        assert!(message.contains("pull image python:3.10"));
        assert!(message.contains("manifest unknown"));
    }
}

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Knobs for the executor. Defaults suit a local Docker daemon.
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    /// Host directory staged scripts are written to.
    pub staging_dir: PathBuf,
    /// Directory inside the container the script is mounted into.
    pub mount_dir: String,
    /// Budget for work that must happen after the deadline (partial log
    /// fetch, container removal).
    pub cleanup_timeout: Duration,
    /// Pause between stats snapshot reads.
    pub stats_interval: Duration,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            staging_dir: env::temp_dir(),
            mount_dir: "/tmp".to_string(),
            cleanup_timeout: Duration::from_secs(30),
            stats_interval: Duration::from_millis(200),
        }
    }
}

impl ExecutorSettings {
    /// Load from `JOBENGINE_*` environment variables, keeping the default for
    /// anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            staging_dir: env::var("JOBENGINE_STAGING_DIR")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.staging_dir),
            mount_dir: env::var("JOBENGINE_MOUNT_DIR")
                .ok()
                .filter(|v| v.starts_with('/'))
                .unwrap_or(defaults.mount_dir),
            cleanup_timeout: duration_var("JOBENGINE_CLEANUP_TIMEOUT")
                .unwrap_or(defaults.cleanup_timeout),
            stats_interval: duration_var("JOBENGINE_STATS_INTERVAL")
                .unwrap_or(defaults.stats_interval),
        }
    }
}

/// Connection settings for the Docker-backed engine.
#[derive(Debug, Clone)]
pub struct DockerSettings {
    /// Unix socket path; local defaults (`DOCKER_HOST` or the standard
    /// socket) when unset.
    pub socket_path: Option<String>,
    pub timeout_secs: u64,
}

impl Default for DockerSettings {
    fn default() -> Self {
        Self {
            socket_path: None,
            timeout_secs: 120,
        }
    }
}

impl DockerSettings {
    pub fn from_env() -> Self {
        Self {
            socket_path: env::var("JOBENGINE_DOCKER_SOCKET")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            timeout_secs: env::var("JOBENGINE_DOCKER_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(120),
        }
    }
}

fn duration_var(key: &str) -> Option<Duration> {
    env::var(key)
        .ok()
        .and_then(|raw| humantime::parse_duration(raw.trim()).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn from_env_parses_humantime_values() {
        env::set_var("JOBENGINE_CLEANUP_TIMEOUT", "45s");
        env::set_var("JOBENGINE_STATS_INTERVAL", "1s 500ms");
        env::set_var("JOBENGINE_STAGING_DIR", "/var/lib/jobs");

        let settings = ExecutorSettings::from_env();
        assert_eq!(settings.cleanup_timeout, Duration::from_secs(45));
        assert_eq!(settings.stats_interval, Duration::from_millis(1500));
        assert_eq!(settings.staging_dir, PathBuf::from("/var/lib/jobs"));

        env::remove_var("JOBENGINE_CLEANUP_TIMEOUT");
        env::remove_var("JOBENGINE_STATS_INTERVAL");
        env::remove_var("JOBENGINE_STAGING_DIR");
    }

    #[test]
    #[serial]
    fn from_env_ignores_garbage() {
        env::set_var("JOBENGINE_CLEANUP_TIMEOUT", "soon");
        env::set_var("JOBENGINE_MOUNT_DIR", "relative/dir");

        let settings = ExecutorSettings::from_env();
        assert_eq!(settings.cleanup_timeout, Duration::from_secs(30));
        assert_eq!(settings.mount_dir, "/tmp");

        env::remove_var("JOBENGINE_CLEANUP_TIMEOUT");
        env::remove_var("JOBENGINE_MOUNT_DIR");
    }

    #[test]
    #[serial]
    fn docker_settings_from_env() {
        env::set_var("JOBENGINE_DOCKER_SOCKET", "/run/user/1000/docker.sock");
        env::set_var("JOBENGINE_DOCKER_TIMEOUT_SECS", "not-a-number");

        let settings = DockerSettings::from_env();
        assert_eq!(
            settings.socket_path.as_deref(),
            Some("/run/user/1000/docker.sock")
        );
        assert_eq!(settings.timeout_secs, 120);

        env::remove_var("JOBENGINE_DOCKER_SOCKET");
        env::remove_var("JOBENGINE_DOCKER_TIMEOUT_SECS");
    }
}

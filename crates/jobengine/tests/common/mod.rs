#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{self, StreamExt};
use jobengine::demux::{encode_frame, STREAM_STDERR, STREAM_STDOUT};
use jobengine::monitor::{CpuStats, CpuUsage, MemoryStats, PidsStats};
use jobengine::{
    ContainerEngine, ContainerSpec, EngineError, EngineProvider, ExecutorSettings, LogStream,
    RawStats, StatsStream,
};

#[derive(Debug, Clone)]
pub enum WaitBehavior {
    Exit(i64),
    Never,
    Fail,
}

/// Scripted engine responses.
#[derive(Debug, Clone)]
pub struct Script {
    pub fail_pull: bool,
    pub fail_create: bool,
    /// Create never returns.
    pub hang_create: bool,
    pub fail_start: bool,
    pub panic_start: bool,
    pub fail_remove: bool,
    pub wait: WaitBehavior,
    pub logs: Vec<u8>,
    pub stats: Vec<Result<RawStats, EngineError>>,
    /// Keep the stats feed open after the scripted snapshots.
    pub stats_hang: bool,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            fail_pull: false,
            fail_create: false,
            hang_create: false,
            fail_start: false,
            panic_start: false,
            fail_remove: false,
            wait: WaitBehavior::Exit(0),
            logs: Vec::new(),
            stats: vec![Ok(snapshot(2, 200_000_000, 1_000_000_000)), Ok(snapshot(0, 400_000_000, 2_000_000_000))],
            stats_hang: false,
        }
    }
}

/// Stats snapshot with `pids` live processes and cumulative cpu counters.
pub fn snapshot(pids: u64, total_usage: u64, system_usage: u64) -> RawStats {
    RawStats {
        cpu_stats: CpuStats {
            cpu_usage: CpuUsage {
                total_usage,
                percpu_usage: None,
            },
            system_cpu_usage: Some(system_usage),
            online_cpus: Some(4),
        },
        precpu_stats: CpuStats::default(),
        memory_stats: MemoryStats {
            usage: Some(8 * 1024 * 1024),
        },
        networks: None,
        pids_stats: PidsStats {
            current: Some(pids),
        },
    }
}

/// Snapshot the engine sends once the container has stopped: every counter
/// omitted, `pids_stats` empty.
pub fn exited_snapshot() -> RawStats {
    serde_json::from_str(
        r#"{
            "read": "0001-01-01T00:00:00Z",
            "preread": "2024-05-01T10:00:00Z",
            "pids_stats": {},
            "blkio_stats": {},
            "cpu_stats": {"cpu_usage": {"total_usage": 0}, "throttling_data": {}},
            "precpu_stats": {"cpu_usage": {"total_usage": 400000000}, "system_cpu_usage": 2000000000},
            "memory_stats": {}
        }"#,
    )
    .unwrap()
}

pub fn stdout_frames(lines: &[&str]) -> Vec<u8> {
    lines
        .iter()
        .flat_map(|line| encode_frame(STREAM_STDOUT, line.as_bytes()).to_vec())
        .collect()
}

pub fn stderr_frame(text: &str) -> Vec<u8> {
    encode_frame(STREAM_STDERR, text.as_bytes()).to_vec()
}

/// Call-counting in-memory engine.
#[derive(Debug, Default)]
pub struct FakeEngine {
    script: Script,
    calls: Mutex<Vec<String>>,
    created: Mutex<Vec<ContainerSpec>>,
}

impl FakeEngine {
    pub fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script,
            calls: Mutex::new(Vec::new()),
            created: Mutex::new(Vec::new()),
        })
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }

    pub fn created(&self) -> Vec<ContainerSpec> {
        self.created.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    async fn pull_image(&self, image: &str) -> Result<(), EngineError> {
        self.record(format!("pull {}", image));
        if self.script.fail_pull {
            return Err(EngineError::Api("pull access denied".to_string()));
        }
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, EngineError> {
        self.record(format!("create {}", spec.name));
        if self.script.hang_create {
            return std::future::pending().await;
        }
        if self.script.fail_create {
            return Err(EngineError::Api("no such image".to_string()));
        }
        self.created.lock().unwrap().push(spec.clone());
        Ok("c0ffee".to_string())
    }

    async fn start_container(&self, id: &str) -> Result<(), EngineError> {
        self.record(format!("start {}", id));
        if self.script.panic_start {
            panic!("engine client bug");
        }
        if self.script.fail_start {
            return Err(EngineError::Api("exec format error".to_string()));
        }
        Ok(())
    }

    async fn wait_container(&self, id: &str) -> Result<i64, EngineError> {
        self.record(format!("wait {}", id));
        match self.script.wait {
            WaitBehavior::Exit(code) => Ok(code),
            WaitBehavior::Fail => Err(EngineError::NotFound(id.to_string())),
            WaitBehavior::Never => std::future::pending().await,
        }
    }

    fn logs(&self, id: &str) -> LogStream {
        self.record(format!("logs {}", id));
        // Odd chunk size so frames straddle chunk boundaries.
        let chunks: Vec<Result<Bytes, EngineError>> = self
            .script
            .logs
            .chunks(5)
            .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
            .collect();
        stream::iter(chunks).boxed()
    }

    fn stats(&self, id: &str) -> StatsStream {
        self.record(format!("stats {}", id));
        let feed = stream::iter(self.script.stats.clone());
        if self.script.stats_hang {
            feed.chain(stream::pending()).boxed()
        } else {
            feed.boxed()
        }
    }

    async fn remove_container(&self, id: &str, force: bool) -> Result<(), EngineError> {
        self.record(format!("remove {} force={}", id, force));
        if self.script.fail_remove {
            return Err(EngineError::Api("device or resource busy".to_string()));
        }
        Ok(())
    }
}

/// Provider that fails the first `failures` acquisitions.
pub struct CountingProvider {
    engine: Arc<FakeEngine>,
    failures: usize,
    acquired: AtomicUsize,
}

impl CountingProvider {
    pub fn new(engine: Arc<FakeEngine>) -> Arc<Self> {
        Self::failing_first(engine, 0)
    }

    pub fn failing_first(engine: Arc<FakeEngine>, failures: usize) -> Arc<Self> {
        Arc::new(Self {
            engine,
            failures,
            acquired: AtomicUsize::new(0),
        })
    }

    pub fn acquisitions(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EngineProvider for CountingProvider {
    async fn acquire(&self) -> Result<Arc<dyn ContainerEngine>, EngineError> {
        let attempt = self.acquired.fetch_add(1, Ordering::SeqCst);
        if attempt < self.failures {
            return Err(EngineError::Unreachable(
                "Cannot connect to the Docker daemon".to_string(),
            ));
        }
        Ok(self.engine.clone() as Arc<dyn ContainerEngine>)
    }
}

pub fn settings(staging_dir: &Path) -> ExecutorSettings {
    ExecutorSettings {
        staging_dir: staging_dir.to_path_buf(),
        cleanup_timeout: Duration::from_secs(5),
        stats_interval: Duration::ZERO,
        ..Default::default()
    }
}

pub fn staged_files(dir: &Path) -> usize {
    std::fs::read_dir(dir).unwrap().count()
}

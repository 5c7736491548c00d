//! Resource-usage sampling for a running job container.
//!
//! The monitor reads the engine's continuous metrics feed, reduces every raw
//! snapshot to a [`UsageSample`] and publishes it as a [`MonitorEvent`] on an
//! unbounded channel. The channel is closed on every exit path, so a consumer
//! draining it always terminates.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::engine::ContainerEngine;

/// Interface whose counters are reported as the container's network usage.
pub const PRIMARY_INTERFACE: &str = "eth0";

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

// Subset of the engine's stats JSON that the monitor reads.

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawStats {
    pub cpu_stats: CpuStats,
    pub precpu_stats: CpuStats,
    pub memory_stats: MemoryStats,
    pub networks: Option<HashMap<String, NetworkStats>>,
    pub pids_stats: PidsStats,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CpuStats {
    pub cpu_usage: CpuUsage,
    pub system_cpu_usage: Option<u64>,
    pub online_cpus: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CpuUsage {
    pub total_usage: u64,
    pub percpu_usage: Option<Vec<u64>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryStats {
    pub usage: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkStats {
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PidsStats {
    pub current: Option<u64>,
}

impl CpuStats {
    fn num_cpus(&self) -> u64 {
        self.online_cpus
            .filter(|n| *n > 0)
            .or_else(|| {
                self.cpu_usage
                    .percpu_usage
                    .as_ref()
                    .map(|per_cpu| per_cpu.len() as u64)
                    .filter(|n| *n > 0)
            })
            .unwrap_or(1)
    }
}

impl RawStats {
    /// The engine reports zero live processes once the container has exited.
    /// A stopped container's snapshot omits the counter entirely.
    pub fn no_live_processes(&self) -> bool {
        self.pids_stats.current.unwrap_or(0) == 0
    }
}

/// One point-in-time usage snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageSample {
    pub timestamp: DateTime<Utc>,
    pub cpu_percent: f64,
    pub memory_mb: f64,
    pub network_sent_bytes: u64,
    pub network_received_bytes: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MonitorEvent {
    Sample(UsageSample),
    /// The feed failed; no further events follow.
    Error(String),
    /// The container has no live processes left; no further events follow.
    Done,
}

/// `(cpu_delta / system_delta) * num_cpus * 100`, or zero when the system
/// delta is not positive.
pub fn cpu_percent(cpu_delta: f64, system_delta: f64, num_cpus: u64) -> f64 {
    if system_delta <= 0.0 || cpu_delta < 0.0 {
        return 0.0;
    }
    let percent = (cpu_delta / system_delta) * num_cpus as f64 * 100.0;
    if percent.is_finite() {
        percent
    } else {
        0.0
    }
}

/// Reduce one raw snapshot against the previous reading.
///
/// `previous` is the last snapshot the monitor saw; without one the
/// snapshot's own `precpu_stats` is used.
pub fn compute_sample(raw: &RawStats, previous: Option<&CpuStats>, now: DateTime<Utc>) -> UsageSample {
    let previous = previous.unwrap_or(&raw.precpu_stats);

    let cpu_delta = raw.cpu_stats.cpu_usage.total_usage as f64
        - previous.cpu_usage.total_usage as f64;
    let system_delta = match (raw.cpu_stats.system_cpu_usage, previous.system_cpu_usage) {
        (Some(current), Some(before)) => current as f64 - before as f64,
        _ => 0.0,
    };

    let (network_sent_bytes, network_received_bytes) = raw
        .networks
        .as_ref()
        .and_then(|networks| networks.get(PRIMARY_INTERFACE))
        .map(|eth| (eth.tx_bytes, eth.rx_bytes))
        .unwrap_or((0, 0));

    UsageSample {
        timestamp: now.trunc_subsecs(3),
        cpu_percent: cpu_percent(cpu_delta, system_delta, raw.cpu_stats.num_cpus()),
        memory_mb: raw.memory_stats.usage.unwrap_or(0) as f64 / BYTES_PER_MB,
        network_sent_bytes,
        network_received_bytes,
    }
}

pub struct StatsMonitor {
    engine: Arc<dyn ContainerEngine>,
    container: String,
    interval: Duration,
}

impl StatsMonitor {
    pub fn new(engine: Arc<dyn ContainerEngine>, container: impl Into<String>) -> Self {
        Self {
            engine,
            container: container.into(),
            interval: Duration::ZERO,
        }
    }

    /// Pause between snapshot reads.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Run on its own task until the feed ends or `deadline` passes.
    pub fn spawn(self, deadline: Instant) -> (JoinHandle<()>, UnboundedReceiver<MonitorEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(self.run(tx, deadline));
        (handle, rx)
    }

    pub async fn run(self, tx: UnboundedSender<MonitorEvent>, deadline: Instant) {
        let container = self.container.as_str();
        let mut feed = self.engine.stats(container);
        let mut previous: Option<CpuStats> = None;

        loop {
            let next = match tokio::time::timeout_at(deadline, feed.next()).await {
                Ok(next) => next,
                Err(_) => {
                    debug!(%container, "stats monitor stopped at deadline");
                    return;
                }
            };

            let raw = match next {
                None => {
                    debug!(%container, "stats feed closed");
                    return;
                }
                Some(Err(err)) => {
                    warn!(%container, error = %err, "stats feed read failed");
                    let _ = tx.send(MonitorEvent::Error(err.to_string()));
                    return;
                }
                Some(Ok(raw)) => raw,
            };

            let sample = compute_sample(&raw, previous.as_ref(), Utc::now());
            if tx.send(MonitorEvent::Sample(sample)).is_err() {
                return;
            }

            if raw.no_live_processes() {
                let _ = tx.send(MonitorEvent::Done);
                return;
            }
            previous = Some(raw.cpu_stats);

            if !self.interval.is_zero()
                && tokio::time::timeout_at(deadline, tokio::time::sleep(self.interval))
                    .await
                    .is_err()
            {
                return;
            }
        }
    }
}

/// Reduction of every event the monitor published for one execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsSummary {
    pub samples: Vec<UsageSample>,
    pub peak_cpu_percent: f64,
    pub peak_memory_mb: f64,
    pub network_sent_bytes: u64,
    pub network_received_bytes: u64,
    #[serde(default)]
    pub monitor_error: Option<String>,
    /// The monitor saw the container's processes end.
    #[serde(default)]
    pub finished: bool,
}

impl StatsSummary {
    pub fn record(&mut self, event: MonitorEvent) {
        match event {
            MonitorEvent::Sample(sample) => {
                self.peak_cpu_percent = self.peak_cpu_percent.max(sample.cpu_percent);
                self.peak_memory_mb = self.peak_memory_mb.max(sample.memory_mb);
                self.network_sent_bytes = sample.network_sent_bytes;
                self.network_received_bytes = sample.network_received_bytes;
                self.samples.push(sample);
            }
            MonitorEvent::Error(message) => self.monitor_error = Some(message),
            MonitorEvent::Done => self.finished = true,
        }
    }

    /// Consume events until the monitor closes the channel.
    pub async fn drain(&mut self, rx: &mut UnboundedReceiver<MonitorEvent>) {
        while let Some(event) = rx.recv().await {
            self.record(event);
        }
    }

    /// Take whatever is already buffered without waiting for more.
    pub fn drain_ready(&mut self, rx: &mut UnboundedReceiver<MonitorEvent>) {
        while let Ok(event) = rx.try_recv() {
            self.record(event);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Text form: one line per sample, then a summary line.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for sample in &self.samples {
            out.push_str(&format!(
                "Container Stats: timestamp={} cpu={:.2}% memory={:.2}MB net_sent={}B net_received={}B\n",
                sample.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
                sample.cpu_percent,
                sample.memory_mb,
                sample.network_sent_bytes,
                sample.network_received_bytes,
            ));
        }
        out.push_str(&format!(
            "Summary: samples={} peak_cpu={:.2}% peak_memory={:.2}MB net_sent={}B net_received={}B",
            self.samples.len(),
            self.peak_cpu_percent,
            self.peak_memory_mb,
            self.network_sent_bytes,
            self.network_received_bytes,
        ));
        if let Some(error) = &self.monitor_error {
            out.push_str(&format!("\nMonitor error: {}", error));
        }
        out
    }
}

impl fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cpu(total: u64, system: Option<u64>, online: Option<u64>) -> CpuStats {
        CpuStats {
            cpu_usage: CpuUsage {
                total_usage: total,
                percpu_usage: None,
            },
            system_cpu_usage: system,
            online_cpus: online,
        }
    }

    #[test]
    fn cpu_percent_matches_reference_values() {
        assert_eq!(cpu_percent(200_000_000.0, 1_000_000_000.0, 4), 80.0);
    }

    #[test]
    fn non_positive_system_delta_yields_zero() {
        assert_eq!(cpu_percent(1_000.0, 0.0, 4), 0.0);
        assert_eq!(cpu_percent(1_000.0, -5.0, 4), 0.0);
        assert_eq!(cpu_percent(0.0, 0.0, 0), 0.0);
    }

    #[test]
    fn sample_uses_precpu_stats_without_previous_snapshot() {
        let raw = RawStats {
            cpu_stats: cpu(1_200_000_000, Some(11_000_000_000), Some(4)),
            precpu_stats: cpu(1_000_000_000, Some(10_000_000_000), Some(4)),
            memory_stats: MemoryStats {
                usage: Some(64 * 1024 * 1024),
            },
            ..Default::default()
        };
        let sample = compute_sample(&raw, None, Utc::now());
        assert_eq!(sample.cpu_percent, 80.0);
        assert_eq!(sample.memory_mb, 64.0);
        assert_eq!(sample.network_sent_bytes, 0);
        assert_eq!(sample.network_received_bytes, 0);
    }

    #[test]
    fn sample_prefers_previous_snapshot_over_precpu() {
        let raw = RawStats {
            cpu_stats: cpu(600, Some(2_000), Some(2)),
            precpu_stats: cpu(0, Some(0), Some(2)),
            ..Default::default()
        };
        let previous = cpu(500, Some(1_000), Some(2));
        let sample = compute_sample(&raw, Some(&previous), Utc::now());
        assert_eq!(sample.cpu_percent, 20.0);
    }

    #[test]
    fn missing_system_usage_never_divides_by_zero() {
        let raw = RawStats {
            cpu_stats: cpu(500, None, Some(2)),
            precpu_stats: cpu(100, None, Some(2)),
            ..Default::default()
        };
        let sample = compute_sample(&raw, None, Utc::now());
        assert_eq!(sample.cpu_percent, 0.0);
        assert!(sample.cpu_percent.is_finite());
    }

    #[test]
    fn num_cpus_falls_back_to_percpu_list_then_one() {
        let mut stats = cpu(0, None, None);
        assert_eq!(stats.num_cpus(), 1);
        stats.cpu_usage.percpu_usage = Some(vec![1, 2, 3]);
        assert_eq!(stats.num_cpus(), 3);
        stats.online_cpus = Some(8);
        assert_eq!(stats.num_cpus(), 8);
    }

    #[test]
    fn network_reads_primary_interface_only() {
        let mut networks = HashMap::new();
        networks.insert(
            "eth0".to_string(),
            NetworkStats {
                rx_bytes: 1_500,
                tx_bytes: 700,
            },
        );
        networks.insert(
            "eth1".to_string(),
            NetworkStats {
                rx_bytes: 9,
                tx_bytes: 9,
            },
        );
        let raw = RawStats {
            networks: Some(networks),
            ..Default::default()
        };
        let sample = compute_sample(&raw, None, Utc::now());
        assert_eq!(sample.network_sent_bytes, 700);
        assert_eq!(sample.network_received_bytes, 1_500);
    }

    #[test]
    fn timestamp_is_truncated_to_milliseconds() {
        let now = DateTime::parse_from_rfc3339("2024-05-01T10:00:00.123456789Z")
            .unwrap()
            .with_timezone(&Utc);
        let sample = compute_sample(&RawStats::default(), None, now);
        assert_eq!(
            sample.timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true),
            "2024-05-01T10:00:00.123000000Z"
        );
    }

    #[test]
    fn raw_stats_parse_from_engine_json() {
        let json = r#"{
            "read": "2024-05-01T10:00:00.5Z",
            "pids_stats": {"current": 3},
            "cpu_stats": {
                "cpu_usage": {"total_usage": 400, "usage_in_kernelmode": 10},
                "system_cpu_usage": 2000,
                "online_cpus": 2
            },
            "precpu_stats": {"cpu_usage": {"total_usage": 300}, "system_cpu_usage": 1000},
            "memory_stats": {"usage": 2097152, "limit": 999},
            "networks": {"eth0": {"rx_bytes": 10, "tx_bytes": 20, "rx_packets": 1}}
        }"#;
        let raw: RawStats = serde_json::from_str(json).unwrap();
        assert!(!raw.no_live_processes());
        let sample = compute_sample(&raw, None, Utc::now());
        assert_eq!(sample.cpu_percent, 20.0);
        assert_eq!(sample.memory_mb, 2.0);
        assert_eq!(sample.network_sent_bytes, 20);
    }

    #[test]
    fn exited_container_snapshot_has_no_live_processes() {
        // What the engine publishes once the container has stopped.
        let json = r#"{
            "read": "0001-01-01T00:00:00Z",
            "pids_stats": {},
            "cpu_stats": {"cpu_usage": {"total_usage": 0}, "throttling_data": {}},
            "precpu_stats": {"cpu_usage": {"total_usage": 0}},
            "memory_stats": {}
        }"#;
        let raw: RawStats = serde_json::from_str(json).unwrap();
        assert_eq!(raw.pids_stats.current, None);
        assert!(raw.no_live_processes());

        let sample = compute_sample(&raw, None, Utc::now());
        assert_eq!(sample.cpu_percent, 0.0);
        assert_eq!(sample.memory_mb, 0.0);
    }

    #[test]
    fn summary_tracks_peaks_and_terminal_events() {
        let mut summary = StatsSummary::default();
        for (cpu_percent, memory_mb) in [(10.0, 5.0), (40.0, 3.0), (20.0, 9.0)] {
            summary.record(MonitorEvent::Sample(UsageSample {
                timestamp: Utc::now(),
                cpu_percent,
                memory_mb,
                network_sent_bytes: 1,
                network_received_bytes: 2,
            }));
        }
        summary.record(MonitorEvent::Done);

        assert_eq!(summary.samples.len(), 3);
        assert_eq!(summary.peak_cpu_percent, 40.0);
        assert_eq!(summary.peak_memory_mb, 9.0);
        assert!(summary.finished);
        assert!(summary.monitor_error.is_none());

        let text = summary.render();
        assert_eq!(text.matches("Container Stats:").count(), 3);
        assert!(text.contains("Summary: samples=3 peak_cpu=40.00%"));
    }

    #[test]
    fn empty_summary_still_renders() {
        let mut summary = StatsSummary::default();
        summary.record(MonitorEvent::Error("stream reset".to_string()));
        assert!(summary.is_empty());
        let text = summary.to_string();
        assert!(text.starts_with("Summary: samples=0"));
        assert!(text.ends_with("Monitor error: stream reset"));
    }
}

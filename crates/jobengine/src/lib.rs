//! Job execution engine: runs untrusted scripts in throwaway containers and
//! reports their output and resource usage.
//!
//! The entry point is [`Executor::execute`]. It resolves the job against the
//! language [`registry`], stages the script as a read-only bind mount, drives
//! the container through the [`ContainerEngine`] capability, and returns one
//! [`ExecutionResult`] with the demultiplexed logs and a [`StatsSummary`].

pub mod demux;
pub mod docker;
pub mod engine;
pub mod error;
pub mod executor;
pub mod job;
pub mod monitor;
pub mod registry;
pub mod settings;
pub mod staging;

pub use demux::{DemuxError, LogDemuxer};
pub use docker::{DockerEngine, DockerProvider};
pub use engine::{
    ContainerEngine, ContainerSpec, EngineError, EngineProvider, LogStream, StaticProvider,
    StatsStream,
};
pub use error::ExecError;
pub use executor::{ExecutionResult, ExecutionState, Executor, Outcome};
pub use job::{JobConfig, ResolvedJob, DEFAULT_TIMEOUT};
pub use monitor::{MonitorEvent, RawStats, StatsMonitor, StatsSummary, UsageSample};
pub use registry::LanguageProfile;
pub use settings::{DockerSettings, ExecutorSettings};
pub use staging::StagedScript;

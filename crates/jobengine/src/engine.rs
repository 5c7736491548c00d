//! The container engine as seen by the executor.
//!
//! The executor only talks to these traits, so any runtime speaking the
//! Docker Engine API shape can sit behind them, and tests can count calls
//! against an in-memory fake.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use thiserror::Error;

use crate::monitor::RawStats;

#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("engine unreachable: {0}")]
    Unreachable(String),

    #[error("no such container: {0}")]
    NotFound(String),

    #[error("{0}")]
    Api(String),
}

/// Raw multiplexed log bytes, chunked arbitrarily.
pub type LogStream = BoxStream<'static, Result<Bytes, EngineError>>;

/// Continuous feed of raw metric snapshots.
pub type StatsStream = BoxStream<'static, Result<RawStats, EngineError>>;

/// Everything needed to create one job container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    /// Unique container name; lets a create that never answered still be
    /// removed.
    pub name: String,
    pub image: String,
    /// Fixed argv; never built from script content.
    pub command: Vec<String>,
    /// `host:container[:mode]` bind specifications.
    pub binds: Vec<String>,
}

#[async_trait]
pub trait ContainerEngine: Send + Sync {
    async fn pull_image(&self, image: &str) -> Result<(), EngineError>;

    /// Returns the engine's container id.
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, EngineError>;

    async fn start_container(&self, id: &str) -> Result<(), EngineError>;

    /// Block until the container is no longer running; returns its exit code.
    async fn wait_container(&self, id: &str) -> Result<i64, EngineError>;

    fn logs(&self, id: &str) -> LogStream;

    fn stats(&self, id: &str) -> StatsStream;

    async fn remove_container(&self, id: &str, force: bool) -> Result<(), EngineError>;
}

/// Hands out the shared engine client.
///
/// Implementations decide how the client is built and cached; the executor
/// calls `acquire` once per execution.
#[async_trait]
pub trait EngineProvider: Send + Sync {
    async fn acquire(&self) -> Result<Arc<dyn ContainerEngine>, EngineError>;
}

/// Provider around an already-built engine.
#[derive(Clone)]
pub struct StaticProvider {
    engine: Arc<dyn ContainerEngine>,
}

impl StaticProvider {
    pub fn new(engine: Arc<dyn ContainerEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl EngineProvider for StaticProvider {
    async fn acquire(&self) -> Result<Arc<dyn ContainerEngine>, EngineError> {
        Ok(Arc::clone(&self.engine))
    }
}

//! Docker Engine API backend built on bollard.

use std::sync::Arc;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, LogOutput, LogsOptions, RemoveContainerOptions, StatsOptions,
    WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use bollard::Docker;
use futures_util::StreamExt;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::demux::{self, STREAM_STDERR, STREAM_STDIN, STREAM_STDOUT};
use crate::engine::{
    ContainerEngine, ContainerSpec, EngineError, EngineProvider, LogStream, StatsStream,
};
use crate::monitor::RawStats;
use crate::settings::DockerSettings;

impl From<bollard::errors::Error> for EngineError {
    fn from(err: bollard::errors::Error) -> Self {
        match err {
            bollard::errors::Error::DockerResponseServerError {
                status_code: 404,
                message,
            } => EngineError::NotFound(message),
            other => EngineError::Api(other.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DockerEngine {
    docker: Docker,
}

impl DockerEngine {
    /// Connect and ping the daemon.
    pub async fn connect(settings: &DockerSettings) -> Result<Self, EngineError> {
        let docker = match &settings.socket_path {
            Some(socket) => Docker::connect_with_socket(
                socket,
                settings.timeout_secs,
                bollard::API_DEFAULT_VERSION,
            ),
            None => Docker::connect_with_local_defaults(),
        }
        .map_err(|err| EngineError::Unreachable(err.to_string()))?;

        docker
            .ping()
            .await
            .map_err(|err| EngineError::Unreachable(err.to_string()))?;

        info!("connected to Docker daemon");
        Ok(Self { docker })
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn pull_image(&self, image: &str) -> Result<(), EngineError> {
        let mut progress = self.docker.create_image(
            Some(CreateImageOptions {
                from_image: image,
                ..Default::default()
            }),
            None,
            None,
        );

        while let Some(info) = progress.next().await {
            let info = info?;
            if let Some(status) = info.status {
                debug!(%image, %status, progress = info.progress.as_deref().unwrap_or(""), "pull");
            }
        }
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, EngineError> {
        let config = Config {
            image: Some(spec.image.clone()),
            cmd: Some(spec.command.clone()),
            tty: Some(false),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            host_config: Some(HostConfig {
                binds: Some(spec.binds.clone()),
                ..Default::default()
            }),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.as_str(),
            platform: None,
        };
        let created = self
            .docker
            .create_container(Some(options), config)
            .await?;
        for warning in &created.warnings {
            debug!(container = %created.id, %warning, "create warning");
        }
        Ok(created.id)
    }

    async fn start_container(&self, id: &str) -> Result<(), EngineError> {
        self.docker.start_container::<String>(id, None).await?;
        Ok(())
    }

    async fn wait_container(&self, id: &str) -> Result<i64, EngineError> {
        let mut wait = self.docker.wait_container(
            id,
            Some(WaitContainerOptions {
                condition: "not-running",
            }),
        );

        match wait.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // bollard reports a non-zero exit status as an error; it is still
            // a normal exit from the executor's point of view.
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(err)) => Err(err.into()),
            None => Err(EngineError::Api(
                "wait stream ended without a status".to_string(),
            )),
        }
    }

    fn logs(&self, id: &str) -> LogStream {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            follow: false,
            ..Default::default()
        };

        // bollard splits frames on its side; re-encode them so the core's
        // demultiplexer stays the single decoder of the wire format.
        self.docker
            .logs(id, Some(options))
            .map(|item| {
                item.map(|output| match output {
                    LogOutput::StdIn { message } => demux::encode_frame(STREAM_STDIN, &message),
                    LogOutput::StdOut { message } | LogOutput::Console { message } => {
                        demux::encode_frame(STREAM_STDOUT, &message)
                    }
                    LogOutput::StdErr { message } => demux::encode_frame(STREAM_STDERR, &message),
                })
                .map_err(EngineError::from)
            })
            .boxed()
    }

    fn stats(&self, id: &str) -> StatsStream {
        let options = StatsOptions {
            stream: true,
            one_shot: false,
        };

        self.docker
            .stats(id, Some(options))
            .map(|item| {
                let stats = item?;
                serde_json::to_value(&stats)
                    .and_then(serde_json::from_value::<RawStats>)
                    .map_err(|err| EngineError::Api(format!("malformed stats snapshot: {}", err)))
            })
            .boxed()
    }

    async fn remove_container(&self, id: &str, force: bool) -> Result<(), EngineError> {
        self.docker
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    force,
                    v: true,
                    ..Default::default()
                }),
            )
            .await?;
        Ok(())
    }
}

/// Lazily connected, shared Docker client.
///
/// The first successful connection is kept for the life of the provider. A
/// failed attempt is not cached; the next `acquire` tries again.
#[derive(Debug, Default)]
pub struct DockerProvider {
    settings: DockerSettings,
    engine: OnceCell<Arc<DockerEngine>>,
}

impl DockerProvider {
    pub fn new(settings: DockerSettings) -> Self {
        Self {
            settings,
            engine: OnceCell::new(),
        }
    }
}

#[async_trait]
impl EngineProvider for DockerProvider {
    async fn acquire(&self) -> Result<Arc<dyn ContainerEngine>, EngineError> {
        let engine = self
            .engine
            .get_or_try_init(|| async { DockerEngine::connect(&self.settings).await.map(Arc::new) })
            .await?;
        Ok(Arc::clone(engine) as Arc<dyn ContainerEngine>)
    }
}

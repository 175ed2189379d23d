//! Container Runtime Gateway - capability facade over the container engine
//!
//! **Contract:**
//! - One method per engine operation the pipeline needs
//! - Pure pass-through: no retries, no policy, errors surface verbatim
//! - Deadlines are applied by the caller (see `InvocationContext::run`)
//!
//! Production uses [`DockerGateway`] (bollard). Tests drive the pipeline
//! through `testing::ScriptedGateway`.

use crate::error::GatewayError;
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, LogOutput, LogsOptions, RemoveContainerOptions,
    StartContainerOptions, WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::Docker;
use futures_util::stream::{BoxStream, StreamExt};
use invoker_common::types::InvocationMode;
use std::fmt;
use tracing::debug;

pub type PullStream = BoxStream<'static, Result<PullProgress, GatewayError>>;
pub type LogStream = BoxStream<'static, Result<LogFrame, GatewayError>>;

/// One progress message from an image pull
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullProgress {
    pub id: Option<String>,
    pub status: Option<String>,
}

/// What to run: the image plus either its arguments or its environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub image: String,
    pub mode: InvocationMode,
}

impl ContainerSpec {
    pub fn new(image: impl Into<String>, mode: InvocationMode) -> Self {
        Self {
            image: image.into(),
            mode,
        }
    }

    /// Engine configuration: no tty, output attached, no mounts, networking
    /// or entrypoint overrides.
    pub fn to_config(&self) -> Config<String> {
        let (cmd, env) = match &self.mode {
            InvocationMode::Args(args) => (Some(args.clone()), None),
            InvocationMode::Env(env) => (None, Some(env.clone())),
        };

        Config {
            image: Some(self.image.clone()),
            cmd,
            env,
            tty: Some(false),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        }
    }
}

/// Engine-assigned container id, owned by one pipeline run
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerHandle(String);

impl ContainerHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn id(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus {
    pub code: i64,
}

/// One frame of the engine's multiplexed log stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogFrame {
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
    Stdin(Vec<u8>),
    /// Raw tty output, only produced when the stream is not multiplexed
    Console(Vec<u8>),
}

impl From<LogOutput> for LogFrame {
    fn from(output: LogOutput) -> Self {
        match output {
            LogOutput::StdOut { message } => LogFrame::Stdout(message.to_vec()),
            LogOutput::StdErr { message } => LogFrame::Stderr(message.to_vec()),
            LogOutput::StdIn { message } => LogFrame::Stdin(message.to_vec()),
            LogOutput::Console { message } => LogFrame::Console(message.to_vec()),
        }
    }
}

#[async_trait]
pub trait ContainerGateway: Send + Sync {
    /// Whether the image is already present locally. Any error means `false`.
    async fn image_exists(&self, image: &str) -> bool;

    /// Start pulling `image`. The image is only usable once the stream is drained.
    fn pull(&self, image: &str) -> PullStream;

    async fn create(&self, spec: ContainerSpec) -> Result<ContainerHandle, GatewayError>;

    async fn start(&self, handle: &ContainerHandle) -> Result<(), GatewayError>;

    /// Resolves once the container is no longer running. A non-zero exit is a
    /// status, not an error.
    async fn wait(&self, handle: &ContainerHandle) -> Result<ExitStatus, GatewayError>;

    /// stdout + stderr, following until the container's output ends
    fn logs(&self, handle: &ContainerHandle) -> LogStream;

    /// Remove the container, killing it first if it is still running
    async fn remove(&self, handle: &ContainerHandle) -> Result<(), GatewayError>;
}

/// Gateway backed by the local Docker daemon
#[derive(Clone)]
pub struct DockerGateway {
    docker: Docker,
}

impl DockerGateway {
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    /// Connect using DOCKER_HOST or the platform's default socket
    pub fn connect() -> Result<Self, GatewayError> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self::new(docker))
    }
}

#[async_trait]
impl ContainerGateway for DockerGateway {
    async fn image_exists(&self, image: &str) -> bool {
        match self.docker.inspect_image(image).await {
            Ok(_) => true,
            Err(e) => {
                debug!(image = %image, error = %e, "image not present locally");
                false
            }
        }
    }

    fn pull(&self, image: &str) -> PullStream {
        let options = Some(CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        });

        self.docker
            .create_image(options, None, None)
            .map(|item| -> Result<PullProgress, GatewayError> {
                let info = item?;
                if let Some(detail) = info.error_detail {
                    let message = detail
                        .message
                        .unwrap_or_else(|| "image pull reported an error".to_string());
                    return Err(GatewayError::engine(message));
                }
                Ok(PullProgress {
                    id: info.id,
                    status: info.status,
                })
            })
            .boxed()
    }

    async fn create(&self, spec: ContainerSpec) -> Result<ContainerHandle, GatewayError> {
        let response = self
            .docker
            .create_container(None::<CreateContainerOptions<String>>, spec.to_config())
            .await?;

        for warning in &response.warnings {
            debug!(container_id = %response.id, warning = %warning, "engine warning on create");
        }

        Ok(ContainerHandle::new(response.id))
    }

    async fn start(&self, handle: &ContainerHandle) -> Result<(), GatewayError> {
        self.docker
            .start_container(handle.id(), None::<StartContainerOptions<String>>)
            .await?;
        Ok(())
    }

    async fn wait(&self, handle: &ContainerHandle) -> Result<ExitStatus, GatewayError> {
        let options = Some(WaitContainerOptions {
            condition: "not-running".to_string(),
        });

        let mut stream = self.docker.wait_container(handle.id(), options);
        match stream.next().await {
            Some(Ok(response)) => Ok(ExitStatus {
                code: response.status_code,
            }),
            // bollard reports non-zero exits as errors; the container did finish
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => {
                Ok(ExitStatus { code })
            }
            Some(Err(e)) => Err(e.into()),
            None => Err(GatewayError::engine("wait ended without a container status")),
        }
    }

    fn logs(&self, handle: &ContainerHandle) -> LogStream {
        let options = Some(LogsOptions::<String> {
            stdout: true,
            stderr: true,
            follow: true,
            ..Default::default()
        });

        self.docker
            .logs(handle.id(), options)
            .map(|item| item.map(LogFrame::from).map_err(GatewayError::from))
            .boxed()
    }

    async fn remove(&self, handle: &ContainerHandle) -> Result<(), GatewayError> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        self.docker
            .remove_container(handle.id(), Some(options))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_mode_sets_cmd_only() {
        let spec = ContainerSpec::new(
            "registry.local/alpine:3.19",
            InvocationMode::Args(vec!["format=json".to_string()]),
        );
        let config = spec.to_config();

        assert_eq!(config.image.as_deref(), Some("registry.local/alpine:3.19"));
        assert_eq!(config.cmd, Some(vec!["format=json".to_string()]));
        assert_eq!(config.env, None);
        assert_eq!(config.tty, Some(false));
        assert!(config.entrypoint.is_none());
        assert!(config.host_config.is_none());
    }

    #[test]
    fn test_env_mode_sets_env_only() {
        let spec = ContainerSpec::new(
            "alpine:3.19",
            InvocationMode::Env(vec!["POST_DATA=hello".to_string()]),
        );
        let config = spec.to_config();

        assert_eq!(config.cmd, None);
        assert_eq!(config.env, Some(vec!["POST_DATA=hello".to_string()]));
    }

    #[test]
    fn test_log_output_conversion() {
        let frame = LogFrame::from(LogOutput::StdErr {
            message: "oops".into(),
        });
        assert_eq!(frame, LogFrame::Stderr(b"oops".to_vec()));
    }

    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_docker_gateway_runs_hello_world() {
        let gateway = DockerGateway::connect().expect("Failed to connect to Docker");

        let mut pull = gateway.pull("hello-world:latest");
        while let Some(progress) = pull.next().await {
            progress.expect("pull failed");
        }

        let handle = gateway
            .create(ContainerSpec::new("hello-world:latest", InvocationMode::Args(vec![])))
            .await
            .expect("create failed");
        gateway.start(&handle).await.expect("start failed");
        let status = gateway.wait(&handle).await.expect("wait failed");
        assert_eq!(status.code, 0);

        let frames: Vec<_> = gateway.logs(&handle).collect().await;
        assert!(frames.iter().all(|f| f.is_ok()));
        gateway.remove(&handle).await.expect("remove failed");
    }
}

//! Execution Pipeline - one container, start to finish
//!
//! **Steps (each short-circuits the rest on error):**
//! 1. Pull the image and drain the progress stream
//! 2. Create the container (`Cmd` for args, `Env` for env payloads)
//! 3. Start it
//! 4. Wait for it to stop, racing the invocation context
//! 5. Read its stdout/stderr log frames
//! 6. Remove it
//! 7. Demultiplex frames into stdout and stderr
//! 8. Fail if anything was written to stderr
//!
//! **Cleanup guarantee:**
//! Once a container exists its removal is attempted before `run` returns,
//! whatever happened before. Removal always runs under a detached context
//! with its own grace period, never under the invocation deadline. If that
//! grace period runs out, or the `run` future itself is dropped,
//! [`ContainerGuard`] schedules a forced removal in the background.

use crate::context::InvocationContext;
use crate::error::{ExecError, GatewayError};
use crate::gateway::{ContainerGateway, ContainerHandle, ContainerSpec, ExitStatus, LogFrame};
use futures_util::stream::StreamExt;
use invoker_common::config::DEFAULT_CLEANUP_TIMEOUT_SECS;
use invoker_common::types::InvocationMode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, instrument, trace, warn};

/// Container output split by stream
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DemuxedOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl DemuxedOutput {
    /// Stdin frames count as stdout. Console frames mean the container ran
    /// with a tty and the stream cannot be split.
    pub fn from_frames(frames: Vec<LogFrame>) -> Result<Self, String> {
        let mut output = Self::default();
        for frame in frames {
            match frame {
                LogFrame::Stdout(bytes) | LogFrame::Stdin(bytes) => {
                    output.stdout.extend_from_slice(&bytes)
                }
                LogFrame::Stderr(bytes) => output.stderr.extend_from_slice(&bytes),
                LogFrame::Console(_) => {
                    return Err("log stream is not multiplexed (container has a tty)".to_string())
                }
            }
        }
        Ok(output)
    }
}

/// Removes the container when dropped unless it was released explicitly.
/// Drop cannot be async, so the removal is spawned on the current runtime.
struct ContainerGuard {
    gateway: Arc<dyn ContainerGateway>,
    handle: ContainerHandle,
    armed: bool,
}

impl ContainerGuard {
    fn new(gateway: Arc<dyn ContainerGateway>, handle: ContainerHandle) -> Self {
        Self {
            gateway,
            handle,
            armed: true,
        }
    }

    /// Remove the container now. The guard is disarmed once the engine has
    /// answered, success or failure. A removal cut short by `ctx` leaves it
    /// armed so the drop path tries again without a deadline.
    async fn release(mut self, ctx: &InvocationContext) -> Result<(), GatewayError> {
        let result = ctx.run(self.gateway.remove(&self.handle)).await;
        if !matches!(result, Err(GatewayError::Context(_))) {
            self.armed = false;
        }
        result
    }
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(container_id = %self.handle, "no runtime available, container left behind");
            return;
        };

        let gateway = self.gateway.clone();
        let handle = self.handle.clone();
        warn!(container_id = %handle, "container removal not confirmed, removing in background");

        runtime.spawn(async move {
            if let Err(e) = gateway.remove(&handle).await {
                error!(container_id = %handle, error = %e, "failed to clean up abandoned container");
            }
        });
    }
}

#[derive(Clone)]
pub struct ExecutionPipeline {
    gateway: Arc<dyn ContainerGateway>,
    cleanup_timeout: Duration,
}

impl ExecutionPipeline {
    pub fn new(gateway: Arc<dyn ContainerGateway>) -> Self {
        Self {
            gateway,
            cleanup_timeout: Duration::from_secs(DEFAULT_CLEANUP_TIMEOUT_SECS),
        }
    }

    /// Grace period for removal once the invocation context is finished
    pub fn with_cleanup_timeout(mut self, timeout: Duration) -> Self {
        self.cleanup_timeout = timeout;
        self
    }

    pub fn gateway(&self) -> &Arc<dyn ContainerGateway> {
        &self.gateway
    }

    /// Run `image` once and return what it wrote
    #[instrument(skip(self, mode, ctx), fields(method = mode.method()))]
    pub async fn run(
        &self,
        image: &str,
        mode: &InvocationMode,
        ctx: &InvocationContext,
    ) -> Result<DemuxedOutput, ExecError> {
        self.pull(image, ctx).await?;

        let spec = ContainerSpec::new(image, mode.clone());
        let handle = ctx
            .run(self.gateway.create(spec))
            .await
            .map_err(|source| {
                failed(ExecError::CreateFailed {
                    image: image.to_string(),
                    source,
                })
            })?;
        debug!(container_id = %handle, "container created");

        let guard = ContainerGuard::new(self.gateway.clone(), handle.clone());
        let outcome = self.drive(image, &handle, ctx).await;

        // Removal gets its own grace period: the invocation deadline may
        // expire while the engine is still removing the container.
        if let Some(reason) = ctx.err() {
            debug!(container_id = %handle, reason = %reason, "invocation context finished, removing container anyway");
        }
        let cleanup_ctx = ctx.detached(self.cleanup_timeout);
        let removal = guard.release(&cleanup_ctx).await.map_err(|source| {
            failed(ExecError::RemoveFailed {
                image: image.to_string(),
                container: handle.to_string(),
                source,
            })
        });

        let frames = match (outcome, removal) {
            (Ok(frames), Ok(())) => frames,
            (Ok(_), Err(cleanup)) => return Err(cleanup),
            (Err(primary), Ok(())) => return Err(primary),
            (Err(primary), Err(cleanup)) => return Err(primary.with_cleanup_failure(cleanup)),
        };
        debug!(container_id = %handle, frames = frames.len(), "container removed");

        let output = DemuxedOutput::from_frames(frames).map_err(|reason| {
            failed(ExecError::DemuxFailed {
                image: image.to_string(),
                container: handle.to_string(),
                reason,
            })
        })?;

        if !output.stderr.is_empty() {
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            error!(container_id = %handle, stderr = %stderr, "container wrote to stderr");
            return Err(ExecError::ContainerRunError {
                image: image.to_string(),
                stderr,
            });
        }

        debug!(
            container_id = %handle,
            stdout_bytes = output.stdout.len(),
            "container output collected"
        );
        Ok(output)
    }

    /// Pull and drain progress; any failure means the image is unavailable
    async fn pull(&self, image: &str, ctx: &InvocationContext) -> Result<(), ExecError> {
        let mut progress = self.gateway.pull(image);
        let drain = async {
            let mut events = 0usize;
            while let Some(item) = progress.next().await {
                let item = item?;
                trace!(status = ?item.status, layer = ?item.id, "pull progress");
                events += 1;
            }
            Ok::<_, GatewayError>(events)
        };

        match ctx.run(drain).await {
            Ok(events) => {
                debug!(events, "image pulled");
                Ok(())
            }
            Err(source) => Err(failed(ExecError::ImageNotFound {
                image: image.to_string(),
                source,
            })),
        }
    }

    /// start → wait → logs; removal is handled by the caller
    async fn drive(
        &self,
        image: &str,
        handle: &ContainerHandle,
        ctx: &InvocationContext,
    ) -> Result<Vec<LogFrame>, ExecError> {
        ctx.run(self.gateway.start(handle)).await.map_err(|source| {
            failed(ExecError::StartFailed {
                image: image.to_string(),
                container: handle.to_string(),
                source,
            })
        })?;

        let status = self.wait(image, handle, ctx).await?;
        debug!(container_id = %handle, exit_code = status.code, "container stopped");

        self.collect_logs(image, handle, ctx).await
    }

    /// First of: container stops, engine reports an error, context ends
    async fn wait(
        &self,
        image: &str,
        handle: &ContainerHandle,
        ctx: &InvocationContext,
    ) -> Result<ExitStatus, ExecError> {
        tokio::select! {
            result = self.gateway.wait(handle) => result.map_err(|source| {
                failed(ExecError::WaitFailed {
                    image: image.to_string(),
                    container: handle.to_string(),
                    source,
                })
            }),
            reason = ctx.done() => Err(failed(ExecError::Cancelled {
                image: image.to_string(),
                container: handle.to_string(),
                reason,
            })),
        }
    }

    /// The engine's log stream is lazy and dies with the container, so it is
    /// read completely before removal.
    async fn collect_logs(
        &self,
        image: &str,
        handle: &ContainerHandle,
        ctx: &InvocationContext,
    ) -> Result<Vec<LogFrame>, ExecError> {
        let mut stream = self.gateway.logs(handle);
        let mut frames = Vec::new();
        let drain = async {
            while let Some(frame) = stream.next().await {
                frames.push(frame?);
            }
            Ok::<_, GatewayError>(())
        };

        ctx.run(drain).await.map_err(|source| {
            failed(ExecError::LogsFailed {
                image: image.to_string(),
                container: handle.to_string(),
                source,
            })
        })?;

        Ok(frames)
    }
}

fn failed(err: ExecError) -> ExecError {
    error!(kind = %err.kind(), error = %err, "pipeline step failed");
    err
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demux_splits_streams_in_order() {
        let output = DemuxedOutput::from_frames(vec![
            LogFrame::Stdout(b"Content-Type: text/plain\n".to_vec()),
            LogFrame::Stderr(b"warn: ".to_vec()),
            LogFrame::Stdout(b"\nbody".to_vec()),
            LogFrame::Stderr(b"slow disk".to_vec()),
        ])
        .unwrap();

        assert_eq!(output.stdout, b"Content-Type: text/plain\n\nbody");
        assert_eq!(output.stderr, b"warn: slow disk");
    }

    #[test]
    fn test_demux_routes_stdin_to_stdout() {
        let output = DemuxedOutput::from_frames(vec![LogFrame::Stdin(b"echo".to_vec())]).unwrap();
        assert_eq!(output.stdout, b"echo");
        assert!(output.stderr.is_empty());
    }

    #[test]
    fn test_demux_rejects_tty_output() {
        let err = DemuxedOutput::from_frames(vec![
            LogFrame::Stdout(b"a".to_vec()),
            LogFrame::Console(b"b".to_vec()),
        ])
        .unwrap_err();
        assert!(err.contains("not multiplexed"));
    }

    #[test]
    fn test_demux_empty() {
        assert_eq!(DemuxedOutput::from_frames(vec![]).unwrap(), DemuxedOutput::default());
    }
}

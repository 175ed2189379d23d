//! Error types for the execution core.
//!
//! Every step failure carries the image reference (and container id once
//! one exists) so log lines are actionable without extra context. None of
//! these are retried.

use crate::context::ContextError;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Failure reported by a [`crate::gateway::ContainerGateway`] implementation
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Docker(#[from] bollard::errors::Error),
    /// Plain error text from an engine without a richer error type
    #[error("{0}")]
    Engine(String),
    #[error(transparent)]
    Context(#[from] ContextError),
}

impl GatewayError {
    pub fn engine(message: impl Into<String>) -> Self {
        Self::Engine(message.into())
    }
}

/// Fieldless mirror of [`ExecError`] used for matching and status mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ImageNotFound,
    CreateFailed,
    StartFailed,
    WaitFailed,
    LogsFailed,
    RemoveFailed,
    ContainerRunError,
    MissingContentType,
    DemuxFailed,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ImageNotFound => "image_not_found",
            ErrorKind::CreateFailed => "create_failed",
            ErrorKind::StartFailed => "start_failed",
            ErrorKind::WaitFailed => "wait_failed",
            ErrorKind::LogsFailed => "logs_failed",
            ErrorKind::RemoveFailed => "remove_failed",
            ErrorKind::ContainerRunError => "container_run_error",
            ErrorKind::MissingContentType => "missing_content_type",
            ErrorKind::DemuxFailed => "demux_failed",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("image not found, {source}")]
    ImageNotFound {
        image: String,
        #[source]
        source: GatewayError,
    },

    #[error("could not create a new container for image {image} because: {source}")]
    CreateFailed {
        image: String,
        #[source]
        source: GatewayError,
    },

    #[error("could not start container {container} for image {image} with: {source}")]
    StartFailed {
        image: String,
        container: String,
        #[source]
        source: GatewayError,
    },

    #[error("cannot wait for container {container} of image {image} to complete with: {source}")]
    WaitFailed {
        image: String,
        container: String,
        #[source]
        source: GatewayError,
    },

    #[error("cannot get logs of container {container} for image {image} with: {source}")]
    LogsFailed {
        image: String,
        container: String,
        #[source]
        source: GatewayError,
    },

    #[error("cannot remove container {container} of image {image}: {source}")]
    RemoveFailed {
        image: String,
        container: String,
        #[source]
        source: GatewayError,
    },

    #[error("cannot read logs from container {container} of image {image}: {reason}")]
    DemuxFailed {
        image: String,
        container: String,
        reason: String,
    },

    /// The container wrote to stderr. The text is kept for logging only.
    #[error("error occurred while running the image {image}")]
    ContainerRunError { image: String, stderr: String },

    #[error("does not contain content type in logs")]
    MissingContentType,

    #[error("invocation of image {image} interrupted while waiting for container {container}: {reason}")]
    Cancelled {
        image: String,
        container: String,
        #[source]
        reason: ContextError,
    },

    /// A step failed and removing the container afterwards failed too
    #[error("{primary} (cleanup also failed: {cleanup})")]
    WithCleanupFailure {
        #[source]
        primary: Box<ExecError>,
        cleanup: Box<ExecError>,
    },
}

impl ExecError {
    /// Kind of the primary failure; a suppressed cleanup error never changes it
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExecError::ImageNotFound { .. } => ErrorKind::ImageNotFound,
            ExecError::CreateFailed { .. } => ErrorKind::CreateFailed,
            ExecError::StartFailed { .. } => ErrorKind::StartFailed,
            ExecError::WaitFailed { .. } => ErrorKind::WaitFailed,
            ExecError::LogsFailed { .. } => ErrorKind::LogsFailed,
            ExecError::RemoveFailed { .. } => ErrorKind::RemoveFailed,
            ExecError::DemuxFailed { .. } => ErrorKind::DemuxFailed,
            ExecError::ContainerRunError { .. } => ErrorKind::ContainerRunError,
            ExecError::MissingContentType => ErrorKind::MissingContentType,
            ExecError::Cancelled { .. } => ErrorKind::Cancelled,
            ExecError::WithCleanupFailure { primary, .. } => primary.kind(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::ImageNotFound
    }

    /// Attach a cleanup failure that happened after this error
    pub fn with_cleanup_failure(self, cleanup: ExecError) -> Self {
        ExecError::WithCleanupFailure {
            primary: Box::new(self),
            cleanup: Box::new(cleanup),
        }
    }

    /// Cleanup failure that was suppressed in favour of the primary error
    pub fn suppressed(&self) -> Option<&ExecError> {
        match self {
            ExecError::WithCleanupFailure { cleanup, .. } => Some(cleanup),
            _ => None,
        }
    }
}

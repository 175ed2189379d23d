//! Cancellable, deadline-bearing invocation context.
//!
//! Every gateway call made on behalf of one invocation is bounded by the
//! same context. Cleanup runs under a [`InvocationContext::detached`] copy so
//! an expired deadline never prevents container removal.

use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ContextError {
    #[error("invocation cancelled")]
    Cancelled,
    #[error("invocation deadline exceeded")]
    DeadlineExceeded,
}

#[derive(Debug, Clone, Default)]
pub struct InvocationContext {
    deadline: Option<Instant>,
    cancellation: Option<CancellationToken>,
}

/// Cancels the context it was created with. Dropping it does not cancel.
#[derive(Debug)]
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.token.cancel();
    }
}

impl InvocationContext {
    /// No deadline and no cancellation
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
            cancellation: None,
        }
    }

    /// Attach a cancellation signal, returning the handle that fires it
    pub fn with_cancel(mut self) -> (Self, CancelHandle) {
        let token = CancellationToken::new();
        self.cancellation = Some(token.clone());
        (self, CancelHandle { token })
    }

    /// Fresh context for cleanup work: own grace deadline, not cancellable
    pub fn detached(&self, grace: Duration) -> Self {
        Self::with_timeout(grace)
    }

    /// Why the context is finished, if it already is
    pub fn err(&self) -> Option<ContextError> {
        if self
            .cancellation
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
        {
            return Some(ContextError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(ContextError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolves once the context is cancelled or its deadline passes.
    /// Never resolves for a background context.
    pub async fn done(&self) -> ContextError {
        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        let cancelled = async {
            match &self.cancellation {
                Some(token) => token.cancelled().await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = cancelled => ContextError::Cancelled,
            _ = deadline => ContextError::DeadlineExceeded,
        }
    }

    /// Run `fut` bounded by this context
    pub async fn run<F, T, E>(&self, fut: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: From<ContextError>,
    {
        if let Some(reason) = self.err() {
            return Err(reason.into());
        }

        tokio::select! {
            out = fut => out,
            reason = self.done() => Err(reason.into()),
        }
    }
}

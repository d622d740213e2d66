//! Background work owned by one streaming call.

use std::future::Future;

use anyhow::anyhow;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::AgentError;

/// A spawned submission whose outcome the call awaits before replying.
///
/// Dropping it aborts the task, so a call that ends early never leaves a
/// consumer running behind it.
pub struct PendingOperation<T> {
    handle: JoinHandle<anyhow::Result<T>>,
    cancel: CancellationToken,
}

impl<T: Send + 'static> PendingOperation<T> {
    pub fn spawn<F>(cancel: CancellationToken, operation: F) -> Self
    where
        F: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Self {
            handle: tokio::spawn(operation),
            cancel,
        }
    }

    /// Wait for the outcome.
    ///
    /// The outer `Result` is about the call (cancelled or not); the inner
    /// one is the operation's own result, including a panic turned into an
    /// error.
    pub async fn wait(mut self) -> Result<anyhow::Result<T>, AgentError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(AgentError::Cancelled),
            joined = &mut self.handle => Ok(match joined {
                Ok(outcome) => outcome,
                Err(e) if e.is_panic() => Err(anyhow!("background operation panicked")),
                Err(e) => Err(anyhow!("background operation stopped: {e}")),
            }),
        }
    }
}

impl<T> Drop for PendingOperation<T> {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

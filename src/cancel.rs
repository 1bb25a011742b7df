#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use crate::error::{Result, SwarmError};
use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Why a round was cancelled. The reason is carried with the token so
/// downstream branches can map it to the right error kind without
/// string comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    Explicit,
    Timeout,
}

/// Structured cancellation context, one per dispatch round, shared by
/// every turn running in that round.
#[derive(Debug, Clone)]
pub struct CancellationContext {
    token: CancellationToken,
    reason: Arc<OnceLock<CancelReason>>,
}

impl Default for CancellationContext {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationContext {
    #[must_use]
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            reason: Arc::new(OnceLock::new()),
        }
    }

    /// Trigger cancellation. The first recorded reason wins; later
    /// calls only re-cancel the token.
    pub fn cancel(&self, reason: CancelReason) {
        let _ = self.reason.set(reason);
        self.token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    #[must_use]
    pub fn reason(&self) -> Option<CancelReason> {
        self.reason.get().copied()
    }

    /// Map the cancellation to its error kind: timeout is reported
    /// distinctly from an explicit stop.
    #[must_use]
    pub fn as_error(&self) -> SwarmError {
        match self.reason() {
            Some(CancelReason::Timeout) => SwarmError::TimedOut,
            _ => SwarmError::Cancelled,
        }
    }

    /// Checkpoint for suspension boundaries.
    ///
    /// # Errors
    /// Returns the mapped cancellation error once the token has fired.
    pub fn guard(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(self.as_error());
        }
        Ok(())
    }

    /// Completes when the token fires. Usable inside `tokio::select!`.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    /// Arm a timer that cancels this context with the timeout reason.
    /// Returns the timer task handle so the round can disarm it.
    #[must_use]
    pub fn arm_timeout(&self, after: Duration) -> tokio::task::JoinHandle<()> {
        let ctx = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            tracing::warn!("Round deadline reached, cancelling with timeout reason");
            ctx.cancel(CancelReason::Timeout);
        })
    }
}

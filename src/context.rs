//! Call context: deadline and cancellation for waits.
//!
//! Every operation that waits on the service (`Client::connect`,
//! `Client::query`, `BindSync::wait`, `QuerySync::wait`) takes a
//! [`Context`]. When the context ends first the operation returns
//! [`ConsumerError::Cancelled`] or [`ConsumerError::DeadlineExceeded`],
//! never a remote or transport error.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use perfetto_consumer::Context;
//!
//! let ctx = Context::background().with_timeout(Duration::from_secs(5));
//! let (ctx, cancel) = ctx.with_cancel();
//! cancel.cancel();
//! assert!(ctx.err().is_some());
//! ```

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{ConsumerError, Result};

/// Deadline plus cancellation signal, inherited by derived contexts.
#[derive(Debug, Clone)]
pub struct Context {
    deadline: Option<Instant>,
    token: CancellationToken,
}

/// Cancels the context returned alongside it by [`Context::with_cancel`]
/// and every context derived from that one.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.token.cancel();
    }
}

impl Context {
    /// A context that never ends on its own.
    pub fn background() -> Self {
        Self {
            deadline: None,
            token: CancellationToken::new(),
        }
    }

    /// Derive a context that also ends after `timeout`.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Derive a context that also ends at `deadline`.
    ///
    /// The earlier of the parent's deadline and `deadline` wins.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(existing) if existing <= deadline => existing,
            _ => deadline,
        };
        Self {
            deadline: Some(deadline),
            token: self.token.child_token(),
        }
    }

    /// Derive a context that can be cancelled independently of its parent.
    pub fn with_cancel(&self) -> (Self, CancelHandle) {
        let token = self.token.child_token();
        let handle = CancelHandle {
            token: token.clone(),
        };
        (
            Self {
                deadline: self.deadline,
                token,
            },
            handle,
        )
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Why the context ended, or `None` if it is still live.
    pub fn err(&self) -> Option<ConsumerError> {
        if self.token.is_cancelled() {
            return Some(ConsumerError::Cancelled);
        }
        match self.deadline {
            Some(at) if Instant::now() >= at => Some(ConsumerError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Wait until the context ends and return the reason.
    pub async fn done(&self) -> ConsumerError {
        match self.deadline {
            Some(at) => tokio::select! {
                _ = self.token.cancelled() => ConsumerError::Cancelled,
                _ = tokio::time::sleep_until(at) => ConsumerError::DeadlineExceeded,
            },
            None => {
                self.token.cancelled().await;
                ConsumerError::Cancelled
            }
        }
    }

    /// Run `fut` to completion unless the context ends first.
    ///
    /// If both are ready at once the future's own result wins.
    pub async fn run<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            biased;
            result = fut => result,
            reason = self.done() => Err(reason),
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

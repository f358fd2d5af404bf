//! Cancellable, deadline-bearing execution context passed to every store call.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{Result, StoreError};

#[derive(Debug, Clone)]
pub struct Context {
    cancel: CancellationToken,
    deadline: Option<Instant>,
    trace_id: Uuid,
}

impl Context {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self {
            cancel: CancellationToken::new(),
            deadline: None,
            trace_id: Uuid::new_v4(),
        }
    }

    /// Child context with a deadline `timeout` from now. Cancelling the
    /// parent cancels the child; the earlier deadline wins. A timeout too
    /// large to represent leaves the parent's deadline in place.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.with_deadline(deadline),
            None => Self {
                cancel: self.cancel.child_token(),
                deadline: self.deadline,
                trace_id: self.trace_id,
            },
        }
    }

    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(d) if d < deadline => d,
            _ => deadline,
        };
        Self {
            cancel: self.cancel.child_token(),
            deadline: Some(deadline),
            trace_id: self.trace_id,
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn trace_id(&self) -> Uuid {
        self.trace_id
    }

    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// Why the context is done, if it is.
    pub fn err(&self) -> Option<StoreError> {
        if self.cancel.is_cancelled() {
            return Some(StoreError::Cancelled);
        }
        match self.deadline {
            Some(d) if Instant::now() >= d => Some(StoreError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolves once the context is cancelled or its deadline passes.
    pub async fn done(&self) -> StoreError {
        match self.deadline {
            Some(deadline) => tokio::select! {
                () = self.cancel.cancelled() => StoreError::Cancelled,
                () = tokio::time::sleep_until(deadline) => StoreError::DeadlineExceeded,
            },
            None => {
                self.cancel.cancelled().await;
                StoreError::Cancelled
            }
        }
    }

    /// Run `fut` until it completes or the context is done, whichever is
    /// first. The future is dropped when the context wins.
    pub async fn run<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if let Some(err) = self.err() {
            return Err(err);
        }
        tokio::select! {
            biased;
            err = self.done() => Err(err),
            res = fut => res,
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

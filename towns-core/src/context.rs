//! Explicit request context carrying a deadline and a cancellation signal.
//!
//! Passed by value through every suspending call instead of being stashed in
//! structs; cloning is cheap.

use crate::error::{Err, RiverError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

#[derive(Clone)]
pub struct Context {
    deadline: Option<Instant>,
    cancel: Option<watch::Receiver<bool>>,
}

/// Cancels the associated [`Context`] when [`CancelHandle::cancel`] is
/// called. Dropping the handle without cancelling leaves the context live.
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

impl Context {
    /// A context that is never cancelled and has no deadline.
    pub const fn background() -> Self {
        Self { deadline: None, cancel: None }
    }

    /// Child context with an explicit cancellation handle.
    pub fn with_cancel(&self) -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        (Self { deadline: self.deadline, cancel: Some(rx) }, CancelHandle { tx })
    }

    /// Child context whose deadline is at most `timeout` from now.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let at = Instant::now() + timeout;
        let deadline = Some(self.deadline.map_or(at, |d| d.min(at)));
        Self { deadline, cancel: self.cancel.clone() }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        if let Some(rx) = &self.cancel {
            if *rx.borrow() {
                return true;
            }
        }
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Resolves when the context is cancelled or its deadline passes; pends
    /// forever otherwise.
    pub async fn done(&self) {
        let deadline = self.deadline;
        let expired = async move {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };
        let cancel = self.cancel.clone();
        let cancelled = async move {
            let Some(mut rx) = cancel else { return std::future::pending().await };
            loop {
                if *rx.borrow() {
                    return;
                }
                if rx.changed().await.is_err() {
                    // Handle dropped without cancelling.
                    return std::future::pending().await;
                }
            }
        };
        tokio::select! {
            () = expired => {},
            () = cancelled => {},
        }
    }

    /// The error surfaced for an operation interrupted by this context.
    pub fn error(&self) -> RiverError {
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            RiverError::new(Err::Canceled, "deadline exceeded")
        } else {
            RiverError::new(Err::Canceled, "context cancelled")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancel_resolves_done() {
        let (ctx, handle) = Context::background().with_cancel();
        assert!(!ctx.is_cancelled());
        handle.cancel();
        ctx.done().await;
        assert!(ctx.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_resolves_done() {
        let ctx = Context::background().with_timeout(Duration::from_millis(50));
        ctx.done().await;
        assert!(ctx.is_cancelled());
        assert_eq!(ctx.error().kind(), Err::Canceled);
    }

    #[tokio::test]
    async fn child_keeps_earlier_deadline() {
        let parent = Context::background().with_timeout(Duration::from_secs(1));
        let child = parent.with_timeout(Duration::from_secs(60));
        assert_eq!(child.deadline(), parent.deadline());
    }
}

//! Request context: an optional deadline plus a cancellation token.
//!
//! Every long operation runs under a `RequestContext`. Deadlines only ever
//! tighten when a child context is derived, and an interrupted operation
//! reports whether it was canceled or ran out of time.

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why an operation stopped before completing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupted {
    Canceled,
    DeadlineExceeded,
}

#[derive(Debug, Clone)]
pub struct RequestContext {
    deadline: Option<Instant>,
    cancel: CancellationToken,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new(CancellationToken::new())
    }
}

impl RequestContext {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            deadline: None,
            cancel,
        }
    }

    /// Derive a context whose deadline is `timeout` from now, unless the
    /// current deadline is already sooner.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(existing) if existing <= deadline => existing,
            _ => deadline,
        };
        Self {
            deadline: Some(deadline),
            cancel: self.cancel.clone(),
        }
    }

    /// Drive `fut` until it completes, the token is cancelled, or the
    /// deadline passes. Cancellation wins ties.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, Interrupted> {
        let deadline = self.deadline;
        let expired = async move {
            match deadline {
                Some(d) => tokio::time::sleep_until(d).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Interrupted::Canceled),
            _ = expired => Err(Interrupted::DeadlineExceeded),
            out = fut => Ok(out),
        }
    }

    pub async fn sleep(&self, duration: Duration) -> Result<(), Interrupted> {
        self.run(tokio::time::sleep(duration)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_child_deadline_never_extends() {
        let root = RequestContext::default();
        let short = root.with_timeout(Duration::from_millis(100));
        let long = short.with_timeout(Duration::from_secs(30));
        assert_eq!(short.deadline, long.deadline);

        let shorter = long.with_timeout(Duration::from_millis(10));
        assert!(shorter.deadline < long.deadline);
    }

    #[tokio::test]
    async fn test_deadline_exceeded() {
        let ctx = RequestContext::default().with_timeout(Duration::from_millis(50));
        let err = ctx.sleep(Duration::from_secs(5)).await.unwrap_err();
        assert_eq!(err, Interrupted::DeadlineExceeded);
    }

    #[tokio::test]
    async fn test_cancel_is_distinct_from_timeout() {
        let token = CancellationToken::new();
        let ctx = RequestContext::new(token.clone()).with_timeout(Duration::from_secs(5));
        token.cancel();
        assert_eq!(
            ctx.sleep(Duration::from_secs(1)).await.unwrap_err(),
            Interrupted::Canceled
        );
    }

    #[tokio::test]
    async fn test_completes_without_deadline() {
        let ctx = RequestContext::default();
        assert_eq!(ctx.run(async { 7 }).await, Ok(7));
        assert_eq!(ctx.deadline, None);
    }
}

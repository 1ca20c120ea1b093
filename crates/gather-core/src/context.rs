//! Cancellation and deadline signal shared by resolvers and gatherers.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{GatherError, Result};

/// Caller-supplied cancellation and deadline for one resolution-and-fetch call.
///
/// Cloning is cheap and clones observe the same token.
#[derive(Debug, Clone, Default)]
pub struct GatherContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl GatherContext {
    /// Create a context with no deadline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context that expires `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    /// Create a context that expires at `deadline`.
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: Some(deadline),
        }
    }

    /// Wrap an existing token, e.g. one owned by a server's shutdown logic.
    pub fn from_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// Derive a context cancelled together with this one, keeping the deadline.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, if any.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Fail fast if the context is already cancelled or expired.
    pub fn check(&self) -> Result<()> {
        if self.token.is_cancelled() {
            return Err(GatherError::Cancelled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(GatherError::DeadlineExceeded);
        }
        Ok(())
    }

    /// Resolves once the context is cancelled or its deadline passes.
    pub async fn done(&self) -> GatherError {
        match self.deadline {
            Some(deadline) => tokio::select! {
                () = self.token.cancelled() => GatherError::Cancelled,
                () = tokio::time::sleep_until(deadline) => GatherError::DeadlineExceeded,
            },
            None => {
                self.token.cancelled().await;
                GatherError::Cancelled
            }
        }
    }

    /// Drive `fut` to completion unless the context ends first.
    ///
    /// On cancellation the future is dropped, so any child process it owns
    /// must be spawned with `kill_on_drop`.
    pub async fn run<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = T>,
    {
        self.check()?;
        tokio::select! {
            biased;
            err = self.done() => Err(err),
            out = fut => Ok(out),
        }
    }

    /// Like [`run`](Self::run) for collaborator futures returning `anyhow::Result`.
    ///
    /// Cancellation is reported as an `anyhow` error wrapping [`GatherError`],
    /// so callers can still detect it with `downcast_ref`.
    pub async fn run_anyhow<F, T>(&self, fut: F) -> anyhow::Result<T>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        match self.run(fut).await {
            Ok(out) => out,
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_completes_when_not_cancelled() {
        let ctx = GatherContext::new();
        let value = ctx.run(async { 42 }).await.unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn run_fails_fast_when_already_cancelled() {
        let ctx = GatherContext::new();
        ctx.cancel();
        let err = ctx.run(async { 1 }).await.unwrap_err();
        assert!(matches!(err, GatherError::Cancelled));
    }

    #[tokio::test]
    async fn cancellation_interrupts_pending_future() {
        let ctx = GatherContext::new();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let started = std::time::Instant::now();
        let err = ctx
            .run(tokio::time::sleep(Duration::from_secs(30)))
            .await
            .unwrap_err();
        assert!(matches!(err, GatherError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn deadline_interrupts_pending_future() {
        let ctx = GatherContext::with_timeout(Duration::from_millis(20));
        let err = ctx
            .run(tokio::time::sleep(Duration::from_secs(30)))
            .await
            .unwrap_err();
        assert!(matches!(err, GatherError::DeadlineExceeded));
    }

    #[tokio::test]
    async fn child_is_cancelled_with_parent() {
        let parent = GatherContext::new();
        let child = parent.child();
        parent.cancel();
        assert!(child.is_cancelled());
        assert!(matches!(child.check(), Err(GatherError::Cancelled)));
    }

    #[tokio::test]
    async fn run_anyhow_keeps_cancellation_detectable() {
        let ctx = GatherContext::new();
        ctx.cancel();
        let err = ctx
            .run_anyhow(async { Ok::<_, anyhow::Error>(()) })
            .await
            .unwrap_err();
        assert!(err.downcast_ref::<GatherError>().is_some_and(GatherError::is_cancellation));
    }
}

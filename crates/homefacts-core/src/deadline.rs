//! Hierarchical, cancellable deadlines.
//!
//! A lookup owns one root [`Deadline`]; every adapter call, retry sleep,
//! identity checkout and pacing delay runs under a child derived from it.
//! A child never outlives its parent, and cancelling a parent cancels all
//! of its descendants.

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

/// Why a deadline-bound operation stopped before completing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupted {
    Cancelled,
    Elapsed,
}

impl Display for Interrupted {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cancelled => f.write_str("cancelled by caller"),
            Self::Elapsed => f.write_str("deadline elapsed"),
        }
    }
}

impl std::error::Error for Interrupted {}

#[derive(Debug, Clone)]
pub struct Deadline {
    at: Instant,
    token: CancellationToken,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self::at(Instant::now() + budget)
    }

    pub fn at(at: Instant) -> Self {
        Self {
            at,
            token: CancellationToken::new(),
        }
    }

    /// Derives a deadline that expires after `budget` or with this one, whichever is sooner.
    pub fn child(&self, budget: Duration) -> Self {
        let requested = Instant::now() + budget;
        Self {
            at: requested.min(self.at),
            token: self.token.child_token(),
        }
    }

    pub fn instant(&self) -> Instant {
        self.at
    }

    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn is_expired(&self) -> bool {
        self.is_cancelled() || Instant::now() >= self.at
    }

    /// Cancels this deadline and every child derived from it.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Drives `future` until it completes, the deadline passes, or the deadline is cancelled.
    pub async fn run<F>(&self, future: F) -> Result<F::Output, Interrupted>
    where
        F: Future,
    {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(Interrupted::Cancelled),
            _ = sleep_until(self.at) => Err(Interrupted::Elapsed),
            output = future => Ok(output),
        }
    }

    pub async fn sleep(&self, duration: Duration) -> Result<(), Interrupted> {
        self.run(tokio::time::sleep(duration)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn child_never_outlives_parent() {
        let parent = Deadline::after(Duration::from_secs(2));
        let child = parent.child(Duration::from_secs(10));
        assert_eq!(child.instant(), parent.instant());

        let shorter = parent.child(Duration::from_millis(500));
        assert!(shorter.instant() < parent.instant());
    }

    #[tokio::test(start_paused = true)]
    async fn run_reports_elapsed_when_future_is_slower_than_deadline() {
        let deadline = Deadline::after(Duration::from_millis(100));
        let outcome = deadline
            .run(tokio::time::sleep(Duration::from_secs(5)))
            .await;
        assert_eq!(outcome, Err(Interrupted::Elapsed));
        assert!(deadline.is_expired());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelling_parent_interrupts_children() {
        let parent = Deadline::after(Duration::from_secs(30));
        let child = parent.child(Duration::from_secs(30));
        let grandchild = child.child(Duration::from_secs(30));

        let waiter = tokio::spawn(async move { grandchild.sleep(Duration::from_secs(20)).await });
        tokio::task::yield_now().await;
        parent.cancel();

        let outcome = waiter.await.expect("task completes");
        assert_eq!(outcome, Err(Interrupted::Cancelled));
        assert!(child.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn completed_future_returns_its_output() {
        let deadline = Deadline::after(Duration::from_secs(1));
        let value = deadline.run(async { 7 }).await;
        assert_eq!(value, Ok(7));
        assert!(deadline.remaining() <= Duration::from_secs(1));
    }
}

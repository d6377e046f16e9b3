//! Resilience primitives shared by every long-running loop.
//!
//! - `Supervisor` restarts a loop forever with exponential backoff.
//! - `RetryPolicy` retries a bounded number of expected failures, either
//!   for a single call or for a lazily produced sequence.
//! - `Clock` abstracts monotonic time and sleeping so backoff can be
//!   tested without waiting.

pub mod retry;
pub mod supervisor;

pub use retry::RetryPolicy;
pub use supervisor::{Supervisor, SupervisorConfig};

use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;

/// Explicit cancellation of a supervised loop.
///
/// Always terminal: a supervisor that sees it stops immediately and
/// never schedules a restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("supervised loop cancelled")]
pub struct Cancelled;

/// Source of monotonic time and sleeps.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Current monotonic instant.
    fn now(&self) -> Instant;

    /// Suspend the caller for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// `Clock` backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

//! Restart-forever supervision for long-running loops.
//!
//! A supervised unit is a closure producing a fresh future per attempt,
//! so every restart begins from scratch with no resumed internal state.
//! Failures are logged and followed by an exponential backoff; a run
//! that stayed healthy for longer than the stability window forgives
//! earlier failures. Explicit cancellation (a `Cancelled` error from the
//! unit, or the shutdown signal flipping) ends supervision at once.

use serde::Deserialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

use super::{Cancelled, Clock, TokioClock};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Backoff parameters for a `Supervisor`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// A failed attempt shorter than this counts as a consecutive failure;
    /// a longer one resets the failure counter to 1.
    pub stability_window_secs: u64,
    /// Upper bound on the restart delay.
    pub max_backoff_secs: u64,
    /// Consecutive failure count from which the delay is pinned to the cap.
    pub cap_after_failures: u32,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            stability_window_secs: 10,
            max_backoff_secs: 480,
            cap_after_failures: 10,
        }
    }
}

impl SupervisorConfig {
    pub fn stability_window(&self) -> Duration {
        Duration::from_secs(self.stability_window_secs)
    }

    /// Restart delay after `consecutive_failures` failures in a row:
    /// `2^(n-1)` seconds, pinned to the cap once `n >= cap_after_failures`.
    pub fn backoff_delay(&self, consecutive_failures: u32) -> Duration {
        if consecutive_failures >= self.cap_after_failures {
            return Duration::from_secs(self.max_backoff_secs);
        }
        let exponent = consecutive_failures.saturating_sub(1);
        let secs = 2u64
            .checked_pow(exponent)
            .unwrap_or(u64::MAX)
            .min(self.max_backoff_secs);
        Duration::from_secs(secs)
    }
}

// ---------------------------------------------------------------------------
// Supervisor
// ---------------------------------------------------------------------------

pub struct Supervisor {
    name: String,
    config: SupervisorConfig,
    clock: Arc<dyn Clock>,
    shutdown: Option<watch::Receiver<bool>>,
}

impl Supervisor {
    pub fn new(name: impl Into<String>, config: SupervisorConfig) -> Self {
        Self {
            name: name.into(),
            config,
            clock: Arc::new(TokioClock),
            shutdown: None,
        }
    }

    /// Replace the clock (tests inject a manual one).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Stop supervision as soon as `shutdown` becomes `true`.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run `unit` until it returns `Ok(())` or is cancelled.
    ///
    /// Any other error is logged and the unit is restarted after the
    /// backoff delay. There is no give-up.
    pub async fn run<F, Fut>(&self, mut unit: F) -> Result<(), Cancelled>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<()>>,
    {
        let mut shutdown = self.shutdown.clone();
        let mut consecutive_failures: u32 = 0;

        loop {
            if consecutive_failures > 0 {
                info!(supervised = %self.name, "Restarting supervised loop");
            }

            let started = self.clock.now();
            let outcome = tokio::select! {
                _ = shutdown_requested(&mut shutdown) => {
                    info!(supervised = %self.name, "Shutdown requested, stopping");
                    return Err(Cancelled);
                }
                outcome = unit() => outcome,
            };

            let err = match outcome {
                Ok(()) => {
                    info!(supervised = %self.name, "Supervised loop finished");
                    return Ok(());
                }
                Err(e) if e.is::<Cancelled>() => {
                    info!(supervised = %self.name, "Supervised loop cancelled");
                    return Err(Cancelled);
                }
                Err(e) => e,
            };

            let ran_for = self.clock.now().saturating_duration_since(started);
            consecutive_failures = if ran_for < self.config.stability_window() {
                consecutive_failures.saturating_add(1)
            } else {
                1
            };
            let delay = self.config.backoff_delay(consecutive_failures);

            error!(
                supervised = %self.name,
                error = format!("{err:#}"),
                ran_for_secs = ran_for.as_secs(),
                consecutive_failures,
                restart_in_secs = delay.as_secs(),
                "Unexpected error in supervised loop, restarting after backoff"
            );

            tokio::select! {
                _ = shutdown_requested(&mut shutdown) => {
                    info!(supervised = %self.name, "Shutdown requested during backoff, stopping");
                    return Err(Cancelled);
                }
                _ = self.clock.sleep(delay) => {}
            }
        }
    }
}

/// Resolves once the shutdown flag is `true`; never resolves without a
/// receiver or after the sender is gone.
async fn shutdown_requested(shutdown: &mut Option<watch::Receiver<bool>>) {
    match shutdown {
        Some(rx) => {
            if rx.wait_for(|stop| *stop).await.is_err() {
                std::future::pending::<()>().await;
            }
        }
        None => std::future::pending::<()>().await,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use tokio::time::Instant;

    /// Clock whose time only moves when told to; sleeps are recorded
    /// and advance time by the slept amount.
    struct ManualClock {
        base: Instant,
        offset: Mutex<Duration>,
        sleeps: Mutex<Vec<Duration>>,
    }

    impl ManualClock {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                base: Instant::now(),
                offset: Mutex::new(Duration::ZERO),
                sleeps: Mutex::new(Vec::new()),
            })
        }

        fn advance(&self, by: Duration) {
            *self.offset.lock().unwrap() += by;
        }

        fn sleeps_secs(&self) -> Vec<u64> {
            self.sleeps.lock().unwrap().iter().map(|d| d.as_secs()).collect()
        }
    }

    #[async_trait]
    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            self.base + *self.offset.lock().unwrap()
        }

        async fn sleep(&self, duration: Duration) {
            self.sleeps.lock().unwrap().push(duration);
            self.advance(duration);
        }
    }

    fn supervisor(clock: &Arc<ManualClock>) -> Supervisor {
        Supervisor::new("test-loop", SupervisorConfig::default()).with_clock(clock.clone())
    }

    #[test]
    fn test_backoff_delay_progression() {
        let cfg = SupervisorConfig::default();
        let secs: Vec<u64> = (1..=12).map(|n| cfg.backoff_delay(n).as_secs()).collect();
        assert_eq!(secs, vec![1, 2, 4, 8, 16, 32, 64, 128, 256, 480, 480, 480]);
    }

    #[test]
    fn test_backoff_delay_never_exceeds_cap() {
        let cfg = SupervisorConfig {
            stability_window_secs: 10,
            max_backoff_secs: 30,
            cap_after_failures: 10,
        };
        assert_eq!(cfg.backoff_delay(6).as_secs(), 30);
        assert_eq!(cfg.backoff_delay(64).as_secs(), 30);
    }

    #[tokio::test]
    async fn test_consecutive_failures_double_delay() {
        let clock = ManualClock::new();
        let calls = AtomicU32::new(0);

        let result = supervisor(&clock)
            .run(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 5 {
                        Err(anyhow!("boom {n}"))
                    } else {
                        Ok(())
                    }
                }
            })
            .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 6);
        assert_eq!(clock.sleeps_secs(), vec![1, 2, 4, 8, 16]);
    }

    #[tokio::test]
    async fn test_delay_is_capped_after_ten_failures() {
        let clock = ManualClock::new();
        let calls = AtomicU32::new(0);

        supervisor(&clock)
            .run(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 12 {
                        Err(anyhow!("boom"))
                    } else {
                        Ok(())
                    }
                }
            })
            .await
            .unwrap();

        let sleeps = clock.sleeps_secs();
        assert_eq!(sleeps.len(), 12);
        assert_eq!(&sleeps[8..], &[256, 480, 480, 480]);
    }

    #[tokio::test]
    async fn test_long_healthy_run_resets_backoff() {
        let clock = ManualClock::new();
        let calls = AtomicU32::new(0);

        supervisor(&clock)
            .run(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                let clock = clock.clone();
                async move {
                    match n {
                        0..=2 => Err(anyhow!("quick failure")),
                        3 => {
                            // healthy for two minutes before failing
                            clock.advance(Duration::from_secs(120));
                            Err(anyhow!("late failure"))
                        }
                        4 => Err(anyhow!("quick failure again")),
                        _ => Ok(()),
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(clock.sleeps_secs(), vec![1, 2, 4, 1, 2]);
    }

    #[tokio::test]
    async fn test_cancelled_error_is_never_retried() {
        let clock = ManualClock::new();
        let calls = AtomicU32::new(0);

        let result = supervisor(&clock)
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(anyhow::Error::new(Cancelled)) }
            })
            .await;

        assert_eq!(result, Err(Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(clock.sleeps_secs().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_with_context_is_still_terminal() {
        let clock = ManualClock::new();
        let result = supervisor(&clock)
            .run(|| async { Err(anyhow::Error::new(Cancelled).context("while polling")) })
            .await;
        assert_eq!(result, Err(Cancelled));
    }

    #[tokio::test]
    async fn test_shutdown_signal_stops_running_unit() {
        let (tx, rx) = watch::channel(false);
        let sup = Supervisor::new("forever", SupervisorConfig::default()).with_shutdown(rx);

        let handle = tokio::spawn(async move {
            sup.run(|| async {
                std::future::pending::<()>().await;
                Ok(())
            })
            .await
        });

        tokio::task::yield_now().await;
        tx.send(true).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("supervisor did not stop")
            .unwrap();
        assert_eq!(result, Err(Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_during_backoff() {
        let (tx, rx) = watch::channel(false);
        let sup = Supervisor::new("flaky", SupervisorConfig::default()).with_shutdown(rx);
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let handle = tokio::spawn(async move {
            sup.run(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(anyhow!("always failing")) }
            })
            .await
        });

        // 1s + 2s + 4s of backoff elapse, then we are inside the 8s sleep
        tokio::time::sleep(Duration::from_secs(9)).await;
        tx.send(true).unwrap();

        assert_eq!(handle.await.unwrap(), Err(Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }
}

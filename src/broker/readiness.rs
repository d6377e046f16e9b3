//! Cross-process readiness barrier.
//!
//! One flag map in the shared broker, one flag per ingestion pipeline.
//! Flags start false at session start, each flips to true once, and
//! only an explicit `reset` clears them. Waiters poll the map at a fixed
//! interval and ride out transient store outages. There is no built-in
//! timeout; callers wanting one wrap the wait themselves.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{Broker, BrokerError};
use crate::resilience::RetryPolicy;

/// Store key holding the readiness map.
pub const READINESS_KEY: &str = "DATA_THREADS_ARE_READY";

/// Reference-currency history backfill.
pub const EXTERNAL_HISTORY: &str = "external_history";
/// Reference-currency live stream.
pub const EXTERNAL_LIVE: &str = "external_live";
/// Official tape watcher.
pub const OFFICIAL_TAPE: &str = "official_tape";

#[derive(Clone)]
pub struct ReadinessBarrier {
    broker: Arc<dyn Broker>,
    key: String,
    poll_interval: Duration,
    write_policy: RetryPolicy<BrokerError>,
}

impl ReadinessBarrier {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self {
            broker,
            key: READINESS_KEY.to_string(),
            poll_interval: Duration::from_secs(1),
            write_policy: RetryPolicy::new(3, BrokerError::is_transient),
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Retry budget for flag writes.
    pub fn with_write_retries(mut self, retry_count: u32) -> Self {
        self.write_policy = RetryPolicy::new(retry_count, BrokerError::is_transient);
        self
    }

    /// Set every named flag to false (session start).
    pub async fn reset<S: AsRef<str>>(&self, names: &[S]) -> Result<(), BrokerError> {
        let flags: HashMap<String, bool> = names
            .iter()
            .map(|n| (n.as_ref().to_string(), false))
            .collect();
        self.write_policy
            .call("readiness reset", || self.broker.set_flags(&self.key, &flags))
            .await?;
        info!(key = %self.key, pipelines = flags.len(), "Readiness flags reset");
        Ok(())
    }

    /// Flag `name` as ready. Idempotent.
    pub async fn mark_ready(&self, name: &str) -> Result<(), BrokerError> {
        self.write_policy
            .call("readiness mark", || self.broker.set_flag(&self.key, name, true))
            .await?;
        debug!(pipeline = name, "Pipeline marked as ready");
        Ok(())
    }

    /// Block until every named flag is true.
    pub async fn wait_for_all<S: AsRef<str>>(&self, names: &[S]) {
        self.wait_until("all", |flags| {
            names.iter().all(|n| flags.get(n.as_ref()).copied().unwrap_or(false))
        })
        .await
    }

    /// Block until at least one named flag is true.
    pub async fn wait_for_any<S: AsRef<str>>(&self, names: &[S]) {
        self.wait_until("any", |flags| {
            names.iter().any(|n| flags.get(n.as_ref()).copied().unwrap_or(false))
        })
        .await
    }

    async fn wait_until<P>(&self, mode: &str, satisfied: P)
    where
        P: Fn(&HashMap<String, bool>) -> bool,
    {
        loop {
            match self.broker.flags(&self.key).await {
                Ok(flags) if satisfied(&flags) => {
                    info!(key = %self.key, mode, "Readiness barrier passed");
                    return;
                }
                Ok(flags) => {
                    info!(key = %self.key, mode, status = ?flags, "Waiting for data pipelines");
                }
                Err(e) => {
                    warn!(key = %self.key, error = %e, "Readiness poll failed, polling again");
                }
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

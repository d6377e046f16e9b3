//! Reference-currency pipelines.
//!
//! One watcher per reference feed. Each pass reads the recent window of
//! its feed and requires every tracked currency to be present; the
//! readiness flag is raised after the first complete pass. A feed that
//! stays incomplete or unreachable fails the pass, and the supervisor
//! restarts the watcher.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::broker::ReadinessBarrier;
use crate::fusion::{FeedError, FeedPoint, FeedReader};
use crate::resilience::RetryPolicy;
use crate::types::{Currency, Timestamp};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferenceConfig {
    pub poll_interval_secs: u64,
    /// Window checked on every pass.
    pub lookback_secs: i64,
    pub read_retries: u32,
}

impl Default for ReferenceConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 60,
            lookback_secs: 3_600,
            read_retries: 3,
        }
    }
}

pub struct ReferenceWatcher {
    feed: Arc<dyn FeedReader>,
    readiness: ReadinessBarrier,
    pipeline: String,
    poll_interval: Duration,
    lookback_secs: i64,
    read_policy: RetryPolicy<FeedError>,
}

impl ReferenceWatcher {
    pub fn new(
        feed: Arc<dyn FeedReader>,
        readiness: ReadinessBarrier,
        pipeline: impl Into<String>,
        config: &ReferenceConfig,
    ) -> Self {
        Self {
            feed,
            readiness,
            pipeline: pipeline.into(),
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            lookback_secs: config.lookback_secs,
            read_policy: RetryPolicy::new(config.read_retries, FeedError::is_transient),
        }
    }

    /// Readiness flag this watcher raises.
    pub fn pipeline(&self) -> &str {
        &self.pipeline
    }

    /// Check the feed forever. Only returns on error.
    pub async fn run(&self) -> Result<()> {
        loop {
            self.check_once(Utc::now().timestamp()).await?;
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// One pass over the window ending at `now`. Returns the number of
    /// points read.
    pub async fn check_once(&self, now: Timestamp) -> Result<usize> {
        let since = now - self.lookback_secs;
        let feed = Arc::clone(&self.feed);
        let points: Vec<FeedPoint> = self
            .read_policy
            .stream(format!("{} feed check", self.feed.name()), move || feed.read_since(since))
            .try_collect()
            .await
            .with_context(|| format!("Failed to read the {} feed", self.feed.name()))?;

        let mut per_currency: BTreeMap<Currency, usize> = BTreeMap::new();
        for point in &points {
            *per_currency.entry(point.currency).or_default() += 1;
        }
        if let Some(missing) = Currency::ALL.into_iter().find(|c| !per_currency.contains_key(c)) {
            bail!("{} feed has no {missing} points since {since}", self.feed.name());
        }

        self.readiness
            .mark_ready(&self.pipeline)
            .await
            .with_context(|| format!("Failed to flag {} as ready", self.pipeline))?;

        debug!(pipeline = %self.pipeline, points = points.len(), counts = ?per_currency, "Reference feed checked");
        Ok(points.len())
    }
}

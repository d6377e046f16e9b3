//! Per-session fusion state.
//!
//! A `FusionSession` lives for exactly one trading session. It resolves
//! the reference context (`LocalRates`) for every official-tape print it
//! is shown, once, and memoizes the model-estimated "fake" opening rate
//! used as the trust baseline. The coordinator drops it at every rebuild.

use futures::TryStreamExt;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::debug;

use super::extractor::RatesDetailedExtractor;
use super::{FeedError, FeedPoint, FeedReader, FusionError};
use crate::resilience::RetryPolicy;
use crate::types::{Currency, LocalRates, RateSample, SeriesPoint, Timestamp};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// How far before the earliest new print the live feed is read.
    pub live_lookback_secs: i64,
    /// Extra attempts for a feed read interrupted by a transient failure.
    pub read_retries: u32,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            live_lookback_secs: 60,
            read_retries: 3,
        }
    }
}

pub struct FusionSession {
    live: Arc<dyn FeedReader>,
    historical: Arc<dyn FeedReader>,
    config: FusionConfig,
    read_policy: RetryPolicy<FeedError>,
    resolved: BTreeMap<Timestamp, LocalRates>,
    fake_rates: HashMap<Timestamp, Decimal>,
}

impl FusionSession {
    pub fn new(live: Arc<dyn FeedReader>, historical: Arc<dyn FeedReader>, config: FusionConfig) -> Self {
        let read_policy = RetryPolicy::new(config.read_retries, FeedError::is_transient);
        Self {
            live,
            historical,
            config,
            read_policy,
            resolved: BTreeMap::new(),
            fake_rates: HashMap::new(),
        }
    }

    /// Resolve the reference context of every print not seen before.
    ///
    /// Returns the number of newly resolved timestamps. Prints already
    /// resolved in this session are skipped, so repeated or overlapping
    /// calls are idempotent.
    pub async fn update(&mut self, samples: &[RateSample]) -> Result<usize, FusionError> {
        let fresh: BTreeSet<Timestamp> = samples
            .iter()
            .map(|s| s.timestamp)
            .filter(|t| !self.resolved.contains_key(t))
            .collect();

        let Some(&earliest) = fresh.first() else {
            debug!(samples = samples.len(), "No new official prints to resolve");
            return Ok(0);
        };

        let extractor = self.build_extractor(earliest).await?;
        for &t in &fresh {
            self.resolved.insert(t, extractor.get(t));
        }

        debug!(
            resolved = fresh.len(),
            total = self.resolved.len(),
            earliest,
            "Reference context resolved"
        );
        Ok(fresh.len())
    }

    /// Read both feeds around `start` and merge them per currency.
    async fn build_extractor(&self, start: Timestamp) -> Result<RatesDetailedExtractor, FusionError> {
        let live_since = start - self.config.live_lookback_secs;
        let (live, historical) = tokio::join!(
            read_feed(&self.live, live_since, self.read_policy),
            read_feed(&self.historical, start, self.read_policy),
        );
        let (live, historical) = (live?, historical?);

        debug!(
            live_points = live.len(),
            historical_points = historical.len(),
            start,
            "Reference feeds read"
        );

        RatesDetailedExtractor::new(merge_series(live, historical))
    }

    pub fn is_resolved(&self, timestamp: Timestamp) -> bool {
        self.resolved.contains_key(&timestamp)
    }

    pub fn get_resolved(&self, timestamp: Timestamp) -> Option<LocalRates> {
        self.resolved.get(&timestamp).copied()
    }

    /// Every resolved print of the session, by timestamp.
    pub fn resolved(&self) -> &BTreeMap<Timestamp, LocalRates> {
        &self.resolved
    }

    pub fn get_fake_rate(&self, timestamp: Timestamp) -> Option<Decimal> {
        self.fake_rates.get(&timestamp).copied()
    }

    pub fn set_fake_rate(&mut self, timestamp: Timestamp, rate: Decimal) {
        self.fake_rates.insert(timestamp, rate);
    }
}

async fn read_feed(
    reader: &Arc<dyn FeedReader>,
    since: Timestamp,
    policy: RetryPolicy<FeedError>,
) -> Result<Vec<FeedPoint>, FeedError> {
    let label = format!("{} feed read", reader.name());
    let reader = Arc::clone(reader);
    policy
        .stream(label, move || reader.read_since(since))
        .try_collect()
        .await
}

/// Concatenate both sources per currency and sort by timestamp.
/// Cross-source duplicates are kept.
pub(crate) fn merge_series(live: Vec<FeedPoint>, historical: Vec<FeedPoint>) -> HashMap<Currency, Vec<SeriesPoint>> {
    let mut merged: HashMap<Currency, Vec<SeriesPoint>> = HashMap::new();
    for point in live.into_iter().chain(historical) {
        merged.entry(point.currency).or_default().push(point.series_point());
    }
    for series in merged.values_mut() {
        series.sort_by_key(|p| p.timestamp);
    }
    merged
}

//! Replay collaborators backed by a JSON fixture.
//!
//! The fixture stores timestamps as offsets in seconds from an anchor.
//! The binary anchors them at local midnight of the current day so the
//! same file replays a plausible session whenever the service starts:
//! negative offsets become archived history, the rest is published by
//! `StaticTapeSource` as wall-clock time reaches it.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate};
use futures::stream::{self, BoxStream, StreamExt};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::sync::Mutex;

use crate::fusion::session::merge_series;
use crate::fusion::{FeedError, FeedPoint, FeedReader, RatesDetailedExtractor};
use crate::ingest::{TapeArchive, TapeSource, TradingCalendar};
use crate::types::{Currency, LocalRates, RateSample, Timestamp};

// ---------------------------------------------------------------------------
// Fixture
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ReplayFixture {
    /// Rate assumed when the archive has no earlier print.
    pub fallback_rate: Decimal,
    /// Fine-grained reference ticks.
    pub live: Vec<FeedPoint>,
    /// Coarse reference bars.
    pub historical: Vec<FeedPoint>,
    /// Official tape prints.
    pub tape: Vec<RateSample>,
}

impl ReplayFixture {
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read replay fixture: {path}"))?;
        Self::parse(&contents).with_context(|| format!("Failed to parse replay fixture: {path}"))
    }

    pub fn parse(json: &str) -> Result<Self> {
        let fixture: ReplayFixture = serde_json::from_str(json)?;
        for currency in Currency::ALL {
            let present = fixture
                .live
                .iter()
                .chain(&fixture.historical)
                .any(|p| p.currency == currency);
            if !present {
                return Err(anyhow!("Replay fixture has no {currency} reference data"));
            }
        }
        Ok(fixture)
    }

    /// Shift every offset by `origin`.
    pub fn anchored_at(mut self, origin: Timestamp) -> Self {
        for point in self.live.iter_mut().chain(self.historical.iter_mut()) {
            point.timestamp += origin;
        }
        for print in &mut self.tape {
            print.timestamp += origin;
        }
        self
    }

    /// Prints strictly before `t`.
    pub fn tape_before(&self, t: Timestamp) -> Vec<RateSample> {
        self.tape.iter().copied().filter(|s| s.timestamp < t).collect()
    }

    /// Reference context at `t` over both feeds.
    pub fn reference_at(&self, t: Timestamp) -> Result<LocalRates> {
        let extractor = RatesDetailedExtractor::new(merge_series(self.live.clone(), self.historical.clone()))?;
        Ok(extractor.get(t))
    }
}

// ---------------------------------------------------------------------------
// Reference feeds
// ---------------------------------------------------------------------------

/// In-memory reference feed.
///
/// `read_since` also yields the last point before `since` for each
/// currency, so a read never comes back empty for a known currency.
pub struct MemoryFeed {
    name: String,
    points: Vec<FeedPoint>,
}

impl MemoryFeed {
    pub fn new(name: impl Into<String>, mut points: Vec<FeedPoint>) -> Self {
        points.sort_by_key(|p| (p.currency, p.timestamp));
        Self {
            name: name.into(),
            points,
        }
    }
}

impl FeedReader for MemoryFeed {
    fn name(&self) -> &str {
        &self.name
    }

    fn read_since(&self, since: Timestamp) -> BoxStream<'static, Result<FeedPoint, FeedError>> {
        let mut selected = Vec::new();
        for currency in Currency::ALL {
            let series: Vec<FeedPoint> = self
                .points
                .iter()
                .copied()
                .filter(|p| p.currency == currency)
                .collect();
            let start = series.partition_point(|p| p.timestamp < since);
            selected.extend_from_slice(&series[start.saturating_sub(1)..]);
        }
        stream::iter(selected.into_iter().map(Ok)).boxed()
    }
}

// ---------------------------------------------------------------------------
// Official tape
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryTapeArchive {
    prints: Mutex<BTreeMap<Timestamp, Decimal>>,
}

impl MemoryTapeArchive {
    pub fn new(samples: &[RateSample]) -> Self {
        Self {
            prints: Mutex::new(samples.iter().map(|s| (s.timestamp, s.rate)).collect()),
        }
    }

    pub fn len(&self) -> usize {
        self.prints.lock().map(|p| p.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TapeArchive for MemoryTapeArchive {
    async fn samples_since(&self, since: Timestamp) -> Result<Vec<RateSample>> {
        let prints = self
            .prints
            .lock()
            .map_err(|_| anyhow!("Tape archive lock poisoned"))?;
        Ok(prints
            .range(since..)
            .map(|(&t, &rate)| RateSample::new(t, rate))
            .collect())
    }

    async fn append(&self, samples: &[RateSample]) -> Result<()> {
        let mut prints = self
            .prints
            .lock()
            .map_err(|_| anyhow!("Tape archive lock poisoned"))?;
        prints.extend(samples.iter().map(|s| (s.timestamp, s.rate)));
        Ok(())
    }
}

/// Publishes fixture prints once the wall clock has reached them.
pub struct StaticTapeSource {
    prints: Vec<RateSample>,
    calendar: TradingCalendar,
}

impl StaticTapeSource {
    pub fn new(prints: Vec<RateSample>, calendar: TradingCalendar) -> Self {
        Self { prints, calendar }
    }

    /// Prints of `date` published by `now`.
    pub fn published(&self, date: NaiveDate, now: Timestamp) -> Vec<RateSample> {
        self.prints
            .iter()
            .copied()
            .filter(|s| s.timestamp <= now)
            .filter(|s| {
                DateTime::from_timestamp(s.timestamp, 0)
                    .is_some_and(|at| self.calendar.date_of(at) == date)
            })
            .collect()
    }
}

#[async_trait]
impl TapeSource for StaticTapeSource {
    async fn fetch_session(&self, date: NaiveDate) -> Result<Vec<RateSample>> {
        Ok(self.published(date, self.calendar.now().timestamp()))
    }
}

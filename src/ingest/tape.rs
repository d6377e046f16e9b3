//! Official tape watcher.
//!
//! The exchange publishes no push feed, so the tape is polled during each
//! session. Every poll is diffed against the prints already known for the
//! day; new or revised prints are archived and the whole session tape is
//! announced to the coordinator with a NEW_DATA command.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::{TapeArchive, TapeSource, TradingCalendar};
use crate::broker::readiness::OFFICIAL_TAPE;
use crate::broker::{Command, ReadinessBarrier, RequestBroker};
use crate::types::{RateSample, Timestamp};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TapeConfig {
    pub poll_interval_secs: u64,
}

impl Default for TapeConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 15,
        }
    }
}

pub struct TapeWatcher {
    source: Arc<dyn TapeSource>,
    archive: Arc<dyn TapeArchive>,
    requests: RequestBroker,
    readiness: ReadinessBarrier,
    calendar: TradingCalendar,
    poll_interval: Duration,
    pipeline: String,
}

impl TapeWatcher {
    pub fn new(
        source: Arc<dyn TapeSource>,
        archive: Arc<dyn TapeArchive>,
        requests: RequestBroker,
        readiness: ReadinessBarrier,
        calendar: TradingCalendar,
        config: &TapeConfig,
    ) -> Self {
        Self {
            source,
            archive,
            requests,
            readiness,
            calendar,
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            pipeline: OFFICIAL_TAPE.to_string(),
        }
    }

    /// Readiness flag this watcher raises.
    pub fn pipeline(&self) -> &str {
        &self.pipeline
    }

    /// Watch sessions forever: poll during a session, sleep in between.
    pub async fn run(&self) -> Result<()> {
        loop {
            let now = self.calendar.now();
            if self.calendar.is_open(now) {
                self.watch_session(self.calendar.date_of(now)).await?;
            } else {
                self.readiness
                    .mark_ready(&self.pipeline)
                    .await
                    .context("Failed to flag the official tape as ready")?;
            }

            let now = self.calendar.now();
            let next = self.calendar.next_open(now)?;
            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
            info!(next_open = %next, wait_secs = wait.as_secs(), "Official tape watcher sleeping");
            tokio::time::sleep(wait).await;
        }
    }

    /// Poll the tape of `date` until its session closes.
    pub async fn watch_session(&self, date: NaiveDate) -> Result<()> {
        let close = self.calendar.session_close(date);
        let mut known = self.prime(date).await?;
        info!(%date, known = known.len(), "Watching the official tape");

        while self.calendar.now() < close {
            self.poll_once(date, &mut known).await?;
            tokio::time::sleep(self.poll_interval).await;
        }

        info!(%date, prints = known.len(), "Official session closed");
        Ok(())
    }

    /// Load the prints already archived for `date` and flag readiness.
    pub async fn prime(&self, date: NaiveDate) -> Result<BTreeMap<Timestamp, Decimal>> {
        let since = self.calendar.day_start(date).timestamp();
        let known: BTreeMap<Timestamp, Decimal> = self
            .archive
            .samples_since(since)
            .await
            .context("Failed to load archived official prints")?
            .into_iter()
            .map(|s| (s.timestamp, s.rate))
            .collect();

        self.readiness
            .mark_ready(&self.pipeline)
            .await
            .context("Failed to flag the official tape as ready")?;
        Ok(known)
    }

    /// One poll of the source. Returns how many prints were new or revised.
    ///
    /// A failed fetch or a failed announcement skips this poll; the
    /// unannounced prints are picked up again by the next one. Archive
    /// failures are only logged.
    pub async fn poll_once(&self, date: NaiveDate, known: &mut BTreeMap<Timestamp, Decimal>) -> Result<usize> {
        let mut tape = match self.source.fetch_session(date).await {
            Ok(tape) => tape,
            Err(e) => {
                warn!(%date, error = %e, "Official tape fetch failed, skipping poll");
                return Ok(0);
            }
        };
        tape.sort_by_key(|s| s.timestamp);

        let changed: Vec<RateSample> = tape
            .iter()
            .filter(|s| known.get(&s.timestamp) != Some(&s.rate))
            .copied()
            .collect();

        if changed.is_empty() {
            debug!(%date, prints = tape.len(), "No new official prints");
            return Ok(0);
        }

        if let Err(e) = self.archive.append(&changed).await {
            error!(error = %e, count = changed.len(), "Official prints were not archived");
        }

        if let Err(e) = self.requests.send(Command::NewData { samples: tape }).await {
            error!(error = %e, "Could not announce new official prints");
            return Ok(0);
        }

        known.extend(changed.iter().map(|s| (s.timestamp, s.rate)));
        info!(new = changed.len(), total = known.len(), "New official prints announced");
        Ok(changed.len())
    }
}

//! Official-tape ingestion.
//!
//! Defines the `TapeArchive` (persisted prints) and `TapeSource` (the
//! upstream exchange endpoint) collaborator traits, the exchange
//! `TradingCalendar`, the supervised `TapeWatcher` pipeline that
//! announces new prints to the coordinator, and the `ReferenceWatcher`
//! pipelines guarding the reference feeds.

pub mod calendar;
pub mod reference;
pub mod tape;

pub use calendar::{CalendarConfig, CalendarError, TradingCalendar};
pub use reference::{ReferenceConfig, ReferenceWatcher};
pub use tape::{TapeConfig, TapeWatcher};

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;

use crate::types::{RateSample, Timestamp};

/// Storage of official-tape prints.
#[async_trait]
pub trait TapeArchive: Send + Sync {
    /// Every print at or after `since`, ordered by timestamp.
    async fn samples_since(&self, since: Timestamp) -> Result<Vec<RateSample>>;

    /// Store prints; a print with an already stored timestamp replaces it.
    async fn append(&self, samples: &[RateSample]) -> Result<()>;
}

/// Upstream endpoint publishing the official tape.
#[async_trait]
pub trait TapeSource: Send + Sync {
    /// The whole tape published so far for `date`.
    async fn fetch_session(&self, date: NaiveDate) -> Result<Vec<RateSample>>;
}

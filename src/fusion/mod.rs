//! Reference-feed fusion.
//!
//! Reconciles a fine-grained, short-retention live feed and a coarser,
//! longer-retention historical feed into one per-instant snapshot of the
//! reference currencies, resolved for every official-tape print.

pub mod extractor;
pub mod session;

pub use extractor::{OneRateExtractor, RatesDetailedExtractor};
pub use session::{FusionConfig, FusionSession};

use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::types::{Currency, SeriesPoint, Timestamp};

/// Feed read failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FeedError {
    /// Upstream store unreachable or the read was interrupted; retryable.
    #[error("feed unavailable: {0}")]
    Unavailable(String),
    /// The feed returned something that is not a rate point.
    #[error("malformed feed row: {0}")]
    Malformed(String),
}

impl FeedError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FeedError::Unavailable(_))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FusionError {
    #[error(transparent)]
    Feed(#[from] FeedError),
    /// Neither feed had any point for a tracked currency.
    #[error("no reference data for {0}")]
    MissingSeries(Currency),
    #[error("cannot build an extractor from an empty series")]
    EmptySeries,
}

/// One row of a reference feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedPoint {
    pub currency: Currency,
    pub timestamp: Timestamp,
    pub value: rust_decimal::Decimal,
}

impl FeedPoint {
    pub fn series_point(&self) -> SeriesPoint {
        SeriesPoint::new(self.timestamp, self.value)
    }
}

/// Abstraction over a reference-currency feed store.
///
/// `read_since` lazily yields every stored point at or after `since`
/// (stores may include the last point before it so a series is never
/// empty). Each call starts a fresh read.
pub trait FeedReader: Send + Sync {
    /// Feed name for logging.
    fn name(&self) -> &str;

    fn read_since(&self, since: Timestamp) -> BoxStream<'static, Result<FeedPoint, FeedError>>;
}

//! Shared types for the realtime rate service.
//!
//! These types form the data model used across all modules. Rates are
//! exact decimals end to end; serde encodes them as strings so nothing
//! drifts through binary floating point on the wire.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Epoch timestamp in whole seconds.
pub type Timestamp = i64;

// ---------------------------------------------------------------------------
// Official tape
// ---------------------------------------------------------------------------

/// One print from the official (delayed, low-frequency) exchange tape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateSample {
    pub timestamp: Timestamp,
    pub rate: Decimal,
}

impl RateSample {
    pub fn new(timestamp: Timestamp, rate: Decimal) -> Self {
        Self { timestamp, rate }
    }
}

impl fmt::Display for RateSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.rate, self.timestamp)
    }
}

// ---------------------------------------------------------------------------
// Reference currencies
// ---------------------------------------------------------------------------

/// A point of any reference-currency series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub timestamp: Timestamp,
    pub value: Decimal,
}

impl SeriesPoint {
    pub fn new(timestamp: Timestamp, value: Decimal) -> Self {
        Self { timestamp, value }
    }
}

/// Reference currencies tracked alongside the official tape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Eur,
    Rub,
    Uah,
    Dxy,
}

impl Currency {
    /// All tracked currencies (useful for iteration).
    pub const ALL: [Currency; 4] = [Currency::Eur, Currency::Rub, Currency::Uah, Currency::Dxy];

    pub fn code(&self) -> &'static str {
        match self {
            Currency::Eur => "EUR",
            Currency::Rub => "RUB",
            Currency::Uah => "UAH",
            Currency::Dxy => "DXY",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl std::str::FromStr for Currency {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "EUR" => Ok(Currency::Eur),
            "RUB" => Ok(Currency::Rub),
            "UAH" => Ok(Currency::Uah),
            "DXY" => Ok(Currency::Dxy),
            other => Err(anyhow::anyhow!("Unknown reference currency: {other}")),
        }
    }
}

/// Reference feature vector at one instant.
///
/// Only produced by fusion (or decoded from a PREDICT command); never
/// mutated afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalRates {
    pub eur: Decimal,
    pub rub: Decimal,
    pub uah: Decimal,
    pub dxy: Decimal,
}

impl LocalRates {
    pub fn get(&self, currency: Currency) -> Decimal {
        match currency {
            Currency::Eur => self.eur,
            Currency::Rub => self.rub,
            Currency::Uah => self.uah,
            Currency::Dxy => self.dxy,
        }
    }
}

impl fmt::Display for LocalRates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "EUR {} | RUB {} | UAH {} | DXY {}",
            self.eur, self.rub, self.uah, self.dxy
        )
    }
}

// ---------------------------------------------------------------------------
// Model inputs / outputs
// ---------------------------------------------------------------------------

/// Rolling-average feature window derived from prior sessions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollingAverage(pub Vec<Decimal>);

impl RollingAverage {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A point estimate of the official rate, as returned to PREDICT callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointEstimate {
    pub rate: Decimal,
}

impl fmt::Display for PointEstimate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.rate)
    }
}

//! Deviation-band trust filter.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use super::TrustFilter;
use crate::types::Timestamp;

const SECONDS_PER_HOUR: Decimal = dec!(3600);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustConfig {
    /// Relative deviation from the baseline tolerated at the opening print.
    pub max_relative_deviation: Decimal,
    /// How much the tolerance widens per hour into the session.
    pub growth_per_hour: Decimal,
}

impl Default for TrustConfig {
    fn default() -> Self {
        Self {
            max_relative_deviation: dec!(0.005),
            growth_per_hour: dec!(0.002),
        }
    }
}

/// Trusts a print when `|rate - baseline| / baseline` stays inside a band
/// that widens linearly from the first print of the batch.
#[derive(Debug, Clone)]
pub struct DeviationBandFilter {
    max_relative_deviation: Decimal,
    growth_per_hour: Decimal,
}

impl DeviationBandFilter {
    pub fn new(config: &TrustConfig) -> Self {
        Self {
            max_relative_deviation: config.max_relative_deviation,
            growth_per_hour: config.growth_per_hour,
        }
    }

    fn band_at(&self, elapsed_secs: Timestamp) -> Decimal {
        let hours = Decimal::from(elapsed_secs.max(0)) / SECONDS_PER_HOUR;
        self.max_relative_deviation + self.growth_per_hour * hours
    }
}

impl TrustFilter for DeviationBandFilter {
    fn trust_mask(&self, baseline: Decimal, timestamps: &[Timestamp], rates: &[Decimal]) -> Vec<bool> {
        if baseline <= Decimal::ZERO {
            return vec![false; rates.len()];
        }
        let opening = timestamps.first().copied().unwrap_or_default();

        timestamps
            .iter()
            .zip(rates)
            .map(|(&t, &rate)| {
                let deviation = (rate - baseline).abs() / baseline;
                deviation <= self.band_at(t - opening)
            })
            .collect()
    }
}

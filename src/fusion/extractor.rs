//! Piecewise-linear lookup over reference-currency series.

use rust_decimal::Decimal;
use std::collections::HashMap;

use super::FusionError;
use crate::types::{Currency, LocalRates, SeriesPoint, Timestamp};

/// Linear interpolation over one currency's samples.
///
/// Queries at or past the last sample return the last value
/// (flat-forward). Queries before the first sample are clamped to the
/// first value. A one-sample series answers that value everywhere.
#[derive(Debug, Clone)]
pub struct OneRateExtractor {
    points: Vec<SeriesPoint>,
}

impl OneRateExtractor {
    /// Build from samples in any order; they are sorted by timestamp.
    /// Equal timestamps keep their input order.
    pub fn new(mut points: Vec<SeriesPoint>) -> Result<Self, FusionError> {
        if points.is_empty() {
            return Err(FusionError::EmptySeries);
        }
        points.sort_by_key(|p| p.timestamp);
        Ok(Self { points })
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn get(&self, t: Timestamp) -> Decimal {
        let first = self.points[0];
        let last = self.points[self.points.len() - 1];

        if self.points.len() == 1 || t >= last.timestamp {
            return last.value;
        }
        if t <= first.timestamp {
            return first.value;
        }

        // first.timestamp < t < last.timestamp, so 1 <= idx <= len - 1 and
        // left.timestamp <= t < right.timestamp.
        let idx = self.points.partition_point(|p| p.timestamp <= t);
        let left = self.points[idx - 1];
        let right = self.points[idx];

        if left.timestamp == t {
            return left.value;
        }

        let span = Decimal::from(right.timestamp - left.timestamp);
        let offset = Decimal::from(t - left.timestamp);
        left.value + (right.value - left.value) * offset / span
    }

    /// `get` for every timestamp, in input order.
    pub fn get_batch(&self, timestamps: &[Timestamp]) -> Vec<Decimal> {
        timestamps.iter().map(|&t| self.get(t)).collect()
    }
}

/// One extractor per tracked reference currency.
#[derive(Debug, Clone)]
pub struct RatesDetailedExtractor {
    eur: OneRateExtractor,
    rub: OneRateExtractor,
    uah: OneRateExtractor,
    dxy: OneRateExtractor,
}

impl RatesDetailedExtractor {
    /// Every tracked currency needs at least one point.
    pub fn new(mut series: HashMap<Currency, Vec<SeriesPoint>>) -> Result<Self, FusionError> {
        let mut take = |currency: Currency| -> Result<OneRateExtractor, FusionError> {
            match series.remove(&currency) {
                Some(points) if !points.is_empty() => OneRateExtractor::new(points),
                _ => Err(FusionError::MissingSeries(currency)),
            }
        };

        Ok(Self {
            eur: take(Currency::Eur)?,
            rub: take(Currency::Rub)?,
            uah: take(Currency::Uah)?,
            dxy: take(Currency::Dxy)?,
        })
    }

    pub fn extractor(&self, currency: Currency) -> &OneRateExtractor {
        match currency {
            Currency::Eur => &self.eur,
            Currency::Rub => &self.rub,
            Currency::Uah => &self.uah,
            Currency::Dxy => &self.dxy,
        }
    }

    pub fn get(&self, t: Timestamp) -> LocalRates {
        LocalRates {
            eur: self.eur.get(t),
            rub: self.rub.get(t),
            uah: self.uah.get(t),
            dxy: self.dxy.get(t),
        }
    }

    pub fn get_batch(&self, timestamps: &[Timestamp]) -> Vec<LocalRates> {
        timestamps.iter().map(|&t| self.get(t)).collect()
    }
}

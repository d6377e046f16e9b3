//! Carry-forward baseline model.
//!
//! Not a regression: the estimate is the last trusted print of the
//! current session, or the previous session's close while today has no
//! trusted print. It lets the service run end to end where the real
//! model is not deployed.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Days, NaiveDate};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{ModelBuilder, Predictor};
use crate::ingest::{TapeArchive, TradingCalendar};
use crate::types::{LocalRates, PointEstimate, RateSample, RollingAverage};

#[derive(Debug, Clone)]
pub struct CarryForwardPredictor {
    last_trained: NaiveDate,
    prior_close: Decimal,
    todays_last: Option<Decimal>,
}

impl CarryForwardPredictor {
    pub fn new(last_trained: NaiveDate, prior_close: Decimal) -> Self {
        Self {
            last_trained,
            prior_close,
            todays_last: None,
        }
    }
}

impl Predictor for CarryForwardPredictor {
    fn last_trained_date(&self) -> NaiveDate {
        self.last_trained
    }

    fn ignore_today(&mut self) {
        self.todays_last = None;
    }

    fn set_todays_training_set(
        &mut self,
        _features: &[LocalRates],
        targets: &[Decimal],
        _rolling_average: &RollingAverage,
    ) {
        self.todays_last = targets.last().copied();
    }

    fn point_estimate(&self, _rates: &LocalRates, _rolling_average: &RollingAverage) -> Result<PointEstimate> {
        Ok(PointEstimate {
            rate: self.todays_last.unwrap_or(self.prior_close),
        })
    }
}

/// Builds `CarryForwardPredictor`s from the official tape archive.
pub struct CarryForwardBuilder {
    archive: Arc<dyn TapeArchive>,
    calendar: TradingCalendar,
    fallback_rate: Decimal,
    lookback_days: u64,
}

impl CarryForwardBuilder {
    /// `fallback_rate` is used when the archive has no earlier print.
    pub fn new(archive: Arc<dyn TapeArchive>, calendar: TradingCalendar, fallback_rate: Decimal) -> Self {
        Self {
            archive,
            calendar,
            fallback_rate,
            lookback_days: 7,
        }
    }

    pub fn with_lookback_days(mut self, days: u64) -> Self {
        self.lookback_days = days;
        self
    }

    /// Archived prints in the look-back window before `date`'s session.
    async fn prints_before(&self, date: NaiveDate) -> Result<Vec<RateSample>> {
        let from = date.checked_sub_days(Days::new(self.lookback_days)).unwrap_or(date);
        let since = self.calendar.day_start(from).timestamp();
        let until = self.calendar.day_start(date).timestamp();

        let samples = self
            .archive
            .samples_since(since)
            .await
            .context("Failed to read the official tape archive")?;
        Ok(samples.into_iter().filter(|s| s.timestamp < until).collect())
    }
}

#[async_trait]
impl ModelBuilder for CarryForwardBuilder {
    async fn rebuild_for_session(&self, session: NaiveDate) -> Result<Box<dyn Predictor>> {
        let prior = self.prints_before(session).await?;
        let prior_close = match prior.last() {
            Some(print) => print.rate,
            None => {
                warn!(%session, fallback = %self.fallback_rate, "No prior official print, using the fallback rate");
                self.fallback_rate
            }
        };
        let last_trained = session.pred_opt().unwrap_or(session);

        debug!(%session, %last_trained, %prior_close, "Carry-forward predictor built");
        Ok(Box::new(CarryForwardPredictor::new(last_trained, prior_close)))
    }

    async fn rolling_average(&self, date: NaiveDate) -> Result<RollingAverage> {
        let next = date.succ_opt().unwrap_or(date);
        let prints = self.prints_before(next).await?;
        if prints.is_empty() {
            return Ok(RollingAverage::default());
        }

        let sum: Decimal = prints.iter().map(|s| s.rate).sum();
        Ok(RollingAverage(vec![sum / Decimal::from(prints.len())]))
    }
}

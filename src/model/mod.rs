//! Estimation collaborators.
//!
//! The regression model itself lives outside this crate. The coordinator
//! only talks to it through these traits:
//! - `ModelBuilder` trains a fresh `Predictor` for a session and derives
//!   the rolling-average features.
//! - `Predictor` holds one session's model and today's local training set.
//! - `TrustFilter` screens official prints against a baseline rate.
//!
//! `baseline` and `trust` provide simple implementations so the service
//! runs end to end without the real model.

pub mod baseline;
pub mod trust;

pub use baseline::{CarryForwardBuilder, CarryForwardPredictor};
pub use trust::{DeviationBandFilter, TrustConfig};

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::types::{LocalRates, PointEstimate, RollingAverage, Timestamp};

/// One trading session's trained model.
#[cfg_attr(test, mockall::automock)]
pub trait Predictor: Send + Sync {
    /// Last date whose data the model was trained on.
    fn last_trained_date(&self) -> NaiveDate;

    /// Forget today's local training set; estimates use prior sessions only.
    fn ignore_today(&mut self);

    /// Replace today's local training set. `features[i]` is the reference
    /// context of the print whose rate is `targets[i]`.
    fn set_todays_training_set(
        &mut self,
        features: &[LocalRates],
        targets: &[Decimal],
        rolling_average: &RollingAverage,
    );

    fn point_estimate(&self, rates: &LocalRates, rolling_average: &RollingAverage) -> Result<PointEstimate>;
}

/// Trains session models.
#[async_trait]
pub trait ModelBuilder: Send + Sync {
    /// Train on everything up to the session before `session`.
    async fn rebuild_for_session(&self, session: NaiveDate) -> Result<Box<dyn Predictor>>;

    /// Rolling-average feature window as of `date`.
    async fn rolling_average(&self, date: NaiveDate) -> Result<RollingAverage>;
}

/// Statistical screen for implausible official prints.
#[cfg_attr(test, mockall::automock)]
pub trait TrustFilter: Send + Sync {
    /// One flag per print, true where the print is plausible given
    /// `baseline`. `timestamps` and `rates` have the same length.
    fn trust_mask(&self, baseline: Decimal, timestamps: &[Timestamp], rates: &[Decimal]) -> Vec<bool>;
}

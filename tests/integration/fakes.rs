//! Deterministic collaborators for integration testing.
//!
//! Everything is in-memory and anchored on the local day the test runs
//! in, so the coordinator's wall-clock session logic sees a plausible
//! day without any external store.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use byn_realtime::broker::readiness::{EXTERNAL_HISTORY, EXTERNAL_LIVE, OFFICIAL_TAPE};
use byn_realtime::broker::{Broker, InMemoryBroker, ReadinessBarrier, RequestBroker};
use byn_realtime::engine::Collaborators;
use byn_realtime::fusion::FeedPoint;
use byn_realtime::ingest::{CalendarConfig, TapeSource, TradingCalendar};
use byn_realtime::model::{CarryForwardBuilder, DeviationBandFilter, TrustConfig};
use byn_realtime::replay::{MemoryFeed, MemoryTapeArchive};
use byn_realtime::types::{Currency, LocalRates, RateSample, Timestamp};

pub const POLL: Duration = Duration::from_millis(10);

pub fn pipelines() -> Vec<String> {
    [EXTERNAL_HISTORY, EXTERNAL_LIVE, OFFICIAL_TAPE]
        .iter()
        .map(|p| p.to_string())
        .collect()
}

pub fn reference_rates() -> LocalRates {
    LocalRates {
        eur: dec!(2.45),
        rub: dec!(0.0331),
        uah: dec!(0.0805),
        dxy: dec!(97.1),
    }
}

/// One point per currency at `timestamp`, valued as `reference_rates`.
pub fn reference_points(timestamp: Timestamp) -> Vec<FeedPoint> {
    let rates = reference_rates();
    Currency::ALL
        .iter()
        .map(|&currency| FeedPoint {
            currency,
            timestamp,
            value: rates.get(currency),
        })
        .collect()
}

/// Tape source returning a fixed set of prints, with an on/off outage.
pub struct FixedTapeSource {
    prints: Mutex<Vec<RateSample>>,
    down: Mutex<bool>,
}

impl FixedTapeSource {
    pub fn new(prints: Vec<RateSample>) -> Self {
        Self {
            prints: Mutex::new(prints),
            down: Mutex::new(false),
        }
    }

    pub fn publish(&self, print: RateSample) {
        self.prints.lock().unwrap().push(print);
    }

    pub fn set_down(&self, down: bool) {
        *self.down.lock().unwrap() = down;
    }
}

#[async_trait]
impl TapeSource for FixedTapeSource {
    async fn fetch_session(&self, _date: NaiveDate) -> Result<Vec<RateSample>> {
        if *self.down.lock().unwrap() {
            return Err(anyhow!("official site unreachable"));
        }
        Ok(self.prints.lock().unwrap().clone())
    }
}

/// A broker plus everything the coordinator and watcher need, seeded
/// with one print from before today's session.
pub struct World {
    pub broker: Arc<InMemoryBroker>,
    pub requests: RequestBroker,
    pub readiness: ReadinessBarrier,
    pub calendar: TradingCalendar,
    pub archive: Arc<MemoryTapeArchive>,
    pub collaborators: Collaborators,
    pub today: NaiveDate,
    pub day_start: Timestamp,
}

impl World {
    pub fn new(prior_close: Decimal) -> Self {
        let broker = Arc::new(InMemoryBroker::new());
        let shared: Arc<dyn Broker> = broker.clone();
        let requests = RequestBroker::new(shared.clone()).with_poll_interval(POLL);
        let readiness = ReadinessBarrier::new(shared).with_poll_interval(POLL);

        let calendar = TradingCalendar::new(&CalendarConfig::default()).unwrap();
        let today = calendar.today();
        let day_start = calendar.day_start(today).timestamp();

        let archive = Arc::new(MemoryTapeArchive::new(&[RateSample::new(
            day_start - 3_600,
            prior_close,
        )]));

        let collaborators = Collaborators {
            builder: Arc::new(CarryForwardBuilder::new(archive.clone(), calendar.clone(), dec!(3.0))),
            archive: archive.clone(),
            trust: Arc::new(DeviationBandFilter::new(&TrustConfig::default())),
            live: Arc::new(MemoryFeed::new(EXTERNAL_LIVE, reference_points(day_start - 600))),
            historical: Arc::new(MemoryFeed::new(
                EXTERNAL_HISTORY,
                reference_points(day_start - 7_200),
            )),
        };

        Self {
            broker,
            requests,
            readiness,
            calendar,
            archive,
            collaborators,
            today,
            day_start,
        }
    }

    /// Timestamp `secs` into today.
    pub fn at(&self, secs: Timestamp) -> Timestamp {
        self.day_start + secs
    }
}

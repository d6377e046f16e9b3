//! Prediction coordinator.
//!
//! Outer loop, once per trading session: build the session model, wait
//! for every ingestion pipeline, and seed today's training set from the
//! archived tape. Inner loop: consume commands one at a time until a
//! REBUILD asks for a fresh session.

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::broker::readiness::{EXTERNAL_HISTORY, EXTERNAL_LIVE, OFFICIAL_TAPE};
use crate::broker::{Command, CommandEnvelope, ReadinessBarrier, RequestBroker};
use crate::fusion::{FeedReader, FusionConfig, FusionSession};
use crate::ingest::{TapeArchive, TradingCalendar};
use crate::model::{ModelBuilder, Predictor, TrustFilter};
use crate::types::{RateSample, RollingAverage};

/// External collaborators the coordinator drives.
#[derive(Clone)]
pub struct Collaborators {
    pub builder: Arc<dyn ModelBuilder>,
    pub archive: Arc<dyn TapeArchive>,
    pub trust: Arc<dyn TrustFilter>,
    /// Fine-grained, short-retention reference feed.
    pub live: Arc<dyn FeedReader>,
    /// Coarse, long-retention reference feed.
    pub historical: Arc<dyn FeedReader>,
}

/// Model and fusion state of one trading session.
pub struct TradingSession {
    date: NaiveDate,
    predictor: Box<dyn Predictor>,
    rolling_average: RollingAverage,
    fusion: FusionSession,
}

impl TradingSession {
    pub fn new(
        date: NaiveDate,
        predictor: Box<dyn Predictor>,
        rolling_average: RollingAverage,
        fusion: FusionSession,
    ) -> Self {
        Self {
            date,
            predictor,
            rolling_average,
            fusion,
        }
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn rolling_average(&self) -> &RollingAverage {
        &self.rolling_average
    }

    pub fn fusion(&self) -> &FusionSession {
        &self.fusion
    }
}

pub struct PredictionCoordinator {
    collaborators: Collaborators,
    requests: RequestBroker,
    readiness: ReadinessBarrier,
    calendar: TradingCalendar,
    pipelines: Vec<String>,
    fusion_config: FusionConfig,
}

impl PredictionCoordinator {
    pub fn new(
        collaborators: Collaborators,
        requests: RequestBroker,
        readiness: ReadinessBarrier,
        calendar: TradingCalendar,
    ) -> Self {
        Self {
            collaborators,
            requests,
            readiness,
            calendar,
            pipelines: [EXTERNAL_HISTORY, EXTERNAL_LIVE, OFFICIAL_TAPE]
                .iter()
                .map(|p| p.to_string())
                .collect(),
            fusion_config: FusionConfig::default(),
        }
    }

    /// Ingestion pipelines that must be ready before serving.
    pub fn with_pipelines(mut self, pipelines: Vec<String>) -> Self {
        self.pipelines = pipelines;
        self
    }

    pub fn with_fusion_config(mut self, config: FusionConfig) -> Self {
        self.fusion_config = config;
        self
    }

    /// Serve sessions forever. Only returns on error.
    pub async fn run(&self) -> Result<()> {
        loop {
            let mut session = self.start_session().await?;
            self.serve(&mut session).await?;
            info!(session = %session.date, "Rebuilding the session model");
        }
    }

    /// Build the model for today, wait for the pipelines and seed today's
    /// training set from the archived tape.
    pub async fn start_session(&self) -> Result<TradingSession> {
        let today = self.calendar.today();

        debug!(%today, "Creating predictor");
        let predictor = self
            .collaborators
            .builder
            .rebuild_for_session(today)
            .await
            .context("Failed to build the session model")?;
        let last_trained = predictor.last_trained_date();
        let rolling_average = self
            .collaborators
            .builder
            .rolling_average(last_trained)
            .await
            .context("Failed to derive rolling averages")?;
        debug!(%today, %last_trained, "Predictor created");

        let fusion = FusionSession::new(
            Arc::clone(&self.collaborators.live),
            Arc::clone(&self.collaborators.historical),
            self.fusion_config.clone(),
        );
        let mut session = TradingSession::new(today, predictor, rolling_average, fusion);

        self.readiness.wait_for_all(&self.pipelines).await;

        if last_trained < today {
            let since = self.calendar.day_start(today).timestamp();
            let samples = self
                .collaborators
                .archive
                .samples_since(since)
                .await
                .context("Failed to load today's official prints")?;
            info!(%today, prints = samples.len(), "Seeding today's official prints");
            self.absorb(&mut session, &samples).await?;
        }

        Ok(session)
    }

    /// Consume commands until a REBUILD arrives.
    pub async fn serve(&self, session: &mut TradingSession) -> Result<()> {
        loop {
            let CommandEnvelope {
                correlation_id,
                command,
                ..
            } = self
                .requests
                .receive()
                .await
                .context("Failed to receive a command")?;

            if let Err(e) = self.requests.inspect_backlog().await {
                warn!(error = %e, "Could not inspect the command backlog");
            }

            match command {
                Command::Rebuild => return Ok(()),
                Command::NewData { samples } => self.absorb(session, &samples).await?,
                Command::Predict { rates } => {
                    match session.predictor.point_estimate(&rates, &session.rolling_average) {
                        Ok(estimate) => {
                            self.requests
                                .reply(correlation_id, estimate)
                                .await
                                .context("Failed to publish a prediction")?;
                            debug!(%correlation_id, %estimate, "Prediction sent");
                        }
                        Err(e) => {
                            error!(%correlation_id, error = %e, "Prediction failed, no reply sent");
                        }
                    }
                }
            }
        }
    }

    /// Fold official prints into the session: resolve their reference
    /// context, screen them against the opening baseline and hand the
    /// trusted ones to the predictor as today's training set.
    pub async fn absorb(&self, session: &mut TradingSession, samples: &[RateSample]) -> Result<()> {
        if samples.is_empty() {
            debug!("Empty official data, skipping");
            return Ok(());
        }
        let mut samples = samples.to_vec();
        samples.sort_by_key(|s| s.timestamp);

        session
            .fusion
            .update(&samples)
            .await
            .context("Failed to resolve the reference context")?;

        let opening = samples[0];
        let baseline = match session.fusion.get_fake_rate(opening.timestamp) {
            Some(rate) => rate,
            None => {
                session.predictor.ignore_today();
                let context = session
                    .fusion
                    .get_resolved(opening.timestamp)
                    .context("Opening print has no reference context")?;
                let estimate = session
                    .predictor
                    .point_estimate(&context, &session.rolling_average)
                    .context("Failed to estimate the opening baseline")?;
                session.fusion.set_fake_rate(opening.timestamp, estimate.rate);
                estimate.rate
            }
        };
        debug!(fake_rate = %baseline, real_rate = %opening.rate, "Opening baseline");

        let timestamps: Vec<_> = samples.iter().map(|s| s.timestamp).collect();
        let rates: Vec<_> = samples.iter().map(|s| s.rate).collect();
        let mask = self.collaborators.trust.trust_mask(baseline, &timestamps, &rates);
        if mask.len() != samples.len() {
            bail!(
                "Trust filter returned {} flags for {} prints",
                mask.len(),
                samples.len()
            );
        }

        let trusted: Vec<RateSample> = samples
            .iter()
            .zip(&mask)
            .filter(|(_, trusted)| **trusted)
            .map(|(s, _)| *s)
            .collect();

        if trusted.is_empty() {
            info!(prints = samples.len(), "No trusted official prints, ignoring today");
            session.predictor.ignore_today();
            return Ok(());
        }

        let features = trusted
            .iter()
            .map(|s| {
                session
                    .fusion
                    .get_resolved(s.timestamp)
                    .with_context(|| format!("No reference context for print {s}"))
            })
            .collect::<Result<Vec<_>>>()?;
        let targets: Vec<_> = trusted.iter().map(|s| s.rate).collect();

        session
            .predictor
            .set_todays_training_set(&features, &targets, &session.rolling_average);

        debug!(trusted = trusted.len(), prints = samples.len(), "Today's training set updated");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

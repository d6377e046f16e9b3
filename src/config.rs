//! Configuration loading from TOML.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Every section has defaults, so a partial (or empty) file is valid.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::time::Duration;

use crate::broker::readiness::{EXTERNAL_HISTORY, EXTERNAL_LIVE, OFFICIAL_TAPE, READINESS_KEY};
use crate::broker::requests::{COMMAND_QUEUE, REPLY_QUEUE};
use crate::fusion::FusionConfig;
use crate::ingest::{CalendarConfig, ReferenceConfig, TapeConfig};
use crate::model::TrustConfig;
use crate::resilience::SupervisorConfig;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub service: ServiceConfig,
    pub supervisor: SupervisorConfig,
    pub broker: BrokerConfig,
    pub readiness: ReadinessConfig,
    pub fusion: FusionConfig,
    pub calendar: CalendarConfig,
    pub tape: TapeConfig,
    pub reference: ReferenceConfig,
    pub trust: TrustConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    /// JSON fixture backing the replay feeds and tape.
    pub replay_path: String,
    /// How often the demo producer asks for a prediction.
    pub predict_interval_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "byn-realtime".to_string(),
            replay_path: "data/replay.json".to_string(),
            predict_interval_secs: 30,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BrokerConfig {
    pub command_queue: String,
    pub reply_queue: String,
    /// Upper bound of a single blocking pop.
    pub poll_interval_ms: u64,
    /// Default deadline of a `predict` call.
    pub predict_timeout_ms: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            command_queue: COMMAND_QUEUE.to_string(),
            reply_queue: REPLY_QUEUE.to_string(),
            poll_interval_ms: 1000,
            predict_timeout_ms: 500,
        }
    }
}

impl BrokerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn predict_timeout(&self) -> Duration {
        Duration::from_millis(self.predict_timeout_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ReadinessConfig {
    pub key: String,
    pub poll_interval_ms: u64,
    /// Pipelines the coordinator waits for.
    pub pipelines: Vec<String>,
    /// Extra attempts for a flag write hitting a transient outage.
    pub write_retries: u32,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            key: READINESS_KEY.to_string(),
            poll_interval_ms: 1000,
            pipelines: [EXTERNAL_HISTORY, EXTERNAL_LIVE, OFFICIAL_TAPE]
                .iter()
                .map(|p| p.to_string())
                .collect(),
            write_retries: 3,
        }
    }
}

impl ReadinessConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        Ok(config)
    }
}

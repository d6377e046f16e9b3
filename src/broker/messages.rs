//! Wire format for the COMMANDS and REPLIES queues.
//!
//! JSON records with explicit field names. The command kind is an
//! internally tagged enum (`"kind": "PREDICT" | "NEW_DATA" | "REBUILD"`),
//! decimals travel as strings and correlation ids as UUID strings.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{LocalRates, PointEstimate, RateSample};

/// Undecodable queue message.
#[derive(Debug, thiserror::Error)]
#[error("malformed queue message: {0}")]
pub struct MessageError(#[from] serde_json::Error);

/// What the coordinator is asked to do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
    /// Estimate the official rate for the given reference context.
    Predict { rates: LocalRates },
    /// Official-tape prints for the current session (the whole tape so
    /// far; already absorbed prints are skipped by fusion).
    NewData { samples: Vec<RateSample> },
    /// Drop the session and rebuild the model.
    Rebuild,
}

impl Command {
    pub fn kind(&self) -> &'static str {
        match self {
            Command::Predict { .. } => "PREDICT",
            Command::NewData { .. } => "NEW_DATA",
            Command::Rebuild => "REBUILD",
        }
    }
}

/// A command plus its routing metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub correlation_id: Uuid,
    /// Epoch milliseconds after which the command must not be handled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at_ms: Option<i64>,
    pub command: Command,
}

impl CommandEnvelope {
    /// Wrap `command` with a fresh correlation id and no expiry.
    pub fn new(command: Command) -> Self {
        Self {
            correlation_id: Uuid::new_v4(),
            expires_at_ms: None,
            command,
        }
    }

    pub fn expiring_at(mut self, expires_at_ms: i64) -> Self {
        self.expires_at_ms = Some(expires_at_ms);
        self
    }

    /// Whether the command's deadline has passed at `now_ms`.
    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        self.expires_at_ms.is_some_and(|expires| now_ms >= expires)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now().timestamp_millis())
    }

    pub fn encode(&self) -> Result<String, MessageError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(raw: &str) -> Result<Self, MessageError> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Answer to a PREDICT command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub correlation_id: Uuid,
    pub payload: PointEstimate,
}

impl Reply {
    pub fn encode(&self) -> Result<String, MessageError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(raw: &str) -> Result<Self, MessageError> {
        Ok(serde_json::from_str(raw)?)
    }
}

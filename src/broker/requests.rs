//! Correlated request/response over two shared queues.
//!
//! COMMANDS has many producers and exactly one consumer (the prediction
//! coordinator), so commands are handled strictly FIFO and serially.
//! REPLIES is shared by every producer: each waiter pops replies and
//! discards the ones whose correlation id is not its own. A waiter can
//! therefore swallow a reply meant for a concurrent waiter, which then
//! times out. This mirrors the deployed protocol; callers must treat
//! "no reply" as an ordinary outcome.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::messages::{Command, CommandEnvelope, Reply};
use super::{Broker, BrokerError};
use crate::types::{LocalRates, PointEstimate};

pub const COMMAND_QUEUE: &str = "PREDICTOR_COMMAND";
pub const REPLY_QUEUE: &str = "PREDICTION_READY";

/// Anything shorter than this is treated as an elapsed deadline.
const MIN_REMAINING: Duration = Duration::from_millis(1);

#[derive(Clone)]
pub struct RequestBroker {
    broker: Arc<dyn Broker>,
    command_queue: String,
    reply_queue: String,
    poll_interval: Duration,
}

impl RequestBroker {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self {
            broker,
            command_queue: COMMAND_QUEUE.to_string(),
            reply_queue: REPLY_QUEUE.to_string(),
            poll_interval: Duration::from_secs(1),
        }
    }

    pub fn with_queues(mut self, command_queue: impl Into<String>, reply_queue: impl Into<String>) -> Self {
        self.command_queue = command_queue.into();
        self.reply_queue = reply_queue.into();
        self
    }

    /// Upper bound of a single blocking pop.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    // -- Producer side ---------------------------------------------------

    /// Push `command` with a fresh correlation id. Fire-and-forget.
    pub async fn send(&self, command: Command) -> Result<Uuid, BrokerError> {
        let envelope = CommandEnvelope::new(command);
        self.send_envelope(&envelope).await?;
        Ok(envelope.correlation_id)
    }

    pub async fn send_envelope(&self, envelope: &CommandEnvelope) -> Result<(), BrokerError> {
        let raw = envelope
            .encode()
            .map_err(|e| BrokerError::Encode(e.to_string()))?;
        self.broker.push(&self.command_queue, raw).await?;
        debug!(
            kind = envelope.command.kind(),
            correlation_id = %envelope.correlation_id,
            "Command sent"
        );
        Ok(())
    }

    /// Wait until `timeout` for the reply carrying `correlation_id`.
    ///
    /// Returns `Ok(None)` when the deadline passes without a match.
    /// Non-matching replies popped meanwhile are discarded.
    pub async fn wait_reply(
        &self,
        correlation_id: Uuid,
        timeout: Duration,
    ) -> Result<Option<PointEstimate>, BrokerError> {
        let deadline = Instant::now() + timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining < MIN_REMAINING {
                info!(correlation_id = %correlation_id, "Got no prediction before the deadline");
                return Ok(None);
            }

            let raw = match self
                .broker
                .pop(&self.reply_queue, remaining.min(self.poll_interval))
                .await?
            {
                Some(raw) => raw,
                None => continue,
            };

            match Reply::decode(&raw) {
                Ok(reply) if reply.correlation_id == correlation_id => return Ok(Some(reply.payload)),
                Ok(reply) => {
                    debug!(
                        expected = %correlation_id,
                        got = %reply.correlation_id,
                        "Discarding reply for another request"
                    );
                }
                Err(e) => error!(error = %e, "Dropping undecodable reply"),
            }
        }
    }

    /// Send a PREDICT that expires at its own deadline and wait for the answer.
    pub async fn predict(
        &self,
        rates: LocalRates,
        timeout: Duration,
    ) -> Result<Option<PointEstimate>, BrokerError> {
        let timeout_ms = i64::try_from(timeout.as_millis()).unwrap_or(i64::MAX);
        let expires_at_ms = Utc::now().timestamp_millis().saturating_add(timeout_ms);
        let envelope = CommandEnvelope::new(Command::Predict { rates }).expiring_at(expires_at_ms);

        self.send_envelope(&envelope).await?;
        self.wait_reply(envelope.correlation_id, timeout).await
    }

    // -- Consumer side ---------------------------------------------------

    /// Next live command. Expired and undecodable messages are dropped
    /// here and never reach the caller.
    pub async fn receive(&self) -> Result<CommandEnvelope, BrokerError> {
        loop {
            let raw = match self.broker.pop(&self.command_queue, self.poll_interval).await? {
                Some(raw) => raw,
                None => continue,
            };

            let envelope = match CommandEnvelope::decode(&raw) {
                Ok(envelope) => envelope,
                Err(e) => {
                    error!(error = %e, "Dropping undecodable command");
                    continue;
                }
            };

            if envelope.is_expired() {
                info!(
                    kind = envelope.command.kind(),
                    correlation_id = %envelope.correlation_id,
                    "Ignoring expired command"
                );
                continue;
            }

            return Ok(envelope);
        }
    }

    pub async fn reply(&self, correlation_id: Uuid, payload: PointEstimate) -> Result<(), BrokerError> {
        let raw = Reply {
            correlation_id,
            payload,
        }
        .encode()
        .map_err(|e| BrokerError::Encode(e.to_string()))?;
        self.broker.push(&self.reply_queue, raw).await
    }

    /// Log the COMMANDS backlog, louder the deeper it gets.
    pub async fn inspect_backlog(&self) -> Result<usize, BrokerError> {
        let depth = self.broker.len(&self.command_queue).await?;
        match depth {
            0..=1 => {}
            2..=5 => debug!(depth, "Command queue backlog"),
            6..=10 => info!(depth, "Command queue backlog"),
            11..=15 => warn!(depth, "Command queue backlog"),
            _ => error!(depth, "Command queue backlog"),
        }
        Ok(depth)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

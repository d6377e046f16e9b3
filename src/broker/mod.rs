//! Shared broker: the only state independent pipelines share.
//!
//! Defines the `Broker` transport trait (FIFO queues with a bounded
//! blocking pop, plus boolean flag maps) and the two protocols built on
//! top of it:
//! - `ReadinessBarrier`: named readiness flags polled by the coordinator.
//! - `RequestBroker`: correlated request/response over a COMMANDS queue
//!   (many producers, one consumer) and a REPLIES queue.
//!
//! `InMemoryBroker` is the single-process transport. A networked store
//! only has to implement `Broker`; the protocols stay the same.

pub mod memory;
pub mod messages;
pub mod readiness;
pub mod requests;

pub use memory::InMemoryBroker;
pub use messages::{Command, CommandEnvelope, Reply};
pub use readiness::ReadinessBarrier;
pub use requests::RequestBroker;

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

/// Transport failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    /// The store could not be reached; worth retrying.
    #[error("broker unavailable: {0}")]
    Unavailable(String),
    /// The broker was shut down; retrying will not help.
    #[error("broker closed")]
    Closed,
    /// A message could not be serialized for the wire.
    #[error("could not encode message: {0}")]
    Encode(String),
}

impl BrokerError {
    pub fn is_transient(&self) -> bool {
        matches!(self, BrokerError::Unavailable(_))
    }
}

/// Abstraction over the shared message/flag store.
///
/// Queues are FIFO and at-least-once. `pop` waits at most `wait` for a
/// message and returns `None` when none arrived in time.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Append a message to the tail of `queue`.
    async fn push(&self, queue: &str, message: String) -> Result<(), BrokerError>;

    /// Remove the head of `queue`, waiting up to `wait` for one to arrive.
    async fn pop(&self, queue: &str, wait: Duration) -> Result<Option<String>, BrokerError>;

    /// Number of messages waiting in `queue`.
    async fn len(&self, queue: &str) -> Result<usize, BrokerError>;

    /// Set a single flag in the map stored under `key`.
    async fn set_flag(&self, key: &str, field: &str, value: bool) -> Result<(), BrokerError>;

    /// Set several flags in the map stored under `key` at once.
    async fn set_flags(&self, key: &str, flags: &HashMap<String, bool>) -> Result<(), BrokerError>;

    /// Read the whole flag map stored under `key` (empty if absent).
    async fn flags(&self, key: &str) -> Result<HashMap<String, bool>, BrokerError>;
}

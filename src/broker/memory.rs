//! Single-process `Broker` implementation.
//!
//! All state lives behind one mutex; a `Notify` wakes blocked poppers on
//! every push. Fault injection (`fail_next`) makes the next N calls fail
//! with `BrokerError::Unavailable` so outage handling can be tested.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::{Broker, BrokerError};

#[derive(Default)]
struct State {
    queues: HashMap<String, VecDeque<String>>,
    flags: HashMap<String, HashMap<String, bool>>,
}

#[derive(Default)]
pub struct InMemoryBroker {
    state: Mutex<State>,
    pushed: Notify,
    failures_pending: AtomicU32,
    closed: AtomicBool,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` broker calls fail as if the store were down.
    pub fn fail_next(&self, n: u32) {
        self.failures_pending.store(n, Ordering::SeqCst);
    }

    /// Refuse every further call with `BrokerError::Closed`.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.pushed.notify_waiters();
    }

    fn check(&self) -> Result<(), BrokerError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::Closed);
        }
        let injected = self
            .failures_pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(BrokerError::Unavailable("injected outage".into()));
        }
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // A poisoned lock only means another task panicked mid-call; the
        // queues themselves are still consistent.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn try_pop(&self, queue: &str) -> Option<String> {
        self.lock().queues.get_mut(queue).and_then(VecDeque::pop_front)
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn push(&self, queue: &str, message: String) -> Result<(), BrokerError> {
        self.check()?;
        self.lock()
            .queues
            .entry(queue.to_string())
            .or_default()
            .push_back(message);
        self.pushed.notify_waiters();
        Ok(())
    }

    async fn pop(&self, queue: &str, wait: Duration) -> Result<Option<String>, BrokerError> {
        self.check()?;
        let deadline = Instant::now() + wait;

        loop {
            // Register interest before checking so a push landing between
            // the check and the await is not missed.
            let notified = self.pushed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(message) = self.try_pop(queue) {
                return Ok(Some(message));
            }
            if self.closed.load(Ordering::SeqCst) {
                return Err(BrokerError::Closed);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn len(&self, queue: &str) -> Result<usize, BrokerError> {
        self.check()?;
        Ok(self.lock().queues.get(queue).map_or(0, VecDeque::len))
    }

    async fn set_flag(&self, key: &str, field: &str, value: bool) -> Result<(), BrokerError> {
        self.check()?;
        self.lock()
            .flags
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value);
        Ok(())
    }

    async fn set_flags(&self, key: &str, flags: &HashMap<String, bool>) -> Result<(), BrokerError> {
        self.check()?;
        let mut state = self.lock();
        let map = state.flags.entry(key.to_string()).or_default();
        for (field, value) in flags {
            map.insert(field.clone(), *value);
        }
        Ok(())
    }

    async fn flags(&self, key: &str) -> Result<HashMap<String, bool>, BrokerError> {
        self.check()?;
        Ok(self.lock().flags.get(key).cloned().unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

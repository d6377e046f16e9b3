//! Bounded retry of expected failures.
//!
//! Two statically distinct entry points:
//! - `call` / `call_with` retry an operation producing a single result.
//! - `stream` / `stream_with` retry the production of a lazily evaluated
//!   sequence. On an expected failure the whole production is started
//!   again from the top and the elements already handed to the consumer
//!   are skipped, so nothing is delivered twice. This assumes the
//!   producer yields the same prefix on every evaluation.
//!
//! Failures the policy does not expect are returned immediately, never
//! retried.

use futures::stream::{self, Stream, StreamExt};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use tracing::{error, info};

pub struct RetryPolicy<E> {
    retry_count: u32,
    is_expected: fn(&E) -> bool,
}

impl<E> Clone for RetryPolicy<E> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<E> Copy for RetryPolicy<E> {}

impl<E> fmt::Debug for RetryPolicy<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("retry_count", &self.retry_count)
            .finish()
    }
}

impl<E: fmt::Display> RetryPolicy<E> {
    /// `retry_count` is the number of additional attempts after the first
    /// one; `is_expected` decides which errors are worth retrying.
    pub fn new(retry_count: u32, is_expected: fn(&E) -> bool) -> Self {
        Self {
            retry_count,
            is_expected,
        }
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn is_expected(&self, err: &E) -> bool {
        (self.is_expected)(err)
    }

    /// Retry a single-result operation.
    pub async fn call<T, F, Fut>(&self, label: &str, op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.call_with(label, op, || async {}).await
    }

    /// Retry a single-result operation, running `on_retry` (for example a
    /// reconnect) before every new attempt.
    pub async fn call_with<T, F, Fut, C, CFut>(
        &self,
        label: &str,
        mut op: F,
        mut on_retry: C,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: FnMut() -> CFut,
        CFut: Future<Output = ()>,
    {
        let mut attempt: u32 = 0;
        let mut previous: Vec<String> = Vec::new();

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if !self.is_expected(&e) {
                        error!(operation = label, error = %e, "Unexpected error, not retrying");
                        return Err(e);
                    }
                    if attempt >= self.retry_count {
                        error!(
                            operation = label,
                            previous = ?previous,
                            error = %e,
                            "Too many errors, returning the last one"
                        );
                        return Err(e);
                    }
                    info!(
                        operation = label,
                        error = %e,
                        attempts_left = self.retry_count - attempt,
                        "Expected error, retrying"
                    );
                    previous.push(e.to_string());
                    on_retry().await;
                    attempt += 1;
                }
            }
        }
    }

    /// Retry the production of a lazily evaluated sequence.
    pub fn stream<T, F, S>(&self, label: impl Into<String>, make: F) -> impl Stream<Item = Result<T, E>>
    where
        F: FnMut() -> S,
        S: Stream<Item = Result<T, E>>,
    {
        self.stream_with(label, make, || async {})
    }

    /// Like `stream`, running `on_retry` before each fresh evaluation.
    pub fn stream_with<T, F, S, C, CFut>(
        &self,
        label: impl Into<String>,
        make: F,
        on_retry: C,
    ) -> impl Stream<Item = Result<T, E>>
    where
        F: FnMut() -> S,
        S: Stream<Item = Result<T, E>>,
        C: FnMut() -> CFut,
        CFut: Future<Output = ()>,
    {
        let state = SequenceState {
            policy: *self,
            label: label.into(),
            make,
            on_retry,
            current: None,
            delivered: 0,
            skip: 0,
            attempt: 0,
            previous: Vec::new(),
            finished: false,
        };

        stream::unfold(state, |mut st| async move {
            if st.finished {
                return None;
            }
            loop {
                let producer = st.current.get_or_insert_with(|| Box::pin((st.make)()));
                match producer.next().await {
                    Some(Ok(item)) => {
                        if st.skip > 0 {
                            st.skip -= 1;
                            continue;
                        }
                        st.delivered += 1;
                        return Some((Ok(item), st));
                    }
                    Some(Err(e)) => {
                        if !st.policy.is_expected(&e) {
                            error!(
                                operation = %st.label,
                                delivered = st.delivered,
                                error = %e,
                                "Unexpected error while producing sequence, not retrying"
                            );
                            st.finished = true;
                            return Some((Err(e), st));
                        }
                        if st.attempt >= st.policy.retry_count {
                            error!(
                                operation = %st.label,
                                previous = ?st.previous,
                                error = %e,
                                "Too many errors while producing sequence, returning the last one"
                            );
                            st.finished = true;
                            return Some((Err(e), st));
                        }
                        info!(
                            operation = %st.label,
                            delivered = st.delivered,
                            error = %e,
                            attempts_left = st.policy.retry_count - st.attempt,
                            "Expected error while producing sequence, restarting it"
                        );
                        st.previous.push(e.to_string());
                        st.attempt += 1;
                        st.current = None;
                        st.skip = st.delivered;
                        (st.on_retry)().await;
                    }
                    None => {
                        st.finished = true;
                        return None;
                    }
                }
            }
        })
    }
}

struct SequenceState<E, F, S, C> {
    policy: RetryPolicy<E>,
    label: String,
    make: F,
    on_retry: C,
    current: Option<Pin<Box<S>>>,
    delivered: usize,
    skip: usize,
    attempt: u32,
    previous: Vec<String>,
    finished: bool,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Integration tests: the coordinator, tape watcher, readiness barrier
//! and supervisor wired together over one in-memory broker.

mod fakes;
mod pipeline;
mod resilience;

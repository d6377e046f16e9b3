//! Core engine: the prediction coordinator.
//!
//! The coordinator is the single consumer of the COMMANDS queue, so it is
//! also the only writer of session state (the predictor and the fusion
//! cache). Nothing here needs a lock.

pub mod coordinator;

pub use coordinator::{Collaborators, PredictionCoordinator, TradingSession};

//! Error types for the run countdown

use thiserror::Error;

use crate::timer::RunState;

/// Run error type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RunError {
    /// The sample count is not a positive whole number
    #[error("Invalid sample count '{input}'")]
    InvalidSampleCount {
        /// The rejected input.
        input: String,
    },

    /// The calibration cannot produce a countdown
    #[error("Invalid run calibration: {reason}")]
    InvalidCalibration {
        /// The reason the calibration was rejected.
        reason: String,
    },

    /// The countdown cannot tick at this period
    #[error("Invalid tick interval: {interval_ms}ms")]
    InvalidTickInterval {
        /// The rejected period in milliseconds.
        interval_ms: u64,
    },

    /// The requested transition is not allowed from the current state
    #[error("Cannot {action} a run that is {state}")]
    InvalidTransition {
        /// The requested action.
        action: &'static str,
        /// The state the run was in.
        state: RunState,
    },
}

/// Result type for run operations
pub type RunResult<T> = std::result::Result<T, RunError>;

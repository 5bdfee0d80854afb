//! # BelugaKit Run
//!
//! Deterministic, pausable countdown through the steps of an extraction run.
//! The countdown is derived from the sample count once when the run is set
//! up and does not depend on the controller channel.

pub mod driver;
pub mod error;
pub mod protocol;
pub mod timer;

pub use driver::{RunTimerDriver, DEFAULT_TICK_INTERVAL};
pub use error::{RunError, RunResult};
pub use protocol::{
    RunCalibration, RunParameters, DEFAULT_STEP_NAMES, OVERHEAD_SECONDS, PER_SAMPLE_SECONDS,
};
pub use timer::{advance, RunSnapshot, RunState, RunTimer, RunTimerState};

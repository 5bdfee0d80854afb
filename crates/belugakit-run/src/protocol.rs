//! Run calibration and per-run parameters
//!
//! The run duration is linear in the sample count. The calibration was
//! measured as 1710 s of fixed overhead and 5100 s for a full rack of 32
//! samples.

use serde::{Deserialize, Serialize};

use crate::error::{RunError, RunResult};

/// Fixed overhead of every run in seconds
pub const OVERHEAD_SECONDS: f64 = 1710.0;

/// Samples in the reference run
pub const REFERENCE_SAMPLES: u32 = 32;

/// Duration of the reference run in seconds
pub const REFERENCE_DURATION_SECONDS: f64 = 5100.0;

/// Additional seconds per sample
pub const PER_SAMPLE_SECONDS: f64 =
    (REFERENCE_DURATION_SECONDS - OVERHEAD_SECONDS) / REFERENCE_SAMPLES as f64;

/// Protocol steps in execution order
pub const DEFAULT_STEP_NAMES: [&str; 5] = ["Lysis", "Binding", "Wash 1", "Wash 2", "Wash 3"];

/// Duration model of the extraction protocol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunCalibration {
    /// Fixed seconds per run
    pub overhead_seconds: f64,
    /// Seconds added per sample
    pub per_sample_seconds: f64,
    /// Step names in order
    pub step_names: Vec<String>,
}

impl Default for RunCalibration {
    fn default() -> Self {
        Self {
            overhead_seconds: OVERHEAD_SECONDS,
            per_sample_seconds: PER_SAMPLE_SECONDS,
            step_names: DEFAULT_STEP_NAMES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl RunCalibration {
    /// Check the calibration can drive a countdown
    pub fn validate(&self) -> RunResult<()> {
        let invalid = |reason: &str| {
            Err(RunError::InvalidCalibration {
                reason: reason.to_string(),
            })
        };

        if !self.overhead_seconds.is_finite() || self.overhead_seconds <= 0.0 {
            return invalid("overhead must be a positive number of seconds");
        }
        if !self.per_sample_seconds.is_finite() || self.per_sample_seconds < 0.0 {
            return invalid("per-sample time must not be negative");
        }
        if self.step_names.is_empty() {
            return invalid("at least one step is required");
        }
        Ok(())
    }
}

/// Constants of one run, computed once when the run is set up
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunParameters {
    /// Number of samples in the run
    pub sample_count: u32,
    /// Step names in order
    pub step_names: Vec<String>,
    /// Whole-run duration in seconds
    pub total_duration_seconds: u64,
    /// Duration of each step in seconds
    pub time_per_step: f64,
}

impl RunParameters {
    /// Derive the run constants for `sample_count` samples
    pub fn new(sample_count: u32, calibration: &RunCalibration) -> RunResult<Self> {
        calibration.validate()?;
        if sample_count == 0 {
            return Err(RunError::InvalidSampleCount {
                input: sample_count.to_string(),
            });
        }

        let total = calibration.overhead_seconds
            + calibration.per_sample_seconds * f64::from(sample_count);
        let total_duration_seconds = total.round().max(1.0) as u64;
        let time_per_step = total_duration_seconds as f64 / calibration.step_names.len() as f64;

        Ok(Self {
            sample_count,
            step_names: calibration.step_names.clone(),
            total_duration_seconds,
            time_per_step,
        })
    }

    /// Parse the operator's sample count field and derive the run constants
    pub fn from_sample_field(input: &str, calibration: &RunCalibration) -> RunResult<Self> {
        let sample_count = input
            .trim()
            .parse::<u32>()
            .ok()
            .filter(|count| *count > 0)
            .ok_or_else(|| RunError::InvalidSampleCount {
                input: input.to_string(),
            })?;
        Self::new(sample_count, calibration)
    }

    /// Number of protocol steps
    pub fn step_count(&self) -> usize {
        self.step_names.len()
    }

    /// Name of the step at `index`
    pub fn step_name(&self, index: usize) -> Option<&str> {
        self.step_names.get(index).map(String::as_str)
    }
}

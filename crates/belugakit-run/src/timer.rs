//! Run countdown state machine
//!
//! States: `Idle -> Running <-> Paused -> Completed`, and `Aborted` from any
//! non-terminal state. Progress is recomputed from the elapsed time on every
//! tick rather than accumulated.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{RunError, RunResult};
use crate::protocol::RunParameters;

/// Lifecycle state of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RunState {
    /// Set up but not started
    #[default]
    Idle,
    /// Counting down
    Running,
    /// Countdown frozen
    Paused,
    /// Countdown reached zero
    Completed,
    /// Stopped by the operator
    Aborted,
}

impl RunState {
    /// Whether no further transitions are possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Completed | RunState::Aborted)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Running => write!(f, "Running"),
            Self::Paused => write!(f, "Paused"),
            Self::Completed => write!(f, "Completed"),
            Self::Aborted => write!(f, "Aborted"),
        }
    }
}

/// Mutable fields of the countdown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunTimerState {
    /// Seconds left in the run
    pub remaining_seconds: u64,
    /// Index of the step in progress
    pub current_step_index: usize,
    /// Progress through the current step, 0 to 100
    pub step_progress_percent: u8,
    /// Progress through the whole run, 0 to 100
    pub overall_progress_percent: u8,
    /// Lifecycle state
    pub state: RunState,
}

impl RunTimerState {
    /// State of a run that has not started
    pub fn initial(params: &RunParameters) -> Self {
        Self {
            remaining_seconds: params.total_duration_seconds,
            current_step_index: 0,
            step_progress_percent: 0,
            overall_progress_percent: 0,
            state: RunState::Idle,
        }
    }

    /// Whether the countdown is frozen
    pub fn is_paused(&self) -> bool {
        self.state == RunState::Paused
    }

    /// Whether the operator stopped the run
    pub fn is_aborted(&self) -> bool {
        self.state == RunState::Aborted
    }
}

fn percent(value: f64) -> u8 {
    value.round().clamp(0.0, 100.0) as u8
}

/// Advance a running countdown by one second
///
/// Any state other than `Running` is returned unchanged.
pub fn advance(params: &RunParameters, state: RunTimerState) -> RunTimerState {
    if state.state != RunState::Running {
        return state;
    }

    let total = params.total_duration_seconds;
    let remaining = state.remaining_seconds.saturating_sub(1).min(total);
    let elapsed = (total - remaining) as f64;
    let last_step = params.step_count().saturating_sub(1);

    let (current_step_index, step_progress_percent) = if params.time_per_step > 0.0 {
        let index = ((elapsed / params.time_per_step).floor() as usize).min(last_step);
        let into_step = elapsed - index as f64 * params.time_per_step;
        (index, percent(100.0 * into_step / params.time_per_step))
    } else {
        (last_step, 100)
    };

    let overall_progress_percent = if total > 0 {
        percent(100.0 * elapsed / total as f64)
    } else {
        100
    };

    RunTimerState {
        remaining_seconds: remaining,
        current_step_index,
        step_progress_percent,
        overall_progress_percent,
        state: if remaining == 0 {
            RunState::Completed
        } else {
            RunState::Running
        },
    }
}

/// Point-in-time view of a run for display
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSnapshot {
    /// Lifecycle state
    pub state: RunState,
    /// Seconds left in the run
    pub remaining_seconds: u64,
    /// Index of the step in progress
    pub current_step_index: usize,
    /// Name of the step in progress
    pub current_step: String,
    /// Progress through the current step, 0 to 100
    pub step_progress_percent: u8,
    /// Progress through the whole run, 0 to 100
    pub overall_progress_percent: u8,
}

impl RunSnapshot {
    /// Remaining time as `MM:SS`; minutes keep counting past 59
    pub fn remaining_display(&self) -> String {
        format!(
            "{:02}:{:02}",
            self.remaining_seconds / 60,
            self.remaining_seconds % 60
        )
    }

    /// Whether the countdown is frozen
    pub fn is_paused(&self) -> bool {
        self.state == RunState::Paused
    }

    /// Whether the operator stopped the run
    pub fn is_aborted(&self) -> bool {
        self.state == RunState::Aborted
    }
}

/// The countdown of one run
///
/// Create a new timer per run; a finished timer cannot be restarted.
#[derive(Debug, Clone)]
pub struct RunTimer {
    params: RunParameters,
    state: RunTimerState,
}

impl RunTimer {
    /// Create an idle timer
    pub fn new(params: RunParameters) -> Self {
        let state = RunTimerState::initial(&params);
        Self { params, state }
    }

    /// Run constants
    pub fn parameters(&self) -> &RunParameters {
        &self.params
    }

    /// Current countdown fields
    pub fn state(&self) -> RunTimerState {
        self.state
    }

    /// Current lifecycle state
    pub fn run_state(&self) -> RunState {
        self.state.state
    }

    /// Snapshot for display
    pub fn snapshot(&self) -> RunSnapshot {
        RunSnapshot {
            state: self.state.state,
            remaining_seconds: self.state.remaining_seconds,
            current_step_index: self.state.current_step_index,
            current_step: self
                .params
                .step_name(self.state.current_step_index)
                .unwrap_or_default()
                .to_string(),
            step_progress_percent: self.state.step_progress_percent,
            overall_progress_percent: self.state.overall_progress_percent,
        }
    }

    fn transition(&mut self, action: &'static str, from: RunState, to: RunState) -> RunResult<()> {
        if self.state.state != from {
            return Err(RunError::InvalidTransition {
                action,
                state: self.state.state,
            });
        }
        tracing::debug!("Run {} -> {}", from, to);
        self.state.state = to;
        Ok(())
    }

    /// Begin counting down
    pub fn start(&mut self) -> RunResult<()> {
        self.transition("start", RunState::Idle, RunState::Running)?;
        tracing::info!(
            "Run started: {} samples, {}s total",
            self.params.sample_count,
            self.params.total_duration_seconds
        );
        Ok(())
    }

    /// Advance one second; returns whether anything changed
    pub fn tick(&mut self) -> bool {
        let next = advance(&self.params, self.state);
        let changed = next != self.state;
        if next.state == RunState::Completed && self.state.state != RunState::Completed {
            tracing::info!("Run completed");
        }
        self.state = next;
        changed
    }

    /// Freeze the countdown
    pub fn pause(&mut self) -> RunResult<()> {
        self.transition("pause", RunState::Running, RunState::Paused)?;
        tracing::info!("Run paused at {}s remaining", self.state.remaining_seconds);
        Ok(())
    }

    /// Continue a frozen countdown
    pub fn resume(&mut self) -> RunResult<()> {
        self.transition("resume", RunState::Paused, RunState::Running)?;
        tracing::info!("Run resumed at {}s remaining", self.state.remaining_seconds);
        Ok(())
    }

    /// Pause a running countdown or resume a paused one
    pub fn toggle_pause(&mut self) -> RunResult<RunState> {
        match self.state.state {
            RunState::Running => self.pause()?,
            RunState::Paused => self.resume()?,
            state => {
                return Err(RunError::InvalidTransition {
                    action: "pause or resume",
                    state,
                })
            }
        }
        Ok(self.state.state)
    }

    /// Stop the run; returns whether this call aborted it
    ///
    /// Aborting a finished run does nothing.
    pub fn abort(&mut self) -> bool {
        if self.state.state.is_terminal() {
            return false;
        }
        tracing::warn!("Run aborted at {}s remaining", self.state.remaining_seconds);
        self.state.state = RunState::Aborted;
        true
    }
}

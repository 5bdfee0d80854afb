//! Periodic driver for a [`RunTimer`]
//!
//! Ticks a shared timer on a tokio interval and publishes a snapshot after
//! every change. The task ends once the run is completed or aborted.

use belugakit_core::{thread_safe, ThreadSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::{RunError, RunResult};
use crate::timer::{RunSnapshot, RunState, RunTimer};

/// Default tick period
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Drives one run's countdown in the background
pub struct RunTimerDriver {
    timer: ThreadSafe<RunTimer>,
    snapshots: Arc<watch::Sender<RunSnapshot>>,
    handle: JoinHandle<()>,
}

impl RunTimerDriver {
    /// Start `timer` (if idle) and tick it every `interval`
    ///
    /// A zero `interval` is rejected and leaves the timer untouched.
    pub fn spawn(mut timer: RunTimer, interval: Duration) -> RunResult<Self> {
        if interval.is_zero() {
            return Err(RunError::InvalidTickInterval {
                interval_ms: interval.as_millis() as u64,
            });
        }
        if timer.run_state() == RunState::Idle {
            timer.start()?;
        }

        let (tx, _) = watch::channel(timer.snapshot());
        let snapshots = Arc::new(tx);
        let timer = thread_safe(timer);

        let handle = tokio::spawn({
            let timer = timer.clone();
            let snapshots = snapshots.clone();
            async move {
                let mut ticker =
                    tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

                loop {
                    ticker.tick().await;
                    let snapshot = {
                        let mut timer = timer.lock();
                        if timer.run_state().is_terminal() {
                            break;
                        }
                        if !timer.tick() {
                            continue;
                        }
                        timer.snapshot()
                    };
                    let done = snapshot.state.is_terminal();
                    snapshots.send_replace(snapshot);
                    if done {
                        break;
                    }
                }
                tracing::debug!("Run timer driver stopped");
            }
        });

        Ok(Self {
            timer,
            snapshots,
            handle,
        })
    }

    /// Latest snapshot
    pub fn snapshot(&self) -> RunSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Watch snapshots as they change
    pub fn subscribe(&self) -> watch::Receiver<RunSnapshot> {
        self.snapshots.subscribe()
    }

    fn publish(&self, timer: &RunTimer) {
        self.snapshots.send_replace(timer.snapshot());
    }

    /// Freeze the countdown
    pub fn pause(&self) -> RunResult<()> {
        let mut timer = self.timer.lock();
        timer.pause()?;
        self.publish(&timer);
        Ok(())
    }

    /// Continue the countdown
    pub fn resume(&self) -> RunResult<()> {
        let mut timer = self.timer.lock();
        timer.resume()?;
        self.publish(&timer);
        Ok(())
    }

    /// Pause or resume
    pub fn toggle_pause(&self) -> RunResult<RunState> {
        let mut timer = self.timer.lock();
        let state = timer.toggle_pause()?;
        self.publish(&timer);
        Ok(state)
    }

    /// Abort the run; returns whether this call aborted it
    pub fn abort(&self) -> bool {
        let mut timer = self.timer.lock();
        let aborted = timer.abort();
        if aborted {
            self.publish(&timer);
        }
        aborted
    }

    /// Wait for the run to finish and return the final snapshot
    pub async fn finished(mut self) -> RunSnapshot {
        let mut snapshots = self.snapshots.subscribe();
        let _ = snapshots.wait_for(|s| s.state.is_terminal()).await;
        if let Err(e) = (&mut self.handle).await {
            tracing::warn!("Run timer task ended abnormally: {}", e);
        }
        self.snapshot()
    }
}

impl std::fmt::Debug for RunTimerDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunTimerDriver")
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

impl Drop for RunTimerDriver {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

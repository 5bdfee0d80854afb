//! Tests for the periodic run timer driver

use belugakit_run::{
    RunCalibration, RunError, RunParameters, RunState, RunTimer, RunTimerDriver,
    DEFAULT_TICK_INTERVAL,
};
use std::time::Duration;

fn short_run() -> RunTimer {
    let calibration = RunCalibration {
        overhead_seconds: 4.0,
        per_sample_seconds: 1.0,
        step_names: vec!["Lysis".into(), "Binding".into()],
    };
    RunTimer::new(RunParameters::new(1, &calibration).unwrap())
}

#[tokio::test(start_paused = true)]
async fn test_driver_ticks_every_interval() {
    let driver = RunTimerDriver::spawn(short_run(), DEFAULT_TICK_INTERVAL).unwrap();
    assert_eq!(driver.snapshot().state, RunState::Running);
    assert_eq!(driver.snapshot().remaining_seconds, 5);

    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert_eq!(driver.snapshot().remaining_seconds, 3);
}

#[tokio::test(start_paused = true)]
async fn test_driver_runs_to_completion() {
    let started = tokio::time::Instant::now();
    let driver = RunTimerDriver::spawn(short_run(), DEFAULT_TICK_INTERVAL).unwrap();

    let last = driver.finished().await;
    assert_eq!(last.state, RunState::Completed);
    assert_eq!(last.remaining_seconds, 0);
    assert_eq!(started.elapsed(), Duration::from_secs(5));
}

#[tokio::test(start_paused = true)]
async fn test_driver_pause_and_resume() {
    let driver = RunTimerDriver::spawn(short_run(), DEFAULT_TICK_INTERVAL).unwrap();

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(driver.toggle_pause().unwrap(), RunState::Paused);
    let frozen = driver.snapshot();
    assert!(frozen.is_paused());

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(driver.snapshot().remaining_seconds, frozen.remaining_seconds);

    driver.resume().unwrap();
    let last = driver.finished().await;
    assert_eq!(last.state, RunState::Completed);
}

#[tokio::test(start_paused = true)]
async fn test_driver_abort_publishes_and_stops() {
    let driver = RunTimerDriver::spawn(short_run(), DEFAULT_TICK_INTERVAL).unwrap();
    let mut updates = driver.subscribe();

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(driver.abort());
    assert!(!driver.abort());

    updates.changed().await.unwrap();
    assert!(updates.borrow_and_update().is_aborted());

    let last = driver.finished().await;
    assert_eq!(last.state, RunState::Aborted);
    assert_eq!(last.remaining_seconds, 4);
}

#[tokio::test]
async fn test_driver_rejects_zero_interval() {
    let err = RunTimerDriver::spawn(short_run(), Duration::ZERO).unwrap_err();
    assert_eq!(err, RunError::InvalidTickInterval { interval_ms: 0 });
}

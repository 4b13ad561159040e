//! Scheduler loop.
//!
//! Runs one cycle immediately, then one per interval until the shutdown
//! channel fires or the optional deadline passes. An interval of zero is
//! single-shot mode. A cycle in flight is always allowed to finish: the
//! shutdown channel only prevents the next cycle from starting and cuts
//! the interval wait short.
//!
//! Cycles never overlap; the interval is counted from the end of one
//! cycle to the start of the next.

use anyhow::{bail, Result};
use chrono::Utc;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::engine::tracker::FanOutTracker;
use crate::output::ResultSink;
use crate::types::{SchedulePhase, ScheduleState, StopReason, TrackingRequest};

/// Create the shutdown channel. Sending `true` asks the loop to stop.
pub fn shutdown_channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

/// Forward the first signal to the shutdown channel, then wait for another.
///
/// Returns the name of the second signal so the caller can exit without
/// waiting for the cycle in flight.
pub async fn relay_signals<F, Fut>(tx: watch::Sender<bool>, mut next_signal: F) -> &'static str
where
    F: FnMut() -> Fut,
    Fut: Future<Output = &'static str>,
{
    let first = next_signal().await;
    info!(signal = first, "Shutdown signal received, finishing current cycle");
    let _ = tx.send(true);

    let second = next_signal().await;
    warn!(signal = second, "Second signal received, not waiting for current cycle");
    second
}

/// What ended a wait between cycles.
enum Wake {
    Timer,
    Shutdown,
    Deadline,
}

pub struct Scheduler {
    tracker: FanOutTracker,
    sink: Box<dyn ResultSink>,
    requests: Vec<TrackingRequest>,
    interval: Duration,
    stop_after: Option<Duration>,
    shutdown: watch::Receiver<bool>,
    state: ScheduleState,
}

impl Scheduler {
    pub fn new(
        tracker: FanOutTracker,
        sink: Box<dyn ResultSink>,
        requests: Vec<TrackingRequest>,
        interval: Duration,
        stop_after: Option<Duration>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            tracker,
            sink,
            requests,
            interval,
            stop_after,
            shutdown,
            state: ScheduleState::new(None),
        }
    }

    pub fn state(&self) -> &ScheduleState {
        &self.state
    }

    /// Drive cycles until termination. Returns the final state.
    ///
    /// The first cycle always runs. Sink failures are logged and the loop
    /// carries on. Fails only if this scheduler has already terminated
    /// (there is no resume).
    pub async fn run(&mut self) -> Result<ScheduleState> {
        if self.state.is_terminated() {
            bail!("scheduler already terminated after {} cycles", self.state.cycles_run);
        }

        // A deadline past the clock's range is no deadline at all.
        let deadline = self.stop_after.and_then(|d| Instant::now().checked_add(d));
        self.state.deadline = deadline.and(self.stop_after).and_then(wall_clock_after);

        info!(
            requests = self.requests.len(),
            interval_secs = self.interval.as_secs_f64(),
            stop_after_secs = ?self.stop_after.map(|d| d.as_secs_f64()),
            "Scheduler started"
        );

        loop {
            self.state.phase = SchedulePhase::Running;
            self.state.next_run_at = None;
            let report = self.tracker.run_cycle(&self.requests).await;
            self.state.cycles_run += 1;
            self.state.last_run_at = Some(report.finished_at);
            if let Err(e) = self.sink.emit(&report) {
                error!(error = %e, report = %report, "Failed to write cycle results");
            }

            if self.interval.is_zero() {
                self.terminate(StopReason::SingleShot);
                break;
            }

            // A signal or deadline that landed mid-cycle takes effect now.
            if let Some(reason) = self.stop_requested(deadline) {
                self.terminate(reason);
                break;
            }

            self.state.phase = SchedulePhase::Waiting;
            self.state.next_run_at = wall_clock_after(self.interval);
            debug!(
                cycles = self.state.cycles_run,
                next_run_at = ?self.state.next_run_at,
                "Waiting for next cycle"
            );

            match wait(self.interval, self.shutdown.clone(), deadline).await {
                Wake::Timer => continue,
                Wake::Shutdown => {
                    self.terminate(StopReason::Signal);
                    break;
                }
                Wake::Deadline => {
                    self.terminate(StopReason::Deadline);
                    break;
                }
            }
        }

        Ok(self.state.clone())
    }

    fn stop_requested(&self, deadline: Option<Instant>) -> Option<StopReason> {
        if *self.shutdown.borrow() {
            Some(StopReason::Signal)
        } else if deadline.is_some_and(|d| Instant::now() >= d) {
            Some(StopReason::Deadline)
        } else {
            None
        }
    }

    fn terminate(&mut self, reason: StopReason) {
        self.state.phase = SchedulePhase::Terminated;
        self.state.shutting_down = reason != StopReason::SingleShot;
        self.state.next_run_at = None;
        self.state.stop_reason = Some(reason);

        info!(
            reason = ?reason,
            cycles = self.state.cycles_run,
            "Scheduler terminated"
        );
    }
}

/// Wall-clock time `after` from now, or `None` if it can't be represented.
fn wall_clock_after(after: Duration) -> Option<chrono::DateTime<Utc>> {
    chrono::Duration::from_std(after)
        .ok()
        .and_then(|d| Utc::now().checked_add_signed(d))
}

/// Sleep out the interval unless shutdown or the deadline comes first.
async fn wait(
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
    deadline: Option<Instant>,
) -> Wake {
    let deadline_reached = async move {
        match deadline {
            Some(d) => tokio::time::sleep_until(d).await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        _ = tokio::time::sleep(interval) => Wake::Timer,
        _ = shutdown_requested(&mut shutdown) => Wake::Shutdown,
        _ = deadline_reached => Wake::Deadline,
    }
}

/// Resolves once `true` is seen on the channel. A closed channel can never
/// fire again, so it parks forever instead.
async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Window scheduling.
//!
//! The scheduler owns the wall-clock timing of the accounting window. A single
//! background task sleeps until the current window ends, clears the counter
//! store and re-arms for the next window. Windows tile contiguously: each one
//! starts exactly where the previous one ended, however late the timer fired.

use crate::error::{ThrottlerError, ThrottlerResult};
use crate::metrics::MetricsCollector;
use crate::store::CounterStore;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

/// One accounting window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    /// Number of windows elapsed since the scheduler started, including
    /// windows skipped after a late reset.
    pub sequence: u64,
    pub started_at: Instant,
    pub ends_at: Instant,
}

/// Pairs a monotonic instant with the wall-clock time it was taken at, so
/// window boundaries can be reported as absolute timestamps without drift.
#[derive(Debug, Clone, Copy)]
struct WallClockAnchor {
    instant: Instant,
    wall: SystemTime,
}

impl WallClockAnchor {
    fn now() -> Self {
        Self {
            instant: Instant::now(),
            wall: SystemTime::now(),
        }
    }

    fn wall_time(&self, at: Instant) -> SystemTime {
        self.wall + at.saturating_duration_since(self.instant)
    }
}

#[derive(Debug, Clone, Copy)]
enum SchedulerState {
    /// Waiting for the current window to end.
    Armed(Instant),
    /// The window ended; the store is being cleared.
    Resetting(Instant),
}

pub struct WindowScheduler {
    interval: Duration,
    anchor: WallClockAnchor,
    window: watch::Receiver<Window>,
    stop: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl WindowScheduler {
    /// Open the first window (ending `interval` from now) and spawn the reset
    /// task on the current tokio runtime.
    pub fn start(
        store: Arc<dyn CounterStore>,
        interval: Duration,
        metrics: MetricsCollector,
    ) -> ThrottlerResult<Self> {
        if interval.is_zero() {
            return Err(ThrottlerError::Configuration(
                "Clear interval must be greater than 0".into(),
            ));
        }

        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            ThrottlerError::Configuration("Window scheduler requires a tokio runtime".into())
        })?;

        let anchor = WallClockAnchor::now();
        let first = Window {
            sequence: 0,
            started_at: anchor.instant,
            ends_at: anchor.instant + interval,
        };

        let (window_tx, window_rx) = watch::channel(first);
        let (stop_tx, stop_rx) = watch::channel(false);

        let task = runtime.spawn(run_scheduler(store, interval, metrics, window_tx, stop_rx));

        debug!(interval_ms = interval.as_millis() as u64, "Window scheduler armed");

        Ok(Self {
            interval,
            anchor,
            window: window_rx,
            stop: stop_tx,
            task: Mutex::new(Some(task)),
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn current_window(&self) -> Window {
        *self.window.borrow()
    }

    /// Monotonic deadline of the pending reset.
    pub fn next_reset_deadline(&self) -> Instant {
        self.window.borrow().ends_at
    }

    /// Wall-clock time of the pending reset.
    pub fn next_reset_at(&self) -> SystemTime {
        self.wall_time(self.next_reset_deadline())
    }

    pub fn wall_time(&self, at: Instant) -> SystemTime {
        self.anchor.wall_time(at)
    }

    /// Receiver that is notified whenever a new window opens.
    pub fn subscribe(&self) -> watch::Receiver<Window> {
        self.window.clone()
    }

    /// Cancel the pending reset and wait for the task to exit. A reset that is
    /// already clearing the store is allowed to finish.
    pub async fn shutdown(&self) {
        self.stop.send_replace(true);

        let handle = self
            .task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();

        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                warn!(error = %err, "Window scheduler task ended abnormally");
            }
        }
    }
}

impl Drop for WindowScheduler {
    fn drop(&mut self) {
        let handle = self
            .task
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

async fn run_scheduler(
    store: Arc<dyn CounterStore>,
    interval: Duration,
    metrics: MetricsCollector,
    window_tx: watch::Sender<Window>,
    mut stop: watch::Receiver<bool>,
) {
    let mut state = SchedulerState::Armed(window_tx.borrow().ends_at);

    loop {
        state = match state {
            SchedulerState::Armed(deadline) => {
                tokio::select! {
                    _ = sleep_until(deadline) => SchedulerState::Resetting(deadline),
                    _ = stop.changed() => {
                        debug!("Window scheduler stopped");
                        return;
                    }
                }
            }
            SchedulerState::Resetting(deadline) => {
                match store.clear_all().await {
                    Ok(()) => metrics.record_reset(true),
                    Err(err) => {
                        let err = ThrottlerError::SchedulerResetFailed(err.to_string());
                        error!(error = %err, "Counter store was not cleared; keeping previous totals");
                        metrics.record_reset(false);
                    }
                }

                // Anchor on the scheduled deadline, not on when the timer fired.
                let mut started_at = deadline;
                let mut ends_at = deadline + interval;
                let mut skipped = 0u64;
                let now = Instant::now();
                while ends_at <= now {
                    started_at = ends_at;
                    ends_at += interval;
                    skipped += 1;
                }
                if skipped > 0 {
                    warn!(skipped, "Reset ran late; skipping windows that already elapsed");
                }

                window_tx.send_modify(|window| {
                    window.sequence += 1 + skipped;
                    window.started_at = started_at;
                    window.ends_at = ends_at;
                });

                info!(
                    sequence = window_tx.borrow().sequence,
                    "Rate limit window reset"
                );

                SchedulerState::Armed(ends_at)
            }
        };
    }
}

//! Reconciling poll task.
//!
//! Every client runs one of these regardless of push health: it re-fetches
//! feed/unread state on a coarse interval while push is healthy and a fine
//! interval while it is not, bounding the staleness window even under total
//! push failure. Consistency is therefore "eventually consistent within one
//! fine-poll interval", not "real time".
//!
//! A tick that would overlap a still-in-flight fetch is skipped, never
//! queued. Dropping the handle cancels the task without leaking the timer.

use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Poll interval while the push channel is healthy.
pub const HEALTHY_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Poll interval while the push channel is down.
pub const DEGRADED_POLL_INTERVAL: Duration = Duration::from_secs(10);

fn make_interval(healthy: bool) -> Interval {
    let period = if healthy {
        HEALTHY_POLL_INTERVAL
    } else {
        DEGRADED_POLL_INTERVAL
    };
    // First tick one full period out, and overlapping ticks are skipped
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

/// Handle to a running reconciling poll task.
pub struct ReconcilePoller {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ReconcilePoller {
    /// Spawn the poll task. `health` carries the push channel's state
    /// (true = healthy); `fetch` is the reconciling fetch of feed/unread
    /// state.
    pub fn spawn<F, Fut>(mut health: watch::Receiver<bool>, mut fetch: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let task = tokio::spawn(async move {
            let mut healthy = *health.borrow();
            let mut tick = make_interval(healthy);
            let mut watch_open = true;

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,

                    changed = health.changed(), if watch_open => {
                        match changed {
                            Ok(()) => {
                                let now_healthy = *health.borrow_and_update();
                                if now_healthy != healthy {
                                    healthy = now_healthy;
                                    debug!(healthy, "poll cadence changed");
                                    tick = make_interval(healthy);
                                }
                            }
                            // Sender dropped — keep the current cadence
                            Err(_) => watch_open = false,
                        }
                    }

                    _ = tick.tick() => {
                        // Awaiting inline means a slow fetch blocks the next
                        // tick; Skip collapses the backlog instead of queueing
                        fetch().await;
                    }
                }
            }
            debug!("reconcile poller stopped");
        });

        Self { cancel, task: Some(task) }
    }

    /// Stop the task and wait for it to finish.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, |t| t.is_finished())
    }
}

impl Drop for ReconcilePoller {
    fn drop(&mut self) {
        // Dropping the handle must not leak the timer task
        self.cancel.cancel();
    }
}

// ============================================================================
// Tests
// ============================================================================

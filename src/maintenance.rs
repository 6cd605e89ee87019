//! Periodic background sweeps.
//!
//! The rate limiter's bucket store and the deduplicator's result cache both
//! accumulate idle entries. Each can hand out a [`SweepHandle`] for a task
//! that prunes them on a fixed interval. The task holds only a weak
//! reference to its owner, so dropping the owner ends the task, and
//! dropping or stopping the handle cancels it.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Stop handle for a background sweep task.
///
/// Dropping the handle cancels the task.
#[derive(Debug)]
pub struct SweepHandle {
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl SweepHandle {
    /// Ask the task to stop at its next suspension point.
    pub fn stop(&self) {
        self.token.cancel();
    }

    /// Stop the task and wait for it to finish.
    pub async fn shutdown(mut self) {
        self.token.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled() || self.task.as_ref().is_none_or(JoinHandle::is_finished)
    }
}

impl Drop for SweepHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Spawn a task that calls `sweep` every `interval`.
///
/// `sweep` returns the number of entries it removed, or `None` once its
/// owner is gone, which ends the task.
///
/// # Panics
///
/// Requires a tokio runtime context.
pub(crate) fn spawn_periodic<F>(name: &'static str, interval: Duration, mut sweep: F) -> SweepHandle
where
    F: FnMut() -> Option<usize> + Send + 'static,
{
    let token = CancellationToken::new();
    let child = token.clone();
    let period = interval.max(Duration::from_millis(1));

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; skip it.
        ticker.tick().await;
        loop {
            tokio::select! {
                () = child.cancelled() => break,
                _ = ticker.tick() => match sweep() {
                    Some(0) => {}
                    Some(removed) => debug!(sweep = name, removed, "swept idle entries"),
                    None => break,
                },
            }
        }
        debug!(sweep = name, "sweep task stopped");
    });

    SweepHandle {
        token,
        task: Some(task),
    }
}

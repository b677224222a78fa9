//! Report-interval hand-off from the sample queue to the job queue.
//!
//! Every tick drains all queued snapshots and offers each to the job queue
//! without waiting. Whatever does not fit is dropped and counted, so a
//! saturated worker pool never stalls the report timer.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::queue::{QueueReceiver, QueueSender, TryPushError};

/// Outcome of one dispatch cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub forwarded: usize,
    pub dropped: usize,
}

/// Move everything currently in `samples` into `jobs`, dropping overflow.
pub async fn dispatch_cycle<T>(samples: &QueueReceiver<T>, jobs: &QueueSender<T>) -> DispatchStats {
    let mut stats = DispatchStats::default();
    for item in samples.drain().await {
        match jobs.try_push(item) {
            Ok(()) => stats.forwarded += 1,
            Err(TryPushError::Full(_)) | Err(TryPushError::Closed(_)) => stats.dropped += 1,
        }
    }
    if stats.dropped > 0 {
        warn!(
            dropped = stats.dropped,
            forwarded = stats.forwarded,
            "job queue saturated, snapshots dropped"
        );
    }
    stats
}

pub struct Dispatcher<T> {
    samples: QueueReceiver<T>,
    jobs: QueueSender<T>,
    interval: Duration,
}

impl<T: Send + 'static> Dispatcher<T> {
    pub fn new(samples: QueueReceiver<T>, jobs: QueueSender<T>, interval: Duration) -> Self {
        Self {
            samples,
            jobs,
            interval,
        }
    }

    /// Dispatch every `interval` until shutdown.
    ///
    /// The job sender is dropped on return, which closes the job queue once
    /// no other sender is alive.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_ms = self.interval.as_millis() as u64, "dispatcher starting");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    let stats = dispatch_cycle(&self.samples, &self.jobs).await;
                    debug!(forwarded = stats.forwarded, dropped = stats.dropped, "dispatch tick");
                }
                _ = shutdown.changed() => break,
            }
        }

        info!("dispatcher shutting down");
    }
}

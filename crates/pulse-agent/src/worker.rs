//! Fixed-size pool of senders draining the job queue.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::queue::QueueReceiver;
use crate::sampler::Snapshot;
use crate::transport::Transport;

/// Pool size used when the configured rate limit is below one.
pub const DEFAULT_WORKERS: usize = 3;

/// Map a configured rate limit onto a pool size.
pub fn pool_size(rate_limit: i64) -> usize {
    if rate_limit < 1 {
        DEFAULT_WORKERS
    } else {
        usize::try_from(rate_limit).unwrap_or(DEFAULT_WORKERS)
    }
}

/// Per-worker totals, returned when the worker exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub sent: usize,
    pub failed: usize,
}

impl std::ops::Add for WorkerStats {
    type Output = WorkerStats;

    fn add(self, rhs: WorkerStats) -> WorkerStats {
        WorkerStats {
            sent: self.sent + rhs.sent,
            failed: self.failed + rhs.failed,
        }
    }
}

pub struct WorkerPool {
    handles: Vec<JoinHandle<WorkerStats>>,
}

impl WorkerPool {
    /// Spawn `size` workers sharing `jobs`.
    pub fn spawn(size: usize, jobs: QueueReceiver<Snapshot>, transport: Arc<dyn Transport>) -> Self {
        let handles = (1..=size.max(1))
            .map(|id| tokio::spawn(worker_loop(id, jobs.clone(), transport.clone())))
            .collect();
        Self { handles }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for every worker; they exit once the job queue is closed and empty.
    pub async fn join(self) -> WorkerStats {
        let mut total = WorkerStats::default();
        for handle in self.handles {
            match handle.await {
                Ok(stats) => total = total + stats,
                Err(e) => error!(error = %e, "worker task failed"),
            }
        }
        total
    }
}

async fn worker_loop(
    id: usize,
    jobs: QueueReceiver<Snapshot>,
    transport: Arc<dyn Transport>,
) -> WorkerStats {
    info!(worker = id, "worker starting");
    let mut stats = WorkerStats::default();

    while let Some(snapshot) = jobs.recv().await {
        let records = snapshot.into_records();
        match transport.send(&records).await {
            Ok(()) => {
                stats.sent += 1;
                debug!(worker = id, metrics = records.len(), "batch sent");
            }
            Err(e) => {
                stats.failed += 1;
                error!(worker = id, error = %e, "failed to send metrics");
            }
        }
    }

    info!(worker = id, sent = stats.sent, failed = stats.failed, "worker stopped");
    stats
}

//! Agent orchestrator.
//!
//! Wires the pipeline and owns its tasks:
//!
//! ```text
//! Sampler ──push──► sample queue ──► Dispatcher ──try_push──► job queue ──► N workers ──► Transport
//! ```
//!
//! Both queues hold `N` items, where `N` is the worker count. Shutdown
//! stops the sampler and dispatcher; the job queue then closes and the
//! workers drain it before [`Agent::run`] returns.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info};

use crate::dispatcher::Dispatcher;
use crate::queue;
use crate::sampler::{HostProbe, Sampler, SysinfoProbe};
use crate::transport::Transport;
use crate::worker::{WorkerPool, WorkerStats, pool_size};

/// Pipeline timing and concurrency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentSettings {
    pub poll_interval: Duration,
    pub report_interval: Duration,
    /// Configured rate limit; values below one select the default pool size.
    pub rate_limit: i64,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            report_interval: Duration::from_secs(10),
            rate_limit: 3,
        }
    }
}

pub struct Agent<P = SysinfoProbe> {
    settings: AgentSettings,
    sampler: Sampler<P>,
    transport: Arc<dyn Transport>,
}

impl Agent<SysinfoProbe> {
    pub fn new(settings: AgentSettings, transport: Arc<dyn Transport>) -> Self {
        Self::with_sampler(settings, Sampler::new(), transport)
    }
}

impl<P: HostProbe + 'static> Agent<P> {
    pub fn with_sampler(
        settings: AgentSettings,
        sampler: Sampler<P>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            settings,
            sampler,
            transport,
        }
    }

    /// Run until `shutdown` flips, then wait for every task to finish.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> WorkerStats {
        let workers = pool_size(self.settings.rate_limit);
        info!(
            workers,
            poll_ms = self.settings.poll_interval.as_millis() as u64,
            report_ms = self.settings.report_interval.as_millis() as u64,
            "agent starting"
        );

        let (sample_tx, sample_rx) = queue::bounded(workers);
        let (job_tx, job_rx) = queue::bounded(workers);

        let sampler = tokio::spawn(self.sampler.run(
            self.settings.poll_interval,
            sample_tx,
            shutdown.clone(),
        ));
        let dispatcher = tokio::spawn(
            Dispatcher::new(sample_rx, job_tx, self.settings.report_interval).run(shutdown),
        );
        let pool = WorkerPool::spawn(workers, job_rx, self.transport);

        if let Err(e) = sampler.await {
            error!(error = %e, "sampler task failed");
        }
        if let Err(e) = dispatcher.await {
            error!(error = %e, "dispatcher task failed");
        }
        let stats = pool.join().await;

        info!(sent = stats.sent, failed = stats.failed, "agent stopped");
        stats
    }
}

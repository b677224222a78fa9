//! Periodic metric sampling.
//!
//! One pass produces a [`Snapshot`] made of two halves:
//!
//! - runtime gauges plus the `PollCount` counter, always present
//! - host statistics from a [`HostProbe`], each part omitted on failure
//!
//! A failed host read is logged and left out; it never fails the pass.

use std::time::{Duration, Instant};

use pulse_core::{Counter, Gauge, MetricRecord};
use sysinfo::System;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::queue::QueueSender;

pub const RANDOM_VALUE: &str = "RandomValue";
pub const UPTIME: &str = "Uptime";
pub const RUNTIME_WORKERS: &str = "RuntimeWorkers";
pub const RUNTIME_ALIVE_TASKS: &str = "RuntimeAliveTasks";
pub const POLL_COUNT: &str = "PollCount";
pub const TOTAL_MEMORY: &str = "TotalMemory";
pub const FREE_MEMORY: &str = "FreeMemory";
pub const CPU_UTILIZATION_PREFIX: &str = "CPUutilization";

/// All values produced by one sampling pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub gauges: Vec<Gauge>,
    pub counters: Vec<Counter>,
}

impl Snapshot {
    fn gauge(&mut self, name: impl Into<String>, value: f64) {
        self.gauges.push(Gauge {
            name: name.into(),
            value,
        });
    }

    pub fn len(&self) -> usize {
        self.gauges.len() + self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get_gauge(&self, name: &str) -> Option<f64> {
        self.gauges.iter().find(|g| g.name == name).map(|g| g.value)
    }

    pub fn get_counter(&self, name: &str) -> Option<i64> {
        self.counters.iter().find(|c| c.name == name).map(|c| c.value)
    }

    /// Wire batch for this snapshot, gauges first.
    pub fn into_records(self) -> Vec<MetricRecord> {
        self.gauges
            .iter()
            .map(MetricRecord::from)
            .chain(self.counters.iter().map(MetricRecord::from))
            .collect()
    }
}

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("{0} statistics unavailable")]
    Unavailable(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryStats {
    pub total: u64,
    pub free: u64,
}

/// Source of host statistics.
pub trait HostProbe: Send {
    fn memory(&mut self) -> Result<MemoryStats, ProbeError>;

    /// Utilization percentage per logical CPU.
    fn cpu_utilization(&mut self) -> Result<Vec<f64>, ProbeError>;
}

/// Host statistics via `sysinfo`.
pub struct SysinfoProbe {
    system: System,
}

impl SysinfoProbe {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl HostProbe for SysinfoProbe {
    fn memory(&mut self) -> Result<MemoryStats, ProbeError> {
        self.system.refresh_memory();
        let total = self.system.total_memory();
        if total == 0 {
            return Err(ProbeError::Unavailable("memory"));
        }
        Ok(MemoryStats {
            total,
            free: self.system.free_memory(),
        })
    }

    fn cpu_utilization(&mut self) -> Result<Vec<f64>, ProbeError> {
        self.system.refresh_cpu_all();
        let cpus = self.system.cpus();
        if cpus.is_empty() {
            return Err(ProbeError::Unavailable("cpu"));
        }
        Ok(cpus.iter().map(|cpu| f64::from(cpu.cpu_usage())).collect())
    }
}

/// Produces snapshots and owns the local poll counter.
pub struct Sampler<P = SysinfoProbe> {
    probe: P,
    started: Instant,
    poll_count: i64,
}

impl Sampler<SysinfoProbe> {
    pub fn new() -> Self {
        Self::with_probe(SysinfoProbe::new())
    }
}

impl Default for Sampler<SysinfoProbe> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: HostProbe> Sampler<P> {
    pub fn with_probe(probe: P) -> Self {
        Self {
            probe,
            started: Instant::now(),
            poll_count: 0,
        }
    }

    /// One sampling pass.
    pub fn sample(&mut self) -> Snapshot {
        self.poll_count += 1;
        let mut snapshot = Snapshot::default();

        snapshot.gauge(RANDOM_VALUE, rand::random::<f64>());
        snapshot.gauge(UPTIME, self.started.elapsed().as_secs_f64());
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let metrics = handle.metrics();
            snapshot.gauge(RUNTIME_WORKERS, metrics.num_workers() as f64);
            snapshot.gauge(RUNTIME_ALIVE_TASKS, metrics.num_alive_tasks() as f64);
        }
        snapshot.counters.push(Counter {
            name: POLL_COUNT.to_string(),
            value: self.poll_count,
        });

        match self.probe.memory() {
            Ok(mem) => {
                snapshot.gauge(TOTAL_MEMORY, mem.total as f64);
                snapshot.gauge(FREE_MEMORY, mem.free as f64);
            }
            Err(e) => error!(sub_sample = "memory", error = %e, "host sub-sample failed"),
        }
        match self.probe.cpu_utilization() {
            Ok(per_cpu) => {
                for (i, usage) in per_cpu.into_iter().enumerate() {
                    snapshot.gauge(format!("{CPU_UTILIZATION_PREFIX}{}", i + 1), usage);
                }
            }
            Err(e) => error!(sub_sample = "cpu", error = %e, "host sub-sample failed"),
        }

        snapshot
    }
}

impl<P: HostProbe + 'static> Sampler<P> {
    /// Sample every `interval` into `queue` until shutdown.
    ///
    /// A full queue blocks the sampler, but shutdown still interrupts it.
    pub async fn run(
        mut self,
        interval: Duration,
        queue: QueueSender<Snapshot>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(interval_ms = interval.as_millis() as u64, "sampler starting");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    let snapshot = self.sample();
                    debug!(metrics = snapshot.len(), poll_count = self.poll_count, "sampled");
                    tokio::select! {
                        pushed = queue.push(snapshot) => {
                            if pushed.is_err() {
                                info!("sample queue closed, sampler stopping");
                                return;
                            }
                        }
                        _ = shutdown.changed() => break,
                    }
                }
                _ = shutdown.changed() => break,
            }
        }

        info!("sampler shutting down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Probe with scripted results.
    struct FakeProbe {
        memory: Option<MemoryStats>,
        cpus: Option<Vec<f64>>,
    }

    impl HostProbe for FakeProbe {
        fn memory(&mut self) -> Result<MemoryStats, ProbeError> {
            self.memory.ok_or(ProbeError::Unavailable("memory"))
        }

        fn cpu_utilization(&mut self) -> Result<Vec<f64>, ProbeError> {
            self.cpus.clone().ok_or(ProbeError::Unavailable("cpu"))
        }
    }

    fn healthy() -> FakeProbe {
        FakeProbe {
            memory: Some(MemoryStats {
                total: 1000,
                free: 400,
            }),
            cpus: Some(vec![12.5, 50.0]),
        }
    }

    #[test]
    fn poll_count_starts_at_one_and_increments() {
        let mut sampler = Sampler::with_probe(healthy());
        assert_eq!(sampler.sample().get_counter(POLL_COUNT), Some(1));
        assert_eq!(sampler.sample().get_counter(POLL_COUNT), Some(2));
        assert_eq!(sampler.sample().get_counter(POLL_COUNT), Some(3));
    }

    #[test]
    fn host_stats_are_included() {
        let snapshot = Sampler::with_probe(healthy()).sample();
        assert_eq!(snapshot.get_gauge(TOTAL_MEMORY), Some(1000.0));
        assert_eq!(snapshot.get_gauge(FREE_MEMORY), Some(400.0));
        assert_eq!(snapshot.get_gauge("CPUutilization1"), Some(12.5));
        assert_eq!(snapshot.get_gauge("CPUutilization2"), Some(50.0));

        let random = snapshot.get_gauge(RANDOM_VALUE).unwrap();
        assert!((0.0..1.0).contains(&random));
    }

    #[test]
    fn failed_sub_samples_are_omitted_not_fatal() {
        let mut sampler = Sampler::with_probe(FakeProbe {
            memory: None,
            cpus: Some(vec![1.0]),
        });
        let snapshot = sampler.sample();
        assert_eq!(snapshot.get_gauge(TOTAL_MEMORY), None);
        assert_eq!(snapshot.get_gauge(FREE_MEMORY), None);
        assert_eq!(snapshot.get_gauge("CPUutilization1"), Some(1.0));
        assert_eq!(snapshot.get_counter(POLL_COUNT), Some(1));

        let mut sampler = Sampler::with_probe(FakeProbe {
            memory: None,
            cpus: None,
        });
        let snapshot = sampler.sample();
        assert!(snapshot.get_gauge(RANDOM_VALUE).is_some());
        assert!(
            !snapshot
                .gauges
                .iter()
                .any(|g| g.name.starts_with(CPU_UTILIZATION_PREFIX))
        );
    }

    #[test]
    fn runtime_gauges_only_inside_a_runtime() {
        let outside = Sampler::with_probe(healthy()).sample();
        assert_eq!(outside.get_gauge(RUNTIME_WORKERS), None);

        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let inside = rt.block_on(async { Sampler::with_probe(healthy()).sample() });
        assert_eq!(inside.get_gauge(RUNTIME_WORKERS), Some(1.0));
        assert!(inside.get_gauge(RUNTIME_ALIVE_TASKS).is_some());
    }

    #[test]
    fn records_carry_one_field_each() {
        let records = Sampler::with_probe(healthy()).sample().into_records();
        for record in &records {
            assert!(record.validate().is_ok(), "{record:?}");
        }
        let poll = records.iter().find(|r| r.id == POLL_COUNT).unwrap();
        assert_eq!(poll.delta, Some(1));
        assert_eq!(poll.value, None);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let (tx, rx) = crate::queue::bounded(8);
        let (stop, shutdown) = watch::channel(false);
        let task = tokio::spawn(Sampler::with_probe(healthy()).run(
            Duration::from_millis(5),
            tx,
            shutdown,
        ));

        let first = rx.recv().await.unwrap();
        assert_eq!(first.get_counter(POLL_COUNT), Some(1));

        stop.send(true).unwrap();
        task.await.unwrap();
    }
}

//! Aggregation service: the validated entry point to a [`MetricStore`].
//!
//! Every write first reads the current value. `NotFound` selects the create
//! branch; a stored value selects the accumulate branch. The store applies
//! the write atomically, so a concurrent creator winning the race only shows
//! up as a branch mismatch in the debug log.

use std::sync::Arc;

use pulse_core::{Counter, Gauge, MetricKind, MetricRecord, Update, ValidationError};
use pulse_store::{Branch, MetricSet, MetricStore, StoreError, Written};
use thiserror::Error;
use tracing::debug;

/// Errors surfaced to the HTTP and RPC boundaries.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{kind} metric {name:?} not found")]
    NotFound { kind: MetricKind, name: String },

    #[error("store write failed: {0}")]
    Write(StoreError),

    #[error("store read failed: {0}")]
    Read(StoreError),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

impl ServiceError {
    fn read(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { kind, name } => ServiceError::NotFound { kind, name },
            other => ServiceError::Read(other),
        }
    }
}

/// Stateless facade over the configured store.
#[derive(Clone)]
pub struct AggregationService {
    store: Arc<dyn MetricStore>,
}

impl AggregationService {
    pub fn new(store: Arc<dyn MetricStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn MetricStore> {
        &self.store
    }

    /// Replace a gauge, creating it on first write.
    pub async fn update_gauge(&self, name: &str, value: f64) -> ServiceResult<Written<f64>> {
        if name.is_empty() {
            return Err(ValidationError::EmptyName.into());
        }
        let expected = branch_for(self.store.get_gauge(name).await)?;
        let written = self
            .store
            .create_or_update_gauge(name, value)
            .await
            .map_err(ServiceError::Write)?;
        log_branch(MetricKind::Gauge, name, expected, written.branch);
        Ok(written)
    }

    /// Add `delta` to a counter, creating it with `delta` on first write.
    pub async fn update_counter(&self, name: &str, delta: i64) -> ServiceResult<Written<i64>> {
        if name.is_empty() {
            return Err(ValidationError::EmptyName.into());
        }
        let expected = branch_for(self.store.get_counter(name).await)?;
        let written = self
            .store
            .create_or_update_counter(name, delta)
            .await
            .map_err(ServiceError::Write)?;
        log_branch(MetricKind::Counter, name, expected, written.branch);
        Ok(written)
    }

    /// Apply a validated update and return the stored metric as a record.
    pub async fn apply(&self, update: Update) -> ServiceResult<MetricRecord> {
        match update {
            Update::Gauge { name, value } => {
                let written = self.update_gauge(&name, value).await?;
                Ok(MetricRecord::gauge(name, written.value))
            }
            Update::Counter { name, delta } => {
                let written = self.update_counter(&name, delta).await?;
                Ok(MetricRecord::counter(name, written.value))
            }
        }
    }

    /// Validate and apply one wire record.
    pub async fn update_record(&self, record: &MetricRecord) -> ServiceResult<MetricRecord> {
        let update = record.validate()?;
        self.apply(update).await
    }

    /// Validate the whole batch, then apply it in order.
    ///
    /// Nothing is written when any record is invalid. A store failure stops
    /// the batch; records before it stay applied.
    pub async fn update_batch(&self, records: &[MetricRecord]) -> ServiceResult<usize> {
        let updates = records
            .iter()
            .map(MetricRecord::validate)
            .collect::<Result<Vec<_>, _>>()?;
        let count = updates.len();
        for update in updates {
            self.apply(update).await?;
        }
        debug!(count, "batch applied");
        Ok(count)
    }

    pub async fn get_gauge(&self, name: &str) -> ServiceResult<f64> {
        self.store.get_gauge(name).await.map_err(ServiceError::read)
    }

    pub async fn get_counter(&self, name: &str) -> ServiceResult<i64> {
        self.store.get_counter(name).await.map_err(ServiceError::read)
    }

    /// Current value of `(kind, name)` as a wire record.
    pub async fn get_record(&self, kind: MetricKind, name: &str) -> ServiceResult<MetricRecord> {
        match kind {
            MetricKind::Gauge => Ok(MetricRecord::gauge(name, self.get_gauge(name).await?)),
            MetricKind::Counter => Ok(MetricRecord::counter(name, self.get_counter(name).await?)),
        }
    }

    /// Every stored metric; gauges sorted by name, counters in store order.
    pub async fn list_all(&self) -> ServiceResult<MetricSet> {
        let mut set = self.store.list_all().await.map_err(ServiceError::Read)?;
        set.gauges.sort_by(|a: &Gauge, b: &Gauge| a.name.cmp(&b.name));
        Ok(set)
    }

    pub async fn ping(&self) -> ServiceResult<()> {
        self.store.ping().await.map_err(ServiceError::Read)
    }
}

fn branch_for<T>(current: Result<T, StoreError>) -> ServiceResult<Branch> {
    match current {
        Ok(_) => Ok(Branch::Update),
        Err(e) if e.is_not_found() => Ok(Branch::Create),
        Err(e) => Err(ServiceError::Read(e)),
    }
}

fn log_branch(kind: MetricKind, name: &str, expected: Branch, actual: Branch) {
    if expected == actual {
        debug!(%kind, name, branch = ?actual, "metric written");
    } else {
        debug!(%kind, name, ?expected, ?actual, "metric written by a concurrent creator first");
    }
}

/// Render one counter for text output.
pub(crate) fn counter_line(counter: &Counter) -> String {
    format!("{}: {}", counter.name, counter.value)
}

/// Render one gauge for text output.
pub(crate) fn gauge_line(gauge: &Gauge) -> String {
    format!("{}: {}", gauge.name, gauge.value)
}

//! The store capability shared by every backend.

use async_trait::async_trait;
use pulse_core::{Counter, Gauge};

use crate::error::StoreResult;

/// Which branch a write took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Branch {
    /// The key was absent and has been inserted.
    Create,
    /// The key existed; gauge replaced or counter accumulated.
    Update,
}

/// Outcome of a create-or-update: the stored value after the write.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Written<T> {
    pub value: T,
    pub branch: Branch,
}

/// Every metric currently held. Ordering is backend-defined.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricSet {
    pub gauges: Vec<Gauge>,
    pub counters: Vec<Counter>,
}

/// Storage contract implemented identically by all backends.
///
/// `get_*` return [`StoreError::NotFound`](crate::StoreError::NotFound) for
/// keys that were never written. Writes are atomic per key: concurrent
/// counter writes on one name never lose a delta.
#[async_trait]
pub trait MetricStore: Send + Sync {
    async fn get_gauge(&self, name: &str) -> StoreResult<f64>;

    async fn get_counter(&self, name: &str) -> StoreResult<i64>;

    /// Insert `value` if absent, otherwise replace it.
    async fn create_or_update_gauge(&self, name: &str, value: f64) -> StoreResult<Written<f64>>;

    /// Insert `delta` if absent, otherwise store `old + delta`.
    async fn create_or_update_counter(&self, name: &str, delta: i64)
    -> StoreResult<Written<i64>>;

    async fn list_all(&self) -> StoreResult<MetricSet>;

    async fn ping(&self) -> StoreResult<()>;

    /// Release resources. Durable backends flush one final time.
    async fn close(&self) -> StoreResult<()>;
}

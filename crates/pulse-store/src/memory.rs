//! MemoryStore: volatile map-backed store.
//!
//! One `tokio::sync::Mutex` guards both maps. Every read-modify-write runs
//! with the lock held, which serialises writers of the same key and, as a
//! consequence, writers of unrelated keys too.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use pulse_core::{Counter, Gauge, MetricKind};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::store::{Branch, MetricSet, MetricStore, Written};

/// The full metric state, cloneable for snapshots.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricMaps {
    pub gauges: HashMap<String, f64>,
    pub counters: HashMap<String, i64>,
}

impl MetricMaps {
    pub fn len(&self) -> usize {
        self.gauges.len() + self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Thread-safe in-memory store. Cloning shares the same maps.
#[derive(Clone, Default)]
pub struct MemoryStore {
    maps: Arc<Mutex<MetricMaps>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from previously persisted state.
    pub fn with_maps(maps: MetricMaps) -> Self {
        Self {
            maps: Arc::new(Mutex::new(maps)),
        }
    }

    /// Copy of the current state, taken under the lock.
    pub async fn snapshot(&self) -> MetricMaps {
        self.maps.lock().await.clone()
    }
}

#[async_trait]
impl MetricStore for MemoryStore {
    async fn get_gauge(&self, name: &str) -> StoreResult<f64> {
        let maps = self.maps.lock().await;
        maps.gauges
            .get(name)
            .copied()
            .ok_or_else(|| StoreError::not_found(MetricKind::Gauge, name))
    }

    async fn get_counter(&self, name: &str) -> StoreResult<i64> {
        let maps = self.maps.lock().await;
        maps.counters
            .get(name)
            .copied()
            .ok_or_else(|| StoreError::not_found(MetricKind::Counter, name))
    }

    async fn create_or_update_gauge(&self, name: &str, value: f64) -> StoreResult<Written<f64>> {
        let mut maps = self.maps.lock().await;
        let branch = match maps.gauges.insert(name.to_string(), value) {
            Some(_) => Branch::Update,
            None => Branch::Create,
        };
        debug!(%name, value, ?branch, "gauge written");
        Ok(Written { value, branch })
    }

    async fn create_or_update_counter(
        &self,
        name: &str,
        delta: i64,
    ) -> StoreResult<Written<i64>> {
        let mut maps = self.maps.lock().await;
        let written = match maps.counters.get_mut(name) {
            Some(current) => {
                *current = current.checked_add(delta).ok_or_else(|| StoreError::Overflow {
                    name: name.to_string(),
                })?;
                Written {
                    value: *current,
                    branch: Branch::Update,
                }
            }
            None => {
                maps.counters.insert(name.to_string(), delta);
                Written {
                    value: delta,
                    branch: Branch::Create,
                }
            }
        };
        debug!(%name, delta, value = written.value, branch = ?written.branch, "counter written");
        Ok(written)
    }

    async fn list_all(&self) -> StoreResult<MetricSet> {
        let maps = self.maps.lock().await;
        Ok(MetricSet {
            gauges: maps
                .gauges
                .iter()
                .map(|(name, value)| Gauge {
                    name: name.clone(),
                    value: *value,
                })
                .collect(),
            counters: maps
                .counters
                .iter()
                .map(|(name, value)| Counter {
                    name: name.clone(),
                    value: *value,
                })
                .collect(),
        })
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn close(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_never_written_is_not_found() {
        let store = MemoryStore::new();
        let err = store.get_gauge("never_written").await.unwrap_err();
        assert!(err.is_not_found());
        assert!(store.get_counter("never_written").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn counter_accumulates() {
        let store = MemoryStore::new();
        for _ in 0..3 {
            store.create_or_update_counter("requests", 1).await.unwrap();
        }
        assert_eq!(store.get_counter("requests").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn gauge_last_write_wins() {
        let store = MemoryStore::new();
        store.create_or_update_gauge("temp", 1.2).await.unwrap();
        store.create_or_update_gauge("temp", 3.4).await.unwrap();
        assert_eq!(store.get_gauge("temp").await.unwrap(), 3.4);
    }

    #[tokio::test]
    async fn first_write_takes_create_branch() {
        let store = MemoryStore::new();
        let first = store.create_or_update_counter("hits", 5).await.unwrap();
        assert_eq!(first, Written { value: 5, branch: Branch::Create });
        let second = store.create_or_update_counter("hits", 2).await.unwrap();
        assert_eq!(second, Written { value: 7, branch: Branch::Update });
    }

    #[tokio::test]
    async fn gauge_and_counter_namespaces_are_separate() {
        let store = MemoryStore::new();
        store.create_or_update_gauge("x", 1.5).await.unwrap();
        store.create_or_update_counter("x", 4).await.unwrap();
        assert_eq!(store.get_gauge("x").await.unwrap(), 1.5);
        assert_eq!(store.get_counter("x").await.unwrap(), 4);
        assert_eq!(store.snapshot().await.len(), 2);
    }

    #[tokio::test]
    async fn counter_overflow_is_rejected_and_value_kept() {
        let store = MemoryStore::new();
        store.create_or_update_counter("big", i64::MAX).await.unwrap();
        let err = store.create_or_update_counter("big", 1).await.unwrap_err();
        assert!(matches!(err, StoreError::Overflow { .. }));
        assert_eq!(store.get_counter("big").await.unwrap(), i64::MAX);
    }

    #[tokio::test]
    async fn concurrent_counter_writes_do_not_lose_updates() {
        let store = MemoryStore::new();
        let mut handles = Vec::new();
        for _ in 0..5 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.create_or_update_counter("hits", 1).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(store.get_counter("hits").await.unwrap(), 5);
    }
}

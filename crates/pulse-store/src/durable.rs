//! DurableMemoryStore: MemoryStore plus a JSON backup document.
//!
//! Two flush modes:
//! - synchronous (`interval == 0`): the document is rewritten after every
//!   write, once the map lock has been released;
//! - periodic: a background task owned by the store flushes every
//!   `interval` until [`MetricStore::close`] stops it.
//!
//! Backup failures are logged and never fail the in-memory write.
//! Flushes are serialised, and each takes its snapshot while holding the
//! flush lock, so the document on disk never goes backwards in time.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::backup::BackupFile;
use crate::error::StoreResult;
use crate::memory::{MemoryStore, MetricMaps};
use crate::store::{MetricSet, MetricStore, Written};

/// Snapshot-and-write, shared by the store and its background task.
#[derive(Clone)]
struct Flusher {
    memory: MemoryStore,
    backup: BackupFile,
    lock: Arc<Mutex<()>>,
}

impl Flusher {
    async fn flush(&self) -> StoreResult<()> {
        let _guard = self.lock.lock().await;
        let snapshot = self.memory.snapshot().await;
        self.backup.write(&snapshot).await
    }

    async fn flush_logged(&self) {
        if let Err(e) = self.flush().await {
            error!(error = %e, path = %self.backup.path().display(), "backup failed");
        }
    }

    async fn run(self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = interval.as_secs(), "backup flusher started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    self.flush_logged().await;
                }
                _ = shutdown.changed() => {
                    debug!("backup flusher shutting down");
                    break;
                }
            }
        }
    }
}

struct Background {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

pub struct DurableMemoryStore {
    flusher: Flusher,
    synchronous: bool,
    background: Mutex<Option<Background>>,
}

impl DurableMemoryStore {
    /// Open the store, optionally pre-populating it from `path`.
    ///
    /// A missing or unreadable backup is logged and the store starts empty.
    pub async fn open(path: PathBuf, interval: Duration, restore: bool) -> Self {
        let backup = BackupFile::new(path);
        let maps = if restore {
            load_or_empty(&backup).await
        } else {
            MetricMaps::default()
        };

        let flusher = Flusher {
            memory: MemoryStore::with_maps(maps),
            backup,
            lock: Arc::new(Mutex::new(())),
        };

        let synchronous = interval.is_zero();
        let background = if synchronous {
            info!("backup runs synchronously after every write");
            None
        } else {
            let (shutdown, rx) = watch::channel(false);
            let handle = tokio::spawn(flusher.clone().run(interval, rx));
            Some(Background { shutdown, handle })
        };

        Self {
            flusher,
            synchronous,
            background: Mutex::new(background),
        }
    }

    /// Write the backup document now.
    pub async fn flush(&self) -> StoreResult<()> {
        self.flusher.flush().await
    }

    async fn after_write(&self) {
        if self.synchronous {
            self.flusher.flush_logged().await;
        }
    }
}

async fn load_or_empty(backup: &BackupFile) -> MetricMaps {
    match backup.load().await {
        Ok(Some(maps)) => {
            info!(
                path = %backup.path().display(),
                gauges = maps.gauges.len(),
                counters = maps.counters.len(),
                "restored metrics from backup"
            );
            maps
        }
        Ok(None) => {
            info!(path = %backup.path().display(), "no backup to restore");
            MetricMaps::default()
        }
        Err(e) => {
            warn!(error = %e, "backup load failed, starting empty");
            MetricMaps::default()
        }
    }
}

#[async_trait]
impl MetricStore for DurableMemoryStore {
    async fn get_gauge(&self, name: &str) -> StoreResult<f64> {
        self.flusher.memory.get_gauge(name).await
    }

    async fn get_counter(&self, name: &str) -> StoreResult<i64> {
        self.flusher.memory.get_counter(name).await
    }

    async fn create_or_update_gauge(&self, name: &str, value: f64) -> StoreResult<Written<f64>> {
        let written = self.flusher.memory.create_or_update_gauge(name, value).await?;
        self.after_write().await;
        Ok(written)
    }

    async fn create_or_update_counter(
        &self,
        name: &str,
        delta: i64,
    ) -> StoreResult<Written<i64>> {
        let written = self.flusher.memory.create_or_update_counter(name, delta).await?;
        self.after_write().await;
        Ok(written)
    }

    async fn list_all(&self) -> StoreResult<MetricSet> {
        self.flusher.memory.list_all().await
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn close(&self) -> StoreResult<()> {
        if let Some(background) = self.background.lock().await.take() {
            let _ = background.shutdown.send(true);
            if let Err(e) = background.handle.await {
                warn!(error = %e, "backup flusher task failed");
            }
        }
        info!(path = %self.flusher.backup.path().display(), "final backup flush");
        self.flusher.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn synchronous_mode_writes_after_each_update() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.json");
        let store = DurableMemoryStore::open(path.clone(), Duration::ZERO, false).await;

        store.create_or_update_counter("hits", 2).await.unwrap();
        let on_disk = BackupFile::new(&path).load().await.unwrap().unwrap();
        assert_eq!(on_disk.counters["hits"], 2);

        store.create_or_update_gauge("temp", 3.4).await.unwrap();
        let on_disk = BackupFile::new(&path).load().await.unwrap().unwrap();
        assert_eq!(on_disk.gauges["temp"], 3.4);
    }

    #[tokio::test]
    async fn periodic_mode_defers_until_close() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.json");
        let store = DurableMemoryStore::open(path.clone(), Duration::from_secs(3600), false).await;

        store.create_or_update_counter("hits", 1).await.unwrap();
        assert!(!path.exists());

        store.close().await.unwrap();
        let on_disk = BackupFile::new(&path).load().await.unwrap().unwrap();
        assert_eq!(on_disk.counters["hits"], 1);
    }

    #[tokio::test]
    async fn periodic_mode_flushes_on_interval() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.json");
        let store = DurableMemoryStore::open(path.clone(), Duration::from_millis(50), false).await;
        store.create_or_update_gauge("temp", 1.0).await.unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !path.exists() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(path.exists());
        store.close().await.unwrap();
    }

    #[tokio::test]
    async fn restore_reloads_previous_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.json");

        let first = DurableMemoryStore::open(path.clone(), Duration::ZERO, true).await;
        first.create_or_update_counter("hits", 3).await.unwrap();
        first.create_or_update_gauge("temp", 1.5).await.unwrap();
        first.close().await.unwrap();

        let second = DurableMemoryStore::open(path.clone(), Duration::ZERO, true).await;
        assert_eq!(second.get_counter("hits").await.unwrap(), 3);
        assert_eq!(second.get_gauge("temp").await.unwrap(), 1.5);

        second.create_or_update_counter("hits", 4).await.unwrap();
        assert_eq!(second.get_counter("hits").await.unwrap(), 7);
    }

    #[tokio::test]
    async fn restore_disabled_ignores_existing_backup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.json");
        let mut maps = MetricMaps::default();
        maps.counters.insert("hits".to_string(), 9);
        BackupFile::new(&path).write(&maps).await.unwrap();

        let store = DurableMemoryStore::open(path, Duration::ZERO, false).await;
        assert!(store.get_counter("hits").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn corrupt_backup_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.json");
        std::fs::write(&path, b"garbage").unwrap();

        let store = DurableMemoryStore::open(path, Duration::ZERO, true).await;
        assert!(store.list_all().await.unwrap().gauges.is_empty());
    }

    #[tokio::test]
    async fn backup_failure_does_not_fail_write() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where a directory is expected makes every flush fail.
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"").unwrap();
        let path = blocker.join("metrics.json");

        let store = DurableMemoryStore::open(path, Duration::ZERO, false).await;
        let written = store.create_or_update_counter("hits", 1).await.unwrap();
        assert_eq!(written.value, 1);
        assert!(store.flush().await.is_err());
    }
}

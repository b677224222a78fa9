//! Backup document: the full metric state as one JSON object.
//!
//! ```json
//! {"gauge_metrics":   {"temp": {"name": "temp", "type": "gauge",   "value": 3.4}},
//!  "counter_metrics": {"hits": {"name": "hits", "type": "counter", "value": 5}}}
//! ```
//!
//! Writes go to a sibling temp file which is then renamed over the target,
//! so readers only ever see a complete document.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use pulse_core::MetricKind;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::memory::MetricMaps;

macro_rules! backup_err {
    ($what:literal, $path:expr) => {
        |e| StoreError::Backup(format!("{} {}: {}", $what, $path.display(), e))
    };
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GaugeEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: MetricKind,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CounterEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: MetricKind,
    pub value: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackupDocument {
    #[serde(default)]
    pub gauge_metrics: BTreeMap<String, GaugeEntry>,
    #[serde(default)]
    pub counter_metrics: BTreeMap<String, CounterEntry>,
}

impl From<&MetricMaps> for BackupDocument {
    fn from(maps: &MetricMaps) -> Self {
        Self {
            gauge_metrics: maps
                .gauges
                .iter()
                .map(|(name, value)| {
                    let entry = GaugeEntry {
                        name: name.clone(),
                        kind: MetricKind::Gauge,
                        value: *value,
                    };
                    (name.clone(), entry)
                })
                .collect(),
            counter_metrics: maps
                .counters
                .iter()
                .map(|(name, value)| {
                    let entry = CounterEntry {
                        name: name.clone(),
                        kind: MetricKind::Counter,
                        value: *value,
                    };
                    (name.clone(), entry)
                })
                .collect(),
        }
    }
}

impl From<BackupDocument> for MetricMaps {
    fn from(doc: BackupDocument) -> Self {
        Self {
            gauges: doc
                .gauge_metrics
                .into_iter()
                .map(|(name, entry)| (name, entry.value))
                .collect(),
            counters: doc
                .counter_metrics
                .into_iter()
                .map(|(name, entry)| (name, entry.value))
                .collect(),
        }
    }
}

/// Location of the backup document on disk.
#[derive(Debug, Clone)]
pub struct BackupFile {
    path: PathBuf,
}

impl BackupFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "metrics-backup".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// Atomically replace the document with `maps`.
    pub async fn write(&self, maps: &MetricMaps) -> StoreResult<()> {
        let doc = BackupDocument::from(maps);
        let data = serde_json::to_vec_pretty(&doc).map_err(backup_err!("serialize", self.path))?;

        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(backup_err!("create directory for", self.path))?;
        }

        let tmp = self.temp_path();
        write_owner_only(&tmp, &data)
            .await
            .map_err(backup_err!("write", tmp))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(backup_err!("replace", self.path))?;

        debug!(path = %self.path.display(), metrics = maps.len(), "backup written");
        Ok(())
    }

    /// Read the document. `Ok(None)` when no backup exists yet.
    pub async fn load(&self) -> StoreResult<Option<MetricMaps>> {
        let data = match tokio::fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StoreError::Backup(format!(
                    "read {}: {e}",
                    self.path.display()
                )));
            }
        };
        let doc: BackupDocument =
            serde_json::from_slice(&data).map_err(backup_err!("parse", self.path))?;
        Ok(Some(doc.into()))
    }
}

async fn write_owner_only(path: &Path, data: &[u8]) -> std::io::Result<()> {
    use tokio::io::AsyncWriteExt;

    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options.open(path).await?;
    file.write_all(data).await?;
    file.sync_all().await?;
    Ok(())
}

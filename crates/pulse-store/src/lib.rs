//! pulse-store: metric persistence for the Pulse aggregation server.
//!
//! One capability trait, [`MetricStore`], with three backends chosen at
//! startup by [`open`]:
//!
//! ```text
//! StoreConfig
//!   ├── database_dsn set   → SqlStore          (PostgreSQL, history table)
//!   ├── store_file set     → DurableMemoryStore (MemoryStore + JSON backup)
//!   └── otherwise          → MemoryStore
//! ```
//!
//! Writes follow one rule everywhere: gauges are replaced, counters are
//! accumulated, and both are atomic per `(name, kind)` key.

pub mod backup;
pub mod durable;
pub mod error;
pub mod memory;
pub mod migrations;
pub mod sql;
pub mod store;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

pub use durable::DurableMemoryStore;
pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use sql::SqlStore;
pub use store::{Branch, MetricSet, MetricStore, Written};

/// Backend selection inputs.
#[derive(Debug, Clone, Default)]
pub struct StoreConfig {
    /// PostgreSQL connection string. Takes precedence over everything else.
    pub database_dsn: Option<String>,
    /// Backup document path. Empty disables the durable backend.
    pub store_file: Option<PathBuf>,
    /// Backup flush period; zero flushes after every write.
    pub store_interval: Duration,
    /// Load an existing backup document on startup.
    pub restore: bool,
}

/// Open the backend the configuration asks for.
pub async fn open(config: &StoreConfig) -> StoreResult<Arc<dyn MetricStore>> {
    if let Some(dsn) = config.database_dsn.as_deref().filter(|d| !d.is_empty()) {
        info!("opening sql metric store");
        let store = SqlStore::connect(dsn).await?;
        return Ok(Arc::new(store));
    }

    if let Some(path) = config.store_file.as_ref().filter(|p| !p.as_os_str().is_empty()) {
        info!(
            path = %path.display(),
            interval_secs = config.store_interval.as_secs(),
            restore = config.restore,
            "opening durable memory store"
        );
        let store =
            DurableMemoryStore::open(path.clone(), config.store_interval, config.restore).await;
        return Ok(Arc::new(store));
    }

    info!("opening volatile memory store");
    Ok(Arc::new(MemoryStore::new()))
}

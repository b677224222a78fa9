//! SqlStore: PostgreSQL backend with an append-only history table.
//!
//! Each write is one transaction:
//!
//! ```text
//! BEGIN
//!   SELECT … FROM metric_actual WHERE (name, type) FOR UPDATE
//!   absent  → INSERT … ON CONFLICT DO NOTHING   (lost race → re-lock, UPDATE)
//!   present → UPDATE with the new value computed here
//!   INSERT INTO metric_history …
//! COMMIT
//! ```
//!
//! The row lock makes concurrent counter increments on one key queue up
//! behind each other, so read-then-write in application code cannot lose
//! a delta.

use std::time::Duration;

use async_trait::async_trait;
use pulse_core::{Counter, Gauge, MetricKind};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{PgConnection, PgPool};
use tracing::{debug, info, instrument};

use crate::error::{StoreError, StoreResult};
use crate::migrations;
use crate::store::{Branch, MetricSet, MetricStore, Written};

fn db_err(e: sqlx::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

fn type_id(kind: MetricKind) -> i16 {
    match kind {
        MetricKind::Gauge => 1,
        MetricKind::Counter => 2,
    }
}

/// Maps a value type onto its column in `metric_actual` / `metric_history`.
trait Column: Copy + Send + Sync + std::fmt::Debug + 'static {
    const KIND: MetricKind;

    fn pick(gauge: Option<f64>, counter: Option<i64>) -> Option<Self>;

    fn split(self) -> (Option<f64>, Option<i64>);
}

impl Column for f64 {
    const KIND: MetricKind = MetricKind::Gauge;

    fn pick(gauge: Option<f64>, _: Option<i64>) -> Option<Self> {
        gauge
    }

    fn split(self) -> (Option<f64>, Option<i64>) {
        (Some(self), None)
    }
}

impl Column for i64 {
    const KIND: MetricKind = MetricKind::Counter;

    fn pick(_: Option<f64>, counter: Option<i64>) -> Option<Self> {
        counter
    }

    fn split(self) -> (Option<f64>, Option<i64>) {
        (None, Some(self))
    }
}

pub struct SqlStore {
    pool: PgPool,
}

impl SqlStore {
    /// Connect, then bring the schema up to date.
    pub async fn connect(dsn: &str) -> StoreResult<Self> {
        let options: PgConnectOptions = dsn
            .parse()
            .map_err(|e: sqlx::Error| StoreError::Config(format!("invalid database dsn: {e}")))?;
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(5))
            .connect_with(options)
            .await
            .map_err(db_err)?;
        migrations::run(&pool).await?;
        info!("sql metric store ready");
        Ok(Self { pool })
    }

    async fn get<T: Column>(&self, name: &str) -> StoreResult<T> {
        let row: Option<(Option<f64>, Option<i64>)> = sqlx::query_as(
            "SELECT gauge_value, counter_value FROM metric_actual WHERE name = $1 AND type_id = $2",
        )
        .bind(name)
        .bind(type_id(T::KIND))
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.and_then(|(gauge, counter)| T::pick(gauge, counter))
            .ok_or_else(|| StoreError::not_found(T::KIND, name))
    }

    #[instrument(skip(self, next), fields(kind = %T::KIND))]
    async fn upsert<T, F>(&self, name: &str, next: F) -> StoreResult<Written<T>>
    where
        T: Column,
        F: Fn(Option<T>) -> StoreResult<T> + Send + Sync,
    {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let written = match lock_row::<T>(&mut *tx, name).await? {
            Some(current) => {
                let value = next(Some(current))?;
                update_row(&mut *tx, name, value).await?;
                Written {
                    value,
                    branch: Branch::Update,
                }
            }
            None => {
                let value = next(None)?;
                if insert_row(&mut *tx, name, value).await? {
                    Written {
                        value,
                        branch: Branch::Create,
                    }
                } else {
                    // A concurrent writer created the row first; its commit
                    // is visible now that the insert has waited on it.
                    let current = lock_row::<T>(&mut *tx, name).await?.ok_or_else(|| {
                        StoreError::Database(format!("row {name:?} vanished during upsert"))
                    })?;
                    let value = next(Some(current))?;
                    update_row(&mut *tx, name, value).await?;
                    Written {
                        value,
                        branch: Branch::Update,
                    }
                }
            }
        };

        append_history(&mut *tx, name, written.value).await?;
        tx.commit().await.map_err(db_err)?;

        debug!(%name, value = ?written.value, branch = ?written.branch, "metric written");
        Ok(written)
    }

    async fn list<T: Column>(&self) -> StoreResult<Vec<(String, T)>> {
        let rows: Vec<(String, Option<f64>, Option<i64>)> = sqlx::query_as(
            "SELECT name, gauge_value, counter_value FROM metric_actual WHERE type_id = $1",
        )
        .bind(type_id(T::KIND))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(rows
            .into_iter()
            .filter_map(|(name, gauge, counter)| T::pick(gauge, counter).map(|v| (name, v)))
            .collect())
    }
}

async fn lock_row<T: Column>(conn: &mut PgConnection, name: &str) -> StoreResult<Option<T>> {
    let row: Option<(Option<f64>, Option<i64>)> = sqlx::query_as(
        "SELECT gauge_value, counter_value FROM metric_actual \
         WHERE name = $1 AND type_id = $2 FOR UPDATE",
    )
    .bind(name)
    .bind(type_id(T::KIND))
    .fetch_optional(conn)
    .await
    .map_err(db_err)?;
    Ok(row.and_then(|(gauge, counter)| T::pick(gauge, counter)))
}

/// Returns false when another transaction already holds the key.
async fn insert_row<T: Column>(conn: &mut PgConnection, name: &str, value: T) -> StoreResult<bool> {
    let (gauge, counter) = value.split();
    let result = sqlx::query(
        "INSERT INTO metric_actual (name, type_id, gauge_value, counter_value, updated_at) \
         VALUES ($1, $2, $3, $4, now()) ON CONFLICT (name, type_id) DO NOTHING",
    )
    .bind(name)
    .bind(type_id(T::KIND))
    .bind(gauge)
    .bind(counter)
    .execute(conn)
    .await
    .map_err(db_err)?;
    Ok(result.rows_affected() == 1)
}

async fn update_row<T: Column>(conn: &mut PgConnection, name: &str, value: T) -> StoreResult<()> {
    let (gauge, counter) = value.split();
    sqlx::query(
        "UPDATE metric_actual SET gauge_value = $3, counter_value = $4, updated_at = now() \
         WHERE name = $1 AND type_id = $2",
    )
    .bind(name)
    .bind(type_id(T::KIND))
    .bind(gauge)
    .bind(counter)
    .execute(conn)
    .await
    .map_err(db_err)?;
    Ok(())
}

async fn append_history<T: Column>(conn: &mut PgConnection, name: &str, value: T) -> StoreResult<()> {
    let (gauge, counter) = value.split();
    sqlx::query(
        "INSERT INTO metric_history (name, type_id, gauge_value, counter_value) \
         VALUES ($1, $2, $3, $4)",
    )
    .bind(name)
    .bind(type_id(T::KIND))
    .bind(gauge)
    .bind(counter)
    .execute(conn)
    .await
    .map_err(db_err)?;
    Ok(())
}

#[async_trait]
impl MetricStore for SqlStore {
    async fn get_gauge(&self, name: &str) -> StoreResult<f64> {
        self.get::<f64>(name).await
    }

    async fn get_counter(&self, name: &str) -> StoreResult<i64> {
        self.get::<i64>(name).await
    }

    async fn create_or_update_gauge(&self, name: &str, value: f64) -> StoreResult<Written<f64>> {
        self.upsert(name, |_| Ok(value)).await
    }

    async fn create_or_update_counter(
        &self,
        name: &str,
        delta: i64,
    ) -> StoreResult<Written<i64>> {
        self.upsert(name, |current: Option<i64>| match current {
            Some(old) => old.checked_add(delta).ok_or_else(|| StoreError::Overflow {
                name: name.to_string(),
            }),
            None => Ok(delta),
        })
        .await
    }

    async fn list_all(&self) -> StoreResult<MetricSet> {
        let gauges = self
            .list::<f64>()
            .await?
            .into_iter()
            .map(|(name, value)| Gauge { name, value })
            .collect();
        let counters = self
            .list::<i64>()
            .await?
            .into_iter()
            .map(|(name, value)| Counter { name, value })
            .collect();
        Ok(MetricSet { gauges, counters })
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn close(&self) -> StoreResult<()> {
        self.pool.close().await;
        info!("sql connection pool closed");
        Ok(())
    }
}

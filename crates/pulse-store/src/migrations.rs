//! PostgreSQL schema migrations, applied once at startup.

use sqlx::PgPool;
use tracing::{info, instrument};

use crate::error::{StoreError, StoreResult};

const SCHEMA_VERSION: i32 = 1;

fn migration_err(e: sqlx::Error) -> StoreError {
    StoreError::Migration(e.to_string())
}

#[instrument(skip(pool))]
pub async fn run(pool: &PgPool) -> StoreResult<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(migration_err)?;

    let current_version: Option<i32> =
        sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
            .fetch_one(pool)
            .await
            .map_err(migration_err)?;
    let current_version = current_version.unwrap_or(0);

    if current_version >= SCHEMA_VERSION {
        info!(version = current_version, "database schema is up to date");
        return Ok(());
    }

    info!(from = current_version, to = SCHEMA_VERSION, "migrating database");

    if current_version < 1 {
        migrate_to_v1(pool).await?;
    }

    Ok(())
}

#[instrument(skip(pool))]
async fn migrate_to_v1(pool: &PgPool) -> StoreResult<()> {
    info!("running migration to schema version 1");
    let mut tx = pool.begin().await.map_err(migration_err)?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS metric_type (
            id SMALLINT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE
        )
        "#,
    )
    .execute(&mut *tx)
    .await
    .map_err(migration_err)?;

    sqlx::query(
        r#"
        INSERT INTO metric_type (id, name) VALUES (1, 'gauge'), (2, 'counter')
        ON CONFLICT DO NOTHING
        "#,
    )
    .execute(&mut *tx)
    .await
    .map_err(migration_err)?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS metric_actual (
            name TEXT NOT NULL,
            type_id SMALLINT NOT NULL REFERENCES metric_type (id),
            gauge_value DOUBLE PRECISION,
            counter_value BIGINT,
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            PRIMARY KEY (name, type_id)
        )
        "#,
    )
    .execute(&mut *tx)
    .await
    .map_err(migration_err)?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS metric_history (
            id BIGSERIAL PRIMARY KEY,
            name TEXT NOT NULL,
            type_id SMALLINT NOT NULL REFERENCES metric_type (id),
            gauge_value DOUBLE PRECISION,
            counter_value BIGINT,
            recorded_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    )
    .execute(&mut *tx)
    .await
    .map_err(migration_err)?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_metric_history_name ON metric_history (name, type_id)",
    )
    .execute(&mut *tx)
    .await
    .map_err(migration_err)?;

    sqlx::query("INSERT INTO schema_version (version) VALUES (1)")
        .execute(&mut *tx)
        .await
        .map_err(migration_err)?;

    tx.commit().await.map_err(migration_err)?;
    Ok(())
}

//! Schema migrations.
//!
//! A single `vectors` table holds every tenant's rows; `(tenant, table_name)`
//! is the partition every query filters on. There is no
//! checkpoint table: resume points are derived from `metadata_json`.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create tables and indexes. Idempotent.
pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vectors (
            tenant TEXT NOT NULL,
            table_name TEXT NOT NULL,
            id TEXT NOT NULL,
            document_id TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            chunk_count INTEGER NOT NULL,
            text TEXT NOT NULL,
            hash TEXT NOT NULL,
            embedding BLOB,
            model TEXT NOT NULL,
            dims INTEGER NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            written_at INTEGER NOT NULL,
            PRIMARY KEY (tenant, table_name, id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_vectors_document ON vectors(tenant, table_name, document_id, chunk_index)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_vectors_date ON vectors(tenant, table_name, json_extract(metadata_json, '$.date'))",
    )
    .execute(pool)
    .await?;

    Ok(())
}

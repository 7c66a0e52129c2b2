//! SQLite implementation of [`VectorStore`].
//!
//! All rows live in the `vectors` table (see [`crate::migrate`]). Metadata is
//! stored as JSON and queried with `json_extract`; absent fields are omitted
//! on write, so they read back as SQL `NULL`.

use std::collections::{HashMap, HashSet};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

use community_digest_core::embedding::{blob_to_vec, vec_to_blob};
use community_digest_core::models::{
    Chunk, DeletePredicate, DeletionDirective, DocumentMetadata, TableScope, TimestampField,
    VectorRecord,
};
use community_digest_core::store::{VectorStore, WriteOutcome};

pub struct SqliteStore {
    pool: SqlitePool,
    model: String,
}

impl SqliteStore {
    /// `model` is recorded on every row this store writes.
    pub fn new(pool: SqlitePool, model: impl Into<String>) -> Self {
        Self {
            pool,
            model: model.into(),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn millis_to_utc(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).with_context(|| format!("timestamp out of range: {ms}"))
}

async fn apply_directive(
    tx: &mut Transaction<'_, Sqlite>,
    directive: &DeletionDirective,
) -> Result<u64> {
    let scope = &directive.scope;
    let result = match &directive.predicate {
        DeletePredicate::DatesAfter(day) => {
            sqlx::query(
                r#"
                DELETE FROM vectors
                WHERE tenant = ? AND table_name = ?
                  AND json_extract(metadata_json, '$.date') > ?
                "#,
            )
            .bind(&scope.tenant)
            .bind(&scope.table)
            .bind(day.to_string())
            .execute(&mut **tx)
            .await?
        }
        DeletePredicate::SourceIds { within, ids } => {
            let ids_json = serde_json::to_string(ids)?;
            sqlx::query(
                r#"
                DELETE FROM vectors
                WHERE tenant = ? AND table_name = ?
                  AND json_extract(metadata_json, '$.scope') = ?
                  AND json_extract(metadata_json, '$.source_id') IN (SELECT value FROM json_each(?))
                "#,
            )
            .bind(&scope.tenant)
            .bind(&scope.table)
            .bind(within)
            .bind(ids_json)
            .execute(&mut **tx)
            .await?
        }
    };
    Ok(result.rows_affected())
}

#[async_trait]
impl VectorStore for SqliteStore {
    async fn max_day_summary_date(&self, scope: &TableScope) -> Result<Option<NaiveDate>> {
        let max: Option<String> = sqlx::query_scalar(
            r#"
            SELECT MAX(json_extract(metadata_json, '$.date'))
            FROM vectors
            WHERE tenant = ? AND table_name = ?
              AND json_extract(metadata_json, '$.level') = 'day'
              AND json_extract(metadata_json, '$.channel') IS NULL
              AND json_extract(metadata_json, '$.thread') IS NULL
              AND date(json_extract(metadata_json, '$.date')) = json_extract(metadata_json, '$.date')
            "#,
        )
        .bind(&scope.tenant)
        .bind(&scope.table)
        .fetch_one(&self.pool)
        .await?;

        max.map(|s| {
            NaiveDate::parse_from_str(&s, "%Y-%m-%d")
                .with_context(|| format!("invalid day summary date '{s}' in {scope}"))
        })
        .transpose()
    }

    async fn max_timestamp(
        &self,
        scope: &TableScope,
        field: TimestampField,
        within: Option<&str>,
    ) -> Result<Option<DateTime<Utc>>> {
        let path = format!("$.{}", field.key());
        let max: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT MAX(json_extract(metadata_json, ?))
            FROM vectors
            WHERE tenant = ? AND table_name = ?
              AND (? IS NULL OR json_extract(metadata_json, '$.scope') = ?)
            "#,
        )
        .bind(&path)
        .bind(&scope.tenant)
        .bind(&scope.table)
        .bind(within)
        .bind(within)
        .fetch_one(&self.pool)
        .await?;

        max.map(millis_to_utc).transpose()
    }

    async fn persisted_versions(
        &self,
        scope: &TableScope,
        within: &str,
        ids: &[String],
    ) -> Result<HashMap<String, Option<DateTime<Utc>>>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let rows = sqlx::query(
            r#"
            SELECT json_extract(metadata_json, '$.source_id') AS source_id,
                   MAX(json_extract(metadata_json, '$.updated_at')) AS updated_at
            FROM vectors
            WHERE tenant = ? AND table_name = ?
              AND json_extract(metadata_json, '$.scope') = ?
              AND json_extract(metadata_json, '$.source_id') IN (SELECT value FROM json_each(?))
            GROUP BY json_extract(metadata_json, '$.source_id')
            "#,
        )
        .bind(&scope.tenant)
        .bind(&scope.table)
        .bind(within)
        .bind(serde_json::to_string(ids)?)
        .fetch_all(&self.pool)
        .await?;

        let mut versions = HashMap::with_capacity(rows.len());
        for row in rows {
            let id: String = row.try_get("source_id")?;
            let updated: Option<i64> = row.try_get("updated_at")?;
            versions.insert(id, updated.map(millis_to_utc).transpose()?);
        }
        Ok(versions)
    }

    async fn write_batch(
        &self,
        scope: &TableScope,
        directive: Option<&DeletionDirective>,
        records: &[VectorRecord],
    ) -> Result<WriteOutcome> {
        let mut tx = self.pool.begin().await?;
        let mut outcome = WriteOutcome::default();

        if let Some(directive) = directive {
            if directive.scope != *scope {
                bail!(
                    "directive for {} cannot be applied to {}",
                    directive.scope,
                    scope
                );
            }
            outcome.deleted = apply_directive(&mut tx, directive).await?;
        }

        let written_at = Utc::now().timestamp_millis();
        let mut trimmed: HashSet<&str> = HashSet::new();
        for record in records {
            let chunk = &record.chunk;
            let metadata_json = serde_json::to_string(&record.metadata)?;
            let embedding = (!record.embedding.is_empty()).then(|| vec_to_blob(&record.embedding));

            sqlx::query(
                r#"
                INSERT INTO vectors (tenant, table_name, id, document_id, chunk_index, chunk_count,
                                     text, hash, embedding, model, dims, metadata_json, written_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(tenant, table_name, id) DO UPDATE SET
                    document_id = excluded.document_id,
                    chunk_index = excluded.chunk_index,
                    chunk_count = excluded.chunk_count,
                    text = excluded.text,
                    hash = excluded.hash,
                    embedding = excluded.embedding,
                    model = excluded.model,
                    dims = excluded.dims,
                    metadata_json = excluded.metadata_json,
                    written_at = excluded.written_at
                "#,
            )
            .bind(&scope.tenant)
            .bind(&scope.table)
            .bind(&chunk.id)
            .bind(&chunk.document_id)
            .bind(chunk.chunk_index)
            .bind(record.chunk_count)
            .bind(&chunk.text)
            .bind(&chunk.hash)
            .bind(embedding)
            .bind(&self.model)
            .bind(record.embedding.len() as i64)
            .bind(metadata_json)
            .bind(written_at)
            .execute(&mut *tx)
            .await?;
            outcome.upserted += 1;

            if trimmed.insert(chunk.document_id.as_str()) {
                sqlx::query(
                    "DELETE FROM vectors WHERE tenant = ? AND table_name = ? AND document_id = ? AND chunk_index >= ?",
                )
                .bind(&scope.tenant)
                .bind(&scope.table)
                .bind(&chunk.document_id)
                .bind(record.chunk_count)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(outcome)
    }

    async fn records(&self, scope: &TableScope) -> Result<Vec<VectorRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, document_id, chunk_index, chunk_count, text, hash, embedding, metadata_json
            FROM vectors
            WHERE tenant = ? AND table_name = ?
            ORDER BY document_id, chunk_index
            "#,
        )
        .bind(&scope.tenant)
        .bind(&scope.table)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let metadata_json: String = row.try_get("metadata_json")?;
                let metadata: DocumentMetadata = serde_json::from_str(&metadata_json)
                    .with_context(|| format!("invalid metadata in {scope}"))?;
                let embedding: Option<Vec<u8>> = row.try_get("embedding")?;
                Ok(VectorRecord {
                    chunk: Chunk {
                        id: row.try_get("id")?,
                        document_id: row.try_get("document_id")?,
                        chunk_index: row.try_get("chunk_index")?,
                        text: row.try_get("text")?,
                        hash: row.try_get("hash")?,
                    },
                    chunk_count: row.try_get("chunk_count")?,
                    embedding: embedding.as_deref().map(blob_to_vec).unwrap_or_default(),
                    metadata,
                })
            })
            .collect()
    }
}

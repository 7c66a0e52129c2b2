//! In-memory [`VectorStore`] for tests and dry runs.
//!
//! Rows live in a `BTreeMap` per [`TableScope`] behind a `std::sync::RwLock`.
//! A write batch takes the write lock once, so readers never see a directive
//! applied without the rows that follow it.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::models::{DeletionDirective, TableScope, TimestampField, VectorRecord};

use super::{VectorStore, WriteOutcome};

type Rows = BTreeMap<(String, i64), VectorRecord>;

/// In-memory store keyed by `(document_id, chunk_index)` within each scope.
#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<HashMap<TableScope, Rows>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<TableScope, Rows>>> {
        self.tables
            .read()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<TableScope, Rows>>> {
        self.tables
            .write()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }
}

#[async_trait]
impl VectorStore for InMemoryStore {
    async fn max_day_summary_date(&self, scope: &TableScope) -> Result<Option<NaiveDate>> {
        let tables = self.read()?;
        Ok(tables.get(scope).and_then(|rows| {
            rows.values()
                .filter(|r| r.metadata.is_day_summary())
                .filter_map(|r| r.metadata.date)
                .max()
        }))
    }

    async fn max_timestamp(
        &self,
        scope: &TableScope,
        field: TimestampField,
        within: Option<&str>,
    ) -> Result<Option<DateTime<Utc>>> {
        let tables = self.read()?;
        Ok(tables.get(scope).and_then(|rows| {
            rows.values()
                .filter(|r| within.is_none() || r.metadata.scope.as_deref() == within)
                .filter_map(|r| r.metadata.timestamp_field(field))
                .max()
        }))
    }

    async fn persisted_versions(
        &self,
        scope: &TableScope,
        within: &str,
        ids: &[String],
    ) -> Result<HashMap<String, Option<DateTime<Utc>>>> {
        let tables = self.read()?;
        let mut versions: HashMap<String, Option<DateTime<Utc>>> = HashMap::new();
        let Some(rows) = tables.get(scope) else {
            return Ok(versions);
        };
        for row in rows.values() {
            let meta = &row.metadata;
            let Some(id) = meta.source_id.as_ref() else {
                continue;
            };
            if meta.scope.as_deref() != Some(within) || !ids.contains(id) {
                continue;
            }
            let entry = versions.entry(id.clone()).or_insert(None);
            if meta.updated_at > *entry {
                *entry = meta.updated_at;
            }
        }
        Ok(versions)
    }

    async fn write_batch(
        &self,
        scope: &TableScope,
        directive: Option<&DeletionDirective>,
        records: &[VectorRecord],
    ) -> Result<WriteOutcome> {
        if let Some(directive) = directive {
            if directive.scope != *scope {
                bail!(
                    "directive for {} cannot be applied to {}",
                    directive.scope,
                    scope
                );
            }
        }
        let mut tables = self.write()?;
        let rows = tables.entry(scope.clone()).or_default();
        let mut outcome = WriteOutcome::default();

        if let Some(directive) = directive {
            let before = rows.len();
            rows.retain(|_, r| !directive.matches(&r.metadata));
            outcome.deleted = (before - rows.len()) as u64;
        }

        for record in records {
            let doc = &record.chunk.document_id;
            rows.retain(|(d, idx), _| d != doc || *idx < record.chunk_count);
            rows.insert((doc.clone(), record.chunk.chunk_index), record.clone());
            outcome.upserted += 1;
        }
        Ok(outcome)
    }

    async fn records(&self, scope: &TableScope) -> Result<Vec<VectorRecord>> {
        let tables = self.read()?;
        Ok(tables
            .get(scope)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default())
    }
}

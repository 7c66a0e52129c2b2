//! Vector-store abstraction.
//!
//! The [`VectorStore`] trait is the only durable state the pipeline has.
//! Checkpoints, reconciliation baselines, and repair directives are all
//! computed from what a store returns here; nothing is cached across runs.
//!
//! Every operation is scoped to a [`TableScope`]: implementations must never
//! read or write rows of another tenant or table.

pub mod memory;

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::models::{DeletionDirective, TableScope, TimestampField, VectorRecord};

/// Counts reported by [`VectorStore::write_batch`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOutcome {
    pub deleted: u64,
    pub upserted: u64,
}

/// Abstract storage backend.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`max_day_summary_date`](VectorStore::max_day_summary_date) | Newest complete day (checkpoint source) |
/// | [`max_timestamp`](VectorStore::max_timestamp) | Cursor for append-style tables |
/// | [`persisted_versions`](VectorStore::persisted_versions) | Reconciliation baseline |
/// | [`write_batch`](VectorStore::write_batch) | Apply a directive and upsert rows atomically |
/// | [`records`](VectorStore::records) | Full scan, for stats and verification |
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Newest `date` among rows whose metadata is a well-formed day summary
    /// (see [`DocumentMetadata::is_day_summary`](crate::models::DocumentMetadata::is_day_summary)).
    async fn max_day_summary_date(&self, scope: &TableScope) -> Result<Option<NaiveDate>>;

    /// Newest value of a metadata timestamp, optionally restricted to rows
    /// whose `scope` metadata equals `within`.
    async fn max_timestamp(
        &self,
        scope: &TableScope,
        field: TimestampField,
        within: Option<&str>,
    ) -> Result<Option<DateTime<Utc>>>;

    /// For each of `ids` present within `within`, its newest persisted
    /// `updated_at` (`None` when the row carries no `updated_at`).
    async fn persisted_versions(
        &self,
        scope: &TableScope,
        within: &str,
        ids: &[String],
    ) -> Result<HashMap<String, Option<DateTime<Utc>>>>;

    /// Apply `directive` (if any) and upsert `records` in one transaction.
    ///
    /// Rows are keyed by chunk id, so writing the same record twice
    /// overwrites it. Rows of a written document with `chunk_index >=
    /// chunk_count` are removed so a document that shrank leaves no tail.
    async fn write_batch(
        &self,
        scope: &TableScope,
        directive: Option<&DeletionDirective>,
        records: &[VectorRecord],
    ) -> Result<WriteOutcome>;

    /// All rows of `scope`, ordered by document id then chunk index.
    async fn records(&self, scope: &TableScope) -> Result<Vec<VectorRecord>>;
}

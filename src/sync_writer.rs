//! Batched sync writer: chunk → embed → upsert.
//!
//! Documents are ordered so that, within a date, thread summaries precede
//! channel summaries, which precede the day summary. Batches are committed
//! strictly in that order and the first failure aborts the rest, so an
//! interrupted sync can leave children without their day document but
//! never a day document without its children.
//!
//! Every chunk of a document is committed in the same transaction, so a
//! stored row always comes with the rest of its document. A pending
//! [`DeletionDirective`] rides in the same transaction as the first batch;
//! readers never see the repaired span half-deleted.

use anyhow::{bail, Context, Result};
use tracing::{debug, info};

use community_digest_core::chunk::chunk_text;
use community_digest_core::embedding::EmbeddingProvider;
use community_digest_core::models::{
    Chunk, DeletionDirective, Document, DocumentMetadata, TableScope, VectorRecord,
};
use community_digest_core::store::VectorStore;

use crate::progress::{SyncProgressEvent, SyncProgressReporter};

#[derive(Debug, Clone, Copy)]
pub struct SyncSettings {
    pub max_tokens: usize,
    /// Chunks per embedding call, and per store transaction unless a single
    /// document needs more.
    pub batch_size: usize,
}

/// Counts from one [`sync_documents`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub documents: usize,
    pub chunks: usize,
    pub batches: usize,
    pub deleted: u64,
    pub upserted: u64,
}

struct Pending<'a> {
    chunk: Chunk,
    chunk_count: i64,
    metadata: &'a DocumentMetadata,
}

/// Stable sort placing each date's summaries in thread → channel → day order.
/// Documents without a summary level keep their given order.
pub fn order_for_write(documents: &mut [Document]) {
    documents.sort_by_key(|d| d.metadata.level.map(|level| (d.metadata.date, level)));
}

/// Pack per-document chunk lists into write batches of at most `batch_size`
/// chunks. A document never spans two batches; one larger than `batch_size`
/// gets a batch of its own.
fn batch_whole_documents<T>(documents: Vec<Vec<T>>, batch_size: usize) -> Vec<Vec<T>> {
    let mut batches = Vec::new();
    let mut current: Vec<T> = Vec::new();
    for chunks in documents {
        if chunks.is_empty() {
            continue;
        }
        if !current.is_empty() && current.len() + chunks.len() > batch_size {
            batches.push(std::mem::take(&mut current));
        }
        current.extend(chunks);
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

/// Write `documents` to `scope`, applying `directive` with the first batch.
///
/// With no documents the directive (if any) is still applied, in an empty
/// transaction.
pub async fn sync_documents(
    store: &dyn VectorStore,
    embedder: &dyn EmbeddingProvider,
    scope: &TableScope,
    mut documents: Vec<Document>,
    directive: Option<DeletionDirective>,
    settings: SyncSettings,
    progress: &dyn SyncProgressReporter,
) -> Result<SyncReport> {
    if settings.batch_size == 0 {
        bail!("batch size must be > 0");
    }
    order_for_write(&mut documents);

    let mut chunked = Vec::with_capacity(documents.len());
    for doc in &documents {
        let chunks = chunk_text(&doc.id, &doc.text, settings.max_tokens);
        let chunk_count = chunks.len() as i64;
        chunked.push(
            chunks
                .into_iter()
                .map(|chunk| Pending {
                    chunk,
                    chunk_count,
                    metadata: &doc.metadata,
                })
                .collect::<Vec<_>>(),
        );
    }
    let batches = batch_whole_documents(chunked, settings.batch_size);

    let mut report = SyncReport {
        documents: documents.len(),
        chunks: batches.iter().map(Vec::len).sum(),
        ..Default::default()
    };
    let mut directive = directive;

    if batches.is_empty() {
        if let Some(directive) = directive.take() {
            let outcome = store.write_batch(scope, Some(&directive), &[]).await?;
            report.deleted = outcome.deleted;
            info!(tenant = %scope.tenant, table = %scope.table, deleted = outcome.deleted, "applied directive");
        }
        return Ok(report);
    }

    let total = batches.len();
    for (index, batch) in batches.iter().enumerate() {
        let mut records = Vec::with_capacity(batch.len());
        for slice in batch.chunks(settings.batch_size) {
            let texts: Vec<String> = slice.iter().map(|p| p.chunk.text.clone()).collect();
            let vectors = embedder
                .embed(&texts)
                .await
                .with_context(|| format!("embedding batch {} of {} for {}", index + 1, total, scope))?;
            if vectors.len() != slice.len() {
                bail!(
                    "embedder returned {} vectors for {} chunks",
                    vectors.len(),
                    slice.len()
                );
            }
            records.extend(slice.iter().zip(vectors).map(|(p, embedding)| VectorRecord {
                chunk: p.chunk.clone(),
                chunk_count: p.chunk_count,
                embedding,
                metadata: p.metadata.clone(),
            }));
        }

        let outcome = store
            .write_batch(scope, directive.take().as_ref(), &records)
            .await
            .with_context(|| format!("writing batch {} of {} for {}", index + 1, total, scope))?;

        report.batches += 1;
        report.deleted += outcome.deleted;
        report.upserted += outcome.upserted;
        debug!(tenant = %scope.tenant, table = %scope.table, batch = index + 1, total, rows = records.len(), "batch committed");
        progress.report(SyncProgressEvent::Writing {
            tenant: scope.tenant.clone(),
            table: scope.table.clone(),
            n: (index + 1) as u64,
            total: total as u64,
        });
    }

    info!(
        tenant = %scope.tenant,
        table = %scope.table,
        documents = report.documents,
        chunks = report.chunks,
        deleted = report.deleted,
        "sync complete"
    );
    Ok(report)
}

//! Reconciliation engine for mutable sources.
//!
//! Forum posts and repository issues can be edited after they were first
//! synced, so a created-at cursor alone would miss updates. Each fetched
//! record is compared with the persisted version of the same
//! `(identifier, scope)` by `updated_at`:
//!
//! | Persisted | Fetched vs persisted | Outcome |
//! |-----------|----------------------|---------|
//! | absent | n/a | insert |
//! | present, no `updated_at` | n/a | replace |
//! | present | strictly newer | replace |
//! | present | same or older | skip |
//!
//! "Replace" means insert plus delete of the old identifier, so an edited
//! record never exists twice.

use std::collections::{BTreeSet, HashMap};

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::models::{DeletePredicate, DeletionDirective, Document, SourceRecord, TableScope};
use crate::store::VectorStore;

/// Insert and delete sets computed for one scope.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reconciliation {
    /// Records to write, oldest `updated_at` first.
    pub to_insert: Vec<SourceRecord>,
    /// Identifiers whose persisted rows are replaced.
    pub to_delete: BTreeSet<String>,
    /// Fetched records that were already up to date.
    pub skipped: usize,
}

impl Reconciliation {
    pub fn is_noop(&self) -> bool {
        self.to_insert.is_empty() && self.to_delete.is_empty()
    }

    /// Delete instruction for the replaced identifiers, scoped to `within`.
    pub fn directive(&self, scope: &TableScope, within: &str) -> Option<DeletionDirective> {
        if self.to_delete.is_empty() {
            return None;
        }
        Some(DeletionDirective {
            scope: scope.clone(),
            predicate: DeletePredicate::SourceIds {
                within: within.to_string(),
                ids: self.to_delete.clone(),
            },
        })
    }

    pub fn documents(&self, tenant: &str) -> Vec<Document> {
        self.to_insert.iter().map(|r| r.to_document(tenant)).collect()
    }
}

/// Diff `fetched` against `persisted` versions keyed by identifier.
///
/// Records from a scope other than `within` are ignored. Duplicate
/// identifiers keep only the copy with the newest `updated_at`.
pub fn reconcile(
    fetched: Vec<SourceRecord>,
    within: &str,
    persisted: &HashMap<String, Option<DateTime<Utc>>>,
) -> Reconciliation {
    let mut newest: HashMap<String, SourceRecord> = HashMap::new();
    for record in fetched {
        if record.scope() != within {
            warn!(within, scope = record.scope(), id = %record.identifier(), "record outside reconciliation scope ignored");
            continue;
        }
        match newest.get(&record.identifier()) {
            Some(seen) if seen.updated_at() >= record.updated_at() => {}
            _ => {
                newest.insert(record.identifier(), record);
            }
        }
    }

    let mut out = Reconciliation::default();
    for (id, record) in newest {
        match persisted.get(&id) {
            None => out.to_insert.push(record),
            Some(Some(stored)) if record.updated_at() <= *stored => out.skipped += 1,
            Some(_) => {
                out.to_delete.insert(id);
                out.to_insert.push(record);
            }
        }
    }
    out.to_insert
        .sort_by(|a, b| (a.updated_at(), a.identifier()).cmp(&(b.updated_at(), b.identifier())));
    out
}

/// Load persisted versions for the fetched identifiers and [`reconcile`].
pub async fn reconcile_with_store(
    store: &dyn VectorStore,
    scope: &TableScope,
    within: &str,
    fetched: Vec<SourceRecord>,
) -> Result<Reconciliation> {
    let ids: Vec<String> = fetched
        .iter()
        .map(SourceRecord::identifier)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let persisted = store.persisted_versions(scope, within, &ids).await?;
    let out = reconcile(fetched, within, &persisted);
    debug!(
        tenant = %scope.tenant,
        table = %scope.table,
        within,
        insert = out.to_insert.len(),
        replace = out.to_delete.len(),
        skipped = out.skipped,
        "reconciled"
    );
    Ok(out)
}

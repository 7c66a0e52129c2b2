//! Checkpoint manager.
//!
//! There is no checkpoint table. The resume point of a tenant's table is
//! re-derived on every run from the rows already in the vector store:
//!
//! - summary tables resume the day after the newest **day-level** summary,
//!   and anything dated after that day is a crashed run's remnant that must
//!   be deleted before new rows land;
//! - append-style tables resume just after the newest persisted timestamp.

use anyhow::Result;
use chrono::{DateTime, Days, Duration, NaiveDate, Utc};
use tracing::{debug, info};

use crate::models::{DeletePredicate, DeletionDirective, TableScope, TimestampField};
use crate::store::VectorStore;

/// Where a summary run starts and what it must repair first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartingPoint {
    pub from_date: NaiveDate,
    /// Deletes partial remnants dated after `last_complete`.
    pub directive: Option<DeletionDirective>,
    /// The derived checkpoint, if any day was ever completed.
    pub last_complete: Option<NaiveDate>,
}

/// Resolve the effective from-date for a summary table.
///
/// With no complete day persisted the run starts at `default_from` and
/// nothing is deleted. Otherwise, with checkpoint `D`, the run starts at
/// `D + 1` and carries a directive removing every row dated after `D`.
pub async fn resolve_starting_point(
    store: &dyn VectorStore,
    scope: &TableScope,
    default_from: NaiveDate,
) -> Result<StartingPoint> {
    let Some(last) = store.max_day_summary_date(scope).await? else {
        debug!(tenant = %scope.tenant, table = %scope.table, %default_from, "no checkpoint; starting at default");
        return Ok(StartingPoint {
            from_date: default_from,
            directive: None,
            last_complete: None,
        });
    };

    let from_date = last.checked_add_days(Days::new(1)).unwrap_or(last);
    info!(tenant = %scope.tenant, table = %scope.table, checkpoint = %last, %from_date, "resuming after checkpoint");
    Ok(StartingPoint {
        from_date,
        directive: Some(DeletionDirective {
            scope: scope.clone(),
            predicate: DeletePredicate::DatesAfter(last),
        }),
        last_complete: Some(last),
    })
}

/// Resolve the fetch cursor of an append-style table.
///
/// Returns the newest persisted `field` plus `step`, or `default_from` when
/// the table (or the `within` scope) is empty. `step` keeps the newest
/// record from being fetched again; use zero for inclusive cursors.
pub async fn resolve_cursor(
    store: &dyn VectorStore,
    scope: &TableScope,
    field: TimestampField,
    within: Option<&str>,
    default_from: DateTime<Utc>,
    step: Duration,
) -> Result<DateTime<Utc>> {
    let cursor = match store.max_timestamp(scope, field, within).await? {
        Some(newest) => newest + step,
        None => default_from,
    };
    debug!(
        tenant = %scope.tenant,
        table = %scope.table,
        field = field.key(),
        within = within.unwrap_or("-"),
        %cursor,
        "resolved cursor"
    );
    Ok(cursor)
}

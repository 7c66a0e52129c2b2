//! Database statistics and checkpoint inspection.
//!
//! `digest stats` shows what each tenant has persisted per table: documents,
//! chunks, embedding coverage, summary counts per level, and the derived
//! day-summary checkpoint. `digest checkpoint` shows where the next sync of a
//! tenant would start and what it would repair first, without writing.

use anyhow::Result;
use sqlx::{Row, SqlitePool};

use community_digest_core::models::DeletePredicate;

use crate::config::Config;
use crate::db;
use crate::error::PipelineError;
use crate::pipeline::{plan_tasks, resolve_task_start, JobKind, TaskStart};
use crate::sqlite_store::SqliteStore;

/// Counts for one `(tenant, table)` partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableStats {
    pub tenant: String,
    pub table: String,
    pub documents: i64,
    pub chunks: i64,
    pub embedded: i64,
    pub threads: i64,
    pub channels: i64,
    pub days: i64,
    /// Newest complete day summary (`YYYY-MM-DD`).
    pub checkpoint: Option<String>,
    /// Epoch milliseconds of the newest write.
    pub last_written: Option<i64>,
}

pub async fn collect_stats(pool: &SqlitePool) -> Result<Vec<TableStats>> {
    let rows = sqlx::query(
        r#"
        SELECT
            tenant,
            table_name,
            COUNT(DISTINCT document_id) AS documents,
            COUNT(*) AS chunks,
            SUM(CASE WHEN embedding IS NOT NULL THEN 1 ELSE 0 END) AS embedded,
            COUNT(DISTINCT CASE WHEN json_extract(metadata_json, '$.level') = 'thread' THEN document_id END) AS threads,
            COUNT(DISTINCT CASE WHEN json_extract(metadata_json, '$.level') = 'channel' THEN document_id END) AS channels,
            COUNT(DISTINCT CASE WHEN json_extract(metadata_json, '$.level') = 'day' THEN document_id END) AS days,
            MAX(CASE
                WHEN json_extract(metadata_json, '$.level') = 'day'
                 AND json_extract(metadata_json, '$.channel') IS NULL
                 AND json_extract(metadata_json, '$.thread') IS NULL
                 AND date(json_extract(metadata_json, '$.date')) = json_extract(metadata_json, '$.date')
                THEN json_extract(metadata_json, '$.date')
            END) AS checkpoint,
            MAX(written_at) AS last_written
        FROM vectors
        GROUP BY tenant, table_name
        ORDER BY tenant, table_name
        "#,
    )
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            Ok(TableStats {
                tenant: row.try_get("tenant")?,
                table: row.try_get("table_name")?,
                documents: row.try_get("documents")?,
                chunks: row.try_get("chunks")?,
                embedded: row.try_get::<Option<i64>, _>("embedded")?.unwrap_or(0),
                threads: row.try_get("threads")?,
                channels: row.try_get("channels")?,
                days: row.try_get("days")?,
                checkpoint: row.try_get("checkpoint")?,
                last_written: row.try_get("last_written")?,
            })
        })
        .collect()
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let stats = collect_stats(&pool).await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Community Digest: Database Stats");
    println!("=================================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!("  Tenants:     {} configured", config.tenants.len());

    if stats.is_empty() {
        println!();
        println!("  No rows written yet.");
    } else {
        println!();
        println!(
            "  {:<16} {:<10} {:>6} {:>8} {:>9} {:>14}  {:<11} {}",
            "TENANT", "TABLE", "DOCS", "CHUNKS", "EMBEDDED", "T / C / D", "CHECKPOINT", "LAST WRITE"
        );
        println!("  {}", "-".repeat(100));
        for s in &stats {
            let levels = if s.threads + s.channels + s.days > 0 {
                format!("{} / {} / {}", s.threads, s.channels, s.days)
            } else {
                "-".to_string()
            };
            println!(
                "  {:<16} {:<10} {:>6} {:>8} {:>9} {:>14}  {:<11} {}",
                s.tenant,
                s.table,
                s.documents,
                s.chunks,
                s.embedded,
                levels,
                s.checkpoint.as_deref().unwrap_or("-"),
                s.last_written
                    .map(|ms| format_ts_relative(ms / 1000))
                    .unwrap_or_else(|| "never".to_string()),
            );
        }
    }
    println!();

    pool.close().await;
    Ok(())
}

/// Print where each of `tenant`'s tasks would start.
pub async fn run_checkpoint(config: &Config, tenant: &str, table: Option<&str>) -> Result<()> {
    let tenant_config = config
        .tenant(tenant)
        .ok_or_else(|| PipelineError::UnknownTenant(tenant.to_string()))?;
    let tasks: Vec<_> = plan_tasks(tenant_config, JobKind::All)?
        .into_iter()
        .filter(|t| table.map_or(true, |name| t.table() == name))
        .collect();
    if tasks.is_empty() {
        anyhow::bail!(
            "tenant '{}' has no table '{}'",
            tenant,
            table.unwrap_or_default()
        );
    }

    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone(), "");
    for task in &tasks {
        match resolve_task_start(&store, tenant, task).await? {
            TaskStart::Summaries(start) => {
                println!("{}", task.label());
                println!(
                    "  checkpoint:  {}",
                    start
                        .last_complete
                        .map(|d| d.to_string())
                        .unwrap_or_else(|| "none".to_string())
                );
                println!("  from date:   {}", start.from_date);
                if let Some(directive) = &start.directive {
                    if let DeletePredicate::DatesAfter(day) = directive.predicate {
                        println!("  repair:      delete rows dated after {}", day);
                    }
                }
            }
            TaskStart::Cursor(cursor) => {
                println!("{}", task.label());
                println!("  cursor:      {}", cursor.to_rfc3339());
            }
        }
    }

    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;
    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}

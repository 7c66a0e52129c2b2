//! `digest sync`: wire configured services into a [`Pipeline`] and report.
//!
//! Every selected tenant runs to completion even when another fails. The
//! command's result says whether all of them succeeded, so the binary can
//! exit non-zero after printing the full report.

use std::sync::Arc;

use anyhow::{anyhow, Result};

use community_digest_core::embedding::EmbeddingProvider;

use crate::config::Config;
use crate::connector_jsonl::JsonlSource;
use crate::db;
use crate::embedding::create_provider;
use crate::migrate::apply_schema;
use crate::pipeline::{JobKind, Pipeline, PipelineSettings, TenantReport};
use crate::progress::ProgressMode;
use crate::sqlite_store::SqliteStore;
use crate::summarizer::create_summarizer;

/// Run `job` for `tenants` (every configured tenant when empty).
///
/// Returns `Ok(false)` when at least one tenant failed.
pub async fn run_sync(
    config: &Config,
    job: JobKind,
    tenants: &[String],
    progress: ProgressMode,
) -> Result<bool> {
    let source_root = config
        .source
        .as_ref()
        .map(|s| s.root.clone())
        .ok_or_else(|| anyhow!("[source].root must be set to run sync"))?;

    let embedder: Arc<dyn EmbeddingProvider> = create_provider(&config.embedding)?;
    let summarizer = create_summarizer(&config.summarization)?;

    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    let store = Arc::new(SqliteStore::new(pool.clone(), embedder.model_name()));

    let pipeline = Arc::new(
        Pipeline::new(
            store,
            Arc::new(JsonlSource::new(source_root)),
            summarizer,
            embedder,
            PipelineSettings::from_config(config),
        )
        .with_progress(Arc::from(progress.reporter())),
    );

    let reports = pipeline.run_all(&config.tenants, tenants, job).await;
    print_reports(job, &reports);

    pool.close().await;
    Ok(reports.iter().all(TenantReport::is_ok))
}

fn print_reports(job: JobKind, reports: &[TenantReport]) {
    println!("sync {}", job);
    if reports.is_empty() {
        println!("  no tenants configured");
    }
    for report in reports {
        if let Some(e) = &report.error {
            println!("  {}: FAILED: {:#}", report.tenant, e);
            continue;
        }
        println!("  {}:", report.tenant);
        for task in &report.tasks {
            match &task.result {
                Ok(stats) => {
                    let mut line = format!(
                        "    {:<32} from {}  fetched {}  documents {}  chunks {}  deleted {}",
                        task.label,
                        stats.from,
                        stats.fetched,
                        stats.written.documents,
                        stats.written.chunks,
                        stats.written.deleted
                    );
                    if stats.replaced > 0 || stats.skipped > 0 {
                        line.push_str(&format!(
                            "  replaced {}  unchanged {}",
                            stats.replaced, stats.skipped
                        ));
                    }
                    if let Some(date) = stats.incomplete_from {
                        line.push_str(&format!(
                            "  incomplete from {} ({} failed unit{})",
                            date,
                            stats.failures,
                            if stats.failures == 1 { "" } else { "s" }
                        ));
                    }
                    println!("{}", line);
                }
                Err(e) => println!("    {:<32} FAILED: {:#}", task.label, e),
            }
        }
    }
    let failed = reports.iter().filter(|r| !r.is_ok()).count();
    println!(
        "  {} tenant{} ok, {} failed",
        reports.len() - failed,
        if reports.len() - failed == 1 { "" } else { "s" },
        failed
    );
}

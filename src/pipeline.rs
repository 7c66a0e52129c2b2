//! Per-tenant sync orchestration.
//!
//! A sync run turns each selected tenant's configuration into a small,
//! ordered task list ([`plan_tasks`]) and executes it:
//!
//! ```text
//! summaries     checkpoint → fetch → group → summarize → write   (table "summaries")
//! messages      cursor → fetch → filter → write                  (table "messages")
//! forum         cursor → fetch → reconcile → write               (table "forum")
//! repository    cursor → fetch → reconcile → write               (table "github")
//! ```
//!
//! Tasks of one tenant run strictly one after another and share a single
//! [`RateLimiter`]; tenants run concurrently up to `sync.concurrency`.
//! Every failure is tenant-local and ends up in that tenant's
//! [`TenantReport`], never in another tenant's.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, Utc};
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use community_digest_core::checkpoint::{resolve_cursor, resolve_starting_point, StartingPoint};
use community_digest_core::embedding::EmbeddingProvider;
use community_digest_core::grouping::{group_records, GroupingWindow};
use community_digest_core::hierarchy::{build_hierarchy, SummaryPrompts};
use community_digest_core::models::{SourceKind, TableScope, TimestampField};
use community_digest_core::reconcile::reconcile_with_store;
use community_digest_core::store::VectorStore;
use community_digest_core::summarize::{Summarizer, TreeSummarizer};

use crate::config::{ChatConfig, Config, TenantConfig};
use crate::error::PipelineError;
use crate::progress::{NoProgress, SyncProgressEvent, SyncProgressReporter};
use crate::rate_limit::{Paced, RateLimiter};
use crate::sync_writer::{sync_documents, SyncReport, SyncSettings};
use crate::traits::RecordSource;

pub const SUMMARIES_TABLE: &str = "summaries";
pub const MESSAGES_TABLE: &str = "messages";

/// Which part of a tenant's configuration a run covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum JobKind {
    Summaries,
    Messages,
    Forums,
    Repositories,
    All,
}

impl JobKind {
    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::Summaries => "summaries",
            JobKind::Messages => "messages",
            JobKind::Forums => "forums",
            JobKind::Repositories => "repositories",
            JobKind::All => "all",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One step of a tenant run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    ChatSummaries {
        channels: BTreeSet<String>,
        from_date: NaiveDate,
    },
    ChatMessages {
        channels: BTreeSet<String>,
        from_date: NaiveDate,
    },
    Mutable {
        kind: SourceKind,
        within: String,
        from_date: NaiveDate,
    },
}

impl Task {
    pub fn table(&self) -> &'static str {
        match self {
            Task::ChatSummaries { .. } => SUMMARIES_TABLE,
            Task::ChatMessages { .. } => MESSAGES_TABLE,
            Task::Mutable { kind, .. } => kind.table(),
        }
    }

    /// Short label for reports, e.g. `forum:forum.acme.org`.
    pub fn label(&self) -> String {
        match self {
            Task::Mutable { kind, within, .. } => format!("{}:{}", kind.table(), within),
            other => other.table().to_string(),
        }
    }
}

fn chat_channels(tenant: &TenantConfig, chat: &ChatConfig) -> Result<BTreeSet<String>, PipelineError> {
    let channels: BTreeSet<String> = chat
        .channels
        .iter()
        .map(|c| c.trim())
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect();
    if channels.is_empty() {
        return Err(PipelineError::NoSelectedChannels(tenant.id.clone()));
    }
    Ok(channels)
}

/// Expand `job` into the ordered task list for `tenant`.
///
/// Summaries come before raw messages, and chat before forums and
/// repositories. Asking for a job the tenant has nothing configured for is
/// a [`PipelineError::NoSources`]; an empty channel selection is
/// [`PipelineError::NoSelectedChannels`].
pub fn plan_tasks(tenant: &TenantConfig, job: JobKind) -> Result<Vec<Task>, PipelineError> {
    let wants = |kind: JobKind| job == kind || job == JobKind::All;
    let mut tasks = Vec::new();

    if let Some(chat) = &tenant.chat {
        let summaries = wants(JobKind::Summaries) && chat.summaries;
        let messages = wants(JobKind::Messages) && chat.messages;
        if summaries || messages {
            let channels = chat_channels(tenant, chat)?;
            if summaries {
                tasks.push(Task::ChatSummaries {
                    channels: channels.clone(),
                    from_date: chat.from_date,
                });
            }
            if messages {
                tasks.push(Task::ChatMessages {
                    channels,
                    from_date: chat.from_date,
                });
            }
        }
    }
    if wants(JobKind::Forums) {
        tasks.extend(tenant.forums.iter().map(|f| Task::Mutable {
            kind: SourceKind::Forum,
            within: f.endpoint.clone(),
            from_date: f.from_date,
        }));
    }
    if wants(JobKind::Repositories) {
        tasks.extend(tenant.repositories.iter().map(|r| Task::Mutable {
            kind: SourceKind::Repository,
            within: r.name.clone(),
            from_date: r.from_date,
        }));
    }

    if tasks.is_empty() {
        return Err(PipelineError::NoSources {
            tenant: tenant.id.clone(),
            job: job.to_string(),
        });
    }
    Ok(tasks)
}

/// Source of "today" for the summary window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Clock {
    /// The process-local date and offset, read when a task starts.
    #[default]
    Local,
    Fixed {
        today: NaiveDate,
        offset: FixedOffset,
    },
}

impl Clock {
    pub fn window(&self, from: NaiveDate) -> GroupingWindow {
        match *self {
            Clock::Local => GroupingWindow::ending_today(from),
            Clock::Fixed { today, offset } => GroupingWindow {
                from,
                today,
                offset,
            },
        }
    }
}

/// Run-wide knobs, usually taken from [`Config`].
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub sync: SyncSettings,
    pub requests_per_minute: Option<u32>,
    pub concurrency: usize,
    pub max_input_chars: usize,
    pub prompts: SummaryPrompts,
    pub clock: Clock,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            sync: SyncSettings {
                max_tokens: config.chunking.max_tokens,
                batch_size: config.embedding.batch_size,
            },
            requests_per_minute: config.sync.requests_per_minute,
            concurrency: config.sync.concurrency,
            max_input_chars: config.summarization.max_input_chars,
            prompts: SummaryPrompts::from_prefix(&config.summarization.prompt_prefix),
            clock: Clock::Local,
        }
    }
}

/// What one task did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskStats {
    pub fetched: usize,
    pub written: SyncReport,
    /// Effective start of the run: a date for summaries, a cursor otherwise.
    pub from: String,
    /// First date left without a day summary.
    pub incomplete_from: Option<NaiveDate>,
    /// Summary units that failed.
    pub failures: usize,
    /// Reconciled records already up to date.
    pub skipped: usize,
    /// Reconciled records that replaced a persisted version.
    pub replaced: usize,
}

#[derive(Debug)]
pub struct TaskReport {
    pub label: String,
    pub table: &'static str,
    pub result: Result<TaskStats>,
}

#[derive(Debug)]
pub struct TenantReport {
    pub tenant: String,
    /// Set when the tenant could not be planned at all.
    pub error: Option<anyhow::Error>,
    pub tasks: Vec<TaskReport>,
}

impl TenantReport {
    fn planning_failed(tenant: &str, error: anyhow::Error) -> Self {
        Self {
            tenant: tenant.to_string(),
            error: Some(error),
            tasks: Vec::new(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none() && self.tasks.iter().all(|t| t.result.is_ok())
    }

    /// Whether any summary date was left incomplete.
    pub fn has_incomplete_days(&self) -> bool {
        self.tasks.iter().any(|t| {
            t.result
                .as_ref()
                .is_ok_and(|s| s.incomplete_from.is_some())
        })
    }
}

/// Shared services for every tenant run.
pub struct Pipeline {
    pub store: Arc<dyn VectorStore>,
    pub source: Arc<dyn RecordSource>,
    pub summarizer: Arc<dyn Summarizer>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub settings: PipelineSettings,
    pub progress: Arc<dyn SyncProgressReporter>,
}

/// Capabilities wrapped for one tenant run.
struct TenantCapabilities {
    summarizer: TreeSummarizer<Paced<Arc<dyn Summarizer>>>,
    embedder: Paced<Arc<dyn EmbeddingProvider>>,
}

fn day_start_utc(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

async fn messages_cursor(
    store: &dyn VectorStore,
    scope: &TableScope,
    default_from: NaiveDate,
) -> Result<DateTime<Utc>> {
    resolve_cursor(
        store,
        scope,
        TimestampField::Timestamp,
        None,
        day_start_utc(default_from),
        Duration::milliseconds(1),
    )
    .await
}

async fn mutable_cursor(
    store: &dyn VectorStore,
    scope: &TableScope,
    within: &str,
    default_from: NaiveDate,
) -> Result<DateTime<Utc>> {
    // Inclusive: a record replaced but not yet rewritten is fetched again.
    resolve_cursor(
        store,
        scope,
        TimestampField::UpdatedAt,
        Some(within),
        day_start_utc(default_from),
        Duration::zero(),
    )
    .await
}

/// Where a task would start if it ran now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStart {
    Summaries(StartingPoint),
    Cursor(DateTime<Utc>),
}

/// Resolve `task`'s starting point for `tenant` without writing anything.
pub async fn resolve_task_start(
    store: &dyn VectorStore,
    tenant: &str,
    task: &Task,
) -> Result<TaskStart> {
    let scope = TableScope::new(tenant, task.table());
    match task {
        Task::ChatSummaries { from_date, .. } => {
            resolve_starting_point(store, &scope, *from_date)
                .await
                .map(TaskStart::Summaries)
        }
        Task::ChatMessages { from_date, .. } => messages_cursor(store, &scope, *from_date)
            .await
            .map(TaskStart::Cursor),
        Task::Mutable {
            within, from_date, ..
        } => mutable_cursor(store, &scope, within, *from_date)
            .await
            .map(TaskStart::Cursor),
    }
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn VectorStore>,
        source: Arc<dyn RecordSource>,
        summarizer: Arc<dyn Summarizer>,
        embedder: Arc<dyn EmbeddingProvider>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            store,
            source,
            summarizer,
            embedder,
            settings,
            progress: Arc::new(NoProgress),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn SyncProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    fn capabilities(&self) -> TenantCapabilities {
        let limiter = Arc::new(RateLimiter::per_minute(self.settings.requests_per_minute));
        TenantCapabilities {
            summarizer: TreeSummarizer::new(
                Paced::new(self.summarizer.clone(), limiter.clone()),
                self.settings.max_input_chars,
            ),
            embedder: Paced::new(self.embedder.clone(), limiter),
        }
    }

    /// Run `job` for one tenant. Never fails as a whole; see the report.
    pub async fn run_tenant(&self, tenant: &TenantConfig, job: JobKind) -> TenantReport {
        let tasks = match plan_tasks(tenant, job) {
            Ok(tasks) => tasks,
            Err(e) => {
                warn!(tenant = %tenant.id, error = %e, "tenant not runnable");
                return TenantReport::planning_failed(&tenant.id, e.into());
            }
        };

        let caps = self.capabilities();
        let mut report = TenantReport {
            tenant: tenant.id.clone(),
            error: None,
            tasks: Vec::with_capacity(tasks.len()),
        };
        for task in tasks {
            let result = self
                .run_task(&tenant.id, &task, &caps)
                .await
                .with_context(|| format!("{} sync failed for tenant '{}'", task.label(), tenant.id));
            if let Err(e) = &result {
                error!(tenant = %tenant.id, table = task.table(), error = %format!("{e:#}"), "task failed");
            }
            report.tasks.push(TaskReport {
                label: task.label(),
                table: task.table(),
                result,
            });
        }
        report
    }

    async fn run_task(&self, tenant: &str, task: &Task, caps: &TenantCapabilities) -> Result<TaskStats> {
        match task {
            Task::ChatSummaries {
                channels,
                from_date,
            } => self.sync_summaries(tenant, channels, *from_date, caps).await,
            Task::ChatMessages {
                channels,
                from_date,
            } => self.sync_messages(tenant, channels, *from_date, caps).await,
            Task::Mutable {
                kind,
                within,
                from_date,
            } => self.sync_mutable(tenant, *kind, within, *from_date, caps).await,
        }
    }

    async fn sync_summaries(
        &self,
        tenant: &str,
        channels: &BTreeSet<String>,
        default_from: NaiveDate,
        caps: &TenantCapabilities,
    ) -> Result<TaskStats> {
        let scope = TableScope::new(tenant, SUMMARIES_TABLE);
        let start = resolve_starting_point(self.store.as_ref(), &scope, default_from).await?;
        let window = self.settings.clock.window(start.from_date);
        let mut stats = TaskStats {
            from: start.from_date.to_string(),
            ..Default::default()
        };

        let mut documents = Vec::new();
        if !window.is_empty() {
            let records = self
                .source
                .chat_records(tenant, channels, window.start())
                .await
                .context("fetching chat records")?;
            stats.fetched = records.len();
            self.progress.report(SyncProgressEvent::Fetched {
                tenant: tenant.to_string(),
                table: SUMMARIES_TABLE.to_string(),
                records: records.len() as u64,
            });

            let grouped = group_records(records, &window, channels);
            if grouped.is_empty() {
                info!(tenant, from = %window.from, today = %window.today, "no records in window");
            } else {
                let on_date = |done: usize, total: usize| {
                    self.progress.report(SyncProgressEvent::Summarizing {
                        tenant: tenant.to_string(),
                        n: done as u64,
                        total: total as u64,
                    });
                };
                let output = build_hierarchy(
                    tenant,
                    &grouped,
                    &self.settings.prompts,
                    &caps.summarizer,
                    &on_date,
                )
                .await;
                stats.incomplete_from = output.incomplete_from;
                stats.failures = output.failures.len();
                documents = output.into_documents();
            }
        }

        stats.written = sync_documents(
            self.store.as_ref(),
            &caps.embedder,
            &scope,
            documents,
            start.directive,
            self.settings.sync,
            self.progress.as_ref(),
        )
        .await?;
        Ok(stats)
    }

    async fn sync_messages(
        &self,
        tenant: &str,
        channels: &BTreeSet<String>,
        default_from: NaiveDate,
        caps: &TenantCapabilities,
    ) -> Result<TaskStats> {
        let scope = TableScope::new(tenant, MESSAGES_TABLE);
        let cursor = messages_cursor(self.store.as_ref(), &scope, default_from).await?;

        let mut records = self
            .source
            .chat_records(tenant, channels, cursor)
            .await
            .context("fetching chat records")?;
        self.progress.report(SyncProgressEvent::Fetched {
            tenant: tenant.to_string(),
            table: MESSAGES_TABLE.to_string(),
            records: records.len() as u64,
        });
        let fetched = records.len();

        let mut seen = HashSet::new();
        records.retain(|r| r.kind.is_conversational() && seen.insert(r.id.clone()));
        records.sort_by(|a, b| (a.timestamp, &a.id).cmp(&(b.timestamp, &b.id)));
        let documents = records.iter().map(|r| r.to_document()).collect();

        let written = sync_documents(
            self.store.as_ref(),
            &caps.embedder,
            &scope,
            documents,
            None,
            self.settings.sync,
            self.progress.as_ref(),
        )
        .await?;
        Ok(TaskStats {
            fetched,
            written,
            from: cursor.to_rfc3339(),
            ..Default::default()
        })
    }

    async fn sync_mutable(
        &self,
        tenant: &str,
        kind: SourceKind,
        within: &str,
        default_from: NaiveDate,
        caps: &TenantCapabilities,
    ) -> Result<TaskStats> {
        let scope = TableScope::new(tenant, kind.table());
        let cursor = mutable_cursor(self.store.as_ref(), &scope, within, default_from).await?;

        let fetched = match kind {
            SourceKind::Forum => self.source.forum_posts(tenant, within, cursor).await,
            SourceKind::Repository => self.source.issues(tenant, within, cursor).await,
        }
        .with_context(|| format!("fetching {within}"))?;
        self.progress.report(SyncProgressEvent::Fetched {
            tenant: tenant.to_string(),
            table: scope.table.clone(),
            records: fetched.len() as u64,
        });
        let fetched_count = fetched.len();

        let reconciliation = reconcile_with_store(self.store.as_ref(), &scope, within, fetched).await?;
        let directive = reconciliation.directive(&scope, within);
        let documents = reconciliation.documents(tenant);

        let written = sync_documents(
            self.store.as_ref(),
            &caps.embedder,
            &scope,
            documents,
            directive,
            self.settings.sync,
            self.progress.as_ref(),
        )
        .await?;
        Ok(TaskStats {
            fetched: fetched_count,
            written,
            from: cursor.to_rfc3339(),
            skipped: reconciliation.skipped,
            replaced: reconciliation.to_delete.len(),
            ..Default::default()
        })
    }

    /// Run `job` for the selected tenants (all configured ones when `only`
    /// is empty), at most `concurrency` at a time.
    ///
    /// Reports come back in selection order. A selected id missing from
    /// `tenants` yields a report carrying [`PipelineError::UnknownTenant`].
    pub async fn run_all(
        self: &Arc<Self>,
        tenants: &[TenantConfig],
        only: &[String],
        job: JobKind,
    ) -> Vec<TenantReport> {
        let selected: Vec<Result<TenantConfig, String>> = if only.is_empty() {
            tenants.iter().cloned().map(Ok).collect()
        } else {
            only.iter()
                .map(|id| {
                    tenants
                        .iter()
                        .find(|t| &t.id == id)
                        .cloned()
                        .ok_or_else(|| id.clone())
                })
                .collect()
        };

        let semaphore = Arc::new(Semaphore::new(self.settings.concurrency.max(1)));
        let mut handles = Vec::with_capacity(selected.len());
        for entry in selected {
            match entry {
                Ok(tenant) => {
                    let pipeline = Arc::clone(self);
                    let semaphore = Arc::clone(&semaphore);
                    let id = tenant.id.clone();
                    let handle = tokio::spawn(async move {
                        let _permit = match semaphore.acquire_owned().await {
                            Ok(permit) => permit,
                            Err(e) => return TenantReport::planning_failed(&tenant.id, e.into()),
                        };
                        pipeline.run_tenant(&tenant, job).await
                    });
                    handles.push((id, Some(handle)));
                }
                Err(id) => handles.push((id, None)),
            }
        }

        let mut reports = Vec::with_capacity(handles.len());
        for (id, handle) in handles {
            let report = match handle {
                None => {
                    warn!(tenant = %id, "unknown tenant");
                    TenantReport::planning_failed(&id, PipelineError::UnknownTenant(id.clone()).into())
                }
                Some(handle) => match handle.await {
                    Ok(report) => report,
                    Err(e) => {
                        error!(tenant = %id, error = %e, "tenant run aborted");
                        TenantReport::planning_failed(&id, anyhow::anyhow!("tenant run aborted: {e}"))
                    }
                },
            };
            reports.push(report);
        }
        reports
    }
}

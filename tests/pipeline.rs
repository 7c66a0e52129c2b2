//! End-to-end pipeline tests against the in-memory store.
//!
//! Capabilities are replaced by deterministic fakes: the summarizer echoes
//! its inputs tagged with the tier it was asked for, the embedder returns
//! tiny fixed vectors, and the record source serves whatever the test put
//! in it.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone, Utc};
use tokio::time::Instant;

use community_digest::config::{ChatConfig, ForumConfig, TenantConfig};
use community_digest::error::PipelineError;
use community_digest::pipeline::{
    resolve_task_start, Clock, JobKind, Pipeline, PipelineSettings, Task, TaskStart,
};
use community_digest::progress::{SyncProgressEvent, SyncProgressReporter};
use community_digest::sync_writer::SyncSettings;
use community_digest::traits::RecordSource;
use community_digest_core::embedding::EmbeddingProvider;
use community_digest_core::hierarchy::SummaryPrompts;
use community_digest_core::models::{
    DeletionDirective, ForumPost, RawRecord, RecordKind, SourceRecord, SummaryLevel, TableScope,
    TimestampField, VectorRecord,
};
use community_digest_core::store::memory::InMemoryStore;
use community_digest_core::store::{VectorStore, WriteOutcome};
use community_digest_core::summarize::Summarizer;

// ─── Fakes ──────────────────────────────────────────────────────────

#[derive(Default)]
struct FakeSource {
    chat: Mutex<Vec<RawRecord>>,
    forum: Mutex<Vec<SourceRecord>>,
    broken_tenants: BTreeSet<String>,
}

impl FakeSource {
    fn with_chat(records: Vec<RawRecord>) -> Self {
        Self {
            chat: Mutex::new(records),
            ..Default::default()
        }
    }
}

#[async_trait]
impl RecordSource for FakeSource {
    async fn chat_records(
        &self,
        tenant: &str,
        channels: &BTreeSet<String>,
        since: DateTime<Utc>,
    ) -> Result<Vec<RawRecord>> {
        if self.broken_tenants.contains(tenant) {
            bail!("chat export unavailable");
        }
        Ok(self
            .chat
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.tenant == tenant && channels.contains(&r.channel) && r.timestamp >= since)
            .cloned()
            .collect())
    }

    async fn forum_posts(
        &self,
        _tenant: &str,
        endpoint: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<SourceRecord>> {
        // Deliberately sloppy: returns other endpoints too.
        Ok(self
            .forum
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.updated_at() >= since || r.scope() != endpoint)
            .cloned()
            .collect())
    }

    async fn issues(&self, _: &str, _: &str, _: DateTime<Utc>) -> Result<Vec<SourceRecord>> {
        Ok(vec![])
    }
}

/// Echoes inputs tagged with the tier the prompt asks for.
#[derive(Default)]
struct EchoSummarizer {
    calls: Mutex<Vec<Instant>>,
    fail_marker: Mutex<Option<String>>,
}

impl EchoSummarizer {
    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Summarizer for EchoSummarizer {
    async fn summarize(&self, prompt: &str, inputs: &[String]) -> Result<String> {
        self.calls.lock().unwrap().push(Instant::now());
        if let Some(marker) = self.fail_marker.lock().unwrap().as_deref() {
            if inputs.iter().any(|i| i.contains(marker)) {
                bail!("model timed out");
            }
        }
        let tier = if prompt.contains("channel summaries") {
            "day"
        } else if prompt.contains("thread summaries") {
            "channel"
        } else {
            "thread"
        };
        Ok(format!("{tier}[{}]", inputs.join(" | ")))
    }
}

#[derive(Default)]
struct FixedEmbedder {
    calls: Mutex<Vec<Instant>>,
}

#[async_trait]
impl EmbeddingProvider for FixedEmbedder {
    fn model_name(&self) -> &str {
        "fixed"
    }

    fn dims(&self) -> usize {
        2
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.lock().unwrap().push(Instant::now());
        Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
    }
}

/// Fails, while armed, any write batch holding a row that matches `crash_when`.
struct CrashingStore {
    inner: InMemoryStore,
    crash_when: Box<dyn Fn(&VectorRecord) -> bool + Send + Sync>,
    armed: AtomicBool,
}

impl CrashingStore {
    fn new(crash_when: impl Fn(&VectorRecord) -> bool + Send + Sync + 'static) -> Self {
        Self {
            inner: InMemoryStore::new(),
            crash_when: Box::new(crash_when),
            armed: AtomicBool::new(true),
        }
    }
}

#[async_trait]
impl VectorStore for CrashingStore {
    async fn max_day_summary_date(&self, scope: &TableScope) -> Result<Option<NaiveDate>> {
        self.inner.max_day_summary_date(scope).await
    }

    async fn max_timestamp(
        &self,
        scope: &TableScope,
        field: TimestampField,
        within: Option<&str>,
    ) -> Result<Option<DateTime<Utc>>> {
        self.inner.max_timestamp(scope, field, within).await
    }

    async fn persisted_versions(
        &self,
        scope: &TableScope,
        within: &str,
        ids: &[String],
    ) -> Result<HashMap<String, Option<DateTime<Utc>>>> {
        self.inner.persisted_versions(scope, within, ids).await
    }

    async fn write_batch(
        &self,
        scope: &TableScope,
        directive: Option<&DeletionDirective>,
        records: &[VectorRecord],
    ) -> Result<WriteOutcome> {
        if self.armed.load(Ordering::SeqCst) && records.iter().any(|r| (self.crash_when)(r)) {
            bail!("simulated crash");
        }
        self.inner.write_batch(scope, directive, records).await
    }

    async fn records(&self, scope: &TableScope) -> Result<Vec<VectorRecord>> {
        self.inner.records(scope).await
    }
}

// ─── Helpers ────────────────────────────────────────────────────────

fn day(m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, m, d).unwrap()
}

fn at(m: u32, d: u32, h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, m, d, h, 0, 0).unwrap()
}

fn msg(id: &str, channel: &str, thread: &str, ts: DateTime<Utc>, body: &str) -> RawRecord {
    RawRecord {
        id: id.into(),
        tenant: "acme".into(),
        channel: channel.into(),
        thread: Some(thread.into()),
        timestamp: ts,
        author: "ana".into(),
        body: body.into(),
        kind: RecordKind::Message,
    }
}

fn post(id: &str, endpoint: &str, body: &str, updated: DateTime<Utc>) -> SourceRecord {
    SourceRecord::ForumPost(ForumPost {
        post_id: id.into(),
        endpoint: endpoint.into(),
        topic: Some("Help".into()),
        author: "bo".into(),
        body: body.into(),
        created_at: at(1, 1, 9),
        updated_at: updated,
    })
}

fn tenant(id: &str, channels: &[&str]) -> TenantConfig {
    TenantConfig {
        id: id.into(),
        chat: Some(ChatConfig {
            channels: channels.iter().map(|c| c.to_string()).collect(),
            from_date: NaiveDate::from_ymd_opt(2023, 12, 1).unwrap(),
            summaries: true,
            messages: true,
        }),
        forums: vec![ForumConfig {
            endpoint: "forum.acme.org".into(),
            from_date: NaiveDate::from_ymd_opt(2023, 12, 1).unwrap(),
        }],
        repositories: vec![],
    }
}

fn settings(today: NaiveDate) -> PipelineSettings {
    PipelineSettings {
        sync: SyncSettings {
            max_tokens: 256,
            batch_size: 4,
        },
        requests_per_minute: None,
        concurrency: 2,
        max_input_chars: 10_000,
        prompts: SummaryPrompts::from_prefix("Summarize this"),
        clock: Clock::Fixed {
            today,
            offset: FixedOffset::east_opt(0).unwrap(),
        },
    }
}

fn pipeline(
    store: Arc<dyn VectorStore>,
    source: Arc<FakeSource>,
    summarizer: Arc<EchoSummarizer>,
    settings: PipelineSettings,
) -> Pipeline {
    Pipeline::new(store, source, summarizer, Arc::new(FixedEmbedder::default()), settings)
}

/// Example conversation: C1/T1 with 3 messages, C2/T2 with 2, on 2024-01-01.
fn example_records() -> Vec<RawRecord> {
    vec![
        msg("1", "C1", "T1", at(1, 1, 9), "deploy failed"),
        msg("2", "C1", "T1", at(1, 1, 10), "rolled back"),
        msg("3", "C1", "T1", at(1, 1, 11), "fixed config"),
        msg("4", "C2", "T2", at(1, 1, 12), "new docs page"),
        msg("5", "C2", "T2", at(1, 1, 13), "looks good"),
    ]
}

fn levels(rows: &[VectorRecord], level: SummaryLevel) -> Vec<&VectorRecord> {
    rows.iter().filter(|r| r.metadata.level == Some(level)).collect()
}

async fn summaries(store: &dyn VectorStore) -> Vec<VectorRecord> {
    store.records(&TableScope::new("acme", "summaries")).await.unwrap()
}

fn summaries_task() -> Task {
    Task::ChatSummaries {
        channels: BTreeSet::from(["C1".to_string(), "C2".to_string()]),
        from_date: NaiveDate::from_ymd_opt(2023, 12, 1).unwrap(),
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[tokio::test]
async fn example_scenario_builds_full_hierarchy() {
    let store = Arc::new(InMemoryStore::new());
    let source = Arc::new(FakeSource::with_chat(example_records()));
    let summarizer = Arc::new(EchoSummarizer::default());
    let p = pipeline(store.clone(), source, summarizer.clone(), settings(day(1, 3)));

    let report = p.run_tenant(&tenant("acme", &["C1", "C2"]), JobKind::Summaries).await;
    assert!(report.is_ok(), "{report:?}");
    assert!(!report.has_incomplete_days());

    let rows = summaries(store.as_ref()).await;
    assert_eq!(levels(&rows, SummaryLevel::Thread).len(), 2);
    assert_eq!(levels(&rows, SummaryLevel::Channel).len(), 2);
    let days = levels(&rows, SummaryLevel::Day);
    assert_eq!(days.len(), 1);
    assert_eq!(days[0].metadata.date, Some(day(1, 1)));
    assert_eq!(days[0].metadata.sources.len(), 2);

    let c1 = levels(&rows, SummaryLevel::Channel)
        .into_iter()
        .find(|r| r.metadata.channel.as_deref() == Some("C1"))
        .unwrap();
    assert_eq!(c1.chunk.text, "channel[thread[ana: deploy failed | ana: rolled back | ana: fixed config]]");
    assert_eq!(summarizer.call_count(), 5);

    match resolve_task_start(store.as_ref(), "acme", &summaries_task()).await.unwrap() {
        TaskStart::Summaries(start) => {
            assert_eq!(start.last_complete, Some(day(1, 1)));
            assert_eq!(start.from_date, day(1, 2));
        }
        other => panic!("unexpected start {other:?}"),
    }
}

#[tokio::test]
async fn records_from_today_wait_for_tomorrow() {
    let store = Arc::new(InMemoryStore::new());
    let mut records = example_records();
    records.push(msg("6", "C1", "T1", at(1, 3, 8), "still going"));
    let source = Arc::new(FakeSource::with_chat(records));
    let p = pipeline(store.clone(), source, Arc::default(), settings(day(1, 3)));

    p.run_tenant(&tenant("acme", &["C1", "C2"]), JobKind::Summaries).await;
    let rows = summaries(store.as_ref()).await;
    assert!(rows.iter().all(|r| r.metadata.date == Some(day(1, 1))));
}

#[tokio::test]
async fn rerun_without_new_input_changes_nothing() {
    let store = Arc::new(InMemoryStore::new());
    let source = Arc::new(FakeSource::with_chat(example_records()));
    let summarizer = Arc::new(EchoSummarizer::default());
    let p = pipeline(store.clone(), source, summarizer.clone(), settings(day(1, 3)));
    let acme = tenant("acme", &["C1", "C2"]);

    p.run_tenant(&acme, JobKind::All).await;
    let first = summaries(store.as_ref()).await;
    let first_messages = store.records(&TableScope::new("acme", "messages")).await.unwrap();
    let calls = summarizer.call_count();

    let report = p.run_tenant(&acme, JobKind::All).await;
    assert!(report.is_ok(), "{report:?}");
    assert_eq!(summaries(store.as_ref()).await, first);
    assert_eq!(
        store.records(&TableScope::new("acme", "messages")).await.unwrap(),
        first_messages
    );
    assert_eq!(first_messages.len(), 5);
    assert_eq!(summarizer.call_count(), calls, "no summary work on rerun");
}

#[tokio::test]
async fn crash_before_day_document_is_repaired_next_run() {
    let store = Arc::new(CrashingStore::new(|r| {
        r.metadata.level == Some(SummaryLevel::Day) && r.metadata.date == Some(day(1, 2))
    }));
    let mut records = example_records();
    records.push(msg("7", "C1", "T3", at(1, 2, 9), "day two"));
    records.push(msg("8", "C2", "T9", at(1, 2, 10), "later deleted upstream"));
    let source = Arc::new(FakeSource::with_chat(records));
    let mut s = settings(day(1, 3));
    s.sync.batch_size = 1;
    let p = pipeline(store.clone(), source.clone(), Arc::default(), s);
    let acme = tenant("acme", &["C1", "C2"]);

    let report = p.run_tenant(&acme, JobKind::Summaries).await;
    assert!(!report.is_ok());

    // Children of 01-02 landed, its day document did not.
    let rows = summaries(store.as_ref()).await;
    assert_eq!(levels(&rows, SummaryLevel::Day).len(), 1);
    assert!(rows
        .iter()
        .any(|r| r.metadata.thread.as_deref() == Some("T9")));

    // Upstream lost message 8; the stray T9 summary must not survive.
    source.chat.lock().unwrap().retain(|r| r.id != "8");
    store.armed.store(false, Ordering::SeqCst);

    match resolve_task_start(store.as_ref(), "acme", &summaries_task()).await.unwrap() {
        TaskStart::Summaries(start) => {
            assert_eq!(start.from_date, day(1, 2));
            assert!(start.directive.is_some());
        }
        other => panic!("unexpected start {other:?}"),
    }

    let report = p.run_tenant(&acme, JobKind::Summaries).await;
    assert!(report.is_ok(), "{report:?}");

    let rows = summaries(store.as_ref()).await;
    let day_two: Vec<_> = rows
        .iter()
        .filter(|r| r.metadata.date == Some(day(1, 2)))
        .collect();
    assert_eq!(day_two.iter().filter(|r| r.metadata.level == Some(SummaryLevel::Day)).count(), 1);
    assert_eq!(day_two.iter().filter(|r| r.metadata.level == Some(SummaryLevel::Channel)).count(), 1);
    assert!(rows.iter().all(|r| r.metadata.thread.as_deref() != Some("T9")));
    assert_eq!(levels(&rows, SummaryLevel::Day).len(), 2);
}

/// Every stored document has all of its chunks, `0..chunk_count`.
fn assert_documents_whole(rows: &[VectorRecord]) {
    let mut seen: HashMap<&str, (i64, BTreeSet<i64>)> = HashMap::new();
    for r in rows {
        let entry = seen
            .entry(r.chunk.document_id.as_str())
            .or_insert((r.chunk_count, BTreeSet::new()));
        entry.1.insert(r.chunk.chunk_index);
    }
    for (doc, (count, indexes)) in seen {
        assert_eq!(indexes, (0..count).collect::<BTreeSet<i64>>(), "document {doc} is missing chunks");
    }
}

#[tokio::test]
async fn crash_inside_a_multi_chunk_day_document_leaves_the_day_incomplete() {
    // Crashes while writing the second chunk of the 01-01 day summary.
    let store = Arc::new(CrashingStore::new(|r| {
        r.metadata.level == Some(SummaryLevel::Day) && r.chunk.chunk_index > 0
    }));
    let source = Arc::new(FakeSource::with_chat(example_records()));
    let mut s = settings(day(1, 3));
    s.sync.batch_size = 1;
    s.sync.max_tokens = 8;
    let p = pipeline(store.clone(), source, Arc::default(), s);
    let acme = tenant("acme", &["C1", "C2"]);

    let report = p.run_tenant(&acme, JobKind::Summaries).await;
    assert!(!report.is_ok());

    let rows = summaries(store.as_ref()).await;
    assert!(levels(&rows, SummaryLevel::Day).is_empty(), "no part of the day document may land");
    assert!(!levels(&rows, SummaryLevel::Thread).is_empty());
    assert_documents_whole(&rows);
    match resolve_task_start(store.as_ref(), "acme", &summaries_task()).await.unwrap() {
        TaskStart::Summaries(start) => {
            assert_eq!(start.last_complete, None);
            assert_eq!(start.from_date, NaiveDate::from_ymd_opt(2023, 12, 1).unwrap());
        }
        other => panic!("unexpected start {other:?}"),
    }

    store.armed.store(false, Ordering::SeqCst);
    let report = p.run_tenant(&acme, JobKind::Summaries).await;
    assert!(report.is_ok(), "{report:?}");

    let rows = summaries(store.as_ref()).await;
    let days = levels(&rows, SummaryLevel::Day);
    assert!(days.len() > 1, "day summary should span several chunks");
    assert!(days.iter().all(|r| r.metadata.date == Some(day(1, 1))));
    assert_documents_whole(&rows);
}

#[tokio::test]
async fn crash_inside_a_multi_chunk_forum_post_is_retried_next_run() {
    let store = Arc::new(CrashingStore::new(|r| {
        r.chunk.text.starts_with("edited") && r.chunk.chunk_index > 0
    }));
    store.armed.store(false, Ordering::SeqCst);
    let source = Arc::new(FakeSource::default());
    source.forum.lock().unwrap().push(post(
        "p1",
        "forum.acme.org",
        "first paragraph\n\nsecond paragraph\n\nthird paragraph",
        at(1, 1, 9),
    ));
    let mut s = settings(day(1, 10));
    s.sync.max_tokens = 4;
    s.sync.batch_size = 1;
    let p = pipeline(store.clone(), source.clone(), Arc::default(), s);
    let acme = tenant("acme", &["C1"]);
    let forum = TableScope::new("acme", "forum");

    assert!(p.run_tenant(&acme, JobKind::Forums).await.is_ok());
    let original = store.records(&forum).await.unwrap();
    assert_eq!(original.len(), 3);

    {
        let mut posts = source.forum.lock().unwrap();
        posts.clear();
        posts.push(post(
            "p1",
            "forum.acme.org",
            "edited first\n\nedited second\n\nedited third",
            at(1, 5, 9),
        ));
    }
    store.armed.store(true, Ordering::SeqCst);
    assert!(!p.run_tenant(&acme, JobKind::Forums).await.is_ok());

    // The failed replace left the previous version untouched.
    assert_eq!(store.records(&forum).await.unwrap(), original);

    store.armed.store(false, Ordering::SeqCst);
    let report = p.run_tenant(&acme, JobKind::Forums).await;
    let stats = report.tasks[0].result.as_ref().unwrap();
    assert_eq!(stats.replaced, 1);

    let rows = store.records(&forum).await.unwrap();
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|r| r.chunk.text.starts_with("edited")));
    assert_documents_whole(&rows);
}

#[derive(Default)]
struct RecordingProgress {
    events: Mutex<Vec<SyncProgressEvent>>,
}

impl SyncProgressReporter for RecordingProgress {
    fn report(&self, event: SyncProgressEvent) {
        self.events.lock().unwrap().push(event);
    }
}

#[tokio::test]
async fn summarizing_progress_advances_per_date() {
    let store = Arc::new(InMemoryStore::new());
    let mut records = example_records();
    records.push(msg("7", "C1", "T3", at(1, 2, 9), "day two"));
    let source = Arc::new(FakeSource::with_chat(records));
    let progress = Arc::new(RecordingProgress::default());
    let p = pipeline(store, source, Arc::default(), settings(day(1, 3)))
        .with_progress(progress.clone());

    let report = p.run_tenant(&tenant("acme", &["C1", "C2"]), JobKind::Summaries).await;
    assert!(report.is_ok(), "{report:?}");

    let steps: Vec<(u64, u64)> = progress
        .events
        .lock()
        .unwrap()
        .iter()
        .filter_map(|e| match e {
            SyncProgressEvent::Summarizing { n, total, .. } => Some((*n, *total)),
            _ => None,
        })
        .collect();
    assert_eq!(steps, vec![(1, 2), (2, 2)]);
}

#[tokio::test]
async fn failed_unit_leaves_its_date_and_later_dates_unwritten() {
    let store = Arc::new(InMemoryStore::new());
    let mut records = example_records();
    records.push(msg("7", "C1", "T3", at(1, 2, 9), "day two"));
    let source = Arc::new(FakeSource::with_chat(records));
    let summarizer = Arc::new(EchoSummarizer::default());
    *summarizer.fail_marker.lock().unwrap() = Some("new docs page".into());
    let p = pipeline(store.clone(), source, summarizer.clone(), settings(day(1, 3)));
    let acme = tenant("acme", &["C1", "C2"]);

    let report = p.run_tenant(&acme, JobKind::Summaries).await;
    assert!(report.is_ok(), "unit failures are not task errors");
    assert!(report.has_incomplete_days());
    let stats = report.tasks[0].result.as_ref().unwrap();
    assert_eq!(stats.incomplete_from, Some(day(1, 1)));
    assert_eq!(stats.failures, 1);
    assert!(summaries(store.as_ref()).await.is_empty());

    *summarizer.fail_marker.lock().unwrap() = None;
    let report = p.run_tenant(&acme, JobKind::Summaries).await;
    assert!(!report.has_incomplete_days());
    let rows = summaries(store.as_ref()).await;
    assert_eq!(levels(&rows, SummaryLevel::Day).len(), 2);
}

#[tokio::test]
async fn message_table_skips_system_records_and_resumes_after_cursor() {
    let store = Arc::new(InMemoryStore::new());
    let mut records = example_records();
    let mut starter = msg("s", "C1", "T1", at(1, 1, 8), "thread started");
    starter.kind = RecordKind::ThreadStarter;
    let mut hook = msg("w", "C1", "T1", at(1, 1, 8), "build passed");
    hook.kind = RecordKind::Webhook;
    records.extend([starter, hook, msg("1", "C1", "T1", at(1, 1, 9), "deploy failed")]);
    let source = Arc::new(FakeSource::with_chat(records));
    let p = pipeline(store.clone(), source.clone(), Arc::default(), settings(day(1, 3)));
    let acme = tenant("acme", &["C1", "C2"]);

    let report = p.run_tenant(&acme, JobKind::Messages).await;
    let stats = report.tasks[0].result.as_ref().unwrap();
    assert_eq!(stats.written.documents, 5);

    source
        .chat
        .lock()
        .unwrap()
        .push(msg("9", "C2", "T2", at(1, 4, 9), "follow-up"));
    let report = p.run_tenant(&acme, JobKind::Messages).await;
    let stats = report.tasks[0].result.as_ref().unwrap();
    assert_eq!(stats.fetched, 1);
    assert_eq!(
        store.records(&TableScope::new("acme", "messages")).await.unwrap().len(),
        6
    );
}

#[tokio::test]
async fn edited_forum_post_replaces_its_previous_version() {
    let store = Arc::new(InMemoryStore::new());
    let source = Arc::new(FakeSource::default());
    source.forum.lock().unwrap().push(post(
        "p1",
        "forum.acme.org",
        "first paragraph\n\nsecond paragraph\n\nthird paragraph",
        at(1, 1, 9),
    ));
    let mut s = settings(day(1, 10));
    s.sync.max_tokens = 4;
    let p = pipeline(store.clone(), source.clone(), Arc::default(), s);
    let acme = tenant("acme", &["C1"]);
    let forum = TableScope::new("acme", "forum");

    p.run_tenant(&acme, JobKind::Forums).await;
    assert!(store.records(&forum).await.unwrap().len() > 1);

    {
        let mut posts = source.forum.lock().unwrap();
        posts.clear();
        posts.push(post("p1", "forum.acme.org", "edited", at(1, 5, 9)));
        posts.push(post("p1", "forum.acme.org", "stale copy", at(1, 2, 9)));
        posts.push(post("p1", "other.example", "same id elsewhere", at(1, 6, 9)));
    }
    let report = p.run_tenant(&acme, JobKind::Forums).await;
    let stats = report.tasks[0].result.as_ref().unwrap();
    assert_eq!(stats.replaced, 1);

    let rows = store.records(&forum).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].chunk.text, "edited");
    assert_eq!(rows[0].metadata.scope.as_deref(), Some("forum.acme.org"));

    // Same version again: nothing to do.
    let report = p.run_tenant(&acme, JobKind::Forums).await;
    let stats = report.tasks[0].result.as_ref().unwrap();
    assert_eq!(stats.replaced, 0);
    assert_eq!(stats.written.documents, 0);
    assert_eq!(store.records(&forum).await.unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn capability_calls_stay_under_the_rate_ceiling() {
    let store = Arc::new(InMemoryStore::new());
    let source = Arc::new(FakeSource::with_chat(example_records()));
    let summarizer = Arc::new(EchoSummarizer::default());
    let embedder = Arc::new(FixedEmbedder::default());
    let mut s = settings(day(1, 3));
    s.requests_per_minute = Some(3);
    s.sync.batch_size = 2;
    let p = Pipeline::new(store, source, summarizer.clone(), embedder.clone(), s);

    let start = Instant::now();
    let report = p.run_tenant(&tenant("acme", &["C1", "C2"]), JobKind::Summaries).await;
    assert!(report.is_ok(), "{report:?}");

    let mut stamps: Vec<Instant> = summarizer.calls.lock().unwrap().clone();
    stamps.extend(embedder.calls.lock().unwrap().iter().copied());
    stamps.sort();
    // 5 summaries + 3 embedding batches.
    assert_eq!(stamps.len(), 8);
    assert!(Instant::now() - start >= std::time::Duration::from_secs(120));
    for (i, first) in stamps.iter().enumerate() {
        let in_window = stamps[i..]
            .iter()
            .take_while(|t| t.duration_since(*first) < std::time::Duration::from_secs(60))
            .count();
        assert!(in_window <= 3, "window starting at call {i} saw {in_window} calls");
    }
}

#[tokio::test]
async fn tenant_failures_stay_with_their_tenant() {
    let store = Arc::new(InMemoryStore::new());
    let mut records = example_records();
    records.extend(example_records().into_iter().map(|mut r| {
        r.tenant = "broken".into();
        r
    }));
    let source = Arc::new(FakeSource {
        chat: Mutex::new(records),
        broken_tenants: BTreeSet::from(["broken".to_string()]),
        ..Default::default()
    });
    let p = Arc::new(pipeline(store.clone(), source, Arc::default(), settings(day(1, 3))));

    let tenants = vec![
        tenant("acme", &["C1", "C2"]),
        tenant("empty", &[]),
        tenant("broken", &["C1"]),
    ];
    let only: Vec<String> = ["ghost", "empty", "broken", "acme"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let reports = p.run_all(&tenants, &only, JobKind::Summaries).await;
    assert_eq!(reports.len(), 4);

    let ghost = reports[0].error.as_ref().unwrap();
    assert_eq!(
        ghost.downcast_ref::<PipelineError>(),
        Some(&PipelineError::UnknownTenant("ghost".into()))
    );
    let empty = reports[1].error.as_ref().unwrap();
    assert_eq!(
        empty.downcast_ref::<PipelineError>(),
        Some(&PipelineError::NoSelectedChannels("empty".into()))
    );
    assert!(reports[2].error.is_none());
    assert!(reports[2].tasks[0].result.is_err());
    assert!(reports[3].is_ok(), "{:?}", reports[3]);

    assert_eq!(levels(&summaries(store.as_ref()).await, SummaryLevel::Day).len(), 1);
    assert!(store
        .records(&TableScope::new("broken", "summaries"))
        .await
        .unwrap()
        .is_empty());
}

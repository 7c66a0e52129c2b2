//! Core data models used throughout Community Digest.
//!
//! Records flow through the pipeline as:
//!
//! ```text
//! RawRecord ─▶ GroupedRecords ─▶ SummaryNode ─▶ Document ─▶ VectorRecord
//! SourceRecord ──────────(reconcile)────────────▶ Document ─▶ VectorRecord
//! ```
//!
//! Only [`VectorRecord`]s are durable. Checkpoints are never stored on their
//! own; they are derived from [`DocumentMetadata`] of persisted rows.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Classification of a raw chat record, as reported by the fetcher.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    #[default]
    Message,
    Reply,
    /// System record announcing a new thread; carries no conversation.
    ThreadStarter,
    /// Generated by an integration rather than a community member.
    Webhook,
}

impl RecordKind {
    /// Whether records of this kind take part in summaries and the message table.
    pub fn is_conversational(self) -> bool {
        matches!(self, RecordKind::Message | RecordKind::Reply)
    }
}

/// A time-stamped chat record produced by a fetcher. Immutable, tenant-scoped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub id: String,
    /// Filled in by the fetcher when the export omits it.
    #[serde(default)]
    pub tenant: String,
    pub channel: String,
    #[serde(default)]
    pub thread: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub author: String,
    pub body: String,
    #[serde(default)]
    pub kind: RecordKind,
}

impl RawRecord {
    /// Line fed to the thread-level summarization call.
    pub fn summary_line(&self) -> String {
        format!("{}: {}", self.author, self.body.trim())
    }

    /// Convert into a message-table document (one document per record).
    pub fn to_document(&self) -> Document {
        Document {
            id: stable_id(&["message", &self.tenant, &self.id]),
            text: self.body.clone(),
            metadata: DocumentMetadata {
                date: Some(self.timestamp.date_naive()),
                channel: Some(self.channel.clone()),
                thread: self.thread.clone(),
                source_id: Some(self.id.clone()),
                timestamp: Some(self.timestamp),
                author: Some(self.author.clone()),
                ..Default::default()
            },
        }
    }
}

/// A tenant + table pair: the unit of isolation in the vector store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableScope {
    pub tenant: String,
    pub table: String,
}

impl TableScope {
    pub fn new(tenant: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            table: table.into(),
        }
    }
}

impl fmt::Display for TableScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.tenant, self.table)
    }
}

/// Granularity of a summary node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryLevel {
    Thread,
    Channel,
    Day,
}

impl SummaryLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            SummaryLevel::Thread => "thread",
            SummaryLevel::Channel => "channel",
            SummaryLevel::Day => "day",
        }
    }
}

impl fmt::Display for SummaryLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One summary in the thread → channel → day tree.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryNode {
    pub level: SummaryLevel,
    pub tenant: String,
    pub date: NaiveDate,
    /// Present for thread and channel levels.
    pub channel: Option<String>,
    /// Set only at the thread level, and absent there for records posted
    /// directly in the channel.
    pub thread: Option<String>,
    pub text: String,
    /// Record ids (thread level) or document ids of the consumed child nodes.
    pub sources: Vec<String>,
}

impl SummaryNode {
    pub fn document_id(&self) -> String {
        let date = self.date.to_string();
        stable_id(&[
            "summary",
            &self.tenant,
            self.level.as_str(),
            &date,
            self.channel.as_deref().unwrap_or(""),
            self.thread.as_deref().unwrap_or(""),
        ])
    }

    pub fn into_document(self) -> Document {
        let id = self.document_id();
        Document {
            id,
            text: self.text,
            metadata: DocumentMetadata {
                level: Some(self.level),
                date: Some(self.date),
                channel: self.channel,
                thread: self.thread,
                sources: self.sources,
                ..Default::default()
            },
        }
    }
}

/// Metadata persisted alongside every vector row.
///
/// Absent fields are omitted from the serialized JSON so that stores can
/// treat "missing" and "null" identically.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<SummaryLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread: Option<String>,
    /// Identifier of the originating record in its source system.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    /// Namespace for `source_id` (forum endpoint, repository name).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<String>,
}

impl DocumentMetadata {
    /// True only for a well-formed top-level summary: day level, a date,
    /// and no channel or thread. Anything else is not evidence of a
    /// completed day.
    pub fn is_day_summary(&self) -> bool {
        self.level == Some(SummaryLevel::Day)
            && self.date.is_some()
            && self.channel.is_none()
            && self.thread.is_none()
    }

    pub fn timestamp_field(&self, field: TimestampField) -> Option<DateTime<Utc>> {
        match field {
            TimestampField::Timestamp => self.timestamp,
            TimestampField::UpdatedAt => self.updated_at,
        }
    }
}

/// Which metadata timestamp a cursor query reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampField {
    Timestamp,
    UpdatedAt,
}

impl TimestampField {
    /// JSON key inside the serialized metadata.
    pub fn key(self) -> &'static str {
        match self {
            TimestampField::Timestamp => "timestamp",
            TimestampField::UpdatedAt => "updated_at",
        }
    }
}

/// A document ready for chunking and embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub text: String,
    pub metadata: DocumentMetadata,
}

/// A chunk of a document's text.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub text: String,
    pub hash: String,
}

/// One persisted row: an embedded chunk plus its document's metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorRecord {
    pub chunk: Chunk,
    /// Number of chunks the parent document was split into on this write.
    pub chunk_count: i64,
    pub embedding: Vec<f32>,
    pub metadata: DocumentMetadata,
}

/// Source systems whose records may be edited after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Forum,
    Repository,
}

impl SourceKind {
    /// Vector-store table holding this kind of record.
    pub fn table(self) -> &'static str {
        match self {
            SourceKind::Forum => "forum",
            SourceKind::Repository => "github",
        }
    }
}

/// A forum post as delivered by a forum fetcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForumPost {
    pub post_id: String,
    pub endpoint: String,
    #[serde(default)]
    pub topic: Option<String>,
    pub author: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A repository issue (or pull request) as delivered by a code-host fetcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub number: i64,
    pub repository: String,
    pub title: String,
    pub author: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub state: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A record from a mutable source, validated at the fetcher boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceRecord {
    ForumPost(ForumPost),
    Issue(Issue),
}

impl SourceRecord {
    pub fn kind(&self) -> SourceKind {
        match self {
            SourceRecord::ForumPost(_) => SourceKind::Forum,
            SourceRecord::Issue(_) => SourceKind::Repository,
        }
    }

    /// Identifier within [`scope`](Self::scope). Not globally unique.
    pub fn identifier(&self) -> String {
        match self {
            SourceRecord::ForumPost(p) => p.post_id.clone(),
            SourceRecord::Issue(i) => i.number.to_string(),
        }
    }

    pub fn scope(&self) -> &str {
        match self {
            SourceRecord::ForumPost(p) => &p.endpoint,
            SourceRecord::Issue(i) => &i.repository,
        }
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        match self {
            SourceRecord::ForumPost(p) => p.updated_at,
            SourceRecord::Issue(i) => i.updated_at,
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            SourceRecord::ForumPost(p) => p.created_at,
            SourceRecord::Issue(i) => i.created_at,
        }
    }

    pub fn to_document(&self, tenant: &str) -> Document {
        let identifier = self.identifier();
        let (text, author, title) = match self {
            SourceRecord::ForumPost(p) => (p.body.clone(), p.author.clone(), p.topic.clone()),
            SourceRecord::Issue(i) => {
                let text = if i.body.trim().is_empty() {
                    i.title.clone()
                } else {
                    format!("{}\n\n{}", i.title, i.body)
                };
                (text, i.author.clone(), Some(i.title.clone()))
            }
        };
        Document {
            id: stable_id(&[self.kind().table(), tenant, self.scope(), &identifier]),
            text,
            metadata: DocumentMetadata {
                date: Some(self.created_at().date_naive()),
                source_id: Some(identifier),
                scope: Some(self.scope().to_string()),
                timestamp: Some(self.created_at()),
                updated_at: Some(self.updated_at()),
                author: Some(author),
                title,
                ..Default::default()
            },
        }
    }
}

/// Which persisted rows a [`DeletionDirective`] removes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeletePredicate {
    /// Every row whose metadata `date` is strictly after the given day.
    DatesAfter(NaiveDate),
    /// Rows whose `source_id` is in `ids` and whose `scope` equals `within`.
    SourceIds {
        within: String,
        ids: BTreeSet<String>,
    },
}

/// An ephemeral delete instruction, consumed once by the sync writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionDirective {
    pub scope: TableScope,
    pub predicate: DeletePredicate,
}

impl DeletionDirective {
    pub fn matches(&self, metadata: &DocumentMetadata) -> bool {
        match &self.predicate {
            DeletePredicate::DatesAfter(day) => metadata.date.is_some_and(|d| d > *day),
            DeletePredicate::SourceIds { within, ids } => {
                metadata.scope.as_deref() == Some(within.as_str())
                    && metadata
                        .source_id
                        .as_ref()
                        .is_some_and(|id| ids.contains(id))
            }
        }
    }
}

/// Deterministic UUIDv5 over the given parts.
///
/// Identical inputs always produce the same id, which is what makes
/// re-running a sync an overwrite rather than a duplicate.
pub fn stable_id(parts: &[&str]) -> String {
    let joined = parts.join("\u{1f}");
    Uuid::new_v5(&Uuid::NAMESPACE_OID, joined.as_bytes()).to_string()
}

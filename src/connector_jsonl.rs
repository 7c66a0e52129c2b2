//! JSONL export reader.
//!
//! Reads one directory per tenant under the configured root:
//!
//! ```text
//! {root}/{tenant}/messages.jsonl      one RawRecord per line
//! {root}/{tenant}/forum_posts.jsonl   one ForumPost per line
//! {root}/{tenant}/issues.jsonl        one Issue per line
//! ```
//!
//! A missing file means "no records". A malformed line fails the whole read
//! with its line number; nothing loosely typed gets past this boundary.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use tracing::debug;

use community_digest_core::models::{ForumPost, Issue, RawRecord, SourceRecord};

use crate::traits::RecordSource;

pub const MESSAGES_FILE: &str = "messages.jsonl";
pub const FORUM_POSTS_FILE: &str = "forum_posts.jsonl";
pub const ISSUES_FILE: &str = "issues.jsonl";

pub struct JsonlSource {
    root: PathBuf,
}

impl JsonlSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path(&self, tenant: &str, file: &str) -> PathBuf {
        self.root.join(tenant).join(file)
    }
}

async fn read_lines<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "export file missing; treating as empty");
            return Ok(Vec::new());
        }
        Err(e) => return Err(e).with_context(|| format!("Failed to read {}", path.display())),
    };

    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("{}:{}: invalid record", path.display(), n + 1))
        })
        .collect()
}

#[async_trait]
impl RecordSource for JsonlSource {
    async fn chat_records(
        &self,
        tenant: &str,
        channels: &BTreeSet<String>,
        since: DateTime<Utc>,
    ) -> Result<Vec<RawRecord>> {
        let records: Vec<RawRecord> = read_lines(&self.path(tenant, MESSAGES_FILE)).await?;
        Ok(records
            .into_iter()
            .filter(|r| channels.contains(&r.channel) && r.timestamp >= since)
            .map(|mut r| {
                if r.tenant.is_empty() {
                    r.tenant = tenant.to_string();
                }
                r
            })
            .filter(|r| r.tenant == tenant)
            .collect())
    }

    async fn forum_posts(
        &self,
        tenant: &str,
        endpoint: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<SourceRecord>> {
        let posts: Vec<ForumPost> = read_lines(&self.path(tenant, FORUM_POSTS_FILE)).await?;
        Ok(posts
            .into_iter()
            .filter(|p| p.endpoint == endpoint && p.updated_at >= since)
            .map(SourceRecord::ForumPost)
            .collect())
    }

    async fn issues(
        &self,
        tenant: &str,
        repository: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<SourceRecord>> {
        let issues: Vec<Issue> = read_lines(&self.path(tenant, ISSUES_FILE)).await?;
        Ok(issues
            .into_iter()
            .filter(|i| i.repository == repository && i.updated_at >= since)
            .map(SourceRecord::Issue)
            .collect())
    }
}

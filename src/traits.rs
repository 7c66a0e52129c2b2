//! Fetcher seam.
//!
//! A [`RecordSource`] supplies raw records for one tenant. Records may come
//! back in any order and may repeat across calls; the pipeline deduplicates.
//! Network fetchers for specific chat, forum, or code-hosting services plug
//! in here. The repository ships [`JsonlSource`](crate::connector_jsonl::JsonlSource)
//! for local exports and tests.
//!
//! # Example
//!
//! ```rust
//! use std::collections::BTreeSet;
//! use anyhow::Result;
//! use async_trait::async_trait;
//! use chrono::{DateTime, Utc};
//! use community_digest::traits::RecordSource;
//! use community_digest_core::models::{RawRecord, SourceRecord};
//!
//! struct Empty;
//!
//! #[async_trait]
//! impl RecordSource for Empty {
//!     async fn chat_records(&self, _: &str, _: &BTreeSet<String>, _: DateTime<Utc>) -> Result<Vec<RawRecord>> {
//!         Ok(vec![])
//!     }
//!     async fn forum_posts(&self, _: &str, _: &str, _: DateTime<Utc>) -> Result<Vec<SourceRecord>> {
//!         Ok(vec![])
//!     }
//!     async fn issues(&self, _: &str, _: &str, _: DateTime<Utc>) -> Result<Vec<SourceRecord>> {
//!         Ok(vec![])
//!     }
//! }
//! ```

use std::collections::BTreeSet;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use community_digest_core::models::{RawRecord, SourceRecord};

#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Chat records of `tenant` in `channels` with `timestamp >= since`.
    async fn chat_records(
        &self,
        tenant: &str,
        channels: &BTreeSet<String>,
        since: DateTime<Utc>,
    ) -> Result<Vec<RawRecord>>;

    /// Forum posts from `endpoint` with `updated_at >= since`.
    async fn forum_posts(
        &self,
        tenant: &str,
        endpoint: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<SourceRecord>>;

    /// Issues of `repository` with `updated_at >= since`.
    async fn issues(
        &self,
        tenant: &str,
        repository: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<SourceRecord>>;
}

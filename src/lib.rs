//! # Community Digest
//!
//! Incremental, crash-safe summarization of community conversations into a
//! per-tenant vector store.
//!
//! Chat records are grouped by day, channel, and thread and rolled up into
//! thread, channel, and day summaries. Forum posts and repository issues are
//! reconciled against what is already stored so edits replace old versions.
//! Everything is chunked, embedded, and written in ordered batches. Resume
//! points are derived from the stored rows themselves, so an interrupted run
//! is repaired by the next one.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌───────────────────────────┐   ┌──────────────┐
//! │ RecordSource │──▶│ Pipeline (per tenant)     │──▶│ SQLite       │
//! │ JSONL export │   │ group → summarize → write │   │ vectors      │
//! └──────────────┘   │ reconcile → write         │   └──────────────┘
//!                    └────────────┬──────────────┘
//!                                 │ paced
//!                     ┌───────────┴───────────┐
//!                     ▼                       ▼
//!               ┌────────────┐         ┌────────────┐
//!               │ Summarizer │         │ Embeddings │
//!               └────────────┘         └────────────┘
//! ```
//!
//! The domain logic (grouping, hierarchy, checkpoints, reconciliation,
//! chunking) lives in `community-digest-core`; this crate adds the SQLite
//! store, HTTP providers, pacing, orchestration, and the `digest` CLI.
//!
//! ## Quick Start
//!
//! ```bash
//! digest init                       # create database
//! digest sync all                   # every tenant, every source
//! digest sync summaries --tenant acme
//! digest checkpoint acme            # where the next run starts
//! digest stats
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`pipeline`] | Per-tenant task planning and execution |
//! | [`sync_writer`] | Ordered chunk → embed → upsert batches |
//! | [`sqlite_store`] | SQLite `VectorStore` |
//! | [`rate_limit`] | Per-tenant pacing of capability calls |
//! | [`embedding`] | Embedding providers |
//! | [`summarizer`] | Summarization providers |
//! | [`traits`] | Record source seam |
//! | [`connector_jsonl`] | JSONL export reader |
//! | [`stats`] | Stats and checkpoint inspection |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod config;
pub mod connector_jsonl;
pub mod db;
pub mod embedding;
pub mod error;
pub mod ingest;
pub mod logging;
pub mod migrate;
pub mod pipeline;
pub mod progress;
pub mod rate_limit;
mod retry;
pub mod sqlite_store;
pub mod stats;
pub mod summarizer;
pub mod sync_writer;
pub mod traits;

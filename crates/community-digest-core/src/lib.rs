//! # Community Digest Core
//!
//! Runtime-free logic for Community Digest: the record and document model,
//! day/channel/thread grouping, the three-tier summary hierarchy, derived
//! checkpoints, reconciliation of mutable sources, chunking, and the
//! storage / capability traits the application wires together.
//!
//! This crate contains no tokio, sqlx, or HTTP dependencies. Every
//! suspension point (summarization, embedding, store access) goes through
//! a trait object so the application decides how those calls are paced,
//! retried, and persisted.
//!
//! ## Pipeline
//!
//! ```text
//! checkpoint ──▶ grouping ──▶ hierarchy ──▶ (reconcile) ──▶ sync writer
//!   (store)       (pure)     (Summarizer)      (pure)      (app crate)
//! ```

pub mod checkpoint;
pub mod chunk;
pub mod embedding;
pub mod grouping;
pub mod hierarchy;
pub mod models;
pub mod reconcile;
pub mod store;
pub mod summarize;

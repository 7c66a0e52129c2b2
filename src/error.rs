//! Tenant-local failure classes.
//!
//! Everything else travels as `anyhow::Error`. These variants exist so the
//! orchestrator and the CLI can tell a misconfigured tenant apart from a
//! capability or storage failure via `downcast_ref`.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("unknown tenant: '{0}'")]
    UnknownTenant(String),

    #[error("tenant '{0}' has no selected chat channels")]
    NoSelectedChannels(String),

    #[error("tenant '{tenant}' has nothing configured for job '{job}'")]
    NoSources { tenant: String, job: String },
}

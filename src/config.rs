//! Configuration parsing and validation.
//!
//! Community Digest is configured via a TOML file (default: `config/digest.toml`).
//! The file is split into global sections (database, chunking, capabilities,
//! sync pacing, logging) and one `[[tenants]]` entry per community.
//!
//! # Example
//!
//! ```toml
//! [db]
//! path = "./data/digest.sqlite"
//!
//! [chunking]
//! max_tokens = 256
//!
//! [summarization]
//! provider = "openai"
//! model = "gpt-4o-mini"
//!
//! [sync]
//! requests_per_minute = 500
//!
//! [[tenants]]
//! id = "acme"
//! [tenants.chat]
//! channels = ["general"]
//! from_date = "2024-01-01"
//! ```
//!
//! Whole-file problems (bad numbers, unknown providers, duplicate tenants)
//! fail [`load_config`]. Problems that only affect one tenant, such as an
//! empty channel list, are left for that tenant's run to report.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub summarization: SummarizationConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub source: Option<SourceConfig>,
    #[serde(default)]
    pub tenants: Vec<TenantConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_max_tokens() -> usize {
    256
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Chunks per embedding request, and so per write batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL for Ollama (default `http://localhost:11434`).
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            url: None,
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SummarizationConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_summary_retries")]
    pub max_retries: u32,
    #[serde(default = "default_summary_timeout_secs")]
    pub timeout_secs: u64,
    /// Character budget of a single summarization call (tree-summarize).
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
    #[serde(default = "default_prompt_prefix")]
    pub prompt_prefix: String,
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for SummarizationConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            max_retries: default_summary_retries(),
            timeout_secs: default_summary_timeout_secs(),
            max_input_chars: default_max_input_chars(),
            prompt_prefix: default_prompt_prefix(),
            url: None,
        }
    }
}

impl SummarizationConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    100
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_summary_retries() -> u32 {
    3
}
fn default_summary_timeout_secs() -> u64 {
    120
}
fn default_max_input_chars() -> usize {
    12_000
}
fn default_prompt_prefix() -> String {
    "Please make a concise summary based only on the provided text from this".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    /// Ceiling on capability calls per rolling minute, per tenant. Unpaced when absent.
    #[serde(default)]
    pub requests_per_minute: Option<u32>,
    /// Tenants processed in parallel.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: None,
            concurrency: default_concurrency(),
        }
    }
}

fn default_concurrency() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Root of the JSONL export tree read by the bundled record source.
#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    pub root: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TenantConfig {
    pub id: String,
    #[serde(default)]
    pub chat: Option<ChatConfig>,
    #[serde(default)]
    pub forums: Vec<ForumConfig>,
    #[serde(default)]
    pub repositories: Vec<RepositoryConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    #[serde(default)]
    pub channels: Vec<String>,
    pub from_date: NaiveDate,
    #[serde(default = "default_true")]
    pub summaries: bool,
    #[serde(default = "default_true")]
    pub messages: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct ForumConfig {
    pub endpoint: String,
    pub from_date: NaiveDate,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RepositoryConfig {
    pub name: String,
    pub from_date: NaiveDate,
}

impl Config {
    pub fn tenant(&self, id: &str) -> Option<&TenantConfig> {
        self.tenants.iter().find(|t| t.id == id)
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if config.chunking.max_tokens == 0 {
        bail!("chunking.max_tokens must be > 0");
    }
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }
    if config.sync.concurrency == 0 {
        bail!("sync.concurrency must be >= 1");
    }
    if config.sync.requests_per_minute == Some(0) {
        bail!("sync.requests_per_minute must be > 0 when set");
    }
    if config.summarization.max_input_chars == 0 {
        bail!("summarization.max_input_chars must be > 0");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }
    if config.embedding.is_enabled() {
        if config.embedding.dims.unwrap_or(0) == 0 {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.summarization.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => bail!(
            "Unknown summarization provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }
    if config.summarization.is_enabled() && config.summarization.model.is_none() {
        bail!(
            "summarization.model must be specified when provider is '{}'",
            config.summarization.provider
        );
    }

    let mut seen = HashSet::new();
    for tenant in &config.tenants {
        if tenant.id.trim().is_empty() {
            bail!("tenants[].id must not be empty");
        }
        if !seen.insert(tenant.id.as_str()) {
            bail!("duplicate tenant id: '{}'", tenant.id);
        }
    }

    Ok(config)
}

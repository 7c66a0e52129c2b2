//! Summarization providers.
//!
//! Each provider sends one prompt plus the joined inputs to a chat model and
//! returns the reply text. Providers know nothing about context budgets or
//! pacing: the pipeline wraps them per tenant as
//! `TreeSummarizer<Paced<provider>>`, so every network call is paced and
//! oversized selections are reduced in rounds.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use community_digest_core::summarize::Summarizer;

use crate::config::SummarizationConfig;
use crate::retry::send_json_with_retry;

const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";
const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Render the message a chat model sees for one call.
fn render_request(prompt: &str, inputs: &[String]) -> String {
    format!("{}:\n\n{}", prompt.trim_end(), inputs.join("\n\n"))
}

/// Used when `summarization.provider = "disabled"`. Every call fails, so
/// summary dates stay incomplete instead of being filled with placeholders.
pub struct DisabledSummarizer;

#[async_trait]
impl Summarizer for DisabledSummarizer {
    async fn summarize(&self, _prompt: &str, _inputs: &[String]) -> Result<String> {
        bail!("summarization provider is disabled")
    }
}

/// Chat-completions summarizer. Requires `OPENAI_API_KEY`.
pub struct OpenAISummarizer {
    model: String,
    api_key: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAISummarizer {
    pub fn new(config: &SummarizationConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("summarization.model required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            model,
            api_key,
            max_retries: config.max_retries,
            client,
        })
    }
}

#[async_trait]
impl Summarizer for OpenAISummarizer {
    async fn summarize(&self, prompt: &str, inputs: &[String]) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "user", "content": render_request(prompt, inputs)}
            ],
        });
        let json = send_json_with_retry("OpenAI chat", self.max_retries, || {
            self.client
                .post(OPENAI_CHAT_URL)
                .bearer_auth(&self.api_key)
                .json(&body)
        })
        .await?;

        json.pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .map(|s| s.trim().to_string())
            .ok_or_else(|| anyhow!("Invalid OpenAI response: missing choices[0].message.content"))
    }
}

/// Summarizer backed by Ollama's `/api/generate`.
pub struct OllamaSummarizer {
    model: String,
    url: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaSummarizer {
    pub fn new(config: &SummarizationConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("summarization.model required for Ollama provider"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            model,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string()),
            max_retries: config.max_retries,
            client,
        })
    }
}

#[async_trait]
impl Summarizer for OllamaSummarizer {
    async fn summarize(&self, prompt: &str, inputs: &[String]) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": render_request(prompt, inputs),
            "stream": false,
        });
        let endpoint = format!("{}/api/generate", self.url.trim_end_matches('/'));
        let json = send_json_with_retry("Ollama generate", self.max_retries, || {
            self.client.post(&endpoint).json(&body)
        })
        .await?;

        json.get("response")
            .and_then(|r| r.as_str())
            .map(|s| s.trim().to_string())
            .ok_or_else(|| anyhow!("Invalid Ollama response: missing response"))
    }
}

/// Create the configured summarization backend.
pub fn create_summarizer(config: &SummarizationConfig) -> Result<Arc<dyn Summarizer>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledSummarizer)),
        "openai" => Ok(Arc::new(OpenAISummarizer::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaSummarizer::new(config)?)),
        other => bail!("Unknown summarization provider: {}", other),
    }
}

//! Summarization capability and the tree-summarize strategy.
//!
//! A [`Summarizer`] turns a prompt plus a list of input texts into one
//! summary. Backends with a bounded context are wrapped in
//! [`TreeSummarizer`], which packs inputs into batches that fit, summarizes
//! each batch, and repeats on the partial summaries until a single call
//! can see everything.

use anyhow::{bail, Result};
use async_trait::async_trait;
use tracing::debug;

/// The summarization capability.
///
/// Implementations may fail transiently (timeouts, rate limits); callers
/// treat a failure as "this unit is incomplete", never as fatal for a run.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, prompt: &str, inputs: &[String]) -> Result<String>;
}

#[async_trait]
impl<S: Summarizer + ?Sized> Summarizer for std::sync::Arc<S> {
    async fn summarize(&self, prompt: &str, inputs: &[String]) -> Result<String> {
        (**self).summarize(prompt, inputs).await
    }
}

const INPUT_SEPARATOR: &str = "\n\n";
const MAX_ROUNDS: usize = 8;

/// Recursive reduce over a size-limited summarizer.
pub struct TreeSummarizer<S> {
    inner: S,
    max_input_chars: usize,
}

impl<S: Summarizer> TreeSummarizer<S> {
    pub fn new(inner: S, max_input_chars: usize) -> Self {
        Self {
            inner,
            max_input_chars: max_input_chars.max(1),
        }
    }

    /// Greedily pack inputs into batches whose joined length fits the budget.
    /// Oversized single inputs are truncated to the budget.
    fn pack(&self, inputs: &[String]) -> Vec<Vec<String>> {
        let mut batches: Vec<Vec<String>> = Vec::new();
        let mut current: Vec<String> = Vec::new();
        let mut current_len = 0usize;

        for input in inputs {
            let input = truncate_chars(input, self.max_input_chars);
            if !current.is_empty()
                && current_len + INPUT_SEPARATOR.len() + input.len() > self.max_input_chars
            {
                batches.push(std::mem::take(&mut current));
                current_len = 0;
            }
            if !current.is_empty() {
                current_len += INPUT_SEPARATOR.len();
            }
            current_len += input.len();
            current.push(input.to_string());
        }
        if !current.is_empty() {
            batches.push(current);
        }
        batches
    }

    fn fits(&self, inputs: &[String]) -> bool {
        joined_len(inputs) <= self.max_input_chars
    }
}

#[async_trait]
impl<S: Summarizer> Summarizer for TreeSummarizer<S> {
    async fn summarize(&self, prompt: &str, inputs: &[String]) -> Result<String> {
        let mut level: Vec<String> = inputs.to_vec();
        for round in 0..MAX_ROUNDS {
            if self.fits(&level) {
                return self.inner.summarize(prompt, &level).await;
            }
            let batches = self.pack(&level);
            debug!(round, inputs = level.len(), batches = batches.len(), "tree-summarize round");
            if batches.len() == 1 {
                // Only truncation made it fit.
                return self.inner.summarize(prompt, &batches[0]).await;
            }
            let mut next = Vec::with_capacity(batches.len());
            for batch in &batches {
                next.push(self.inner.summarize(prompt, batch).await?);
            }
            level = next;
        }
        bail!(
            "tree-summarize did not converge after {} rounds ({} partial summaries left)",
            MAX_ROUNDS,
            level.len()
        )
    }
}

fn joined_len(inputs: &[String]) -> usize {
    let text: usize = inputs.iter().map(String::len).sum();
    text + INPUT_SEPARATOR.len() * inputs.len().saturating_sub(1)
}

fn truncate_chars(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

//! Per-tenant pacing of capability calls.
//!
//! [`RateLimiter`] is a sliding-window limiter: a call is admitted only if
//! fewer than `limit` calls were admitted in the preceding 60 seconds;
//! otherwise the caller sleeps until the oldest of those calls leaves the
//! window. Calls are delayed, never dropped.
//!
//! [`Paced`] applies a shared limiter to a summarizer or an embedding
//! provider. Each tenant run owns one limiter used by both, so one tenant
//! never spends another's budget.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use community_digest_core::embedding::EmbeddingProvider;
use community_digest_core::summarize::Summarizer;

const WINDOW: Duration = Duration::from_secs(60);

pub struct RateLimiter {
    limit: Option<usize>,
    admitted: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// `None` admits every call immediately.
    pub fn per_minute(limit: Option<u32>) -> Self {
        Self {
            limit: limit.map(|l| l.max(1) as usize),
            admitted: Mutex::new(VecDeque::new()),
        }
    }

    pub fn unlimited() -> Self {
        Self::per_minute(None)
    }

    /// Wait until a call may be made, then record it.
    pub async fn acquire(&self) {
        let Some(limit) = self.limit else {
            return;
        };
        loop {
            let mut admitted = self.admitted.lock().await;
            let now = Instant::now();
            while admitted
                .front()
                .is_some_and(|t| now.duration_since(*t) >= WINDOW)
            {
                admitted.pop_front();
            }
            if admitted.len() < limit {
                admitted.push_back(now);
                return;
            }
            let Some(oldest) = admitted.front().copied() else {
                continue;
            };
            drop(admitted);
            let resume = oldest + WINDOW;
            debug!(limit, wait_ms = (resume - now).as_millis() as u64, "rate ceiling reached; pausing");
            tokio::time::sleep_until(resume).await;
        }
    }
}

/// A capability whose calls go through a [`RateLimiter`] first.
pub struct Paced<T> {
    inner: T,
    limiter: Arc<RateLimiter>,
}

impl<T> Paced<T> {
    pub fn new(inner: T, limiter: Arc<RateLimiter>) -> Self {
        Self { inner, limiter }
    }
}

#[async_trait]
impl<T: Summarizer> Summarizer for Paced<T> {
    async fn summarize(&self, prompt: &str, inputs: &[String]) -> Result<String> {
        self.limiter.acquire().await;
        self.inner.summarize(prompt, inputs).await
    }
}

#[async_trait]
impl<T: EmbeddingProvider> EmbeddingProvider for Paced<T> {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn dims(&self) -> usize {
        self.inner.dims()
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        // Disabled providers make no external call.
        if self.inner.dims() > 0 {
            self.limiter.acquire().await;
        }
        self.inner.embed(texts).await
    }
}

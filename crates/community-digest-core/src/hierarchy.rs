//! Hierarchical summary builder: thread → channel → day.
//!
//! Dates are processed in ascending order. For each date the builder
//! summarizes every thread, then every channel from its thread summaries,
//! then the day from its channel summaries. A day-level document is only
//! produced once every unit below it succeeded.
//!
//! When a unit fails, its date and every later date are left out of the
//! output entirely. The derived checkpoint is the newest day summary in
//! the store, so emitting a later day would move it past the gap and the
//! failed date would never be retried.

use chrono::NaiveDate;
use tracing::{debug, info, warn};

use crate::grouping::GroupedRecords;
use crate::models::{Document, SummaryLevel, SummaryNode};
use crate::summarize::Summarizer;

const BULLET_POSTFIX: &str =
    ". Organize the output in one or multiple descriptive bullet points and include important details";

/// Prompt text for each tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryPrompts {
    pub thread: String,
    pub channel: String,
    pub day: String,
}

impl SummaryPrompts {
    /// Build tier prompts from a shared instruction prefix.
    pub fn from_prefix(prefix: &str) -> Self {
        let prefix = prefix.trim_end();
        Self {
            thread: format!("{prefix} chat thread{BULLET_POSTFIX}"),
            channel: format!("{prefix} selection of chat thread summaries{BULLET_POSTFIX}"),
            day: format!("{prefix} selection of chat channel summaries{BULLET_POSTFIX}"),
        }
    }
}

/// A unit whose summarization failed after the capability's own retries.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitFailure {
    pub level: SummaryLevel,
    pub date: NaiveDate,
    pub channel: Option<String>,
    pub thread: Option<String>,
    pub error: String,
}

/// Documents produced for the complete dates of one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HierarchyOutput {
    pub threads: Vec<Document>,
    pub channels: Vec<Document>,
    pub days: Vec<Document>,
    /// First date that could not be completed; it and later dates were dropped.
    pub incomplete_from: Option<NaiveDate>,
    pub failures: Vec<UnitFailure>,
}

impl HierarchyOutput {
    pub fn is_empty(&self) -> bool {
        self.threads.is_empty() && self.channels.is_empty() && self.days.is_empty()
    }

    pub fn document_count(&self) -> usize {
        self.threads.len() + self.channels.len() + self.days.len()
    }

    /// All documents, lower tiers first.
    pub fn into_documents(self) -> Vec<Document> {
        let mut docs = self.threads;
        docs.extend(self.channels);
        docs.extend(self.days);
        docs
    }
}

#[derive(Default)]
struct DateOutput {
    threads: Vec<Document>,
    channels: Vec<Document>,
    day: Option<Document>,
}

/// Roll `grouped` up into thread, channel, and day summaries for `tenant`.
///
/// `on_date(done, total)` is called after each date is fully summarized.
/// Never fails as a whole: capability errors are reported in
/// [`HierarchyOutput::failures`] and cut the output at the failing date.
pub async fn build_hierarchy(
    tenant: &str,
    grouped: &GroupedRecords,
    prompts: &SummaryPrompts,
    summarizer: &dyn Summarizer,
    on_date: &(dyn Fn(usize, usize) + Sync),
) -> HierarchyOutput {
    let mut output = HierarchyOutput::default();
    let total = grouped.dates().count();

    for (index, date) in grouped.dates().enumerate() {
        match summarize_date(tenant, date, grouped, prompts, summarizer).await {
            Ok(day) => {
                info!(tenant, %date, threads = day.threads.len(), channels = day.channels.len(), "day summarized");
                output.threads.extend(day.threads);
                output.channels.extend(day.channels);
                output.days.extend(day.day);
                on_date(index + 1, total);
            }
            Err(failure) => {
                warn!(
                    tenant,
                    %date,
                    level = %failure.level,
                    channel = failure.channel.as_deref().unwrap_or("-"),
                    thread = failure.thread.as_deref().unwrap_or("-"),
                    error = %failure.error,
                    "summary unit failed; date left incomplete"
                );
                output.incomplete_from = Some(date);
                output.failures.push(*failure);
                break;
            }
        }
    }
    output
}

async fn summarize_date(
    tenant: &str,
    date: NaiveDate,
    grouped: &GroupedRecords,
    prompts: &SummaryPrompts,
    summarizer: &dyn Summarizer,
) -> Result<DateOutput, Box<UnitFailure>> {
    let mut out = DateOutput::default();
    let fail = |level, channel: Option<&str>, thread: Option<&str>, err: anyhow::Error| {
        Box::new(UnitFailure {
            level,
            date,
            channel: channel.map(str::to_string),
            thread: thread.map(str::to_string),
            error: format!("{err:#}"),
        })
    };

    for (channel, threads) in grouped.channels_on(date) {
        let mut thread_docs = Vec::new();
        for (thread, records) in threads {
            if records.is_empty() {
                continue;
            }
            let lines: Vec<String> = records.iter().map(|r| r.summary_line()).collect();
            debug!(tenant, %date, channel, thread = thread.as_deref().unwrap_or("-"), messages = lines.len(), "summarizing thread");
            let text = summarizer
                .summarize(&prompts.thread, &lines)
                .await
                .map_err(|e| fail(SummaryLevel::Thread, Some(channel), thread.as_deref(), e))?;
            let node = SummaryNode {
                level: SummaryLevel::Thread,
                tenant: tenant.to_string(),
                date,
                channel: Some(channel.to_string()),
                thread: thread.clone(),
                text,
                sources: records.iter().map(|r| r.id.clone()).collect(),
            };
            thread_docs.push(node.into_document());
        }
        if thread_docs.is_empty() {
            continue;
        }

        let inputs: Vec<String> = thread_docs.iter().map(|d| d.text.clone()).collect();
        let text = summarizer
            .summarize(&prompts.channel, &inputs)
            .await
            .map_err(|e| fail(SummaryLevel::Channel, Some(channel), None, e))?;
        let node = SummaryNode {
            level: SummaryLevel::Channel,
            tenant: tenant.to_string(),
            date,
            channel: Some(channel.to_string()),
            thread: None,
            text,
            sources: thread_docs.iter().map(|d| d.id.clone()).collect(),
        };
        out.channels.push(node.into_document());
        out.threads.extend(thread_docs);
    }

    if out.channels.is_empty() {
        return Ok(out);
    }

    let inputs: Vec<String> = out.channels.iter().map(|d| d.text.clone()).collect();
    let text = summarizer
        .summarize(&prompts.day, &inputs)
        .await
        .map_err(|e| fail(SummaryLevel::Day, None, None, e))?;
    let node = SummaryNode {
        level: SummaryLevel::Day,
        tenant: tenant.to_string(),
        date,
        channel: None,
        thread: None,
        text,
        sources: out.channels.iter().map(|d| d.id.clone()).collect(),
    };
    out.day = Some(node.into_document());
    Ok(out)
}

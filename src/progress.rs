//! Sync progress reporting.
//!
//! Reports observable progress during `digest sync` so operators see which
//! tenant is being summarized and how many write batches are left.
//! Progress is emitted on **stderr** so stdout remains parseable for scripts.

use std::io::Write;

/// A single progress event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncProgressEvent {
    /// Records loaded for a job; summarization or writing follows.
    Fetched {
        tenant: String,
        table: String,
        records: u64,
    },
    /// Summary hierarchy being built: `n` of `total` dates done.
    Summarizing {
        tenant: String,
        n: u64,
        total: u64,
    },
    /// Write batches committed: `n` of `total`.
    Writing {
        tenant: String,
        table: String,
        n: u64,
        total: u64,
    },
}

/// Reports sync progress. Implementations write to stderr (human or JSON).
pub trait SyncProgressReporter: Send + Sync {
    fn report(&self, event: SyncProgressEvent);
}

/// Human-friendly progress on stderr: "sync acme/summaries  writing  3 / 12 batches".
pub struct StderrProgress;

impl SyncProgressReporter for StderrProgress {
    fn report(&self, event: SyncProgressEvent) {
        let line = match &event {
            SyncProgressEvent::Fetched {
                tenant,
                table,
                records,
            } => format!(
                "sync {}/{}  fetched  {} records\n",
                tenant,
                table,
                format_number(*records)
            ),
            SyncProgressEvent::Summarizing { tenant, n, total } => format!(
                "sync {}/summaries  summarizing  {} / {} days\n",
                tenant,
                format_number(*n),
                format_number(*total)
            ),
            SyncProgressEvent::Writing {
                tenant,
                table,
                n,
                total,
            } => format!(
                "sync {}/{}  writing  {} / {} batches\n",
                tenant,
                table,
                format_number(*n),
                format_number(*total)
            ),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl SyncProgressReporter for JsonProgress {
    fn report(&self, event: SyncProgressEvent) {
        let obj = match &event {
            SyncProgressEvent::Fetched {
                tenant,
                table,
                records,
            } => serde_json::json!({
                "event": "progress",
                "tenant": tenant,
                "table": table,
                "phase": "fetched",
                "records": records
            }),
            SyncProgressEvent::Summarizing { tenant, n, total } => serde_json::json!({
                "event": "progress",
                "tenant": tenant,
                "table": "summaries",
                "phase": "summarizing",
                "n": n,
                "total": total
            }),
            SyncProgressEvent::Writing {
                tenant,
                table,
                n,
                total,
            } => serde_json::json!({
                "event": "progress",
                "tenant": tenant,
                "table": table,
                "phase": "writing",
                "n": n,
                "total": total
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl SyncProgressReporter for NoProgress {
    fn report(&self, _event: SyncProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn SyncProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

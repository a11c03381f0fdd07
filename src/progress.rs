//! Batch progress reporting for `srcctx batch`.
//!
//! The CLI polls the job queue and turns what it sees into events. Progress
//! is emitted on **stderr** so stdout stays parseable for scripts.

use std::io::Write;

use crate::jobs::{DetectionJob, JobStatus};

/// A single progress observation of a batch job.
#[derive(Clone, Debug, PartialEq)]
pub enum BatchProgressEvent {
    /// The job exists but documents are still being enumerated (total unknown).
    Discovering { job: String },
    /// `n` of `total` documents done; `current` is the one in flight.
    Detecting {
        job: String,
        n: u64,
        total: u64,
        current: Option<String>,
    },
    /// Terminal state reached.
    Finished {
        job: String,
        status: JobStatus,
        error: Option<String>,
    },
}

impl BatchProgressEvent {
    /// The event describing a polled job snapshot.
    pub fn from_job(job: &DetectionJob) -> Self {
        if job.status.is_terminal() {
            return BatchProgressEvent::Finished {
                job: job.id.clone(),
                status: job.status,
                error: job.error.clone(),
            };
        }
        if job.progress.total == 0 && job.status == JobStatus::Pending {
            return BatchProgressEvent::Discovering { job: job.id.clone() };
        }
        BatchProgressEvent::Detecting {
            job: job.id.clone(),
            n: job.progress.completed as u64,
            total: job.progress.total as u64,
            current: job.progress.current.clone(),
        }
    }
}

pub trait BatchProgressReporter: Send + Sync {
    fn report(&self, event: &BatchProgressEvent);
}

/// Human-friendly progress on stderr: "batch job_…  detecting  12 / 1,204 docs  docs/api.md".
pub struct StderrProgress;

impl BatchProgressReporter for StderrProgress {
    fn report(&self, event: &BatchProgressEvent) {
        let line = match event {
            BatchProgressEvent::Discovering { job } => format!("batch {}  discovering...\n", job),
            BatchProgressEvent::Detecting {
                job,
                n,
                total,
                current,
            } => format!(
                "batch {}  detecting  {} / {} docs  {}\n",
                job,
                format_number(*n),
                format_number(*total),
                current.as_deref().unwrap_or("")
            ),
            BatchProgressEvent::Finished { job, status, error } => match error {
                Some(error) => format!("batch {}  {:?}: {}\n", job, status, error),
                None => format!("batch {}  {:?}\n", job, status),
            },
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl BatchProgressReporter for JsonProgress {
    fn report(&self, event: &BatchProgressEvent) {
        let obj = match event {
            BatchProgressEvent::Discovering { job } => serde_json::json!({
                "event": "progress",
                "job": job,
                "phase": "discovering"
            }),
            BatchProgressEvent::Detecting {
                job,
                n,
                total,
                current,
            } => serde_json::json!({
                "event": "progress",
                "job": job,
                "phase": "detecting",
                "n": n,
                "total": total,
                "current": current
            }),
            BatchProgressEvent::Finished { job, status, error } => serde_json::json!({
                "event": "finished",
                "job": job,
                "status": status,
                "error": error
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl BatchProgressReporter for NoProgress {
    fn report(&self, _event: &BatchProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
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

    pub fn reporter(&self) -> Box<dyn BatchProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

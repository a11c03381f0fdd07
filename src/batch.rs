//! Batch detection over many documents as a background job.
//!
//! [`BatchRunner::start`] creates the job and returns its id at once; the
//! documents are processed one after another in a spawned task that reports
//! into the [`JobQueue`]. A document that fails is recorded with its error
//! and still counts toward progress. Only a failure to enumerate the
//! documents fails the job.

use anyhow::{bail, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use walkdir::WalkDir;

use crate::config::Config;
use crate::detect::ContextDetector;
use crate::file_tree::{build_globset, ALWAYS_SKIPPED_DIRS};
use crate::jobs::{DocumentResult, JobQueue, JobStatus, JobUpdate};
use crate::models::Confidence;
use crate::progress::{BatchProgressEvent, ProgressMode};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// What a batch runs over.
#[derive(Debug, Clone)]
pub enum BatchSource {
    /// An explicit list, processed in the given order.
    Documents(Vec<PathBuf>),
    /// Every file under `docs_root` whose relative path matches `include`.
    Directory {
        docs_root: PathBuf,
        include: Vec<String>,
    },
}

#[derive(Clone)]
pub struct BatchRunner {
    detector: Arc<ContextDetector>,
    queue: Arc<JobQueue>,
}

impl BatchRunner {
    pub fn new(detector: Arc<ContextDetector>, queue: Arc<JobQueue>) -> Self {
        Self { detector, queue }
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    /// Create a job for `source`, spawn its processing and return the job id.
    /// Must be called inside a Tokio runtime.
    pub fn start(&self, source: BatchSource) -> String {
        let total = match &source {
            BatchSource::Documents(docs) => docs.len(),
            BatchSource::Directory { .. } => 0,
        };
        let job_id = self.queue.create_job(total).id;
        let id = job_id.clone();

        let runner = self.clone();
        tokio::spawn(async move {
            let docs = match source {
                BatchSource::Documents(docs) => docs,
                BatchSource::Directory { docs_root, include } => {
                    match discover_documents(&docs_root, &include) {
                        Ok(docs) => docs,
                        Err(err) => {
                            tracing::warn!(job = %id, error = %err, "document discovery failed");
                            runner.queue.fail_job(&id, &err.to_string());
                            return;
                        }
                    }
                }
            };
            runner.run(&id, docs).await;
        });

        job_id
    }

    /// Process `docs` in order against job `job_id`, then complete it.
    pub async fn run(&self, job_id: &str, docs: Vec<PathBuf>) {
        self.queue.update_job(
            job_id,
            JobUpdate {
                status: Some(JobStatus::Running),
                total: Some(docs.len()),
                error: None,
            },
        );
        tracing::info!(job = %job_id, total = docs.len(), "job started");

        for (index, doc) in docs.iter().enumerate() {
            let doc_path = doc.to_string_lossy().to_string();
            self.queue
                .update_progress(job_id, index, Some(doc_path.clone()));

            let result = match self.detector.detect_document(doc).await {
                Ok(detected) => DocumentResult {
                    doc_path,
                    files: detected.source_context.files,
                    folders: detected.source_context.folders,
                    confidence: detected.confidence,
                    reasoning: detected.reasoning,
                    error: None,
                },
                Err(err) => {
                    let message = format!("{:#}", err);
                    tracing::warn!(job = %job_id, doc = %doc_path, error = %message, "document detection failed");
                    DocumentResult {
                        doc_path,
                        files: Vec::new(),
                        folders: Vec::new(),
                        confidence: Confidence::Low,
                        reasoning: Vec::new(),
                        error: Some(message),
                    }
                }
            };

            self.queue.add_result(job_id, result);
            self.queue.update_progress(job_id, index + 1, None);
        }

        self.queue.complete_job(job_id);
    }
}

/// `srcctx batch`: run a batch in the background, poll it to completion
/// while reporting progress, then print the per-document results.
pub async fn run_batch(config: &Config, docs: Vec<PathBuf>, progress: ProgressMode, json: bool) -> Result<()> {
    let detector = Arc::new(ContextDetector::from_config(config)?);
    let queue = Arc::new(JobQueue::from_config(&config.jobs));
    let runner = BatchRunner::new(Arc::clone(&detector), Arc::clone(&queue));

    let source = if docs.is_empty() {
        BatchSource::Directory {
            docs_root: detector.docs_root().to_path_buf(),
            include: detector.doc_globs().to_vec(),
        }
    } else {
        BatchSource::Documents(docs)
    };

    let id = runner.start(source);
    let reporter = progress.reporter();
    let mut last_event = None;
    let job = loop {
        let job = queue
            .get_job(&id)
            .ok_or_else(|| anyhow::anyhow!("job {} disappeared from the queue", id))?;
        let event = BatchProgressEvent::from_job(&job);
        if last_event.as_ref() != Some(&event) {
            reporter.report(&event);
            last_event = Some(event);
        }
        if job.status.is_terminal() {
            break job;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&job)?);
    } else {
        for result in &job.results {
            match &result.error {
                Some(error) => println!("{}  error: {}", result.doc_path, error),
                None => println!(
                    "{}  [{}]  {}",
                    result.doc_path,
                    result.confidence,
                    result
                        .files
                        .iter()
                        .chain(result.folders.iter())
                        .cloned()
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            }
        }
        println!("{} documents processed.", job.results.len());
    }

    if job.status == JobStatus::Failed {
        bail!("batch job failed: {}", job.error.unwrap_or_default());
    }
    Ok(())
}

/// Documentation files under `docs_root` matching `include` (relative,
/// `/`-separated paths), sorted by path.
pub fn discover_documents(docs_root: &Path, include: &[String]) -> Result<Vec<PathBuf>> {
    if !docs_root.is_dir() {
        bail!("Docs root is not a directory: {}", docs_root.display());
    }
    let globs = build_globset(include)?;

    let mut docs = Vec::new();
    let walker = WalkDir::new(docs_root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            !(e.file_type().is_dir()
                && e.depth() > 0
                && ALWAYS_SKIPPED_DIRS.contains(&e.file_name().to_string_lossy().as_ref()))
        });
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!(error = %err, "skipping unreadable docs entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(docs_root)
            .unwrap_or(entry.path())
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if globs.is_match(&rel) {
            docs.push(entry.into_path());
        }
    }
    Ok(docs)
}

//! In-memory store of batch detection jobs.
//!
//! Jobs are polled by id while a background task advances them. The store is
//! bounded two ways, both enforced right after each [`JobQueue::create_job`]:
//! jobs older than the TTL are dropped whatever their status, then only the
//! most recently started jobs up to the capacity are kept.
//!
//! Mutations on an unknown id do nothing and return `false`. A job can vanish
//! between [`JobQueue::get_all_jobs`] and a later [`JobQueue::get_job`].

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use crate::config::JobsConfig;
use crate::models::Confidence;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobProgress {
    pub total: usize,
    pub completed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<String>,
}

/// Detection outcome for one document of a batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentResult {
    pub doc_path: String,
    pub files: Vec<String>,
    pub folders: Vec<String>,
    pub confidence: Confidence,
    pub reasoning: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionJob {
    pub id: String,
    pub status: JobStatus,
    pub progress: JobProgress,
    pub results: Vec<DocumentResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Creation order; breaks `started_at` ties.
    #[serde(skip)]
    seq: u64,
}

/// Partial update for [`JobQueue::update_job`]. `None` fields are left alone.
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub total: Option<usize>,
    pub error: Option<String>,
}

pub struct JobQueue {
    jobs: RwLock<HashMap<String, DetectionJob>>,
    next_seq: AtomicU64,
    ttl: Duration,
    capacity: usize,
}

impl JobQueue {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
            ttl,
            capacity,
        }
    }

    pub fn from_config(cfg: &JobsConfig) -> Self {
        Self::new(Duration::from_secs(cfg.ttl_secs), cfg.capacity)
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, DetectionJob>> {
        self.jobs.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, DetectionJob>> {
        self.jobs.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a `pending` job for `total` documents and return a snapshot.
    pub fn create_job(&self, total: usize) -> DetectionJob {
        let now = Utc::now();
        let uuid = uuid::Uuid::new_v4().simple().to_string();
        let job = DetectionJob {
            id: format!("job_{}_{}", now.timestamp_millis(), &uuid[..8]),
            status: JobStatus::Pending,
            progress: JobProgress {
                total,
                completed: 0,
                current: None,
            },
            results: Vec::new(),
            error: None,
            started_at: now,
            completed_at: None,
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
        };

        let mut jobs = self.write();
        jobs.insert(job.id.clone(), job.clone());
        self.cleanup(&mut jobs);
        tracing::info!(job = %job.id, total, "job created");
        job
    }

    fn cleanup(&self, jobs: &mut HashMap<String, DetectionJob>) {
        let now = Utc::now();
        jobs.retain(|_, job| (now - job.started_at).to_std().unwrap_or_default() <= self.ttl);

        if jobs.len() > self.capacity {
            let mut order: Vec<(DateTime<Utc>, u64, String)> = jobs
                .values()
                .map(|j| (j.started_at, j.seq, j.id.clone()))
                .collect();
            order.sort_by(|a, b| (b.0, b.1).cmp(&(a.0, a.1)));
            for (_, _, id) in order.into_iter().skip(self.capacity) {
                jobs.remove(&id);
            }
        }
    }

    pub fn get_job(&self, id: &str) -> Option<DetectionJob> {
        self.read().get(id).cloned()
    }

    fn with_job(&self, id: &str, f: impl FnOnce(&mut DetectionJob)) -> bool {
        match self.write().get_mut(id) {
            Some(job) => {
                f(job);
                true
            }
            None => false,
        }
    }

    pub fn update_job(&self, id: &str, update: JobUpdate) -> bool {
        self.with_job(id, |job| {
            if let Some(status) = update.status {
                job.status = status;
            }
            if let Some(total) = update.total {
                job.progress.total = total;
            }
            if update.error.is_some() {
                job.error = update.error;
            }
        })
    }

    pub fn update_progress(&self, id: &str, completed: usize, current: Option<String>) -> bool {
        self.with_job(id, |job| {
            job.progress.completed = completed;
            job.progress.current = current;
        })
    }

    pub fn add_result(&self, id: &str, result: DocumentResult) -> bool {
        self.with_job(id, |job| job.results.push(result))
    }

    pub fn complete_job(&self, id: &str) -> bool {
        let found = self.with_job(id, |job| {
            job.status = JobStatus::Completed;
            job.progress.current = None;
            job.completed_at = Some(Utc::now());
        });
        if found {
            tracing::info!(job = %id, "job completed");
        }
        found
    }

    pub fn fail_job(&self, id: &str, message: &str) -> bool {
        let found = self.with_job(id, |job| {
            job.status = JobStatus::Failed;
            job.error = Some(message.to_string());
            job.completed_at = Some(Utc::now());
        });
        if found {
            tracing::info!(job = %id, error = %message, "job failed");
        }
        found
    }

    /// Every job, most recently started first.
    pub fn get_all_jobs(&self) -> Vec<DetectionJob> {
        let mut jobs: Vec<DetectionJob> = self.read().values().cloned().collect();
        jobs.sort_by(|a, b| (b.started_at, b.seq).cmp(&(a.started_at, a.seq)));
        jobs
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::from_config(&JobsConfig::default())
    }
}

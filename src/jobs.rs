//! In-memory table of download jobs, shared between HTTP handlers and the
//! workers that drive them.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Downloading,
    Completed,
    Error,
    NotFound,
}

/// Point-in-time copy of a job. Unknown jobs serialize as
/// `{"status":"not_found"}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSnapshot {
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobSnapshot {
    pub fn not_found() -> Self {
        Self {
            status: JobStatus::NotFound,
            progress: None,
            filename: None,
            error: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed { filename: String },
    Failed { message: String },
}

#[derive(Debug, Clone)]
struct JobRecord {
    status: JobStatus,
    progress: u8,
    filename: Option<String>,
    error: Option<String>,
}

impl JobRecord {
    fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            status: self.status,
            progress: Some(self.progress),
            filename: self.filename.clone(),
            error: self.error.clone(),
        }
    }
}

/// Cheap to clone; every clone sees the same table.
#[derive(Clone, Default)]
pub struct JobTracker {
    jobs: Arc<Mutex<HashMap<String, JobRecord>>>,
}

impl JobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a fresh job as `downloading` at 0%.
    pub fn create(&self, job_id: &str) {
        self.jobs.lock().insert(
            job_id.to_string(),
            JobRecord {
                status: JobStatus::Downloading,
                progress: 0,
                filename: None,
                error: None,
            },
        );
        debug!(job_id, "job created");
    }

    pub fn get(&self, job_id: &str) -> JobSnapshot {
        self.jobs
            .lock()
            .get(job_id)
            .map(JobRecord::snapshot)
            .unwrap_or_else(JobSnapshot::not_found)
    }

    /// Raises progress; never lowers it and never touches finished jobs.
    pub fn update(&self, job_id: &str, progress: u8) {
        let mut jobs = self.jobs.lock();
        if let Some(job) = jobs.get_mut(job_id)
            && job.status == JobStatus::Downloading
        {
            let clamped = progress.min(100);
            if clamped > job.progress {
                job.progress = clamped;
            }
        }
    }

    /// Byte-count flavour of [`update`](Self::update); ignored until the
    /// total size is known.
    pub fn record_progress(&self, job_id: &str, downloaded: u64, total: Option<u64>) {
        if let Some(total) = total.filter(|total| *total > 0) {
            let percent = downloaded.saturating_mul(100) / total;
            self.update(job_id, percent.min(100) as u8);
        }
    }

    /// Moves a job to its terminal state. Returns `false` when the job is
    /// unknown or was already finalized.
    pub fn finalize(&self, job_id: &str, outcome: JobOutcome) -> bool {
        let mut jobs = self.jobs.lock();
        let Some(job) = jobs.get_mut(job_id) else {
            warn!(job_id, "finalize for unknown job");
            return false;
        };
        if job.status != JobStatus::Downloading {
            warn!(job_id, status = ?job.status, "job already finalized");
            return false;
        }
        match outcome {
            JobOutcome::Completed { filename } => {
                job.status = JobStatus::Completed;
                job.progress = 100;
                job.filename = Some(filename);
            }
            JobOutcome::Failed { message } => {
                job.status = JobStatus::Error;
                job.progress = 0;
                job.error = Some(message);
            }
        }
        true
    }

    /// File name of a completed job, if any.
    pub fn completed_file(&self, job_id: &str) -> Option<String> {
        let jobs = self.jobs.lock();
        let job = jobs.get(job_id)?;
        if job.status == JobStatus::Completed {
            job.filename.clone()
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

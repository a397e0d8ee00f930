//! Admission control and a bounded worker pool in front of the
//! [`DownloadExecutor`].

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::executor::{DownloadExecutor, DownloadSpec};
use crate::jobs::{JobOutcome, JobTracker};

pub const DEFAULT_MAX_CONCURRENT: usize = 4;
pub const DEFAULT_MAX_QUEUED: usize = 32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DownloadRejected {
    #[error("Server is busy with other downloads. Please try again shortly.")]
    Busy,
}

#[derive(Clone)]
pub struct DownloadManager {
    inner: Arc<DownloadManagerInner>,
}

struct DownloadManagerInner {
    executor: DownloadExecutor,
    /// Running plus waiting jobs.
    admission: Arc<Semaphore>,
    /// Jobs allowed to run at once.
    workers: Arc<Semaphore>,
}

impl DownloadManager {
    pub fn new(executor: DownloadExecutor, max_concurrent: usize, max_queued: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            inner: Arc::new(DownloadManagerInner {
                executor,
                admission: Arc::new(Semaphore::new(max_concurrent + max_queued)),
                workers: Arc::new(Semaphore::new(max_concurrent)),
            }),
        }
    }

    pub fn tracker(&self) -> &JobTracker {
        self.inner.executor.tracker()
    }

    /// Jobs that can still be admitted right now.
    pub fn free_slots(&self) -> usize {
        self.inner.admission.available_permits()
    }

    /// Admits a job and schedules it. Must be called from within a tokio
    /// runtime.
    pub fn start(&self, spec: DownloadSpec) -> Result<String, DownloadRejected> {
        let admission = self
            .inner
            .admission
            .clone()
            .try_acquire_owned()
            .map_err(|_| {
                warn!(url = %spec.url, "download rejected, pool saturated");
                DownloadRejected::Busy
            })?;

        let job_id = Uuid::new_v4().to_string();
        self.tracker().create(&job_id);
        info!(
            %job_id,
            url = %spec.url,
            kind = spec.kind.as_str(),
            free_slots = self.free_slots(),
            "download queued"
        );

        let inner = self.inner.clone();
        let job_id_clone = job_id.clone();
        tokio::spawn(async move {
            let _admission = admission;
            let Ok(_worker) = inner.workers.clone().acquire_owned().await else {
                inner.executor.tracker().finalize(
                    &job_id_clone,
                    JobOutcome::Failed {
                        message: "download pool shut down".to_string(),
                    },
                );
                return;
            };

            let executor = inner.executor.clone();
            let job_for_run = job_id_clone.clone();
            let status =
                tokio::task::spawn_blocking(move || executor.run(&job_for_run, &spec)).await;

            if let Err(err) = status {
                error!(job_id = %job_id_clone, error = %err, "download worker crashed");
                inner.executor.tracker().finalize(
                    &job_id_clone,
                    JobOutcome::Failed {
                        message: format!("Download worker crashed: {err}"),
                    },
                );
            }
        });

        Ok(job_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{DownloadRequest, MediaEngine, MediaKind, ProgressSink};
    use crate::jobs::JobStatus;
    use anyhow::Result;
    use std::path::PathBuf;
    use std::time::Duration;
    use tempfile::tempdir;

    /// Engine that blocks until the test releases it.
    struct GatedEngine {
        gate: Arc<(std::sync::Mutex<bool>, std::sync::Condvar)>,
        panic_on: Option<&'static str>,
    }

    impl MediaEngine for GatedEngine {
        fn fetch_title(&self, url: &str) -> Result<String> {
            if self.panic_on.is_some_and(|needle| url.contains(needle)) {
                panic!("worker blew up");
            }
            Ok("Gated".to_string())
        }

        fn download(
            &self,
            request: &DownloadRequest,
            progress: &dyn ProgressSink,
        ) -> Result<PathBuf> {
            let (lock, cvar) = &*self.gate;
            let mut open = lock.lock().unwrap();
            while !*open {
                open = cvar.wait(open).unwrap();
            }
            progress.on_progress(1, Some(1));
            let path = request.expected_output();
            std::fs::write(&path, b"media")?;
            Ok(path)
        }
    }

    fn spec(url: &str) -> DownloadSpec {
        DownloadSpec {
            url: url.to_string(),
            format_selector: "best".into(),
            kind: MediaKind::Video,
            output_container: "mp4".into(),
            codec: "h264".into(),
        }
    }

    fn manager(
        dir: &std::path::Path,
        max_concurrent: usize,
        max_queued: usize,
        panic_on: Option<&'static str>,
    ) -> (DownloadManager, Arc<(std::sync::Mutex<bool>, std::sync::Condvar)>) {
        let gate = Arc::new((std::sync::Mutex::new(false), std::sync::Condvar::new()));
        let engine = Arc::new(GatedEngine {
            gate: gate.clone(),
            panic_on,
        });
        let executor = DownloadExecutor::new(engine, JobTracker::new(), dir.to_path_buf());
        (
            DownloadManager::new(executor, max_concurrent, max_queued),
            gate,
        )
    }

    fn open_gate(gate: &(std::sync::Mutex<bool>, std::sync::Condvar)) {
        *gate.0.lock().unwrap() = true;
        gate.1.notify_all();
    }

    async fn wait_for(tracker: &JobTracker, job_id: &str, status: JobStatus) {
        for _ in 0..200 {
            if tracker.get(job_id).status == status {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {job_id} never reached {status:?}");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rejects_when_pool_and_queue_are_full() {
        let dir = tempdir().unwrap();
        let (manager, gate) = manager(dir.path(), 1, 1, None);

        let first = manager.start(spec("https://youtu.be/aaaaaaaaaaa")).unwrap();
        let second = manager.start(spec("https://youtu.be/bbbbbbbbbbb")).unwrap();
        assert_ne!(first, second);
        assert_eq!(
            manager.start(spec("https://youtu.be/ccccccccccc")),
            Err(DownloadRejected::Busy)
        );

        open_gate(&gate);
        wait_for(manager.tracker(), &first, JobStatus::Completed).await;
        wait_for(manager.tracker(), &second, JobStatus::Completed).await;
        for _ in 0..200 {
            if manager.free_slots() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(manager.free_slots(), 2);
        assert_eq!(
            manager.tracker().get(&first).filename.as_deref(),
            Some("Gated.mp4")
        );

        let third = manager.start(spec("https://youtu.be/ddddddddddd")).unwrap();
        wait_for(manager.tracker(), &third, JobStatus::Completed).await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn job_ids_are_uuid_v4() {
        let dir = tempdir().unwrap();
        let (manager, gate) = manager(dir.path(), 2, 2, None);
        open_gate(&gate);
        let job_id = manager.start(spec("https://youtu.be/aaaaaaaaaaa")).unwrap();
        let parsed = Uuid::parse_str(&job_id).unwrap();
        assert_eq!(parsed.get_version_num(), 4);
        wait_for(manager.tracker(), &job_id, JobStatus::Completed).await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn panicking_worker_marks_job_failed() {
        let dir = tempdir().unwrap();
        let (manager, gate) = manager(dir.path(), 1, 1, Some("explode"));
        open_gate(&gate);

        let job_id = manager.start(spec("https://youtu.be/explode1234")).unwrap();
        wait_for(manager.tracker(), &job_id, JobStatus::Error).await;
        let snapshot = manager.tracker().get(&job_id);
        assert!(snapshot.error.unwrap().contains("crashed"));

        let next = manager.start(spec("https://youtu.be/aaaaaaaaaaa")).unwrap();
        wait_for(manager.tracker(), &next, JobStatus::Completed).await;
    }
}

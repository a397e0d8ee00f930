//! Runs one download job from title lookup to a finished file on disk and
//! reports the result through the [`JobTracker`].

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use tracing::{error, info};

use crate::engine::{DownloadRequest, EXT_PLACEHOLDER, MediaEngine, MediaKind, ProgressSink};
use crate::formats::BEST_AUDIO_SELECTOR;
use crate::jobs::{JobOutcome, JobTracker};
use crate::sanitize::clean_filename;

/// What the client asked for, before any title lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadSpec {
    pub url: String,
    pub format_selector: String,
    pub kind: MediaKind,
    pub output_container: String,
    pub codec: String,
}

/// Forwards engine progress into one job's tracker entry.
struct TrackerSink<'a> {
    tracker: &'a JobTracker,
    job_id: &'a str,
}

impl ProgressSink for TrackerSink<'_> {
    fn on_progress(&self, downloaded: u64, total: Option<u64>) {
        self.tracker.record_progress(self.job_id, downloaded, total);
    }
}

#[derive(Clone)]
pub struct DownloadExecutor {
    engine: Arc<dyn MediaEngine>,
    tracker: JobTracker,
    download_dir: PathBuf,
}

impl DownloadExecutor {
    pub fn new(engine: Arc<dyn MediaEngine>, tracker: JobTracker, download_dir: PathBuf) -> Self {
        Self {
            engine,
            tracker,
            download_dir,
        }
    }

    pub fn tracker(&self) -> &JobTracker {
        &self.tracker
    }

    /// Blocking. Every outcome, including failure, lands in the tracker.
    pub fn run(&self, job_id: &str, spec: &DownloadSpec) {
        let outcome = match self.execute(job_id, spec) {
            Ok(filename) => {
                info!(job_id, %filename, "download completed");
                JobOutcome::Completed { filename }
            }
            Err(err) => {
                let message = format!("{err:#}");
                error!(job_id, error = %message, "download failed");
                JobOutcome::Failed { message }
            }
        };
        self.tracker.finalize(job_id, outcome);
    }

    fn execute(&self, job_id: &str, spec: &DownloadSpec) -> Result<String> {
        let title = self.engine.fetch_title(&spec.url)?;
        let base_name = clean_filename(&title);
        let request = self.build_request(spec, &base_name);
        info!(
            job_id,
            kind = spec.kind.as_str(),
            container = %request.output_container,
            codec = %request.codec,
            format = %request.format_selector,
            "starting download"
        );

        let sink = TrackerSink {
            tracker: &self.tracker,
            job_id,
        };
        let produced = self.engine.download(&request, &sink)?;
        // Plain video keeps whatever container the engine picked.
        let final_path = if request.kind == MediaKind::Audio || request.needs_recode() {
            normalize_extension(&produced, request.final_extension())?
        } else {
            produced
        };
        final_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| anyhow!("engine produced a path without a file name"))
    }

    fn build_request(&self, spec: &DownloadSpec, base_name: &str) -> DownloadRequest {
        let format_selector = match spec.kind {
            MediaKind::Audio => BEST_AUDIO_SELECTOR.to_string(),
            MediaKind::Video => spec.format_selector.clone(),
        };
        DownloadRequest {
            url: spec.url.clone(),
            format_selector,
            kind: spec.kind,
            output_container: spec.output_container.trim().to_ascii_lowercase(),
            codec: spec.codec.clone(),
            output_template: self
                .download_dir
                .join(format!("{base_name}.{EXT_PLACEHOLDER}")),
        }
    }
}

/// Renames `produced` so it carries `ext`, unless it already does.
fn normalize_extension(produced: &Path, ext: &str) -> Result<PathBuf> {
    let has_ext = produced
        .extension()
        .is_some_and(|current| current.to_string_lossy().eq_ignore_ascii_case(ext));
    if has_ext {
        return Ok(produced.to_path_buf());
    }
    let target = produced.with_extension(ext);
    if produced.exists() {
        fs::rename(produced, &target).with_context(|| {
            format!(
                "renaming {} to {}",
                produced.display(),
                target.display()
            )
        })?;
    }
    Ok(target)
}

//! Startup cleanup of download leftovers.

use std::path::Path;
use std::time::{Duration, SystemTime};

use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Files older than this are removed by [`sweep_stale_files`].
pub const STALE_AFTER: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub removed: usize,
    pub failed: usize,
}

/// Deletes regular files directly inside `dir` whose modification time is
/// more than `max_age` before `now`. Never fails; problems are logged.
pub fn sweep_stale_files(dir: &Path, max_age: Duration, now: SystemTime) -> SweepReport {
    let mut report = SweepReport::default();
    if !dir.is_dir() {
        debug!(dir = %dir.display(), "download dir missing, nothing to sweep");
        return report;
    }

    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!(error = %err, "could not read download dir entry");
                report.failed += 1;
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let modified = match entry.metadata().map(|meta| meta.modified()) {
            Ok(Ok(modified)) => modified,
            _ => {
                report.failed += 1;
                continue;
            }
        };
        let age = now.duration_since(modified).unwrap_or_default();
        if age <= max_age {
            continue;
        }
        match std::fs::remove_file(entry.path()) {
            Ok(()) => {
                debug!(path = %entry.path().display(), "removed stale download");
                report.removed += 1;
            }
            Err(err) => {
                warn!(path = %entry.path().display(), error = %err, "failed to remove stale download");
                report.failed += 1;
            }
        }
    }

    info!(
        dir = %dir.display(),
        removed = report.removed,
        failed = report.failed,
        "stale download sweep finished"
    );
    report
}

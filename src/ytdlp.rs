//! Thin wrapper around the `yt-dlp` executable: metadata dumps, downloads
//! with machine-readable progress, and FFmpeg discovery.

use std::collections::VecDeque;
use std::env;
use std::ffi::OsString;
use std::fs;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;

use anyhow::{Context, Result, anyhow, bail};
use parking_lot::Mutex;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::engine::{DownloadRequest, MediaEngine, MediaKind, ProgressSink};
use crate::formats::{AUDIO_TARGET_KBPS, RawFormat};

const PROGRESS_PREFIX: &str = "VMX_PROGRESS|";
const OUTPUT_PREFIX: &str = "VMX_OUTPUT|";
/// Cookie files at or below this size are treated as empty exports.
const MIN_COOKIES_BYTES: u64 = 100;
/// stderr lines kept for the failure message.
const STDERR_TAIL_LINES: usize = 50;
const METADATA_SOCKET_TIMEOUT_SECS: u32 = 30;
const DOWNLOAD_SOCKET_TIMEOUT_SECS: u32 = 180;

#[derive(Debug, Clone)]
pub struct YtDlp {
    binary: PathBuf,
    cookies_file: Option<PathBuf>,
    ffmpeg_location: Option<PathBuf>,
}

impl Default for YtDlp {
    fn default() -> Self {
        Self::new("yt-dlp")
    }
}

impl YtDlp {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            cookies_file: None,
            ffmpeg_location: None,
        }
    }

    pub fn with_cookies_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.cookies_file = Some(path.into());
        self
    }

    pub fn with_ffmpeg_location(mut self, dir: Option<PathBuf>) -> Self {
        self.ffmpeg_location = dir;
        self
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    pub fn ffmpeg_location(&self) -> Option<&Path> {
        self.ffmpeg_location.as_deref()
    }

    /// Cookie file to pass, re-checked on every call so a file dropped in
    /// while the server runs is picked up.
    fn usable_cookies(&self) -> Option<&Path> {
        let path = self.cookies_file.as_deref()?;
        match fs::metadata(path) {
            Ok(meta) if meta.is_file() && meta.len() > MIN_COOKIES_BYTES => Some(path),
            _ => None,
        }
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.binary);
        if let Some(cookies) = self.usable_cookies() {
            command.arg("--cookies").arg(cookies);
        }
        if let Some(ffmpeg) = &self.ffmpeg_location {
            command.arg("--ffmpeg-location").arg(ffmpeg);
        }
        command
    }

    /// Runs `yt-dlp --dump-single-json` for a single video.
    pub fn fetch_info(&self, url: &str) -> Result<YtDlpInfo> {
        let output = self
            .command()
            .arg("--dump-single-json")
            .arg("--skip-download")
            .arg("--no-warnings")
            .arg("--no-playlist")
            .arg("--no-check-certificates")
            .arg("--socket-timeout")
            .arg(METADATA_SOCKET_TIMEOUT_SECS.to_string())
            .arg("--")
            .arg(url)
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("running {}", self.binary.display()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "{}",
                error_summary(stderr.lines()).unwrap_or_else(|| format!(
                    "metadata command failed for {url} (status {})",
                    output.status
                ))
            );
        }

        serde_json::from_slice(&output.stdout).context("deserializing yt-dlp metadata JSON")
    }

    /// Runs the download, feeding progress into `progress`, and returns the
    /// path of the produced file.
    pub fn download(
        &self,
        request: &DownloadRequest,
        progress: &dyn ProgressSink,
    ) -> Result<PathBuf> {
        if let Some(parent) = request.output_template.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating download dir {}", parent.display()))?;
        }

        let mut child = self
            .command()
            .args(download_args(request))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("spawning {}", self.binary.display()))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("failed to capture yt-dlp stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("failed to capture yt-dlp stderr"))?;

        let produced: Mutex<Option<PathBuf>> = Mutex::new(None);
        let stderr_tail = Mutex::new(StderrTail::new(STDERR_TAIL_LINES));

        // yt-dlp builds disagree on which stream carries progress, so both
        // are scanned.
        thread::scope(|scope| {
            scope.spawn(|| {
                for line in read_lines(stderr) {
                    if !scan_line(&line, progress, &produced) {
                        stderr_tail.lock().push(line);
                    }
                }
            });
            for line in read_lines(stdout) {
                scan_line(&line, progress, &produced);
            }
        });

        let status = child.wait().context("waiting for yt-dlp")?;
        if !status.success() {
            let tail = stderr_tail.into_inner();
            bail!(
                "{}",
                error_summary(tail.lines())
                    .unwrap_or_else(|| format!("yt-dlp exited with {status}"))
            );
        }

        let path = produced
            .into_inner()
            .unwrap_or_else(|| request.expected_output());
        debug!(path = %path.display(), "yt-dlp finished");
        Ok(path)
    }
}

impl MediaEngine for YtDlp {
    fn fetch_title(&self, url: &str) -> Result<String> {
        let info = self.fetch_info(url)?;
        info.display_title()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("yt-dlp returned no title for {url}"))
    }

    fn download(&self, request: &DownloadRequest, progress: &dyn ProgressSink) -> Result<PathBuf> {
        YtDlp::download(self, request, progress)
    }
}

/// Arguments for one download, excluding the cookie/ffmpeg prefix.
pub fn download_args(request: &DownloadRequest) -> Vec<String> {
    let output = request.output_template.to_string_lossy().into_owned();
    let socket_timeout = DOWNLOAD_SOCKET_TIMEOUT_SECS.to_string();
    let mut args: Vec<String> = [
        "--format",
        request.format_selector.as_str(),
        "--output",
        output.as_str(),
        "--newline",
        "--progress",
        "--progress-template",
        "download:VMX_PROGRESS|%(progress.downloaded_bytes)s|%(progress.total_bytes)s|%(progress.total_bytes_estimate)s",
        "--print",
        "after_move:VMX_OUTPUT|%(filepath)s",
        "--concurrent-fragments",
        "8",
        "--http-chunk-size",
        "5M",
        "--buffer-size",
        "32K",
        "--retries",
        "50",
        "--fragment-retries",
        "50",
        "--extractor-retries",
        "30",
        "--file-access-retries",
        "30",
        "--socket-timeout",
        socket_timeout.as_str(),
        "--no-keep-video",
        "--no-playlist",
        "--no-warnings",
        "--no-check-certificates",
        "--continue",
        "--force-overwrites",
    ]
    .iter()
    .map(|arg| arg.to_string())
    .collect();

    match request.kind {
        MediaKind::Audio => {
            args.extend([
                "--extract-audio".to_string(),
                "--audio-format".to_string(),
                request.final_extension().to_string(),
                "--audio-quality".to_string(),
                format!("{AUDIO_TARGET_KBPS}K"),
                "--postprocessor-args".to_string(),
                "ExtractAudio:-threads 0".to_string(),
            ]);
        }
        MediaKind::Video if request.needs_recode() => {
            args.extend([
                "--recode-video".to_string(),
                request.output_container.clone(),
                "--postprocessor-args".to_string(),
                "VideoConvertor:-preset ultrafast -threads 0".to_string(),
            ]);
        }
        MediaKind::Video => {}
    }

    args.push("--".to_string());
    args.push(request.url.clone());
    args
}

/// Returns true when the line was one of our own progress/output markers.
fn scan_line(line: &str, progress: &dyn ProgressSink, produced: &Mutex<Option<PathBuf>>) -> bool {
    if let Some((downloaded, total)) = parse_progress_line(line) {
        progress.on_progress(downloaded, total);
        true
    } else if let Some(path) = parse_output_line(line) {
        info!(path = %path.display(), "yt-dlp reported output file");
        *produced.lock() = Some(path);
        true
    } else {
        false
    }
}

/// Last `capacity` diagnostic lines of a child's stderr.
struct StderrTail {
    lines: VecDeque<String>,
    capacity: usize,
}

impl StderrTail {
    fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn push(&mut self, line: String) {
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    fn lines(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }
}

fn read_lines(stream: impl Read) -> impl Iterator<Item = String> {
    BufReader::new(stream)
        .split(b'\n')
        .map_while(|chunk| chunk.ok())
        .map(|bytes| {
            String::from_utf8_lossy(&bytes)
                .trim_end_matches('\r')
                .to_string()
        })
}

/// Parses `VMX_PROGRESS|<downloaded>|<total>|<estimate>`. `NA` fields are
/// unknown; a missing total falls back to the estimate.
pub fn parse_progress_line(line: &str) -> Option<(u64, Option<u64>)> {
    let rest = line.trim().strip_prefix(PROGRESS_PREFIX)?;
    let mut fields = rest.split('|').map(parse_byte_field);
    let downloaded = fields.next()??;
    let total = fields.next().flatten();
    let estimate = fields.next().flatten();
    Some((downloaded, total.or(estimate)))
}

fn parse_byte_field(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("NA") || raw.eq_ignore_ascii_case("none") {
        return None;
    }
    raw.parse::<u64>()
        .ok()
        .or_else(|| raw.parse::<f64>().ok().filter(|v| *v >= 0.0).map(|v| v as u64))
}

pub fn parse_output_line(line: &str) -> Option<PathBuf> {
    let path = line.trim().strip_prefix(OUTPUT_PREFIX)?.trim();
    if path.is_empty() || path == "NA" {
        None
    } else {
        Some(PathBuf::from(path))
    }
}

/// Picks the most useful line out of yt-dlp's stderr.
fn error_summary<'a>(lines: impl Iterator<Item = &'a str>) -> Option<String> {
    let lines: Vec<&str> = lines.map(str::trim).filter(|l| !l.is_empty()).collect();
    lines
        .iter()
        .rev()
        .find(|line| line.starts_with("ERROR:"))
        .or_else(|| lines.last())
        .map(|line| line.to_string())
}

/// Subset of the `--dump-single-json` payload the backend reads.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct YtDlpInfo {
    pub id: Option<String>,
    pub title: Option<String>,
    pub fulltitle: Option<String>,
    pub thumbnail: Option<String>,
    pub duration: Option<f64>,
    pub view_count: Option<u64>,
    pub uploader: Option<String>,
    pub channel: Option<String>,
    #[serde(default)]
    pub formats: Vec<YtDlpFormat>,
}

impl YtDlpInfo {
    pub fn display_title(&self) -> Option<&str> {
        self.title
            .as_deref()
            .or(self.fulltitle.as_deref())
            .filter(|title| !title.trim().is_empty())
    }

    pub fn raw_formats(&self) -> Vec<RawFormat> {
        self.formats.iter().map(YtDlpFormat::to_raw).collect()
    }
}

/// Sizes are read as floats: yt-dlp emits fractional `filesize_approx`
/// values for some extractors.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct YtDlpFormat {
    #[serde(default)]
    pub format_id: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fps: Option<f64>,
    pub vcodec: Option<String>,
    pub acodec: Option<String>,
    pub abr: Option<f64>,
    pub filesize: Option<f64>,
    pub filesize_approx: Option<f64>,
}

impl YtDlpFormat {
    pub fn to_raw(&self) -> RawFormat {
        RawFormat {
            format_id: self.format_id.clone(),
            width: self.width,
            height: self.height,
            fps: self.fps,
            vcodec: self.vcodec.clone(),
            acodec: self.acodec.clone(),
            abr: self.abr,
            filesize: self.filesize.map(|size| size as u64),
            filesize_approx: self.filesize_approx.map(|size| size as u64),
        }
    }
}

fn ffmpeg_executable() -> &'static str {
    if cfg!(windows) { "ffmpeg.exe" } else { "ffmpeg" }
}

/// Install locations checked when `ffmpeg` is not on `PATH`.
fn default_ffmpeg_dirs() -> Vec<PathBuf> {
    if cfg!(windows) {
        let mut dirs = vec![
            PathBuf::from(r"C:\ffmpeg\bin"),
            PathBuf::from(r"C:\Program Files\ffmpeg\bin"),
        ];
        if let Some(home) = env::var_os("USERPROFILE") {
            dirs.push(PathBuf::from(home).join(r"scoop\apps\ffmpeg\current\bin"));
        }
        dirs
    } else {
        vec![
            PathBuf::from("/usr/local/bin"),
            PathBuf::from("/opt/homebrew/bin"),
            PathBuf::from("/usr/bin"),
        ]
    }
}

/// Directory holding FFmpeg: the configured one, else `PATH`, else a well
/// known install location.
pub fn locate_ffmpeg(explicit: Option<&Path>) -> Option<PathBuf> {
    let found = locate_ffmpeg_in(explicit, env::var_os("PATH"), &default_ffmpeg_dirs());
    match &found {
        Some(dir) => info!(dir = %dir.display(), "using ffmpeg"),
        None => warn!("ffmpeg not found; recoding and audio extraction will fail"),
    }
    found
}

pub fn locate_ffmpeg_in(
    explicit: Option<&Path>,
    path_var: Option<OsString>,
    fallback_dirs: &[PathBuf],
) -> Option<PathBuf> {
    if let Some(explicit) = explicit {
        return Some(explicit.to_path_buf());
    }
    let binary = ffmpeg_executable();
    path_var
        .iter()
        .flat_map(env::split_paths)
        .chain(fallback_dirs.iter().cloned())
        .find(|dir| dir.join(binary).is_file())
}

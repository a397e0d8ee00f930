//! Seam between the download executor and whatever actually fetches and
//! transcodes media.

use std::path::PathBuf;

use anyhow::Result;

/// Default container for video downloads; anything else triggers a recode.
pub const DEFAULT_VIDEO_CONTAINER: &str = "mp4";
/// Container audio downloads are always converted to.
pub const AUDIO_EXTENSION: &str = "mp3";
/// yt-dlp output template placeholder for the final extension.
pub const EXT_PLACEHOLDER: &str = "%(ext)s";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Video,
    Audio,
}

impl MediaKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "video" => Some(Self::Video),
            "audio" => Some(Self::Audio),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Audio => "audio",
        }
    }
}

/// Fully resolved instructions for one engine download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub url: String,
    pub format_selector: String,
    pub kind: MediaKind,
    /// Lower-case container the caller wants to end up with.
    pub output_container: String,
    pub codec: String,
    /// Output path template; the extension is left as [`EXT_PLACEHOLDER`].
    pub output_template: PathBuf,
}

impl DownloadRequest {
    pub fn needs_recode(&self) -> bool {
        self.kind == MediaKind::Video && self.output_container != DEFAULT_VIDEO_CONTAINER
    }

    /// Extension the produced file should carry once post-processing is done.
    pub fn final_extension(&self) -> &str {
        match self.kind {
            MediaKind::Audio => AUDIO_EXTENSION,
            MediaKind::Video => &self.output_container,
        }
    }

    /// Best guess at the produced file when the engine did not report one.
    pub fn expected_output(&self) -> PathBuf {
        let template = self.output_template.to_string_lossy();
        let base = template
            .strip_suffix(&format!(".{EXT_PLACEHOLDER}"))
            .unwrap_or(&template);
        PathBuf::from(format!("{base}.{}", self.final_extension()))
    }
}

/// Receives byte-level progress from a running download. Called from
/// whichever thread the engine reads its output on.
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, downloaded: u64, total: Option<u64>);
}

/// The extraction/transcoding black box.
pub trait MediaEngine: Send + Sync {
    /// Metadata-only lookup of the canonical title.
    fn fetch_title(&self, url: &str) -> Result<String>;

    /// Downloads (and post-processes) the media, returning the produced file.
    fn download(&self, request: &DownloadRequest, progress: &dyn ProgressSink) -> Result<PathBuf>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(kind: MediaKind, container: &str) -> DownloadRequest {
        DownloadRequest {
            url: "https://youtu.be/dQw4w9WgXcQ".into(),
            format_selector: "22".into(),
            kind,
            output_container: container.into(),
            codec: "h264".into(),
            output_template: PathBuf::from("/tmp/out/My Title.%(ext)s"),
        }
    }

    #[test]
    fn media_kind_parses_case_insensitively() {
        assert_eq!(MediaKind::parse(" Audio "), Some(MediaKind::Audio));
        assert_eq!(MediaKind::parse("video"), Some(MediaKind::Video));
        assert_eq!(MediaKind::parse("gif"), None);
    }

    #[test]
    fn recode_only_for_non_default_video_containers() {
        assert!(!request(MediaKind::Video, "mp4").needs_recode());
        assert!(request(MediaKind::Video, "mkv").needs_recode());
        assert!(!request(MediaKind::Audio, "mkv").needs_recode());
    }

    #[test]
    fn expected_output_replaces_placeholder() {
        assert_eq!(
            request(MediaKind::Video, "avi").expected_output(),
            PathBuf::from("/tmp/out/My Title.avi")
        );
        assert_eq!(
            request(MediaKind::Audio, "avi").expected_output(),
            PathBuf::from("/tmp/out/My Title.mp3")
        );
    }
}

use std::sync::Arc;

use super::video_id::extract_video_id;
use super::{MetadataProvider, ProviderError, VideoMetadata};
use crate::formats::{collapse_video_formats, collect_audio_formats};
use crate::ytdlp::{YtDlp, YtDlpInfo};

/// Primary provider: asks the local yt-dlp install for the full format list.
#[derive(Clone)]
pub struct YtDlpProvider {
    ytdlp: Arc<YtDlp>,
}

impl YtDlpProvider {
    pub const NAME: &'static str = "yt-dlp";

    pub fn new(ytdlp: Arc<YtDlp>) -> Self {
        Self { ytdlp }
    }
}

impl MetadataProvider for YtDlpProvider {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn try_resolve(&self, url: &str) -> Result<VideoMetadata, ProviderError> {
        let info = self
            .ytdlp
            .fetch_info(url)
            .map_err(|err| ProviderError::Extractor(format!("{err:#}")))?;
        Ok(into_metadata(info, url))
    }
}

fn into_metadata(info: YtDlpInfo, url: &str) -> VideoMetadata {
    let raw = info.raw_formats();
    let id = info
        .id
        .clone()
        .or_else(|| extract_video_id(url))
        .unwrap_or_default();
    VideoMetadata {
        title: info.display_title().unwrap_or("Unknown").to_string(),
        thumbnail: info.thumbnail.unwrap_or_default(),
        duration_secs: info.duration.filter(|d| *d >= 0.0).map(|d| d as u64),
        view_count: info.view_count,
        channel: info
            .uploader
            .or(info.channel)
            .unwrap_or_else(|| "Unknown".to_string()),
        video_formats: collapse_video_formats(&raw),
        audio_formats: collect_audio_formats(&raw),
        provider: YtDlpProvider::NAME,
        direct_url: None,
        id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = r#"{
      "id": "dQw4w9WgXcQ",
      "title": "Never Gonna Give You Up",
      "thumbnail": "https://i.ytimg.com/vi/dQw4w9WgXcQ/maxresdefault.jpg",
      "duration": 212.0,
      "view_count": 1500000000,
      "uploader": "Rick Astley",
      "formats": [
        {"format_id": "140", "vcodec": "none", "acodec": "mp4a.40.2", "abr": 129.5, "filesize": 3433000},
        {"format_id": "251", "vcodec": "none", "acodec": "opus", "abr": 135.1},
        {"format_id": "18", "width": 640, "height": 360, "fps": 25, "vcodec": "avc1.42001E", "acodec": "mp4a.40.2", "filesize_approx": 4123000},
        {"format_id": "137", "width": 1920, "height": 1080, "vcodec": "avc1.640028", "acodec": "none"},
        {"format_id": "22", "width": 1280, "height": 720, "fps": 25, "vcodec": "avc1.64001F", "acodec": "mp4a.40.2"}
      ]
    }"#;

    #[test]
    fn maps_ytdlp_payload_into_metadata() {
        let info: YtDlpInfo = serde_json::from_str(FIXTURE).unwrap();
        let metadata = into_metadata(info, "https://youtu.be/dQw4w9WgXcQ");

        assert_eq!(metadata.id, "dQw4w9WgXcQ");
        assert_eq!(metadata.channel, "Rick Astley");
        assert_eq!(metadata.duration_secs, Some(212));
        assert_eq!(metadata.provider, "yt-dlp");

        let qualities: Vec<_> = metadata
            .video_formats
            .iter()
            .map(|option| option.quality.as_str())
            .collect();
        assert_eq!(qualities.len(), 12);
        assert_eq!(qualities[0], "720p");
        assert_eq!(qualities[6], "360p");
        assert_eq!(metadata.video_formats[6].size, "4 MB");
        assert_eq!(metadata.video_formats[0].size, "N/A");

        let audio: Vec<_> = metadata
            .audio_formats
            .iter()
            .map(|option| (option.format_id.as_str(), option.quality.as_str()))
            .collect();
        assert_eq!(audio, [("251", "135kbps"), ("140", "129kbps")]);
    }

    #[test]
    fn falls_back_to_url_id_and_unknown_labels() {
        let info: YtDlpInfo = serde_json::from_str(r#"{"formats": []}"#).unwrap();
        let metadata = into_metadata(info, "https://www.youtube.com/watch?v=dQw4w9WgXcQ");
        assert_eq!(metadata.id, "dQw4w9WgXcQ");
        assert_eq!(metadata.title, "Unknown");
        assert_eq!(metadata.channel, "Unknown");
        assert!(metadata.video_formats.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn resolves_through_ytdlp_binary() {
        let dir = tempfile::tempdir().unwrap();
        let binary = crate::ytdlp::testing::install_ytdlp_stub(dir.path());
        std::fs::write(dir.path().join("info.json"), FIXTURE).unwrap();
        let provider = YtDlpProvider::new(Arc::new(YtDlp::new(binary)));

        let metadata = provider.try_resolve("https://youtu.be/dQw4w9WgXcQ").unwrap();
        assert_eq!(metadata.title, "Never Gonna Give You Up");

        let err = provider.try_resolve("https://youtu.be/fail").unwrap_err();
        assert!(matches!(err, ProviderError::Extractor(message) if message.contains("Video unavailable")));
    }
}

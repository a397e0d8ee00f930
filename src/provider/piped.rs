use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use super::video_id::{extract_video_id, thumbnail_for};
use super::{MetadataProvider, ProviderError, VideoMetadata};
use crate::formats::{
    RawFormat, best_audio_option, best_video_option, collapse_video_formats,
    collect_audio_formats,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Secondary provider backed by a Piped API instance.
#[derive(Clone)]
pub struct PipedProvider {
    base: String,
    agent: ureq::Agent,
}

impl PipedProvider {
    pub const NAME: &'static str = "piped";

    pub fn new(base: impl Into<String>) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(REQUEST_TIMEOUT).build();
        Self {
            base: base.into().trim_end_matches('/').to_string(),
            agent,
        }
    }

    fn streams_url(&self, id: &str) -> String {
        format!("{}/streams/{id}", self.base)
    }
}

impl MetadataProvider for PipedProvider {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn try_resolve(&self, url: &str) -> Result<VideoMetadata, ProviderError> {
        let Some(id) = extract_video_id(url) else {
            return Err(ProviderError::Skipped(format!("no video id in {url}")));
        };
        let endpoint = self.streams_url(&id);
        debug!(%endpoint, "querying piped");

        let response = self.agent.get(&endpoint).call().map_err(|err| match err {
            ureq::Error::Status(code, _) => ProviderError::Http(format!("{endpoint} returned {code}")),
            other => ProviderError::Http(other.to_string()),
        })?;
        let streams: PipedStreams = response
            .into_json()
            .map_err(|err| ProviderError::Parse(err.to_string()))?;
        if let Some(error) = streams.error {
            return Err(ProviderError::Extractor(error));
        }
        Ok(streams.into_metadata(id))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PipedStreams {
    title: Option<String>,
    thumbnail_url: Option<String>,
    uploader: Option<String>,
    duration: Option<i64>,
    views: Option<i64>,
    #[serde(default)]
    video_streams: Vec<PipedStream>,
    #[serde(default)]
    audio_streams: Vec<PipedStream>,
    error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PipedStream {
    itag: Option<i64>,
    codec: Option<String>,
    #[serde(default)]
    video_only: bool,
    bitrate: Option<i64>,
    width: Option<u32>,
    height: Option<u32>,
    fps: Option<f64>,
    content_length: Option<i64>,
}

impl PipedStream {
    fn format_id(&self) -> Option<String> {
        self.itag.filter(|itag| *itag > 0).map(|itag| itag.to_string())
    }

    fn size(&self) -> Option<u64> {
        self.content_length
            .filter(|len| *len > 0)
            .map(|len| len as u64)
    }

    fn to_video_raw(&self) -> Option<RawFormat> {
        Some(RawFormat {
            format_id: self.format_id()?,
            width: self.width,
            height: self.height,
            fps: self.fps,
            vcodec: self.codec.clone(),
            acodec: self.video_only.then(|| "none".to_string()),
            filesize: self.size(),
            ..RawFormat::default()
        })
    }

    fn to_audio_raw(&self) -> Option<RawFormat> {
        Some(RawFormat {
            format_id: self.format_id()?,
            vcodec: Some("none".to_string()),
            acodec: self.codec.clone(),
            abr: self.bitrate.map(|bps| bps as f64 / 1000.0),
            filesize: self.size(),
            ..RawFormat::default()
        })
    }
}

impl PipedStreams {
    fn into_metadata(self, id: String) -> VideoMetadata {
        let raw: Vec<RawFormat> = self
            .video_streams
            .iter()
            .filter_map(PipedStream::to_video_raw)
            .chain(self.audio_streams.iter().filter_map(PipedStream::to_audio_raw))
            .collect();

        let mut video_formats = collapse_video_formats(&raw);
        if video_formats.is_empty() {
            video_formats.push(best_video_option());
        }
        let mut audio_formats = collect_audio_formats(&raw);
        if audio_formats.is_empty() {
            audio_formats.push(best_audio_option());
        }

        VideoMetadata {
            title: self.title.unwrap_or_else(|| format!("Video {id}")),
            thumbnail: self.thumbnail_url.unwrap_or_else(|| thumbnail_for(&id)),
            duration_secs: self.duration.filter(|d| *d > 0).map(|d| d as u64),
            view_count: self.views.filter(|v| *v >= 0).map(|v| v as u64),
            channel: self.uploader.unwrap_or_else(|| "Unknown".to_string()),
            video_formats,
            audio_formats,
            provider: PipedProvider::NAME,
            direct_url: None,
            id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = r#"{
      "title": "Piped Title",
      "thumbnailUrl": "https://pipedproxy.example/vi/dQw4w9WgXcQ/maxresdefault.jpg",
      "uploader": "Piped Channel",
      "duration": 212,
      "views": 2500000,
      "videoStreams": [
        {"itag": 18, "codec": "avc1.42001E", "videoOnly": false, "width": 640, "height": 360, "fps": 25, "contentLength": 3930000},
        {"itag": 137, "codec": "avc1.640028", "videoOnly": true, "width": 1920, "height": 1080, "fps": 25}
      ],
      "audioStreams": [
        {"itag": 140, "codec": "mp4a.40.2", "bitrate": 130000, "contentLength": 2750000},
        {"itag": 249, "codec": "opus", "bitrate": 54000}
      ]
    }"#;

    #[test]
    fn maps_piped_streams_through_common_rules() {
        let streams: PipedStreams = serde_json::from_str(FIXTURE).unwrap();
        let metadata = streams.into_metadata("dQw4w9WgXcQ".into());

        assert_eq!(metadata.provider, "piped");
        assert_eq!(metadata.channel, "Piped Channel");
        assert_eq!(metadata.view_count, Some(2_500_000));
        assert_eq!(metadata.video_formats.len(), 6);
        assert!(metadata.video_formats.iter().all(|o| o.format_id == "18"));
        assert_eq!(metadata.video_formats[0].quality, "360p");
        assert_eq!(metadata.audio_formats.len(), 1);
        assert_eq!(metadata.audio_formats[0].format_id, "140");
        assert_eq!(metadata.audio_formats[0].quality, "130kbps");
    }

    #[test]
    fn synthesizes_best_options_when_nothing_qualifies() {
        let streams: PipedStreams = serde_json::from_str(
            r#"{"videoStreams":[{"itag":137,"videoOnly":true,"height":1080}],"audioStreams":[]}"#,
        )
        .unwrap();
        let metadata = streams.into_metadata("dQw4w9WgXcQ".into());

        assert_eq!(metadata.title, "Video dQw4w9WgXcQ");
        assert_eq!(
            metadata.thumbnail,
            "https://img.youtube.com/vi/dQw4w9WgXcQ/maxresdefault.jpg"
        );
        assert_eq!(metadata.video_formats, vec![best_video_option()]);
        assert_eq!(metadata.audio_formats, vec![best_audio_option()]);
    }

    #[test]
    fn skips_urls_without_video_id() {
        let provider = PipedProvider::new("http://127.0.0.1:9/");
        let err = provider.try_resolve("https://vimeo.com/123").unwrap_err();
        assert!(matches!(err, ProviderError::Skipped(_)));
        assert_eq!(
            provider.streams_url("abc"),
            "http://127.0.0.1:9/streams/abc"
        );
    }
}

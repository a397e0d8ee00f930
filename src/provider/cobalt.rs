//! Tertiary provider: public Cobalt instances. Cobalt only hands out a
//! direct link to the best stream, so metadata is mostly synthesized.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::video_id::{extract_video_id, thumbnail_for};
use super::{MetadataProvider, ProviderError, VideoMetadata};
use crate::format::UNKNOWN;
use crate::formats::{best_audio_option, best_video_option};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const SUCCESS_STATUSES: [&str; 4] = ["tunnel", "redirect", "stream", "picker"];

/// A direct link handed out by one mirror.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CobaltStream {
    pub url: String,
    pub filename: Option<String>,
    pub mirror: String,
}

#[derive(Clone)]
pub struct CobaltProvider {
    mirrors: Vec<String>,
    agent: ureq::Agent,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CobaltRequest<'a> {
    url: &'a str,
    video_quality: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    download_mode: Option<&'static str>,
}

#[derive(Debug, Deserialize)]
struct CobaltResponse {
    status: String,
    url: Option<String>,
    filename: Option<String>,
    #[serde(default)]
    picker: Vec<PickerItem>,
}

#[derive(Debug, Deserialize)]
struct PickerItem {
    url: Option<String>,
}

impl CobaltResponse {
    fn stream_url(self) -> Option<(String, Option<String>)> {
        let url = self
            .url
            .or_else(|| self.picker.into_iter().find_map(|item| item.url))?;
        Some((url, self.filename))
    }
}

impl CobaltProvider {
    pub const NAME: &'static str = "cobalt";

    pub fn new<I, S>(mirrors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            mirrors: mirrors
                .into_iter()
                .map(|mirror| mirror.into().trim_end_matches('/').to_string())
                .filter(|mirror| !mirror.is_empty())
                .collect(),
            agent: ureq::AgentBuilder::new().timeout(REQUEST_TIMEOUT).build(),
        }
    }

    pub fn mirrors(&self) -> &[String] {
        &self.mirrors
    }

    /// Walks the mirror list until one hands out a usable link.
    pub fn request_stream(&self, url: &str, audio_only: bool) -> Result<CobaltStream, ProviderError> {
        if self.mirrors.is_empty() {
            return Err(ProviderError::Skipped("no cobalt mirrors configured".into()));
        }
        let body = CobaltRequest {
            url,
            video_quality: "max",
            download_mode: audio_only.then_some("audio"),
        };

        let mut last_error = String::new();
        for mirror in &self.mirrors {
            let endpoint = format!("{mirror}/");
            let response = self
                .agent
                .post(&endpoint)
                .set("Accept", "application/json")
                .send_json(&body);
            let response = match response {
                Ok(response) => response,
                Err(ureq::Error::Status(401, _)) => {
                    debug!(%mirror, "cobalt mirror requires auth, skipping");
                    last_error = format!("{mirror} requires authentication");
                    continue;
                }
                Err(err) => {
                    warn!(%mirror, error = %err, "cobalt mirror failed");
                    last_error = format!("{mirror}: {err}");
                    continue;
                }
            };

            let parsed: CobaltResponse = match response.into_json() {
                Ok(parsed) => parsed,
                Err(err) => {
                    warn!(%mirror, error = %err, "cobalt mirror sent unreadable JSON");
                    last_error = format!("{mirror}: {err}");
                    continue;
                }
            };
            if !SUCCESS_STATUSES.contains(&parsed.status.as_str()) {
                debug!(%mirror, status = %parsed.status, "cobalt mirror declined");
                last_error = format!("{mirror} answered {}", parsed.status);
                continue;
            }
            match parsed.stream_url() {
                Some((stream_url, filename)) => {
                    info!(%mirror, "cobalt mirror produced a link");
                    return Ok(CobaltStream {
                        url: stream_url,
                        filename,
                        mirror: mirror.clone(),
                    });
                }
                None => last_error = format!("{mirror} returned no url"),
            }
        }
        Err(ProviderError::NoMirror(last_error))
    }
}

impl MetadataProvider for CobaltProvider {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn try_resolve(&self, url: &str) -> Result<VideoMetadata, ProviderError> {
        let stream = self.request_stream(url, false)?;
        let id = extract_video_id(url);
        let title = stream
            .filename
            .as_deref()
            .and_then(|name| Path::new(name).file_stem())
            .map(|stem| stem.to_string_lossy().into_owned())
            .filter(|stem| !stem.trim().is_empty())
            .unwrap_or_else(|| format!("Video {}", id.as_deref().unwrap_or(UNKNOWN)));

        Ok(VideoMetadata {
            thumbnail: id.as_deref().map(thumbnail_for).unwrap_or_default(),
            id: id.unwrap_or_default(),
            title,
            duration_secs: None,
            view_count: None,
            channel: "Unknown".to_string(),
            video_formats: vec![best_video_option()],
            audio_formats: vec![best_audio_option()],
            provider: Self::NAME,
            direct_url: Some(stream.url),
        })
    }
}

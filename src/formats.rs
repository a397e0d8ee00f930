//! Format options presented to clients and the rules that collapse a
//! provider's raw stream list into them.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;

use crate::format::format_size_or_unknown;

/// yt-dlp selector for "best muxed stream". Used by providers that cannot
/// enumerate qualities.
pub const BEST_VIDEO_SELECTOR: &str = "best";
/// yt-dlp selector for "best audio, or best overall when audio-only is missing".
pub const BEST_AUDIO_SELECTOR: &str = "bestaudio/best";

/// Audio is always delivered as MP3, whatever the source codec.
pub const AUDIO_CONTAINER: &str = "MP3";
/// Target bitrate of the MP3 extraction, in kbps.
pub const AUDIO_TARGET_KBPS: u32 = 320;
/// Audio streams below this bitrate are not offered.
const MIN_AUDIO_KBPS: f64 = 128.0;
const MAX_AUDIO_OPTIONS: usize = 4;
const DEFAULT_FPS: f64 = 30.0;

/// One output container a video stream can be delivered in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputContainer {
    pub ext: &'static str,
    pub codec: &'static str,
    pub name: &'static str,
}

/// Containers offered for every video quality, in presentation order.
pub const OUTPUT_CONTAINERS: [OutputContainer; 6] = [
    OutputContainer {
        ext: "MP4",
        codec: "h264",
        name: "MP4 (H.264)",
    },
    OutputContainer {
        ext: "AVI",
        codec: "xvid",
        name: "AVI (Xvid)",
    },
    OutputContainer {
        ext: "MKV",
        codec: "h264",
        name: "MKV (H.264)",
    },
    OutputContainer {
        ext: "MOV",
        codec: "h264",
        name: "MOV (H.264)",
    },
    OutputContainer {
        ext: "WMV",
        codec: "wmv2",
        name: "WMV",
    },
    OutputContainer {
        ext: "FLV",
        codec: "flv",
        name: "FLV",
    },
];

/// Looks up a container by its (case-insensitive) extension.
pub fn find_container(ext: &str) -> Option<&'static OutputContainer> {
    OUTPUT_CONTAINERS
        .iter()
        .find(|container| container.ext.eq_ignore_ascii_case(ext.trim()))
}

/// Provider-neutral description of one stream, as reported by an extractor.
///
/// `vcodec`/`acodec` follow yt-dlp's convention: the literal `"none"` means
/// the track is absent, while a missing value means "unknown, assume present".
#[derive(Debug, Clone, Default)]
pub struct RawFormat {
    pub format_id: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fps: Option<f64>,
    pub vcodec: Option<String>,
    pub acodec: Option<String>,
    pub abr: Option<f64>,
    pub filesize: Option<u64>,
    pub filesize_approx: Option<u64>,
}

impl RawFormat {
    fn has_video(&self) -> bool {
        self.vcodec.as_deref() != Some("none")
    }

    fn has_audio(&self) -> bool {
        self.acodec.as_deref() != Some("none")
    }

    fn approx_size(&self) -> Option<u64> {
        self.filesize_approx
            .filter(|size| *size > 0)
            .or(self.filesize)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoFormatOption {
    pub format_id: String,
    pub quality: String,
    pub resolution: String,
    pub size: String,
    pub fps: f64,
    pub format: String,
    pub format_name: String,
    pub codec: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AudioFormatOption {
    pub format_id: String,
    pub quality: String,
    pub size: String,
    pub format: String,
}

/// Keeps the first muxed stream per height and fans each one out into every
/// [`OUTPUT_CONTAINERS`] entry. Highest resolution first.
pub fn collapse_video_formats(raw: &[RawFormat]) -> Vec<VideoFormatOption> {
    let mut by_height: BTreeMap<u32, &RawFormat> = BTreeMap::new();
    for format in raw {
        if !format.has_video() || !format.has_audio() {
            continue;
        }
        let Some(height) = format.height.filter(|height| *height > 0) else {
            continue;
        };
        by_height.entry(height).or_insert(format);
    }

    let mut options = Vec::with_capacity(by_height.len() * OUTPUT_CONTAINERS.len());
    for (height, format) in by_height.into_iter().rev() {
        let size = format_size_or_unknown(format.approx_size());
        let resolution = format!("{}x{}", format.width.unwrap_or(0), height);
        let fps = format.fps.unwrap_or(DEFAULT_FPS);
        for container in &OUTPUT_CONTAINERS {
            options.push(VideoFormatOption {
                format_id: format.format_id.clone(),
                quality: format!("{height}p"),
                resolution: resolution.clone(),
                size: size.clone(),
                fps,
                format: container.ext.to_string(),
                format_name: container.name.to_string(),
                codec: container.codec.to_string(),
            });
        }
    }
    options
}

/// Audio-only streams of at least 128 kbps, one per bitrate label, best
/// first, at most four.
pub fn collect_audio_formats(raw: &[RawFormat]) -> Vec<AudioFormatOption> {
    let mut seen = HashSet::new();
    let mut ranked: Vec<(u64, AudioFormatOption)> = Vec::new();
    for format in raw {
        if format.has_video() || !format.has_audio() {
            continue;
        }
        let Some(abr) = format.abr.filter(|abr| *abr >= MIN_AUDIO_KBPS) else {
            continue;
        };
        let kbps = abr as u64;
        let quality = format!("{kbps}kbps");
        if !seen.insert(quality.clone()) {
            continue;
        }
        ranked.push((
            kbps,
            AudioFormatOption {
                format_id: format.format_id.clone(),
                quality,
                size: format_size_or_unknown(format.approx_size()),
                format: AUDIO_CONTAINER.to_string(),
            },
        ));
    }
    ranked.sort_by(|a, b| b.0.cmp(&a.0));
    ranked
        .into_iter()
        .take(MAX_AUDIO_OPTIONS)
        .map(|(_, option)| option)
        .collect()
}

/// Single placeholder option for providers that only expose "the best
/// stream"; the executor fulfils it with [`BEST_VIDEO_SELECTOR`].
pub fn best_video_option() -> VideoFormatOption {
    let container = &OUTPUT_CONTAINERS[0];
    VideoFormatOption {
        format_id: BEST_VIDEO_SELECTOR.to_string(),
        quality: "Best".to_string(),
        resolution: "Auto".to_string(),
        size: format_size_or_unknown(None),
        fps: DEFAULT_FPS,
        format: container.ext.to_string(),
        format_name: format!("{} (Auto)", container.ext),
        codec: container.codec.to_string(),
    }
}

pub fn best_audio_option() -> AudioFormatOption {
    AudioFormatOption {
        format_id: BEST_AUDIO_SELECTOR.to_string(),
        quality: format!("{AUDIO_TARGET_KBPS}kbps"),
        size: format_size_or_unknown(None),
        format: AUDIO_CONTAINER.to_string(),
    }
}

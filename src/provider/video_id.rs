//! Platform video id extraction for providers that address videos by id.

use std::sync::LazyLock;

use regex::Regex;

static VIDEO_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?:youtube(?:-nocookie)?\.com/(?:[^/]+/.+/|(?:v|e(?:mbed)?|shorts|live)/|.*[?&]v=)|youtu\.be/)([^"&?/\s]{11})"#,
    )
    .expect("video id pattern is valid")
});

/// Pulls the 11-character id out of watch, short-link, embed and shorts
/// URLs. Returns `None` for anything else.
pub fn extract_video_id(url: &str) -> Option<String> {
    VIDEO_ID_RE
        .captures(url.trim())
        .and_then(|caps| caps.get(1))
        .map(|id| id.as_str().to_string())
}

/// Canonical thumbnail for a video id, used when a provider has none.
pub fn thumbnail_for(video_id: &str) -> String {
    format!("https://img.youtube.com/vi/{video_id}/maxresdefault.jpg")
}

//! Metadata resolution through an ordered chain of providers.
//!
//! Each provider turns a URL into [`VideoMetadata`] its own way (yt-dlp
//! process, Piped JSON API, Cobalt mirrors). The [`ProviderResolver`] asks
//! them in priority order and hands back the first success; individual
//! failures are logged and dropped so callers only ever see one generic,
//! retryable error.

pub mod cobalt;
pub mod piped;
pub mod video_id;
pub mod ytdlp;

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::formats::{AudioFormatOption, VideoFormatOption};

pub use cobalt::CobaltProvider;
pub use piped::PipedProvider;
pub use ytdlp::YtDlpProvider;

/// Normalized metadata, identical in shape whichever provider produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoMetadata {
    pub id: String,
    pub title: String,
    pub thumbnail: String,
    pub duration_secs: Option<u64>,
    pub view_count: Option<u64>,
    pub channel: String,
    pub video_formats: Vec<VideoFormatOption>,
    pub audio_formats: Vec<AudioFormatOption>,
    /// Name of the provider that answered.
    pub provider: &'static str,
    /// Direct media link, only for providers that resolve to a single stream.
    pub direct_url: Option<String>,
}

#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider cannot handle this URL at all; not counted as a failure.
    #[error("skipped: {0}")]
    Skipped(String),
    #[error("request failed: {0}")]
    Http(String),
    #[error("extractor failed: {0}")]
    Extractor(String),
    #[error("unexpected response: {0}")]
    Parse(String),
    #[error("no usable mirror: {0}")]
    NoMirror(String),
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("Could not process this video right now. Please try again later.")]
    Exhausted { attempted: usize },
}

/// Capability shared by every metadata source.
///
/// Implementations block the calling thread (child processes, synchronous
/// HTTP), so async callers run them through `spawn_blocking`.
pub trait MetadataProvider: Send + Sync {
    fn name(&self) -> &'static str;

    fn try_resolve(&self, url: &str) -> Result<VideoMetadata, ProviderError>;
}

/// Ordered fallback chain over [`MetadataProvider`]s.
#[derive(Clone)]
pub struct ProviderResolver {
    providers: Vec<Arc<dyn MetadataProvider>>,
}

impl ProviderResolver {
    pub fn new(providers: Vec<Arc<dyn MetadataProvider>>) -> Self {
        Self { providers }
    }

    pub fn provider_names(&self) -> Vec<&'static str> {
        self.providers.iter().map(|provider| provider.name()).collect()
    }

    /// Tries each provider in order and stops at the first success.
    pub fn resolve(&self, url: &str) -> Result<VideoMetadata, ResolveError> {
        let mut attempted = 0;
        for provider in &self.providers {
            match provider.try_resolve(url) {
                Ok(metadata) => {
                    info!(provider = provider.name(), %url, "resolved video metadata");
                    return Ok(metadata);
                }
                Err(ProviderError::Skipped(reason)) => {
                    debug!(provider = provider.name(), %reason, "provider skipped");
                }
                Err(err) => {
                    attempted += 1;
                    warn!(provider = provider.name(), error = %err, "provider failed, falling back");
                }
            }
        }
        warn!(%url, attempted, "all metadata providers failed");
        Err(ResolveError::Exhausted { attempted })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Clone, Copy)]
    pub enum Outcome {
        Succeed,
        Fail,
        Skip,
    }

    /// Provider double that records every call into a shared log.
    pub struct ScriptedProvider {
        pub name: &'static str,
        pub outcome: Outcome,
        pub calls: Arc<Mutex<Vec<&'static str>>>,
    }

    impl MetadataProvider for ScriptedProvider {
        fn name(&self) -> &'static str {
            self.name
        }

        fn try_resolve(&self, _url: &str) -> Result<VideoMetadata, ProviderError> {
            self.calls.lock().push(self.name);
            match self.outcome {
                Outcome::Succeed => Ok(sample_metadata(self.name)),
                Outcome::Fail => Err(ProviderError::Extractor(format!("{} exploded", self.name))),
                Outcome::Skip => Err(ProviderError::Skipped("no video id".into())),
            }
        }
    }

    pub fn sample_metadata(provider: &'static str) -> VideoMetadata {
        VideoMetadata {
            id: "dQw4w9WgXcQ".into(),
            title: "Sample".into(),
            thumbnail: "https://example.test/thumb.jpg".into(),
            duration_secs: Some(212),
            view_count: Some(1500),
            channel: "Channel".into(),
            video_formats: vec![crate::formats::best_video_option()],
            audio_formats: vec![crate::formats::best_audio_option()],
            provider,
            direct_url: None,
        }
    }

    pub fn chain(
        outcomes: &[(&'static str, Outcome)],
    ) -> (ProviderResolver, Arc<Mutex<Vec<&'static str>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let providers = outcomes
            .iter()
            .map(|&(name, outcome)| {
                Arc::new(ScriptedProvider {
                    name,
                    outcome,
                    calls: calls.clone(),
                }) as Arc<dyn MetadataProvider>
            })
            .collect();
        (ProviderResolver::new(providers), calls)
    }
}

#![forbid(unsafe_code)]

//! VideoMax backend: resolves video metadata through a chain of extraction
//! providers and runs downloads as background jobs that clients poll.

pub mod config;
pub mod downloads;
pub mod engine;
pub mod executor;
pub mod format;
pub mod formats;
pub mod jobs;
pub mod logging;
pub mod provider;
pub mod sanitize;
pub mod sweep;
pub mod ytdlp;

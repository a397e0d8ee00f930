#![forbid(unsafe_code)]

//! Axum backend for VideoMax.
//!
//! Resolves video metadata through the provider chain, runs downloads on a
//! bounded worker pool and hands finished files back to the browser. Anything
//! outside `/api` is served from the static web root.

use std::{
    net::{IpAddr, SocketAddr},
    path::{Component, Path, PathBuf},
    sync::Arc,
    time::SystemTime,
};

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    body::Body,
    extract::{Path as AxumPath, State, rejection::JsonRejection},
    http::{HeaderMap, HeaderValue, Request, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use clap::Parser;
use mime_guess::{MimeGuess, mime::Mime};
use serde::{Deserialize, Serialize};
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncSeekExt},
    signal,
};
use tokio_util::io::ReaderStream;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use url::Url;
use videomax::config::{RuntimeConfig, RuntimeOverrides, resolve_runtime_config};
use videomax::downloads::{DownloadManager, DownloadRejected};
use videomax::engine::{DEFAULT_VIDEO_CONTAINER, MediaKind};
use videomax::executor::{DownloadExecutor, DownloadSpec};
use videomax::format::{UNKNOWN, format_duration, format_views};
use videomax::formats::{AudioFormatOption, BEST_VIDEO_SELECTOR, VideoFormatOption, find_container};
use videomax::jobs::{JobSnapshot, JobTracker};
use videomax::logging::init_logging;
use videomax::provider::{
    CobaltProvider, MetadataProvider, PipedProvider, ProviderResolver, YtDlpProvider,
};
use videomax::sweep::{STALE_AFTER, sweep_stale_files};
use videomax::ytdlp::{YtDlp, locate_ffmpeg};

const DEFAULT_CODEC: &str = "h264";

/// Command line flags. Every flag overrides the matching environment / `.env`
/// setting.
#[derive(Debug, Parser)]
#[command(name = "backend", about = "VideoMax download backend")]
struct BackendArgs {
    /// Port to listen on.
    #[arg(long)]
    port: Option<u16>,
    /// IPv4 or IPv6 address to bind.
    #[arg(long)]
    host: Option<String>,
    /// Where finished downloads are written.
    #[arg(long)]
    download_dir: Option<PathBuf>,
    /// Static web root served outside `/api`.
    #[arg(long)]
    www_root: Option<PathBuf>,
    /// Netscape cookies file handed to yt-dlp.
    #[arg(long = "cookies")]
    cookies_file: Option<PathBuf>,
    /// Directory or binary path of ffmpeg.
    #[arg(long)]
    ffmpeg_location: Option<PathBuf>,
    /// yt-dlp executable.
    #[arg(long = "ytdlp")]
    ytdlp_bin: Option<PathBuf>,
    /// Downloads allowed to run at once.
    #[arg(long)]
    max_downloads: Option<usize>,
    /// Downloads allowed to wait for a worker.
    #[arg(long)]
    max_queued: Option<usize>,
    /// Alternate `.env` file.
    #[arg(long)]
    env_file: Option<PathBuf>,
    #[arg(short, long)]
    verbose: bool,
}

impl BackendArgs {
    fn overrides(&self) -> RuntimeOverrides {
        RuntimeOverrides {
            port: self.port,
            host: self.host.clone(),
            download_dir: self.download_dir.clone(),
            www_root: self.www_root.clone(),
            cookies_file: self.cookies_file.clone(),
            ffmpeg_location: self.ffmpeg_location.clone(),
            ytdlp_bin: self.ytdlp_bin.clone(),
            max_concurrent_downloads: self.max_downloads,
            max_queued_downloads: self.max_queued,
            env_path: self.env_file.clone(),
        }
    }
}

fn parse_host_arg(value: &str) -> Result<IpAddr> {
    value
        .trim()
        .parse::<IpAddr>()
        .context("expected a valid IPv4 or IPv6 address for --host/VIDEOMAX_HOST")
}

#[derive(Clone)]
struct AppState {
    resolver: ProviderResolver,
    downloads: DownloadManager,
    cobalt: Arc<CobaltProvider>,
    download_dir: Arc<PathBuf>,
    www_root: Arc<PathBuf>,
}

impl AppState {
    /// Wires the real yt-dlp engine and the provider chain from config.
    fn from_config(config: &RuntimeConfig) -> Self {
        let ffmpeg = locate_ffmpeg(config.ffmpeg_location.as_deref());
        let ytdlp = Arc::new(
            YtDlp::new(&config.ytdlp_bin)
                .with_cookies_file(&config.cookies_file)
                .with_ffmpeg_location(ffmpeg),
        );
        info!(
            ytdlp = %ytdlp.binary().display(),
            ffmpeg = ?ytdlp.ffmpeg_location(),
            "extraction engine ready"
        );

        let cobalt = Arc::new(CobaltProvider::new(config.cobalt_mirrors.clone()));
        let mut providers: Vec<Arc<dyn MetadataProvider>> =
            vec![Arc::new(YtDlpProvider::new(ytdlp.clone()))];
        if let Some(piped) = &config.piped_api {
            providers.push(Arc::new(PipedProvider::new(piped.clone())));
        }
        providers.push(cobalt.clone());
        let resolver = ProviderResolver::new(providers);

        let executor = DownloadExecutor::new(ytdlp, JobTracker::new(), config.download_dir.clone());
        let downloads = DownloadManager::new(
            executor,
            config.max_concurrent_downloads,
            config.max_queued_downloads,
        );

        Self {
            resolver,
            downloads,
            cobalt,
            download_dir: Arc::new(config.download_dir.clone()),
            www_root: Arc::new(config.www_root.clone()),
        }
    }
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }

    fn unavailable(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.message,
        });
        (self.status, Json(body)).into_response()
    }
}

impl From<DownloadRejected> for ApiError {
    fn from(err: DownloadRejected) -> Self {
        match err {
            DownloadRejected::Busy => Self::unavailable(err.to_string()),
        }
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[tokio::main]
async fn main() -> Result<()> {
    let args = BackendArgs::parse();
    init_logging(args.verbose)?;

    let config = resolve_runtime_config(args.overrides())?;
    let host = parse_host_arg(&config.host)?;

    std::fs::create_dir_all(&config.download_dir)
        .with_context(|| format!("creating {}", config.download_dir.display()))?;
    sweep_stale_files(&config.download_dir, STALE_AFTER, SystemTime::now());

    let state = AppState::from_config(&config);
    info!(
        providers = ?state.resolver.provider_names(),
        cobalt_mirrors = state.cobalt.mirrors().len(),
        max_downloads = config.max_concurrent_downloads,
        max_queued = config.max_queued_downloads,
        download_dir = %config.download_dir.display(),
        "backend configured"
    );

    let app = build_router(state);
    let addr = SocketAddr::new(host, config.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {}", addr))?;
    info!("VideoMax backend listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running API server")?;

    Ok(())
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/video-info", post(video_info))
        .route("/api/download", post(start_download))
        .route(
            "/api/download-status/{id}",
            get(download_status).post(download_status),
        )
        .route("/api/download-file/{id}", get(download_file))
        .route("/api/cobalt-download", post(cobalt_download))
        .route("/api/health", get(health))
        .fallback(static_fallback)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        warn!(error = %err, "failed to install Ctrl+C handler");
    }
}

async fn static_fallback(State(state): State<AppState>, req: Request<Body>) -> Response {
    let path = req.uri().path();
    if path == "/api" || path.starts_with("/api/") {
        return ApiError::not_found("endpoint not found").into_response();
    }

    match serve_www_path(&state.www_root, path).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

/// Accepts only absolute http(s) URLs.
fn validate_url(raw: Option<&str>) -> ApiResult<String> {
    let raw = raw.map(str::trim).unwrap_or_default();
    if raw.is_empty() {
        return Err(ApiError::bad_request("URL is required"));
    }
    match Url::parse(raw) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") && parsed.has_host() => {
            Ok(raw.to_string())
        }
        _ => Err(ApiError::bad_request("Invalid URL")),
    }
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| ApiError::bad_request(rejection.body_text()))
}

#[derive(Debug, Deserialize)]
struct VideoInfoRequest {
    url: Option<String>,
}

#[derive(Debug, Serialize)]
struct VideoInfoResponse {
    success: bool,
    id: String,
    title: String,
    thumbnail: String,
    duration: String,
    views: String,
    channel: String,
    formats: FormatLists,
    /// Set when only a direct Cobalt link could be obtained.
    #[serde(skip_serializing_if = "Option::is_none")]
    cobalt_url: Option<String>,
}

#[derive(Debug, Serialize)]
struct FormatLists {
    video: Vec<VideoFormatOption>,
    audio: Vec<AudioFormatOption>,
}

async fn video_info(
    State(state): State<AppState>,
    payload: Result<Json<VideoInfoRequest>, JsonRejection>,
) -> ApiResult<Json<VideoInfoResponse>> {
    let request = json_body(payload)?;
    let url = validate_url(request.url.as_deref())?;

    let resolver = state.resolver.clone();
    let metadata = tokio::task::spawn_blocking(move || resolver.resolve(&url))
        .await
        .map_err(|err| ApiError::internal(format!("metadata worker crashed: {err}")))?
        .map_err(|err| ApiError::bad_request(err.to_string()))?;

    Ok(Json(VideoInfoResponse {
        success: true,
        id: metadata.id,
        title: metadata.title,
        thumbnail: metadata.thumbnail,
        duration: metadata
            .duration_secs
            .map(format_duration)
            .unwrap_or_else(|| UNKNOWN.to_string()),
        views: metadata
            .view_count
            .map(format_views)
            .unwrap_or_else(|| UNKNOWN.to_string()),
        channel: metadata.channel,
        formats: FormatLists {
            video: metadata.video_formats,
            audio: metadata.audio_formats,
        },
        cobalt_url: metadata.direct_url,
    }))
}

#[derive(Debug, Deserialize)]
struct DownloadRequestBody {
    url: Option<String>,
    format_id: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    output_format: Option<String>,
    codec: Option<String>,
}

#[derive(Debug, Serialize)]
struct DownloadStarted {
    success: bool,
    download_id: String,
    message: &'static str,
}

/// Turns the raw body into a [`DownloadSpec`], filling defaults.
fn download_spec(body: DownloadRequestBody) -> ApiResult<DownloadSpec> {
    let url = validate_url(body.url.as_deref())?;
    let kind = match body.kind.as_deref() {
        None => MediaKind::Video,
        Some(raw) => MediaKind::parse(raw)
            .ok_or_else(|| ApiError::bad_request(format!("unsupported download type: {raw}")))?,
    };
    let output_container = body
        .output_format
        .map(|value| value.trim().to_ascii_lowercase())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_VIDEO_CONTAINER.to_string());
    if kind == MediaKind::Video && find_container(&output_container).is_none() {
        return Err(ApiError::bad_request(format!(
            "unsupported output format: {output_container}"
        )));
    }
    let format_selector = body
        .format_id
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| BEST_VIDEO_SELECTOR.to_string());

    Ok(DownloadSpec {
        url,
        format_selector,
        kind,
        output_container,
        codec: body.codec.unwrap_or_else(|| DEFAULT_CODEC.to_string()),
    })
}

async fn start_download(
    State(state): State<AppState>,
    payload: Result<Json<DownloadRequestBody>, JsonRejection>,
) -> ApiResult<Json<DownloadStarted>> {
    let spec = download_spec(json_body(payload)?)?;
    let download_id = state.downloads.start(spec)?;
    Ok(Json(DownloadStarted {
        success: true,
        download_id,
        message: "Download started",
    }))
}

/// Unknown ids are a normal poll result, so this never fails.
async fn download_status(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> Json<JobSnapshot> {
    Json(state.downloads.tracker().get(&id))
}

async fn download_file(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let filename = state
        .downloads
        .tracker()
        .completed_file(&id)
        .ok_or_else(|| ApiError::not_found("Download not found or not complete"))?;
    ensure_safe_path_segment(&filename)?;

    let path = state.download_dir.join(&filename);
    match tokio::fs::metadata(&path).await {
        Ok(meta) if meta.is_file() => {}
        Ok(_) => return Err(ApiError::not_found("File not found")),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::not_found("File not found"));
        }
        Err(err) => return Err(ApiError::internal(err.to_string())),
    }

    let mut response = stream_file(path, None, Some(&headers)).await?;
    let disposition = HeaderValue::from_str(&attachment_disposition(&filename))
        .map_err(|err| ApiError::internal(err.to_string()))?;
    response
        .headers_mut()
        .insert(header::CONTENT_DISPOSITION, disposition);
    Ok(response)
}

/// `attachment` header with an ASCII-only fallback plus the RFC 5987 form.
fn attachment_disposition(filename: &str) -> String {
    let fallback: String = filename
        .chars()
        .map(|ch| {
            if ch.is_ascii() && !ch.is_ascii_control() && ch != '"' && ch != '\\' {
                ch
            } else {
                '_'
            }
        })
        .collect();
    format!(
        "attachment; filename=\"{fallback}\"; filename*=UTF-8''{}",
        urlencoding::encode(filename)
    )
}

#[derive(Debug, Deserialize)]
struct CobaltDownloadRequest {
    url: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
}

#[derive(Debug, Serialize)]
struct CobaltDownloadResponse {
    success: bool,
    download_url: String,
    filename: Option<String>,
}

async fn cobalt_download(
    State(state): State<AppState>,
    payload: Result<Json<CobaltDownloadRequest>, JsonRejection>,
) -> ApiResult<Json<CobaltDownloadResponse>> {
    let request = json_body(payload)?;
    let url = validate_url(request.url.as_deref())?;
    let audio_only = request.kind.as_deref().and_then(MediaKind::parse) == Some(MediaKind::Audio);

    let cobalt = state.cobalt.clone();
    let stream = tokio::task::spawn_blocking(move || cobalt.request_stream(&url, audio_only))
        .await
        .map_err(|err| ApiError::internal(format!("cobalt worker crashed: {err}")))?
        .map_err(|err| {
            warn!(error = %err, "cobalt download link unavailable");
            ApiError::bad_request("No Cobalt mirror could provide a download link")
        })?;

    Ok(Json(CobaltDownloadResponse {
        success: true,
        download_url: stream.url,
        filename: stream.filename,
    }))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "message": "VideoMax Backend Online",
    }))
}

async fn serve_www_path(root: &Path, request_path: &str) -> ApiResult<Response> {
    let target = resolve_www_path(root, request_path)?;
    let metadata = tokio::fs::metadata(&target).await;

    match metadata {
        Ok(meta) if meta.is_dir() => stream_file(target.join("index.html"), None, None).await,
        Ok(_) => stream_file(target, None, None).await,
        Err(_) => {
            if should_fallback_to_index(request_path) {
                stream_file(root.join("index.html"), None, None).await
            } else {
                Err(ApiError::not_found("file not found"))
            }
        }
    }
}

fn resolve_www_path(root: &Path, request_path: &str) -> ApiResult<PathBuf> {
    let trimmed = request_path.trim_start_matches('/');
    if trimmed.is_empty() {
        return Ok(root.join("index.html"));
    }
    let candidate = Path::new(trimmed);
    // Dot-files (`.env`, `.git`) are never public.
    if candidate.components().any(|component| match component {
        Component::Normal(name) => name.to_string_lossy().starts_with('.'),
        _ => true,
    }) {
        return Err(ApiError::not_found("file not found"));
    }
    Ok(root.join(candidate))
}

/// Client-side routes have no extension and get `index.html`.
fn should_fallback_to_index(request_path: &str) -> bool {
    let trimmed = request_path.trim_start_matches('/');
    trimmed.is_empty() || Path::new(trimmed).extension().is_none()
}

/// A stored file name must stay a single component inside its base folder.
fn ensure_safe_path_segment(value: &str) -> ApiResult<()> {
    let mut components = Path::new(value).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(ApiError::not_found("File not found")),
    }
}

fn header_value(value: String) -> ApiResult<HeaderValue> {
    HeaderValue::from_str(&value).map_err(|err| ApiError::internal(err.to_string()))
}

async fn stream_file(
    path: PathBuf,
    mime: Option<Mime>,
    headers: Option<&HeaderMap>,
) -> ApiResult<Response> {
    let mut file = File::open(&path)
        .await
        .map_err(|_| ApiError::not_found("file not found"))?;
    let size = file
        .metadata()
        .await
        .map_err(|err| ApiError::internal(err.to_string()))?
        .len();

    let guessed = mime.or_else(|| MimeGuess::from_path(&path).first());
    let range = headers
        .and_then(|headers| headers.get(header::RANGE))
        .and_then(|value| parse_range_header(value, size));

    let mut response = match range {
        Some((start, _)) if start >= size => {
            let mut response = Response::new(Body::empty());
            *response.status_mut() = StatusCode::RANGE_NOT_SATISFIABLE;
            response
                .headers_mut()
                .insert(header::CONTENT_RANGE, header_value(format!("bytes */{size}"))?);
            response
        }
        Some((start, end)) => {
            let end = end.min(size.saturating_sub(1));
            let length = end - start + 1;
            file.seek(std::io::SeekFrom::Start(start))
                .await
                .map_err(|err| ApiError::internal(err.to_string()))?;
            let mut response = Body::from_stream(ReaderStream::new(file.take(length))).into_response();
            *response.status_mut() = StatusCode::PARTIAL_CONTENT;
            response.headers_mut().insert(
                header::CONTENT_RANGE,
                header_value(format!("bytes {start}-{end}/{size}"))?,
            );
            response
                .headers_mut()
                .insert(header::CONTENT_LENGTH, HeaderValue::from(length));
            response
        }
        None => {
            let mut response = Body::from_stream(ReaderStream::new(file)).into_response();
            response
                .headers_mut()
                .insert(header::CONTENT_LENGTH, HeaderValue::from(size));
            response
        }
    };

    response
        .headers_mut()
        .insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    if let Some(mime) = guessed
        && let Ok(value) = HeaderValue::from_str(mime.as_ref())
    {
        response.headers_mut().insert(header::CONTENT_TYPE, value);
    }

    Ok(response)
}

fn parse_range_header(value: &HeaderValue, size: u64) -> Option<(u64, u64)> {
    let value = value.to_str().ok()?.trim();
    let (unit, range) = value.split_once('=')?;
    if unit.trim() != "bytes" {
        return None;
    }
    let (start_str, end_str) = range.trim().split_once('-')?;

    if start_str.is_empty() {
        // "-N" means the last N bytes.
        let suffix_len: u64 = end_str.parse().ok()?;
        if suffix_len == 0 {
            return None;
        }
        return Some((size.saturating_sub(suffix_len), size.saturating_sub(1)));
    }

    let start: u64 = start_str.parse().ok()?;
    let end = if end_str.is_empty() {
        size.saturating_sub(1)
    } else {
        end_str.parse().ok()?
    };
    (end >= start).then_some((start, end))
}

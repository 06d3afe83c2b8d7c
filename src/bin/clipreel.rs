#![forbid(unsafe_code)]

//! HTTP server for the clip playlist.
//!
//! `/` and `/stream` render the playlist page, `/api/clips` exposes the same
//! list as JSON, and `/update` plus `/status` drive the optional git archive.
//! Every Twitch or GitHub call is blocking and goes through `spawn_blocking`.

use std::{
    net::{IpAddr, SocketAddr},
    path::PathBuf,
    sync::Arc,
};

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
};
use chrono::{DateTime, Utc};
use clap::Parser;
use clipreel::archive::{ArchiveError, ArchiveReport, Archiver, ManifestSource};
use clipreel::clips::{Clip, ClipQuery, FetchError, Period, RawClipQuery, fallback_clips};
use clipreel::config::{PlaybackMode, Settings, SettingsOverrides, resolve_settings};
use clipreel::playback::{PlaybackResolver, ThumbnailPatterns};
use clipreel::render::{
    Layout, PlaylistEntry, PlaylistPage, Surface, render_notice, render_playlist,
};
use clipreel::twitch::{ClipFetcher, helix::HelixClient, token::TokenCache};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::signal;
use tracing_subscriber::EnvFilter;

const FALLBACK_BANNER: &str = "Live clip data is unavailable right now, showing saved clips.";

#[derive(Debug, Parser)]
#[command(
    name = "clipreel",
    version,
    about = "Serve an auto-advancing playlist of a broadcaster's most viewed Twitch clips"
)]
struct Args {
    /// Port to listen on (overrides CLIPREEL_PORT / PORT).
    #[arg(long)]
    port: Option<u16>,
    /// Address to bind (overrides CLIPREEL_HOST).
    #[arg(long)]
    host: Option<String>,
    /// Alternate `.env` file.
    #[arg(long = "env-file", value_name = "PATH")]
    env_file: Option<PathBuf>,
    /// Page mode: embed, mp4 or archive (overrides CLIPREEL_MODE).
    #[arg(long, value_parser = parse_mode_arg)]
    mode: Option<PlaybackMode>,
}

fn parse_mode_arg(value: &str) -> std::result::Result<PlaybackMode, String> {
    PlaybackMode::parse(value)
        .ok_or_else(|| format!("expected embed, mp4 or archive (got {value:?})"))
}

fn parse_host(value: &str) -> Result<IpAddr> {
    value
        .trim()
        .parse::<IpAddr>()
        .with_context(|| format!("expected an IPv4 or IPv6 address for --host/CLIPREEL_HOST, got {value:?}"))
}

/// Shared handler state.
///
/// * `tokens` is the single app-token cache; fetches hold its lock for the
///   whole exchange so concurrent requests never race two token exchanges.
/// * `archiver` is present only when GITHUB_TOKEN and GITHUB_REPO are set.
#[derive(Clone)]
struct AppState {
    settings: Arc<Settings>,
    fetcher: ClipFetcher,
    tokens: Arc<Mutex<TokenCache>>,
    archiver: Option<Arc<Archiver>>,
    resolver: Arc<dyn PlaybackResolver>,
}

impl AppState {
    fn new(settings: Settings, helix: HelixClient) -> Self {
        let fetcher = ClipFetcher::new(helix, &settings);
        let archiver = settings
            .archive
            .clone()
            .map(|target| Arc::new(Archiver::new(target, settings.broadcaster.clone())));
        Self {
            settings: Arc::new(settings),
            fetcher,
            tokens: Arc::new(Mutex::new(TokenCache::new())),
            archiver,
            resolver: Arc::new(ThumbnailPatterns),
        }
    }
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
    kind: Option<&'static str>,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            kind: None,
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    fn from_fetch(err: &FetchError) -> Self {
        if matches!(err, FetchError::Upstream(_)) {
            tracing::error!(error = %err, "clip fetch failed");
        }
        Self {
            status: fetch_status(err),
            message: err.to_string(),
            kind: Some(err.kind()),
        }
    }

    fn from_archive(err: ArchiveError) -> Self {
        let status = match err {
            ArchiveError::Busy => StatusCode::CONFLICT,
            _ => {
                tracing::error!(error = %err, "archival refresh failed");
                StatusCode::BAD_GATEWAY
            }
        };
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut body = serde_json::json!({ "error": self.message });
        if let Some(kind) = self.kind {
            body["kind"] = kind.into();
        }
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn fetch_status(err: &FetchError) -> StatusCode {
    match err {
        FetchError::Configuration { .. } => StatusCode::SERVICE_UNAVAILABLE,
        FetchError::Upstream(_) => StatusCode::BAD_GATEWAY,
        FetchError::Empty(_) => StatusCode::NOT_FOUND,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let settings = resolve_settings(SettingsOverrides {
        port: args.port,
        host: args.host,
        mode: args.mode,
        env_path: args.env_file,
    })
    .context("loading configuration")?;
    let addr = SocketAddr::new(parse_host(&settings.host)?, settings.port);

    let missing = settings.missing_credentials();
    if !missing.is_empty() {
        tracing::warn!(?missing, "Twitch credentials missing, pages will show setup guidance");
    }
    let mode = settings.mode;
    let state = AppState::new(settings, HelixClient::new());
    if let Some(archiver) = &state.archiver {
        tracing::info!(repo = archiver.repo(), "archive repository configured");
    }

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    tracing::info!(%addr, mode = mode.as_str(), "clipreel listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running HTTP server")?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/refresh", get(index))
        .route("/stream", get(stream))
        .route("/update", get(update_archive))
        .route("/status", get(archive_status))
        .route("/api/clips", get(list_clips))
        .route("/health", get(health))
        .fallback(not_found)
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        tracing::error!(%err, "failed to install Ctrl+C handler");
    }
    tracing::info!("shutting down");
}

async fn not_found() -> ApiError {
    ApiError::not_found("endpoint not found")
}

async fn index(State(state): State<AppState>, Query(raw): Query<RawClipQuery>) -> Response {
    render_page(&state, ClipQuery::from_raw(&raw), Layout::Full).await
}

async fn stream(State(state): State<AppState>, Query(raw): Query<RawClipQuery>) -> Response {
    render_page(&state, ClipQuery::from_raw(&raw), Layout::Overlay).await
}

/// What a page will play, before layout and timing are applied.
struct Playlist {
    surface: Surface,
    entries: Vec<PlaylistEntry>,
    banner: Option<String>,
}

async fn render_page(state: &AppState, query: ClipQuery, layout: Layout) -> Response {
    let playlist = match state.settings.mode {
        PlaybackMode::Archive => archived_playlist(state, &query).await,
        PlaybackMode::Embed | PlaybackMode::Direct => live_playlist(state, &query).await,
    };
    let playlist = match playlist {
        Ok(playlist) => playlist,
        Err(page) => return page,
    };
    if playlist.entries.is_empty() {
        return notice_page(
            StatusCode::OK,
            "No playable clips",
            "None of the clips had a recognizable video URL.",
            &[],
        );
    }

    let page = PlaylistPage {
        heading: format!("{} clips", state.settings.broadcaster),
        surface: playlist.surface,
        layout,
        autoplay: query.autoplay,
        interval_secs: query.interval_secs,
        entries: playlist.entries,
        banner: playlist.banner,
    };
    Html(render_playlist(&page)).into_response()
}

async fn live_playlist(state: &AppState, query: &ClipQuery) -> Result<Playlist, Response> {
    match fetch_clips(state, query).await {
        Ok(clips) => Ok(match state.settings.mode {
            PlaybackMode::Direct => Playlist {
                surface: Surface::Video,
                entries: direct_entries(state.resolver.as_ref(), &clips),
                banner: None,
            },
            _ => Playlist {
                surface: Surface::Embed,
                entries: clips.iter().map(PlaylistEntry::embed).collect(),
                banner: None,
            },
        }),
        Err(FetchError::Upstream(message)) if state.settings.fallback_on_upstream_error => {
            tracing::warn!(%message, "Twitch API unavailable, serving fallback clips");
            let clips = fallback_clips(&state.settings.broadcaster, query.count);
            Ok(Playlist {
                surface: Surface::Embed,
                entries: clips.iter().map(PlaylistEntry::embed).collect(),
                banner: Some(FALLBACK_BANNER.to_string()),
            })
        }
        Err(err) => Err(fetch_error_page(&err)),
    }
}

fn direct_entries(resolver: &dyn PlaybackResolver, clips: &[Clip]) -> Vec<PlaylistEntry> {
    clips
        .iter()
        .filter_map(|clip| match resolver.derive_url(&clip.thumbnail_url) {
            Some(url) => Some(PlaylistEntry::video(clip, url)),
            None => {
                tracing::debug!(id = %clip.id, "dropping clip without a derivable video url");
                None
            }
        })
        .collect()
}

async fn archived_playlist(state: &AppState, query: &ClipQuery) -> Result<Playlist, Response> {
    let Some(archiver) = state.archiver.clone() else {
        return Err(notice_page(
            StatusCode::OK,
            "Archive not configured",
            "Archive mode needs a GitHub repository. Set these variables and restart:",
            &["GITHUB_TOKEN".to_string(), "GITHUB_REPO".to_string()],
        ));
    };
    let clips = match tokio::task::spawn_blocking(move || archiver.manifest_clips()).await {
        Ok(Ok(clips)) => clips,
        Ok(Err(err)) => {
            tracing::error!(error = %err, "reading archive manifest failed");
            return Err(notice_page(
                StatusCode::BAD_GATEWAY,
                "Archive unavailable",
                &err.to_string(),
                &[],
            ));
        }
        Err(err) => {
            return Err(notice_page(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal error",
                &format!("manifest task failed: {err}"),
                &[],
            ));
        }
    };
    Ok(Playlist {
        surface: Surface::Video,
        entries: clips
            .into_iter()
            .take(query.count)
            .map(|(clip, url)| PlaylistEntry::video(&clip, url))
            .collect(),
        banner: None,
    })
}

fn fetch_error_page(err: &FetchError) -> Response {
    match err {
        FetchError::Configuration { missing } => notice_page(
            StatusCode::OK,
            "Setup required",
            "Twitch API credentials are not configured. Set these variables in the environment or the .env file, then restart:",
            &missing.iter().map(|name| name.to_string()).collect::<Vec<_>>(),
        ),
        FetchError::Upstream(_) => {
            tracing::error!(error = %err, "clip fetch failed");
            notice_page(StatusCode::BAD_GATEWAY, "Twitch API error", &err.to_string(), &[])
        }
        FetchError::Empty(message) => notice_page(StatusCode::OK, "No clips found", message, &[]),
    }
}

fn notice_page(status: StatusCode, title: &str, message: &str, details: &[String]) -> Response {
    (status, Html(render_notice(title, message, details))).into_response()
}

async fn fetch_clips(state: &AppState, query: &ClipQuery) -> Result<Vec<Clip>, FetchError> {
    let fetcher = state.fetcher.clone();
    let tokens = state.tokens.clone();
    let (count, period) = (query.count, query.period);
    tokio::task::spawn_blocking(move || {
        let mut tokens = tokens.lock();
        fetcher.fetch(&mut tokens, count, period, Utc::now())
    })
    .await
    .unwrap_or_else(|err| Err(FetchError::Upstream(format!("clip fetch task failed: {err}"))))
}

#[derive(Debug, Serialize)]
struct ClipListResponse {
    broadcaster: String,
    period: Period,
    count: usize,
    clips: Vec<Clip>,
}

async fn list_clips(
    State(state): State<AppState>,
    Query(raw): Query<RawClipQuery>,
) -> ApiResult<Json<ClipListResponse>> {
    let query = ClipQuery::from_raw(&raw);
    let clips = fetch_clips(&state, &query)
        .await
        .map_err(|err| ApiError::from_fetch(&err))?;
    Ok(Json(ClipListResponse {
        broadcaster: state.fetcher.broadcaster().to_string(),
        period: query.period,
        count: clips.len(),
        clips,
    }))
}

async fn update_archive(
    State(state): State<AppState>,
    Query(raw): Query<RawClipQuery>,
) -> ApiResult<Json<ArchiveReport>> {
    let Some(archiver) = state.archiver.clone() else {
        return Err(ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "archive is not configured; set GITHUB_TOKEN and GITHUB_REPO",
        ));
    };
    if archiver.is_running() {
        return Err(ApiError::from_archive(ArchiveError::Busy));
    }

    let query = ClipQuery::from_raw(&raw);
    let clips = fetch_clips(&state, &query)
        .await
        .map_err(|err| ApiError::from_fetch(&err))?;
    let report = tokio::task::spawn_blocking(move || archiver.refresh(&clips, Utc::now()))
        .await
        .map_err(|err| ApiError::internal(format!("archive task failed: {err}")))?
        .map_err(ApiError::from_archive)?;
    Ok(Json(report))
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    configured: bool,
    clips: usize,
    source: Option<ManifestSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    updated_at: Option<DateTime<Utc>>,
    running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

async fn archive_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let Some(archiver) = state.archiver.clone() else {
        return Json(StatusResponse {
            configured: false,
            clips: 0,
            source: None,
            updated_at: None,
            running: false,
            error: None,
        });
    };
    let running = archiver.is_running();
    let status = tokio::task::spawn_blocking(move || archiver.status())
        .await
        .map_err(|err| ArchiveError::Manifest(format!("status task failed: {err}")))
        .and_then(|result| result);
    Json(match status {
        Ok(status) => StatusResponse {
            configured: true,
            clips: status.clips,
            source: Some(status.source),
            updated_at: Some(status.updated_at),
            running,
            error: None,
        },
        Err(err) => {
            tracing::warn!(error = %err, "archive status unavailable");
            StatusResponse {
                configured: true,
                clips: 0,
                source: None,
                updated_at: None,
                running,
                error: Some(err.to_string()),
            }
        }
    })
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: DateTime<Utc>,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::post;
    use clipreel::config::ArchiveTarget;
    use clipreel::twitch::helix::Endpoints;
    use serde_json::{Value, json};
    use tempfile::tempdir;

    fn test_settings(mode: PlaybackMode, with_credentials: bool) -> Settings {
        Settings {
            client_id: with_credentials.then(|| "id".to_string()),
            client_secret: with_credentials.then(|| "secret".to_string()),
            broadcaster: "ticklefitz".to_string(),
            mode,
            fallback_on_upstream_error: false,
            archive: None,
            port: 0,
            host: "127.0.0.1".to_string(),
        }
    }

    fn unreachable_endpoints() -> Endpoints {
        Endpoints {
            api_base: "http://127.0.0.1:9/helix".to_string(),
            token_url: "http://127.0.0.1:9/oauth2/token".to_string(),
        }
    }

    fn clip_json(id: &str, views: u64) -> Value {
        json!({
            "id": id,
            "title": format!("title {id}"),
            "creator_name": "viewer",
            "view_count": views,
            "created_at": "2024-05-01T12:00:00Z",
            "duration": 30.0,
            "thumbnail_url": format!("https://clips-media-assets2.twitch.tv/AT-cm%7C{id}-preview-480x272.jpg")
        })
    }

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    async fn spawn_fake_twitch(clips: Vec<Value>) -> Endpoints {
        let clips = Arc::new(clips);
        let app = Router::new()
            .route(
                "/oauth2/token",
                post(|| async {
                    Json(json!({"access_token": "tok", "expires_in": 86_400, "token_type": "bearer"}))
                }),
            )
            .route(
                "/helix/users",
                get(|| async {
                    Json(json!({"data": [{"id": "1234", "login": "ticklefitz", "display_name": "TickleFitz"}]}))
                }),
            )
            .route(
                "/helix/clips",
                get(move || {
                    let clips = clips.clone();
                    async move { Json(json!({ "data": clips.as_ref().clone() })) }
                }),
            );
        let base = serve(app).await;
        Endpoints {
            api_base: format!("{base}/helix"),
            token_url: format!("{base}/oauth2/token"),
        }
    }

    fn state_with(settings: Settings, endpoints: Endpoints) -> AppState {
        AppState::new(settings, HelixClient::with_endpoints(endpoints))
    }

    fn raw_query(pairs: &[(&str, &str)]) -> RawClipQuery {
        let mut raw = RawClipQuery::default();
        for (key, value) in pairs {
            let value = Some(value.to_string());
            match *key {
                "count" => raw.count = value,
                "period" => raw.period = value,
                "autoplay" => raw.autoplay = value,
                "interval" => raw.interval = value,
                _ => panic!("unknown query key {key}"),
            }
        }
        raw
    }

    async fn read_body(response: Response) -> (StatusCode, String) {
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn health_reports_rfc3339_timestamp() {
        let Json(body) = health().await;
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["status"], "ok");
        let timestamp = value["timestamp"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(timestamp).is_ok());
    }

    #[tokio::test]
    async fn missing_credentials_render_guidance() {
        let state = state_with(test_settings(PlaybackMode::Embed, false), unreachable_endpoints());
        let response = index(State(state), Query(RawClipQuery::default())).await;
        let (status, body) = read_body(response).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("Setup required"));
        assert!(body.contains("TWITCH_CLIENT_ID"));
        assert!(body.contains("TWITCH_CLIENT_SECRET"));
    }

    #[tokio::test]
    async fn api_clips_without_credentials_is_unavailable() {
        let state = state_with(test_settings(PlaybackMode::Embed, false), unreachable_endpoints());
        let err = list_clips(State(state), Query(RawClipQuery::default()))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::SERVICE_UNAVAILABLE);
        let (_, body) = read_body(err.into_response()).await;
        let value: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(value["kind"], "configuration");
    }

    #[tokio::test]
    async fn upstream_failure_renders_bad_gateway_page() {
        let state = state_with(test_settings(PlaybackMode::Embed, true), unreachable_endpoints());
        let response = index(State(state.clone()), Query(RawClipQuery::default())).await;
        let (status, body) = read_body(response).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(body.contains("Twitch API error"));

        let err = list_clips(State(state), Query(RawClipQuery::default()))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_GATEWAY);
        assert_eq!(err.kind, Some("upstream"));
    }

    #[tokio::test]
    async fn upstream_failure_uses_fallback_when_enabled() {
        let mut settings = test_settings(PlaybackMode::Embed, true);
        settings.fallback_on_upstream_error = true;
        let state = state_with(settings, unreachable_endpoints());
        let response = index(State(state), Query(raw_query(&[("count", "3")]))).await;
        let (status, body) = read_body(response).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("AwkwardHelplessSalamanderSwiftRage"));
        assert!(body.contains(FALLBACK_BANNER));
        assert!(body.contains("Clip <span id=\"num\">1</span> of 3"));
    }

    #[tokio::test]
    async fn embed_page_clamps_count_and_orders_by_views() {
        let clips = (0..25).map(|n| clip_json(&format!("clip{n:02}"), n)).collect();
        let endpoints = spawn_fake_twitch(clips).await;
        let state = state_with(test_settings(PlaybackMode::Embed, true), endpoints);

        let response = index(
            State(state.clone()),
            Query(raw_query(&[("count", "9999"), ("interval", "1")])),
        )
        .await;
        let (status, body) = read_body(response).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("Clip <span id=\"num\">1</span> of 20"));
        assert!(body.contains("\"intervalMs\":10000"));
        assert!(body.contains("<iframe"));

        let Json(list) = list_clips(State(state), Query(raw_query(&[("count", "0")])))
            .await
            .unwrap();
        assert_eq!(list.count, 1);
        assert_eq!(list.clips[0].id, "clip24");
        assert_eq!(list.period, Period::Week);
    }

    #[tokio::test]
    async fn identical_data_renders_identically() {
        let clips = vec![clip_json("a", 5), clip_json("b", 5), clip_json("c", 9)];
        let endpoints = spawn_fake_twitch(clips).await;
        let state = state_with(test_settings(PlaybackMode::Embed, true), endpoints);
        let (_, first) =
            read_body(index(State(state.clone()), Query(RawClipQuery::default())).await).await;
        let (_, second) = read_body(index(State(state), Query(RawClipQuery::default())).await).await;
        assert_eq!(first, second);
        let c = first.find("\"src\":\"c\"").unwrap();
        let a = first.find("\"src\":\"a\"").unwrap();
        let b = first.find("\"src\":\"b\"").unwrap();
        assert!(c < a && a < b);
    }

    #[tokio::test]
    async fn mp4_mode_uses_derived_video_urls() {
        let mut unmatched = clip_json("odd", 100);
        unmatched["thumbnail_url"] = json!("https://example.com/odd.jpg");
        let endpoints = spawn_fake_twitch(vec![clip_json("good", 10), unmatched]).await;
        let state = state_with(test_settings(PlaybackMode::Direct, true), endpoints);
        let response = stream(State(state), Query(RawClipQuery::default())).await;
        let (status, body) = read_body(response).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("<body class=\"overlay\">"));
        assert!(body.contains("<video"));
        assert!(body.contains("https://clips-media-assets2.twitch.tv/AT-cm%7Cgood.mp4"));
        assert!(!body.contains("\"id\":\"odd\""));
        assert!(body.contains("of 1</div>"));
    }

    #[tokio::test]
    async fn empty_clip_window_renders_notice() {
        let endpoints = spawn_fake_twitch(Vec::new()).await;
        let state = state_with(test_settings(PlaybackMode::Embed, true), endpoints);
        let response = index(State(state.clone()), Query(RawClipQuery::default())).await;
        let (status, body) = read_body(response).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("No clips found"));

        let err = list_clips(State(state), Query(RawClipQuery::default()))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn archive_routes_without_repository() {
        let state = state_with(test_settings(PlaybackMode::Embed, true), unreachable_endpoints());
        let err = update_archive(State(state.clone()), Query(RawClipQuery::default()))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::SERVICE_UNAVAILABLE);

        let Json(status) = archive_status(State(state)).await;
        assert!(!status.configured);
        assert_eq!(status.clips, 0);
        assert!(status.source.is_none());
    }

    #[tokio::test]
    async fn archive_mode_plays_manifest_files() {
        let manifest = json!({
            "updated_at": "2024-05-02T00:00:00Z",
            "broadcaster": "ticklefitz",
            "clips": [
                {"id": "top", "title": "Top", "creator_name": "a", "view_count": 50,
                 "created_at": "2024-05-01T00:00:00Z", "duration": 20.0, "file": "clips/top.mp4"},
                {"id": "next", "title": "Next", "creator_name": "b", "view_count": 10,
                 "created_at": "2024-05-01T00:00:00Z", "duration": 25.0, "file": "clips/next.mp4"}
            ]
        });
        let raw_base = serve(Router::new().route(
            "/someone/archive/main/manifest.json",
            get(move || async move { Json(manifest) }),
        ))
        .await;

        let dir = tempdir().unwrap();
        let target = ArchiveTarget {
            token: "token".to_string(),
            repo: "someone/archive".to_string(),
            branch: "main".to_string(),
            workdir: dir.path().join("work"),
        };
        let mut settings = test_settings(PlaybackMode::Archive, false);
        settings.archive = Some(target.clone());
        let mut state = state_with(settings, unreachable_endpoints());
        state.archiver = Some(Arc::new(
            Archiver::new(target, "ticklefitz").with_raw_base(raw_base.clone()),
        ));

        let response = index(State(state.clone()), Query(raw_query(&[("count", "1")]))).await;
        let (status, body) = read_body(response).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains(&format!("{raw_base}/someone/archive/main/clips/top.mp4")));
        assert!(!body.contains("clips/next.mp4"));

        let Json(status) = archive_status(State(state)).await;
        assert!(status.configured);
        assert_eq!(status.clips, 2);
        assert_eq!(status.source, Some(ManifestSource::Remote));
    }

    #[tokio::test]
    async fn router_wires_aliases_and_json_fallback() {
        let state = state_with(test_settings(PlaybackMode::Embed, false), unreachable_endpoints());
        let base = serve(router(state)).await;

        let (refresh, api, health, missing) = tokio::task::spawn_blocking(move || {
            let get_json = |path: &str| match ureq::get(&format!("{base}{path}")).call() {
                Ok(response) => (response.status(), response.into_json::<Value>().unwrap()),
                Err(ureq::Error::Status(code, response)) => {
                    (code, response.into_json::<Value>().unwrap())
                }
                Err(err) => panic!("request to {path} failed: {err}"),
            };
            let page = ureq::get(&format!("{base}/refresh?count=abc")).call().unwrap();
            let refresh = (page.status(), page.into_string().unwrap());
            (
                refresh,
                get_json("/api/clips"),
                get_json("/health"),
                get_json("/no/such/route"),
            )
        })
        .await
        .unwrap();

        assert_eq!(refresh.0, 200);
        assert!(refresh.1.contains("Setup required"));
        assert_eq!(api.0, 503);
        assert_eq!(api.1["kind"], "configuration");
        assert_eq!(health.0, 200);
        assert_eq!(health.1["status"], "ok");
        assert_eq!(missing.0, 404);
        assert_eq!(missing.1["error"], "endpoint not found");
    }

    #[test]
    fn archive_errors_map_to_statuses() {
        assert_eq!(
            ApiError::from_archive(ArchiveError::Busy).status,
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::from_archive(ArchiveError::NothingToArchive).status,
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn cli_flags_parse() {
        let args = Args::try_parse_from([
            "clipreel",
            "--port",
            "8080",
            "--host",
            "127.0.0.1",
            "--mode",
            "mp4",
            "--env-file",
            "/etc/clipreel.env",
        ])
        .unwrap();
        assert_eq!(args.port, Some(8080));
        assert_eq!(args.mode, Some(PlaybackMode::Direct));
        assert_eq!(args.env_file, Some(PathBuf::from("/etc/clipreel.env")));
        assert!(Args::try_parse_from(["clipreel", "--mode", "vhs"]).is_err());
        assert!(parse_host("not-an-ip").is_err());
    }
}

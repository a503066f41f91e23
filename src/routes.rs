use std::{collections::HashSet, sync::Arc};

use axum::{
    Json, Router,
    extract::{Query, State},
    http::{HeaderValue, Method},
    routing::get,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
    catalog::CatalogClient,
    config::non_empty,
    cookies::CookieSource,
    credentials::derive_auth_headers_now,
    error::ApiError,
    resolver::Resolver,
    track::Track,
};

const SERVICE_NAME: &str = "Aureum Music API";
const DEFAULT_SEARCH_LIMIT: usize = 20;
const MAX_SEARCH_LIMIT: usize = 100;
const MAX_VIDEO_ID_LEN: usize = 64;

#[derive(Clone)]
pub struct AppState {
    pub catalog: Option<CatalogClient>,
    pub resolver: Arc<Resolver>,
    pub cookies: CookieSource,
    pub auth_origin: String,
    pub search_authenticated: bool,
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    q: Option<String>,
    limit: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StreamParams {
    #[serde(rename = "videoId")]
    video_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StreamResponse {
    #[serde(rename = "videoId")]
    video_id: String,
    stream_url: String,
    title: String,
    duration: u64,
    thumbnail: String,
}

pub fn build_router(state: AppState, cors: CorsLayer) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/search", get(search))
        .route("/stream", get(stream))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

async fn root(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "service": SERVICE_NAME,
        "status": "online",
        "catalog": if state.catalog.is_some() { "ready" } else { "unavailable" },
        "cookies_available": state.cookies.is_available().await,
    }))
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": if state.catalog.is_some() { "healthy" } else { "degraded" },
        "timestamp": Utc::now().to_rfc3339(),
        "cookies_available": state.cookies.is_available().await,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Vec<Track>>, ApiError> {
    let Some(query) = params.q.as_deref().and_then(non_empty) else {
        return Err(ApiError::bad_request("Query parameter 'q' is required"));
    };
    let limit = parse_limit(params.limit.as_deref())?;
    let Some(catalog) = &state.catalog else {
        return Err(ApiError::unavailable(
            "CATALOG_UNAVAILABLE",
            "Catalog search is not available",
        ));
    };
    let auth = if state.search_authenticated {
        state.cookies.load().await.and_then(|snapshot| {
            derive_auth_headers_now(&snapshot.jar, &state.auth_origin)
                .map_err(|error| warn!("{error}; searching unauthenticated"))
                .ok()
        })
    } else {
        None
    };

    let tracks = catalog
        .search(query, limit, auth.as_ref())
        .await
        .inspect_err(|error| error!("Search failed: {error}"))?;
    Ok(Json(tracks))
}

async fn stream(
    State(state): State<AppState>,
    Query(params): Query<StreamParams>,
) -> Result<Json<StreamResponse>, ApiError> {
    let Some(video_id) = params.video_id.as_deref().and_then(non_empty) else {
        return Err(ApiError::bad_request("videoId is required"));
    };
    if !is_valid_video_id(video_id) {
        return Err(ApiError::bad_request("videoId contains invalid characters"));
    }

    let cookies = state.cookies.load().await;
    let resolved = state
        .resolver
        .resolve(video_id, cookies.as_ref())
        .await?;

    Ok(Json(StreamResponse {
        video_id: resolved.video_id,
        stream_url: resolved.stream_url,
        title: resolved.title,
        duration: resolved.duration,
        thumbnail: resolved.thumbnail,
    }))
}

/// Kept as text in the query so a bad value gets the JSON error body.
fn parse_limit(raw: Option<&str>) -> Result<usize, ApiError> {
    let Some(raw) = raw.and_then(non_empty) else {
        return Ok(DEFAULT_SEARCH_LIMIT);
    };
    raw.parse::<usize>()
        .map(|limit| limit.min(MAX_SEARCH_LIMIT))
        .map_err(|_| ApiError::bad_request("limit must be a non-negative integer"))
}

fn is_valid_video_id(value: &str) -> bool {
    value.len() <= MAX_VIDEO_ID_LEN
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'))
}

/// An empty allow-list accepts every origin.
pub fn build_cors_layer(configured: &[String]) -> Result<CorsLayer, ApiError> {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(Any);

    if configured.is_empty() {
        warn!("ALLOWED_ORIGINS is not configured; accepting requests from any origin.");
        return Ok(layer.allow_origin(Any));
    }

    let normalized_origins = configured
        .iter()
        .map(|origin| {
            normalize_origin(origin).ok_or_else(|| {
                ApiError::internal(format!(
                    "Invalid origin in ALLOWED_ORIGINS: {origin}. Use values like https://example.com"
                ))
            })
        })
        .collect::<Result<HashSet<_>, _>>()?;
    let allowed_origins = Arc::new(normalized_origins);
    let allow_origin = AllowOrigin::predicate({
        let allowed_origins = Arc::clone(&allowed_origins);
        move |origin: &HeaderValue, _| {
            let normalized = origin.to_str().ok().and_then(normalize_origin);
            let allowed = normalized
                .as_ref()
                .is_some_and(|value| allowed_origins.contains(value));
            debug!(
                "CORS origin check raw={:?} normalized={:?} allowed={}",
                origin, normalized, allowed
            );
            allowed
        }
    });
    info!(
        "CORS allow-list loaded with {} origin(s): {:?}",
        allowed_origins.len(),
        allowed_origins.iter().collect::<Vec<_>>()
    );

    Ok(layer.allow_origin(allow_origin))
}

fn normalize_origin(value: &str) -> Option<String> {
    let parsed = Url::parse(value).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    let scheme = parsed.scheme();
    let default_port = match scheme {
        "http" => 80,
        "https" => 443,
        _ => return None,
    };

    if parsed.path() != "/" || parsed.query().is_some() || parsed.fragment().is_some() {
        return None;
    }

    match parsed.port() {
        Some(port) if port != default_port => Some(format!("{scheme}://{host}:{port}")),
        _ => Some(format!("{scheme}://{host}")),
    }
}

#[cfg(test)]
mod tests {
    use axum::http::{StatusCode, Uri};
    use tokio::time::Duration;

    use super::*;
    use crate::{
        extractor::UpstreamFetchError,
        formats::default_policy_chain,
        resolver::tests::{ScriptedSource, media, progressive},
    };

    fn state(source: Arc<ScriptedSource>, dir: &tempfile::TempDir) -> AppState {
        AppState {
            catalog: None,
            resolver: Arc::new(Resolver::new(
                source,
                "https://music.youtube.com",
                default_policy_chain(),
            )),
            cookies: CookieSource::new(
                dir.path().join("missing.txt"),
                dir.path().join("scratch.txt"),
            ),
            auth_origin: "https://music.youtube.com".to_string(),
            search_authenticated: false,
        }
    }

    fn stream_params(video_id: Option<&str>) -> Query<StreamParams> {
        Query(StreamParams {
            video_id: video_id.map(ToString::to_string),
        })
    }

    #[tokio::test]
    async fn stream_returns_selected_url() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(ScriptedSource::new(vec![Ok(media(vec![progressive("18", "mp4")]))]));

        let Json(response) = stream(State(state(source, &dir)), stream_params(Some("dQw4w9WgXcQ")))
            .await
            .unwrap();

        assert_eq!(response.video_id, "dQw4w9WgXcQ");
        assert!(response.stream_url.ends_with("itag=18"));
        assert_eq!(response.duration, 212);
        assert_eq!(response.title, "Never Gonna Give You Up");
    }

    #[tokio::test]
    async fn stream_rejects_missing_or_invalid_id() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(ScriptedSource::default());

        for video_id in [None, Some("   "), Some("abc def"), Some("id;rm")] {
            let result = stream(State(state(source.clone(), &dir)), stream_params(video_id)).await;
            let error = result.err().unwrap();
            assert_eq!(error.status, StatusCode::BAD_REQUEST, "{video_id:?}");
        }
        assert!(source.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn stream_distinguishes_not_found_from_upstream_error() {
        let dir = tempfile::tempdir().unwrap();

        let source = Arc::new(ScriptedSource::new(vec![Ok(media(vec![])), Ok(media(vec![]))]));
        let error = stream(State(state(source, &dir)), stream_params(Some("abc")))
            .await
            .err()
            .unwrap();
        assert_eq!(error.status, StatusCode::NOT_FOUND);
        assert_eq!(error.code, "NO_ELIGIBLE_FORMAT");

        let source = Arc::new(ScriptedSource::new(vec![Err(UpstreamFetchError::Timeout(60))]));
        let error = stream(State(state(source, &dir)), stream_params(Some("abc")))
            .await
            .err()
            .unwrap();
        assert_eq!(error.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(error.code, "UPSTREAM_TIMEOUT");
    }

    #[tokio::test]
    async fn search_validates_query_and_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(ScriptedSource::default());

        let error = search(
            State(state(source.clone(), &dir)),
            Query(SearchParams {
                q: Some("  ".to_string()),
                limit: None,
            }),
        )
        .await
        .err()
        .unwrap();
        assert_eq!(error.status, StatusCode::BAD_REQUEST);

        let error = search(
            State(state(source, &dir)),
            Query(SearchParams {
                q: Some("queen".to_string()),
                limit: Some("5".to_string()),
            }),
        )
        .await
        .err()
        .unwrap();
        assert_eq!(error.status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn malformed_limit_is_a_json_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(ScriptedSource::default());

        for uri in ["/search?q=queen&limit=-1", "/search?q=queen&limit=abc"] {
            let params = Query::<SearchParams>::try_from_uri(&uri.parse::<Uri>().unwrap()).unwrap();
            let error = search(State(state(source.clone(), &dir)), params)
                .await
                .err()
                .unwrap();
            assert_eq!(error.status, StatusCode::BAD_REQUEST);
            assert_eq!(error.code, "BAD_REQUEST");
        }
    }

    #[test]
    fn limit_defaults_and_clamps() {
        assert_eq!(parse_limit(None).unwrap(), DEFAULT_SEARCH_LIMIT);
        assert_eq!(parse_limit(Some(" ")).unwrap(), DEFAULT_SEARCH_LIMIT);
        assert_eq!(parse_limit(Some("5")).unwrap(), 5);
        assert_eq!(parse_limit(Some("5000")).unwrap(), MAX_SEARCH_LIMIT);
    }

    #[tokio::test]
    async fn health_reports_degraded_without_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let Json(body) = health(State(state(Arc::new(ScriptedSource::default()), &dir))).await;

        assert_eq!(body["status"], "degraded");
        assert_eq!(body["cookies_available"], false);
    }

    #[tokio::test]
    async fn root_reports_catalog_readiness() {
        let dir = tempfile::tempdir().unwrap();
        let mut app_state = state(Arc::new(ScriptedSource::default()), &dir);
        app_state.catalog = Some(CatalogClient::new(
            reqwest::Client::builder()
                .timeout(Duration::from_secs(1))
                .build()
                .unwrap(),
        ));

        let Json(body) = root(State(app_state)).await;
        assert_eq!(body["catalog"], "ready");
        assert_eq!(body["service"], SERVICE_NAME);
    }

    #[test]
    fn video_id_validation() {
        assert!(is_valid_video_id("dQw4w9WgXcQ"));
        assert!(is_valid_video_id("a_b-c"));
        assert!(!is_valid_video_id("a b"));
        assert!(!is_valid_video_id("x/../y"));
        assert!(!is_valid_video_id(&"a".repeat(65)));
    }

    #[test]
    fn normalizes_origins() {
        assert_eq!(
            normalize_origin("HTTPS://Example.com:443/").as_deref(),
            Some("https://example.com")
        );
        assert_eq!(
            normalize_origin("http://localhost:5173").as_deref(),
            Some("http://localhost:5173")
        );
        assert_eq!(normalize_origin("https://example.com/app"), None);
        assert_eq!(normalize_origin("ftp://example.com"), None);
    }

    #[test]
    fn invalid_allowed_origin_is_rejected() {
        assert!(build_cors_layer(&["not a url".to_string()]).is_err());
        assert!(build_cors_layer(&["https://app.example".to_string()]).is_ok());
        assert!(build_cors_layer(&[]).is_ok());
    }
}

use std::any::Any;
use std::path::Path;
use std::sync::Arc;

use axum::{
    extract::{Path as UrlPath, Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{delete, get},
    Router,
};
use serde::Deserialize;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use crate::cache::CacheStats;
use crate::error::VodError;
use crate::keys::CacheClass;
use crate::types::*;
use crate::AppState;

type ApiError = (StatusCode, Json<ApiResponse<()>>);
type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

pub fn router(state: Arc<AppState>) -> Router {
    let server = &state.config.server;
    let cache_control = HeaderValue::from_str(&format!("public, max-age={}", server.cache_control_secs))
        .unwrap_or_else(|_| HeaderValue::from_static("no-cache"));

    let api = Router::new()
        .route("/search", get(search_handler))
        .route("/vod", get(vod_handler))
        .route("/hot", get(hot_handler))
        .layer(SetResponseHeaderLayer::overriding(header::CACHE_CONTROL, cache_control))
        .route("/cache/stats", get(cache_stats_handler))
        .route("/cache/:class", delete(cache_clear_handler))
        .fallback(api_not_found);

    let static_dir = Path::new(&server.static_dir);
    let spa = ServeDir::new(static_dir).not_found_service(ServeFile::new(static_dir.join("index.html")));

    let app = Router::new()
        .route("/health", get(health_check))
        .nest(&format!("/api/{}", server.api_version), api)
        .fallback_service(spa)
        .with_state(state);
    with_middleware(app)
}

/// Panic recovery, CORS and request tracing, outermost last.
fn with_middleware(app: Router) -> Router {
    app.layer(CatchPanicLayer::custom(panic_response))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .cloned()
        .or_else(|| panic.downcast_ref::<&str>().map(|s| s.to_string()))
        .unwrap_or_else(|| "unknown panic".to_string());
    error!(panic = %detail, "handler panicked");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ApiResponse::<()>::failure(500, "internal server error")),
    )
        .into_response()
}

fn bad_request(message: impl Into<String>) -> ApiError {
    let message = message.into();
    warn!(%message, "rejected request");
    (StatusCode::BAD_REQUEST, Json(ApiResponse::failure(400, message)))
}

fn core_error(err: VodError) -> ApiError {
    let status = match &err {
        VodError::ProviderNotFound(_) | VodError::NoResultsFound { .. } => StatusCode::NOT_FOUND,
        VodError::EpisodeIndexOutOfRange { .. } => StatusCode::BAD_REQUEST,
        _ => StatusCode::BAD_GATEWAY,
    };
    if status == StatusCode::BAD_GATEWAY {
        error!(error = %err, "upstream failure");
    }
    (status, Json(ApiResponse::failure(status.as_u16() as i32, err.to_string())))
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn api_not_found() -> ApiError {
    (StatusCode::NOT_FOUND, Json(ApiResponse::failure(404, "api route not found")))
}

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub wd: Option<String>,
    pub pg: Option<String>,
    pub adult: Option<String>,
}

async fn search_handler(
    State(state): State<Arc<AppState>>,
    Query(request): Query<SearchRequest>,
) -> ApiResult<SearchData> {
    let keyword = request.wd.as_deref().map(str::trim).unwrap_or_default();
    if keyword.is_empty() {
        return Err(bad_request("search keyword 'wd' is required"));
    }
    let page = match request.pg.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
        None => None,
        Some(raw) => match raw.parse::<u32>() {
            Ok(p) if p > 0 => Some(p),
            _ => return Err(bad_request(format!("invalid page '{}'", raw))),
        },
    };
    let include_adult = request.adult.as_deref() == Some("true");

    let (data, extra) = state.service.search(keyword, page, include_adult).await;
    Ok(Json(ApiResponse::success(data, ResponseExtra::Search(extra))))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VodRequest {
    pub source_key: Option<String>,
    pub vod_id: Option<String>,
    pub episode_index: Option<String>,
}

async fn vod_handler(
    State(state): State<Arc<AppState>>,
    Query(request): Query<VodRequest>,
) -> ApiResult<VideoItem> {
    let source_key = request
        .source_key
        .filter(|s| !s.is_empty())
        .ok_or_else(|| bad_request("'sourceKey' is required"))?;
    let vod_id: u64 = request
        .vod_id
        .ok_or_else(|| bad_request("'vodId' is required"))?
        .trim()
        .parse()
        .map_err(|_| bad_request("'vodId' must be a non-negative integer"))?;
    let episode_index: usize = request
        .episode_index
        .ok_or_else(|| bad_request("'episodeIndex' is required"))?
        .trim()
        .parse()
        .map_err(|_| bad_request("'episodeIndex' must be a non-negative integer"))?;

    let (item, extra) = state
        .service
        .vod_detail(&source_key, vod_id, episode_index)
        .await
        .map_err(core_error)?;
    Ok(Json(ApiResponse::success(item, ResponseExtra::Detail(extra))))
}

#[derive(Debug, Deserialize)]
pub struct HotRequest {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub tag: Option<String>,
    pub sort: Option<String>,
    pub page_limit: Option<String>,
    pub page_start: Option<String>,
}

impl From<HotRequest> for HotParams {
    fn from(req: HotRequest) -> Self {
        let defaults = HotParams::default();
        let pick = |v: Option<String>, d: String| v.filter(|s| !s.is_empty()).unwrap_or(d);
        HotParams {
            kind: pick(req.kind, defaults.kind),
            tag: pick(req.tag, defaults.tag),
            sort: pick(req.sort, defaults.sort),
            page_limit: pick(req.page_limit, defaults.page_limit),
            page_start: pick(req.page_start, defaults.page_start),
        }
    }
}

async fn hot_handler(
    State(state): State<Arc<AppState>>,
    Query(request): Query<HotRequest>,
) -> ApiResult<HotData> {
    let (data, params) = state.service.hot(request.into()).await.map_err(core_error)?;
    Ok(Json(ApiResponse::success(data, ResponseExtra::Hot(params))))
}

async fn cache_stats_handler(State(state): State<Arc<AppState>>) -> Json<CacheStats> {
    Json(state.service.cache().stats().await)
}

async fn cache_clear_handler(
    State(state): State<Arc<AppState>>,
    UrlPath(class): UrlPath<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let cache = state.service.cache();
    let removed = if class == "all" {
        cache.clear_all().await
    } else {
        let class = CacheClass::from_tag(&class)
            .ok_or_else(|| bad_request(format!("unknown cache class '{}'", class)))?;
        cache.clear(class).await
    };
    Ok(Json(serde_json::json!({ "removed": removed })))
}

//! HTTP surface: health, `did:web` document, and the two feed-generator XRPC
//! methods. Every response, errors included, is JSON.
use axum::extract::{Query, State};
use axum::http::header::{ACCEPT, CONTENT_TYPE, HeaderName, ORIGIN};
use axum::http::{Method, Request, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use feedgen_common::redact_presence;
use feedgen_config::{FeedDescriptor, FeedgenConfig};
use feedgen_feed::{FeedAssembler, FeedPage};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::any::Any;
use std::sync::Arc;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any as AnyOrigin, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::{DefaultOnResponse, TraceLayer};
use tracing::Level;

const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Clone)]
pub struct AppState {
    pub assembler: Arc<FeedAssembler>,
    pub feed: Arc<FeedDescriptor>,
    pub environment: EnvironmentStatus,
}

/// Credential presence as reported by the health endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EnvironmentStatus {
    #[serde(rename = "BLUESKY_USERNAME")]
    pub username: &'static str,
    #[serde(rename = "BLUESKY_PASSWORD")]
    pub password: &'static str,
}

impl EnvironmentStatus {
    pub fn from_config(config: &FeedgenConfig) -> Self {
        Self {
            username: redact_presence(config.bluesky.username.as_deref()),
            password: redact_presence(config.bluesky.password.as_deref()),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: &'static str,
    details: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    error: &'static str,
    details: String,
}

impl ApiError {
    fn new(status: StatusCode, error: &'static str, details: impl Into<String>) -> Self {
        Self {
            status,
            error,
            details: details.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let payload = ErrorResponse {
            error: self.error,
            details: self.details,
        };
        (self.status, Json(payload)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Default, Deserialize)]
pub struct SkeletonParams {
    pub feed: Option<String>,
    pub cursor: Option<String>,
    /// Kept as text so a malformed value is ignored instead of rejected.
    pub limit: Option<String>,
}

impl SkeletonParams {
    fn limit(&self) -> Option<usize> {
        self.limit
            .as_deref()
            .and_then(|raw| raw.trim().parse::<usize>().ok())
            .filter(|&n| n > 0)
    }
}

pub fn router(state: AppState) -> Router {
    let router = Router::new()
        .route("/", get(health))
        .route("/.well-known/did.json", get(did_document))
        .route("/xrpc/app.bsky.feed.getFeedSkeleton", get(feed_skeleton))
        .route(
            "/xrpc/app.bsky.feed.describeFeedGenerator",
            get(describe_feed_generator),
        )
        .fallback(not_found)
        .with_state(state);

    apply_standard_layers(router)
}

fn apply_standard_layers(router: Router) -> Router {
    let trace = TraceLayer::new_for_http()
        .make_span_with(|request: &Request<_>| {
            let request_id = request
                .headers()
                .get(REQUEST_ID_HEADER)
                .and_then(|value| value.to_str().ok())
                .unwrap_or("-");
            tracing::info_span!(
                "http.request",
                method = %request.method(),
                uri = %request.uri(),
                request_id = %request_id
            )
        })
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    let cors = CorsLayer::new()
        .allow_origin(AnyOrigin)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([
            ORIGIN,
            HeaderName::from_static("x-requested-with"),
            CONTENT_TYPE,
            ACCEPT,
        ]);

    let request_id_header = HeaderName::from_static(REQUEST_ID_HEADER);

    router
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(trace)
        .layer(cors)
        .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
        .layer(SetRequestIdLayer::new(request_id_header, MakeRequestUuid))
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    tracing::debug!("health.check");
    Json(json!({
        "status": "ok",
        "message": "Gay Men's Health Feed Generator is running",
        "environmentStatus": state.environment,
    }))
}

async fn did_document(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "@context": ["https://www.w3.org/ns/did/v1"],
        "id": state.feed.did(),
        "service": [{
            "id": "#bsky_fg",
            "type": "BskyFeedGenerator",
            "serviceEndpoint": state.feed.service_endpoint(),
        }],
    }))
}

async fn feed_skeleton(
    State(state): State<AppState>,
    Query(params): Query<SkeletonParams>,
) -> ApiResult<Json<FeedPage>> {
    tracing::info!(cursor = ?params.cursor, feed = ?params.feed, limit = ?params.limit, "feed.skeleton.request");

    let assembly = state
        .assembler
        .assemble(params.cursor.as_deref(), params.limit())
        .await
        .map_err(|err| {
            tracing::error!(error = %err, "feed.skeleton.failed");
            ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to fetch feed",
                err.to_string(),
            )
        })?;

    for report in assembly.failed_sources() {
        if let Err(err) = &report.outcome {
            tracing::debug!(source = %report.source, error = %err, "feed.skeleton.source_failed");
        }
    }
    tracing::info!(
        items = assembly.page.feed.len(),
        degraded = assembly.degraded,
        "feed.skeleton.served"
    );
    Ok(Json(assembly.page))
}

async fn describe_feed_generator(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "did": state.feed.did(),
        "feeds": [{
            "uri": state.feed.feed_uri(),
            "displayName": state.feed.display_name,
            "description": state.feed.description,
        }],
    }))
}

async fn not_found(uri: Uri) -> ApiError {
    ApiError::new(StatusCode::NOT_FOUND, "Not found", format!("no route for {uri}"))
}

fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let details = if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else {
        "unknown panic".to_string()
    };
    tracing::error!(%details, "http.handler.panicked");
    ApiError::new(
        StatusCode::INTERNAL_SERVER_ERROR,
        "Internal server error",
        details,
    )
    .into_response()
}

//! Read API served to dashboard consumers.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use axum::{
    Router,
    extract::{Query, Request, State},
    http::{HeaderValue, StatusCode, Uri},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::get,
};
use serde::Serialize;
use serde_json::{Value, json};
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

use crate::collector::Collector;
use crate::error::StoreError;
use crate::store::DEFAULT_HISTORY_LIMIT;
use crate::token_manager::TokenManager;
use crate::types::LOCAL_ERROR_CODE;

/// Application state shared across all requests
#[derive(Clone)]
pub struct AppState {
    collector: Arc<Collector>,
    tokens: TokenManager,
    metrics: Arc<Metrics>,
}

impl AppState {
    pub fn new(collector: Arc<Collector>, tokens: TokenManager) -> Self {
        Self {
            collector,
            tokens,
            metrics: Arc::new(Metrics {
                total_requests: AtomicU64::new(0),
                requests_in_flight: AtomicU64::new(0),
                start_time: Instant::now(),
            }),
        }
    }
}

/// Server metrics
struct Metrics {
    total_requests: AtomicU64,
    requests_in_flight: AtomicU64,
    start_time: Instant,
}

/// RAII guard for tracking in-flight requests
struct RequestGuard<'a>(&'a AtomicU64);

impl Drop for RequestGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Build the Axum application with routes and middleware
pub fn build_app(state: AppState, cors: CorsLayer) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/api/power-data", get(latest_power_data))
        .route("/api/power-data/history", get(power_data_history))
        .route("/api/power-data/fetch-now", get(fetch_now))
        .route("/api/metrics", get(get_metrics))
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(state.clone(), count_requests))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

/// CORS policy for the configured origins. `*` allows any origin without
/// credentials; an explicit list allows credentials.
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }

    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin: {}", o);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(tower_http::cors::AllowMethods::mirror_request())
        .allow_headers(tower_http::cors::AllowHeaders::mirror_request())
        .allow_credentials(true)
}

async fn count_requests(State(state): State<AppState>, request: Request, next: Next) -> Response {
    state.metrics.total_requests.fetch_add(1, Ordering::Relaxed);
    state
        .metrics
        .requests_in_flight
        .fetch_add(1, Ordering::Relaxed);

    // Ensure we decrement on exit
    let _guard = RequestGuard(&state.metrics.requests_in_flight);
    next.run(request).await
}

async fn root() -> Json<Value> {
    Json(json!({"message": "Solar proxy backend is running"}))
}

/// Health check endpoint
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let collector_state = state.collector.state();
    Json(HealthResponse {
        status: "healthy",
        background_task_running: collector_state.is_running(),
        collector_state: collector_state.to_string(),
    })
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    background_task_running: bool,
    collector_state: String,
}

/// Latest stored record, or a placeholder before the first cycle has run.
async fn latest_power_data(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    match state.collector.store().latest().await? {
        Some(record) => Ok(Json(serde_json::to_value(record).map_err(StoreError::from)?)),
        None => Ok(Json(json!({
            "message": "No data available yet. Background collection is running.",
            "result_code": LOCAL_ERROR_CODE,
        }))),
    }
}

/// Parsed as raw pairs so repeated or malformed parameters never reject the
/// request; the first `limit` wins and anything unparsable means the default.
async fn power_data_history(
    State(state): State<AppState>,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<Json<Value>, ApiError> {
    let limit = params
        .iter()
        .find(|(key, _)| key == "limit")
        .and_then(|(_, raw)| raw.trim().parse::<i64>().ok())
        .unwrap_or(DEFAULT_HISTORY_LIMIT);

    let history = state.collector.store().history(limit).await?;
    Ok(Json(json!({
        "count": history.len(),
        "data": history,
    })))
}

/// Run one fetch-and-save cycle now.
async fn fetch_now(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    tracing::info!("Manual fetch requested");
    let record = state.collector.collect_once().await?;

    Ok(Json(json!({
        "message": "Data fetched and saved successfully",
        "record_id": record.id,
        "timestamp": record.timestamp,
        "data": record.raw_payload,
    })))
}

async fn get_metrics(State(state): State<AppState>) -> Json<MetricsResponse> {
    Json(MetricsResponse {
        total_requests: state.metrics.total_requests.load(Ordering::Relaxed),
        requests_in_flight: state.metrics.requests_in_flight.load(Ordering::Relaxed),
        uptime_seconds: state.metrics.start_time.elapsed().as_secs(),
        cycles_completed: state.collector.cycles_completed(),
        token_renewals: state.tokens.successful_renewals(),
    })
}

#[derive(Serialize)]
struct MetricsResponse {
    total_requests: u64,
    requests_in_flight: u64,
    uptime_seconds: u64,
    cycles_completed: u64,
    token_renewals: u64,
}

async fn not_found(uri: Uri) -> Response {
    let body = Json(json!({
        "error": format!("Not found: {}", uri.path()),
        "result_code": LOCAL_ERROR_CODE,
    }));
    (StatusCode::NOT_FOUND, body).into_response()
}

/// API error rendered as `{"error", "result_code": "0"}`.
pub struct ApiError(StoreError);

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        tracing::error!("Request failed: {}", self.0);
        let body = Json(json!({
            "error": self.0.to_string(),
            "result_code": LOCAL_ERROR_CODE,
        }));
        (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
    }
}

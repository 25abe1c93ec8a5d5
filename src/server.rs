//! HTTP surface
//!
//! `POST /scrape` runs one batch per request through the shared
//! [`ScrapeService`]; `GET /`, `GET /health` and `GET /metrics` report on the
//! process. Locally stored screenshots are served under `/screenshots`.

use crate::health::HealthChecker;
use crate::middleware::{self, ApiKeys, RateLimiter, RequestId};
use crate::storage::{store_pending, ScreenshotStore, LOCAL_URL_PREFIX};
use crate::{BatchResult, ScrapeError, ScrapeRequestBody, ScrapeService, ScreenshotMode};
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::header::{CONTENT_TYPE, REFERRER_POLICY, X_CONTENT_TYPE_OPTIONS, X_FRAME_OPTIONS};
use axum::http::{HeaderValue, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::services::ServeDir;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ScrapeService>,
    pub store: Arc<dyn ScreenshotStore>,
    pub health: Arc<HealthChecker>,
    pub metrics: Option<PrometheusHandle>,
    pub api_keys: ApiKeys,
    pub rate_limiter: RateLimiter,
}

impl AppState {
    pub fn new(service: Arc<ScrapeService>, store: Arc<dyn ScreenshotStore>) -> Self {
        let settings = &service.config().server;
        let api_keys = ApiKeys::new(settings.api_keys.clone());
        let rate_limiter = RateLimiter::new(settings.rate_limit_window(), settings.rate_limit_max);
        let health = Arc::new(HealthChecker::new(service.renderer().clone()));

        Self {
            service,
            store,
            health,
            metrics: None,
            api_keys,
            rate_limiter,
        }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}

/// JSON error response: `{"error": message}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "Unauthorized")
    }

    pub fn rate_limited() -> Self {
        Self::new(
            StatusCode::TOO_MANY_REQUESTS,
            "Too many requests, please try again later.",
        )
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<ScrapeError> for ApiError {
    fn from(err: ScrapeError) -> Self {
        match err {
            ScrapeError::Validation(message) => Self::new(StatusCode::BAD_REQUEST, message),
            other => {
                error!(severity = ?other.severity(), "Unhandled error: {}", other);
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(rejection.status(), rejection.body_text())
    }
}

pub fn router(state: AppState) -> Router {
    let settings = state.service.config().server.clone();
    let screenshot_dir = state.service.config().storage.screenshot_dir.clone();

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/scrape", post(scrape))
        .nest_service(LOCAL_URL_PREFIX, ServeDir::new(screenshot_dir))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::bearer_auth,
        ))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::rate_limit,
        ))
        .layer(DefaultBodyLimit::max(settings.request_body_limit))
        .layer(middleware::cors_layer(&settings))
        .layer(SetResponseHeaderLayer::if_not_present(
            X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            X_FRAME_OPTIONS,
            HeaderValue::from_static("SAMEORIGIN"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            REFERRER_POLICY,
            HeaderValue::from_static("no-referrer"),
        ))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request<_>| {
                let request_id = request
                    .extensions()
                    .get::<RequestId>()
                    .map(|id| id.0.as_str())
                    .unwrap_or_default();
                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    path = %request.uri().path(),
                    request_id = %request_id,
                )
            }),
        )
        .layer(axum::middleware::from_fn(middleware::request_id))
        .with_state(state)
}

async fn root() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "message": "Page scraper API. POST /scrape { urls: [...] }",
    }))
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.health.report())
}

async fn metrics(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => ApiError::new(StatusCode::NOT_FOUND, "Metrics disabled").into_response(),
    }
}

async fn scrape(
    State(state): State<AppState>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    body: Result<Json<ScrapeRequestBody>, JsonRejection>,
) -> Result<Json<BatchResult>, ApiError> {
    let started = Instant::now();
    let outcome = run_scrape(&state, body).await;
    info!(
        route = "/scrape",
        ms = started.elapsed().as_millis() as u64,
        req_id = %request_id,
        "scrape completed"
    );
    outcome.map(Json)
}

async fn run_scrape(
    state: &AppState,
    body: Result<Json<ScrapeRequestBody>, JsonRejection>,
) -> Result<BatchResult, ApiError> {
    let Json(body) = body?;
    let request = body.into_batch_request(state.service.config())?;
    let screenshot = request.screenshot;

    let mut batch = state.service.run_batch(request).await?;
    if screenshot == ScreenshotMode::Stored {
        store_pending(&mut batch.results, state.store.as_ref()).await;
    }
    Ok(batch)
}

/// Resolves on SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for SIGINT: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

/// Serve until a shutdown signal arrives. The caller owns the renderer and
/// releases it once this returns.
pub async fn serve(state: AppState) -> Result<(), ScrapeError> {
    let settings = state.service.config().server.clone();
    let addr = format!("{}:{}", settings.host, settings.port);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Page scraper listening on http://{}", addr);

    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

//! HTTP middleware: request ids, bearer authentication, rate limiting, CORS.

use crate::config::ServerSettings;
use crate::server::{ApiError, AppState};
use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER};
use axum::http::{HeaderName, HeaderValue, Method, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use subtle::ConstantTimeEq;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::debug;
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Paths reachable without a bearer token.
const PUBLIC_PATHS: [&str; 2] = ["/", "/health"];

/// Prune expired rate-limit windows once this many clients are tracked.
const PRUNE_THRESHOLD: usize = 10_000;

#[derive(Debug, Clone)]
pub struct RequestId(pub String);

/// Reuse the caller's `x-request-id` or mint one, and echo it back.
pub async fn request_id(mut request: Request<Body>, next: Next) -> Response {
    let id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    request.extensions_mut().insert(RequestId(id.clone()));
    let mut response = next.run(request).await;

    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// Accepted bearer tokens. An empty set disables authentication.
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    keys: Arc<Vec<String>>,
}

impl ApiKeys {
    pub fn new(keys: Vec<String>) -> Self {
        Self {
            keys: Arc::new(keys),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.keys.is_empty()
    }

    pub fn verify(&self, token: &str) -> bool {
        self.keys.iter().any(|key| {
            key.len() == token.len() && bool::from(key.as_bytes().ct_eq(token.as_bytes()))
        })
    }
}

pub async fn bearer_auth(State(state): State<AppState>, request: Request<Body>, next: Next) -> Response {
    if !state.api_keys.is_enabled() || PUBLIC_PATHS.contains(&request.uri().path()) {
        return next.run(request).await;
    }

    let authorized = extract_token(request.headers().get(AUTHORIZATION))
        .is_some_and(|token| state.api_keys.verify(token));
    if !authorized {
        debug!(path = %request.uri().path(), "Rejected unauthenticated request");
        return ApiError::unauthorized().into_response();
    }

    next.run(request).await
}

fn extract_token(header: Option<&HeaderValue>) -> Option<&str> {
    let raw = header?.to_str().ok()?;
    let token = raw.strip_prefix("Bearer ")?.trim();
    (!token.is_empty()).then_some(token)
}

#[derive(Debug, Clone, Copy)]
struct FixedWindow {
    started: Instant,
    count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_after: Duration,
}

/// Fixed-window request counter per client.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    window: Duration,
    max_requests: u32,
    windows: Arc<DashMap<String, FixedWindow>>,
}

impl RateLimiter {
    pub fn new(window: Duration, max_requests: u32) -> Self {
        Self {
            window,
            max_requests,
            windows: Arc::new(DashMap::new()),
        }
    }

    pub fn check(&self, client: &str) -> RateDecision {
        let now = Instant::now();
        let mut entry = self
            .windows
            .entry(client.to_string())
            .or_insert(FixedWindow { started: now, count: 0 });

        if now.duration_since(entry.started) >= self.window {
            *entry = FixedWindow { started: now, count: 0 };
        }
        let reset_after = self.window.saturating_sub(now.duration_since(entry.started));

        if entry.count >= self.max_requests {
            return RateDecision {
                allowed: false,
                remaining: 0,
                reset_after,
            };
        }

        entry.count += 1;
        RateDecision {
            allowed: true,
            remaining: self.max_requests - entry.count,
            reset_after,
        }
    }

    pub fn prune(&self) {
        let now = Instant::now();
        self.windows
            .retain(|_, window| now.duration_since(window.started) < self.window);
    }

    pub fn tracked_clients(&self) -> usize {
        self.windows.len()
    }

    pub fn limit(&self) -> u32 {
        self.max_requests
    }
}

pub async fn rate_limit(State(state): State<AppState>, request: Request<Body>, next: Next) -> Response {
    let limiter = &state.rate_limiter;
    if limiter.tracked_clients() > PRUNE_THRESHOLD {
        limiter.prune();
    }

    let decision = limiter.check(&client_key(&request));
    let reset_secs = decision.reset_after.as_secs_f64().ceil() as u64;

    let mut response = if decision.allowed {
        next.run(request).await
    } else {
        let mut response = ApiError::rate_limited().into_response();
        response
            .headers_mut()
            .insert(RETRY_AFTER, HeaderValue::from(reset_secs));
        response
    };

    let headers = response.headers_mut();
    headers.insert("ratelimit-limit", HeaderValue::from(limiter.limit()));
    headers.insert("ratelimit-remaining", HeaderValue::from(decision.remaining));
    headers.insert("ratelimit-reset", HeaderValue::from(reset_secs));
    response
}

/// Client identity for rate limiting: the peer address when known.
fn client_key(request: &Request<Body>) -> String {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

pub fn cors_layer(settings: &ServerSettings) -> CorsLayer {
    if settings.allow_origins.is_empty() {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }

    let origins: Vec<HeaderValue> = settings
        .allow_origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            AUTHORIZATION,
            CONTENT_TYPE,
            HeaderName::from_static(REQUEST_ID_HEADER),
        ])
}

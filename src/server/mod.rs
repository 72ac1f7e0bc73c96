//! ControlPlane (component I): the axum HTTP surface wrapping JobManager
//! and Pipeline behind the routes in §6.

mod auth;
mod rate_limit;
mod routes;
mod upload;

use crate::cache::TranslationCache;
use crate::config::Config;
use crate::manager::JobManager;
use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use rate_limit::RateLimiter;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<JobManager>,
    pub config: Arc<Config>,
    pub cache: Arc<TranslationCache>,
    rate_limiter: Arc<RateLimiter>,
}

/// First `X-Forwarded-For` entry, trimmed; falls back to the TCP peer when
/// the header is absent or unparseable.
fn client_ip(headers: &axum::http::HeaderMap, peer: SocketAddr) -> IpAddr {
    headers
        .get("X-Forwarded-For")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim())
        .and_then(|v| v.parse().ok())
        .unwrap_or_else(|| peer.ip())
}

async fn rate_limit_guard(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: axum::extract::Request,
    next: middleware::Next,
) -> Result<axum::response::Response, StatusCode> {
    let ip = client_ip(request.headers(), addr);
    if state.rate_limiter.check(ip) {
        Ok(next.run(request).await)
    } else {
        Err(StatusCode::TOO_MANY_REQUESTS)
    }
}

fn cors_layer(config: &Config) -> CorsLayer {
    if config.cors_origins.iter().any(|o| o == "*") {
        CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
    } else {
        let origins: Vec<_> = config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

pub fn router(manager: Arc<JobManager>, config: Arc<Config>, cache: Arc<TranslationCache>) -> Router {
    let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit_requests, config.rate_limit_window));
    let cors = cors_layer(&config);
    let state = AppState {
        manager,
        config,
        cache,
        rate_limiter,
    };

    Router::new()
        .route("/api/jobs", post(routes::create_job))
        .route("/api/jobs/:id", get(routes::get_job))
        .route("/api/jobs/:id/cancel", post(routes::cancel_job))
        .route("/api/jobs/:id/download", get(routes::download_job))
        .route("/api/jobs/:id/srt", get(routes::get_srt))
        .route("/api/system/status", get(routes::system_status))
        .layer(middleware::from_fn_with_state(state.clone(), auth::require_api_key))
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit_guard))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

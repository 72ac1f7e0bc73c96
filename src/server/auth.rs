//! Optional `X-API-Key` authentication (§4.I).

use crate::server::AppState;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::Response;

pub async fn require_api_key(
    State(state): State<AppState>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    if !state.config.auth_enabled() {
        return Ok(next.run(request).await);
    }
    let expected = state.config.api_key.as_deref().unwrap_or_default();
    let provided = request
        .headers()
        .get("X-API-Key")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if expected.is_empty() || provided != expected {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(request).await)
}

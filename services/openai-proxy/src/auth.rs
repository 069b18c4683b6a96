//! Inbound API-secret middleware
//!
//! Guards the `/v1/*` routes with a bearer secret check. When no secret is
//! configured the gateway is open — the operator has opted out of inbound
//! auth, matching the upstream-credential-only deployment mode.

use axum::extract::{Request, State};
use axum::http::{StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use common::Secret;
use tracing::debug;

use crate::AppState;
use crate::openai::ErrorResponse;

/// Bearer-secret check for the OpenAI-compatible routes.
pub async fn require_api_secret(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let presented = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    if secret_matches(&state.api_secrets, presented) {
        return next.run(request).await;
    }

    debug!(path = %request.uri().path(), "rejected request with invalid api secret");
    (
        StatusCode::UNAUTHORIZED,
        axum::Json(ErrorResponse::new(
            "invalid or missing api secret",
            "invalid_request_error",
            "invalid_authorization",
        )),
    )
        .into_response()
}

/// Whether the presented Authorization header satisfies the configured
/// secrets. An empty secret list admits everything.
fn secret_matches(secrets: &[Secret<String>], header: Option<&str>) -> bool {
    if secrets.is_empty() {
        return true;
    }
    let Some(value) = header else {
        return false;
    };
    let token = value.strip_prefix("Bearer ").unwrap_or(value).trim();
    secrets.iter().any(|s| s.expose() == token)
}

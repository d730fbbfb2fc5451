use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use subtle::ConstantTimeEq;

use crate::db::AppState;
use crate::error::AppError;

pub const ADMIN_KEY_HEADER: &str = "x-admin-key";

/// Extract the admin key header, if present and non-empty.
fn extract_admin_key(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(ADMIN_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Constant-time comparison against the configured secret.
fn is_admin_key(state: &AppState, presented: &str) -> bool {
    presented
        .as_bytes()
        .ct_eq(state.admin_key.as_bytes())
        .into()
}

/// Rejects with 401 before any admin handler runs.
pub async fn admin_auth(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let authorized = extract_admin_key(request.headers())
        .map(|key| is_admin_key(&state, key))
        .unwrap_or(false);
    if !authorized {
        tracing::warn!(
            path = %request.uri().path(),
            "Rejected admin request with missing or invalid key"
        );
        return Err(AppError::Unauthorized);
    }
    Ok(next.run(request).await)
}

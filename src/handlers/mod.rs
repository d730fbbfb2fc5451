pub mod admin;
pub mod public;

use axum::{
    Router,
    body::Body,
    http::{HeaderName, HeaderValue, Method, Request, header},
};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::db::AppState;
use crate::middleware::ADMIN_KEY_HEADER;
use crate::rate_limit::{LIMIT_HEADER, RESET_HEADER, REMAINING_HEADER, RateLimiters};

pub const CORRELATION_ID_HEADER: HeaderName = HeaderName::from_static("x-correlation-id");

/// The complete application: public, config, health and admin routes with
/// CORS, request tracing and correlation ids.
///
/// Every response carries `x-correlation-id`, echoed from the request or
/// generated when absent.
pub fn app(state: AppState, limits: &RateLimiters, cors_origins: &[String]) -> Router {
    Router::new()
        .merge(public::router(limits))
        .merge(admin::router(state.clone()))
        .with_state(state)
        .layer(cors_layer(cors_origins))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                let correlation_id = request
                    .headers()
                    .get(&CORRELATION_ID_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("-");
                tracing::info_span!(
                    "request",
                    method = %request.method(),
                    uri = %request.uri(),
                    correlation_id = %correlation_id,
                )
            }),
        )
        .layer(PropagateRequestIdLayer::new(CORRELATION_ID_HEADER))
        .layer(SetRequestIdLayer::new(CORRELATION_ID_HEADER, MakeRequestUuid))
}

/// Only the configured origins may call cross-origin; an empty list allows none.
fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([
            header::CONTENT_TYPE,
            HeaderName::from_static(ADMIN_KEY_HEADER),
            CORRELATION_ID_HEADER,
        ])
        .expose_headers([
            CORRELATION_ID_HEADER,
            LIMIT_HEADER,
            REMAINING_HEADER,
            RESET_HEADER,
            header::RETRY_AFTER,
        ])
}

//! Health probes, config blobs and correlation ids

use axum::http::StatusCode;
use uuid::Uuid;

use licensegate::util::resident_memory_mb;

use crate::common::*;

// ============================================================================
// Health
// ============================================================================

#[tokio::test]
async fn test_health_reports_ok() {
    let app = test_app();
    let response = send(&app.router, get_request("/health")).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["status"], "ok");
    assert_eq!(response.body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_ready_checks_database() {
    let app = test_app();
    let response = send(&app.router, get_request("/health/ready")).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["status"], "ready");
    assert_eq!(response.body["database"]["healthy"], true);
    assert_eq!(response.body["memory"]["healthy"], true);
}

#[tokio::test]
async fn test_ready_fails_over_memory_ceiling() {
    assert!(resident_memory_mb().is_some(), "process memory available");
    let app = test_app();
    let mut state = app.state.clone();
    state.ready_max_rss_mb = 0;
    let router = handlers::app(state, &RateLimiters::new(relaxed_limits()), &[]);

    let response = send(&router, get_request("/health/ready")).await;
    assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.body["status"], "unavailable");
    assert_eq!(response.body["memory"]["healthy"], false);
    assert_eq!(response.body["database"]["healthy"], true);
}

// ============================================================================
// Config blobs
// ============================================================================

#[tokio::test]
async fn test_features_config() {
    let app = test_app();
    let response = send(&app.router, get_request("/api/v1/config/features")).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["trialEnabled"], true);
    assert_eq!(response.body["trialDays"], 14);
    assert_eq!(response.body["offlineGraceDays"], DEFAULT_GRACE_DAYS);
    assert_eq!(response.body["similarityThreshold"], 60);
    assert_eq!(response.body["minHardwareScore"], 55);
}

#[tokio::test]
async fn test_update_channel_config() {
    let app = test_app();
    let response = send(&app.router, get_request("/api/v1/config/update-channel")).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["channel"], "stable");
    assert_eq!(response.body["schemaVersion"], 1);
}

#[tokio::test]
async fn test_unknown_config_is_not_found() {
    let app = test_app();
    let response = send(&app.router, get_request("/api/v1/config/secrets")).await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
}

// ============================================================================
// Correlation ids
// ============================================================================

#[tokio::test]
async fn test_correlation_id_is_generated() {
    let app = test_app();
    let response = send(&app.router, get_request("/health")).await;
    let id = response
        .header("x-correlation-id")
        .expect("correlation id on every response");
    assert!(Uuid::parse_str(id).is_ok(), "generated id should be a uuid: {}", id);
}

#[tokio::test]
async fn test_correlation_id_is_echoed() {
    let app = test_app();
    let mut request = get_request("/api/v1/config/features");
    request
        .headers_mut()
        .insert("x-correlation-id", "support-ticket-4711".parse().unwrap());

    let response = send(&app.router, request).await;
    assert_eq!(response.header("x-correlation-id"), Some("support-ticket-4711"));
}

#[tokio::test]
async fn test_correlation_id_on_error_responses() {
    let app = test_app();
    let response = send(&app.router, get_request("/api/v1/admin/licenses")).await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    assert!(response.header("x-correlation-id").is_some());
}

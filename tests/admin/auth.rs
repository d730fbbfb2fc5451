//! X-Admin-Key enforcement on /api/v1/admin/*

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{Request, StatusCode},
};

use crate::common::*;

fn list_request(admin_key: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("GET")
        .uri("/api/v1/admin/licenses")
        .extension(ConnectInfo(client_addr()));
    if let Some(key) = admin_key {
        builder = builder.header("x-admin-key", key);
    }
    builder.body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_missing_admin_key_is_unauthorized() {
    let app = test_app();
    let response = send(&app.router, list_request(None)).await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    assert_eq!(response.body["error"], "Unauthorized");
}

#[tokio::test]
async fn test_wrong_admin_key_is_unauthorized() {
    let app = test_app();
    for key in ["wrong", "test-admin-key-0123456789abcdefghiJ", ""] {
        let response = send(&app.router, list_request(Some(key))).await;
        assert_eq!(response.status, StatusCode::UNAUTHORIZED, "key {:?}", key);
    }
}

#[tokio::test]
async fn test_admin_key_prefix_is_not_enough() {
    let app = test_app();
    let prefix = &TEST_ADMIN_KEY[..TEST_ADMIN_KEY.len() - 1];
    let response = send(&app.router, list_request(Some(prefix))).await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_valid_admin_key_is_accepted() {
    let app = test_app();
    let response = send(&app.router, list_request(Some(TEST_ADMIN_KEY))).await;
    assert_eq!(response.status, StatusCode::OK);
}

#[tokio::test]
async fn test_auth_runs_before_body_parsing() {
    let app = test_app();
    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/admin/licenses")
        .header("content-type", "application/json")
        .extension(ConnectInfo(client_addr()))
        .body(Body::from("{not json"))
        .unwrap();
    let response = send(&app.router, request).await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
}

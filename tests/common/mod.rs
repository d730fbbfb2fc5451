//! Test utilities and fixtures for LicenseGate integration tests

#![allow(dead_code)]

use std::net::SocketAddr;

use axum::{
    Router,
    body::Body,
    extract::ConnectInfo,
    http::{HeaderMap, Request, StatusCode},
};
use ed25519_dalek::SigningKey;
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;

pub use licensegate::config::RateLimitConfig;
pub use licensegate::db::{AppState, create_pool, init_db, queries};
pub use licensegate::handlers;
pub use licensegate::models::*;
pub use licensegate::rate_limit::RateLimiters;
pub use licensegate::service::LicenseService;
pub use licensegate_sdk::{
    HardwareComponent, HardwareComponentSet, HardwareIdentity, LicenseRecord, LicenseStatus,
    LicenseType, codec,
};

pub const TEST_ADMIN_KEY: &str = "test-admin-key-0123456789abcdefghij";
pub const CLIENT_ADDR: &str = "198.51.100.10:40000";
pub const DEFAULT_GRACE_DAYS: u32 = 7;

/// Fixed signing key (deterministic for testing)
pub fn test_signing_key() -> SigningKey {
    SigningKey::from_bytes(&[7u8; 32])
}

pub fn test_public_key() -> String {
    codec::encode_public_key(&test_signing_key().verifying_key())
}

/// Limits high enough that only rate limit tests ever hit them
pub fn relaxed_limits() -> RateLimitConfig {
    RateLimitConfig {
        strict_rpm: 10_000,
        standard_rpm: 10_000,
        relaxed_rpm: 10_000,
    }
}

/// A fully wired application over a file-backed database in a temp dir.
pub struct TestApp {
    pub state: AppState,
    pub router: Router,
    pub db_path: String,
    _dir: TempDir,
}

pub fn test_app() -> TestApp {
    test_app_with_limits(relaxed_limits())
}

pub fn test_app_with_limits(limits: RateLimitConfig) -> TestApp {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let db_path = dir
        .path()
        .join("licensegate.db")
        .to_string_lossy()
        .into_owned();
    let pool = create_pool(&db_path).expect("Failed to create pool");
    {
        let conn = pool.get().expect("Failed to get connection");
        init_db(&conn).expect("Failed to initialize schema");
    }

    let licenses = LicenseService::new(pool.clone(), test_signing_key(), DEFAULT_GRACE_DAYS);
    let state = AppState {
        db: pool,
        licenses,
        admin_key: TEST_ADMIN_KEY.to_string(),
        ready_max_rss_mb: u64::MAX,
    };
    let router = handlers::app(state.clone(), &RateLimiters::new(limits), &[]);

    TestApp {
        state,
        router,
        db_path,
        _dir: dir,
    }
}

// ============ Requests ============

pub fn client_addr() -> SocketAddr {
    CLIENT_ADDR.parse().unwrap()
}

/// JSON request as seen from `addr`, the way `into_make_service_with_connect_info` delivers it.
pub fn json_request_from(addr: SocketAddr, method: &str, uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .extension(ConnectInfo(addr))
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap()
}

pub fn json_request(method: &str, uri: &str, body: &Value) -> Request<Body> {
    json_request_from(client_addr(), method, uri, body)
}

pub fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .extension(ConnectInfo(client_addr()))
        .body(Body::empty())
        .unwrap()
}

/// Admin request carrying the configured `X-Admin-Key`.
pub fn admin_request(method: &str, uri: &str, body: Option<&Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-admin-key", TEST_ADMIN_KEY)
        .extension(ConnectInfo(client_addr()));
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl TestResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

pub async fn send(router: &Router, request: Request<Body>) -> TestResponse {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    TestResponse {
        status,
        headers,
        body,
    }
}

// ============ Fixtures ============

pub fn create_license_body(max_machines: u32) -> Value {
    json!({
        "licenseeName": "Ada Lovelace",
        "licenseeEmail": "ada@example.com",
        "company": "Analytical Engines Ltd",
        "licenseType": "professional",
        "maxMachines": max_machines,
        "supportDurationDays": 365,
    })
}

/// Issue a license through the service and return the admin view.
pub fn issue_license(app: &TestApp, max_machines: u32) -> AdminLicense {
    let input: CreateLicense = serde_json::from_value(create_license_body(max_machines)).unwrap();
    app.state
        .licenses
        .issue(&input)
        .expect("Failed to issue test license")
}

/// Move a license's expiry into the past.
pub fn expire_license(app: &TestApp, license_id: &str) {
    let conn = app.state.db.get().unwrap();
    let past = chrono::Utc::now().timestamp() - 86_400;
    conn.execute(
        "UPDATE licenses SET expires_at = ?1 WHERE id = ?2",
        rusqlite::params![past, license_id],
    )
    .unwrap();
}

/// Component values for a distinct test machine.
pub fn machine_components(seed: &str) -> HardwareComponentSet {
    let mut set = HardwareComponentSet::new();
    set.insert(HardwareComponent::Cpu, &format!("BFEBFBFF-{}", seed));
    set.insert(HardwareComponent::Bios, &format!("PF2{}", seed));
    set.insert(HardwareComponent::Disk, &format!("S4EWNX0N-{}", seed));
    set.insert(HardwareComponent::Mac, &format!("3c:52:82:{}", seed));
    set.insert(HardwareComponent::Motherboard, &format!("L1HF05P-{}", seed));
    set.insert(HardwareComponent::Tpm, &format!("INTC-2.0-{}", seed));
    set
}

pub fn machine(seed: &str) -> HardwareIdentity {
    HardwareIdentity::from_components(&machine_components(seed))
}

pub fn activate_body(license_key: &str, identity: &HardwareIdentity) -> Value {
    json!({
        "licenseKey": license_key,
        "hardwareId": identity.hashed_id,
        "hardwareIdShort": identity.short_id,
        "machineName": "test-rig",
        "componentsHash": identity.raw_components,
        "osVersion": "Linux 6.8",
        "appVersion": "1.2.3",
    })
}

pub fn validate_body(license_id: &str, license_key: &str, identity: &HardwareIdentity) -> Value {
    json!({
        "licenseId": license_id,
        "licenseKey": license_key,
        "hardwareId": identity.hashed_id,
        "appVersion": "1.2.3",
        "componentsHash": identity.raw_components,
    })
}

pub fn deactivate_body(license_id: &str, license_key: &str, identity: &HardwareIdentity) -> Value {
    json!({
        "licenseId": license_id,
        "licenseKey": license_key,
        "hardwareId": identity.hashed_id,
    })
}

/// Activate `identity` over HTTP and return the response body.
pub async fn activate(app: &TestApp, license_key: &str, identity: &HardwareIdentity) -> Value {
    let response = send(
        &app.router,
        json_request("POST", "/api/v1/activate", &activate_body(license_key, identity)),
    )
    .await;
    assert_eq!(response.status, StatusCode::OK, "{}", response.body);
    response.body
}

/// Parse the signed record out of an activate or validate response.
pub fn record_from(body: &Value) -> LicenseRecord {
    serde_json::from_value(body["license"].clone()).expect("response carries a license record")
}

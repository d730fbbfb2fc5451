//! Admin license management: issue, list, inspect, revoke, restore,
//! renew support, release activations

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{Request, StatusCode},
};
use chrono::{DateTime, Utc};
use serde_json::{Value, json};

use licensegate_sdk::KeyFormat;

use crate::common::*;

async fn create(app: &TestApp, body: &Value) -> TestResponse {
    send(
        &app.router,
        admin_request("POST", "/api/v1/admin/licenses", Some(body)),
    )
    .await
}

fn timestamp(value: &Value) -> DateTime<Utc> {
    value
        .as_str()
        .expect("timestamp string")
        .parse()
        .expect("RFC 3339 timestamp")
}

// ============================================================================
// Issue
// ============================================================================

#[tokio::test]
async fn test_create_license_issues_signed_record() {
    let app = test_app();
    let response = create(&app, &create_license_body(3)).await;
    assert_eq!(response.status, StatusCode::CREATED, "{}", response.body);
    assert_eq!(response.body["success"], true);

    let license = &response.body["license"];
    assert!(KeyFormat::validate(license["licenseKey"].as_str().unwrap()));
    assert_eq!(license["type"], "professional");
    assert_eq!(license["licenseeName"], "Ada Lovelace");
    assert_eq!(license["maxMachines"], 3);
    assert_eq!(license["offlineGraceDays"], DEFAULT_GRACE_DAYS);
    assert_eq!(license["status"], "valid");
    assert_eq!(license["activationCount"], 0);

    let record = record_from(&response.body);
    let public_key = codec::parse_public_key(&test_public_key()).unwrap();
    assert!(codec::verify(&record, &public_key));
    assert!(matches!(record.days_remaining(Utc::now()), Some(364..=365)));
}

#[tokio::test]
async fn test_create_normalizes_licensee_fields() {
    let app = test_app();
    let response = create(
        &app,
        &json!({
            "licenseeName": "  Zoe\u{0308} Muller  ",
            "licenseeEmail": " ZOE@Example.COM ",
            "company": "   ",
            "maxMachines": 1,
            "supportDurationDays": 30,
        }),
    )
    .await;
    assert_eq!(response.status, StatusCode::CREATED, "{}", response.body);

    let license = &response.body["license"];
    assert_eq!(license["licenseeName"], "Zo\u{00eb} Muller");
    assert_eq!(license["licenseeEmail"], "zoe@example.com");
    assert!(license.get("company").is_none() || license["company"].is_null());
    assert_eq!(license["type"], "professional");
}

#[tokio::test]
async fn test_create_lifetime_license() {
    let app = test_app();
    let mut body = create_license_body(1);
    body["licenseType"] = json!("lifetime");

    let response = create(&app, &body).await;
    assert_eq!(response.status, StatusCode::CREATED, "{}", response.body);
    let record = record_from(&response.body);
    assert!(record.is_lifetime());
    assert_eq!(record.days_remaining(Utc::now()), None);
}

#[tokio::test]
async fn test_create_monthly_subscription_defaults_to_thirty_days() {
    let app = test_app();
    let mut body = create_license_body(1);
    body["licenseType"] = json!("subscriptionMonthly");

    let response = create(&app, &body).await;
    let record = record_from(&response.body);
    assert!(matches!(record.days_remaining(Utc::now()), Some(29..=30)));
}

#[tokio::test]
async fn test_create_rejects_invalid_input() {
    let app = test_app();
    let cases = [
        ("maxMachines", json!(0)),
        ("maxMachines", json!(101)),
        ("supportDurationDays", json!(0)),
        ("licenseeEmail", json!("not-an-email")),
        ("licenseeName", json!("   ")),
        ("licenseType", json!("trial")),
        ("licenseType", json!("platinum")),
        ("offlineGraceDays", json!(366)),
    ];

    for (field, value) in cases {
        let mut body = create_license_body(1);
        body[field] = value.clone();
        let response = create(&app, &body).await;
        assert_eq!(
            response.status,
            StatusCode::BAD_REQUEST,
            "{} = {} should be rejected",
            field,
            value
        );
    }

    let mut lifetime_with_term = create_license_body(1);
    lifetime_with_term["licenseType"] = json!("lifetime");
    lifetime_with_term["durationDays"] = json!(30);
    assert_eq!(
        create(&app, &lifetime_with_term).await.status,
        StatusCode::BAD_REQUEST
    );
}

#[tokio::test]
async fn test_issued_keys_are_unique() {
    let app = test_app();
    let mut keys = std::collections::HashSet::new();
    for _ in 0..20 {
        let license = issue_license(&app, 1);
        assert!(keys.insert(license.record.license_key));
    }
}

// ============================================================================
// Read
// ============================================================================

#[tokio::test]
async fn test_get_license_includes_activations() {
    let app = test_app();
    let license = issue_license(&app, 2);
    let machine_a = machine("A");
    activate(&app, &license.record.license_key, &machine_a).await;

    let response = send(
        &app.router,
        admin_request(
            "GET",
            &format!("/api/v1/admin/licenses/{}", license.record.license_id),
            None,
        ),
    )
    .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["activationCount"], 1);
    assert_eq!(
        response.body["activations"][0]["hardwareId"],
        machine_a.hashed_id.as_str()
    );
}

#[tokio::test]
async fn test_get_unknown_license_is_not_found() {
    let app = test_app();
    let response = send(
        &app.router,
        admin_request("GET", "/api/v1/admin/licenses/does-not-exist", None),
    )
    .await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_list_licenses_paginates() {
    let app = test_app();
    for _ in 0..3 {
        issue_license(&app, 1);
    }

    let page_one = send(
        &app.router,
        admin_request("GET", "/api/v1/admin/licenses?page=1&pageSize=2", None),
    )
    .await;
    assert_eq!(page_one.status, StatusCode::OK);
    assert_eq!(page_one.body["items"].as_array().unwrap().len(), 2);
    assert_eq!(page_one.body["total"], 3);
    assert_eq!(page_one.body["totalPages"], 2);

    let page_two = send(
        &app.router,
        admin_request("GET", "/api/v1/admin/licenses?page=2&pageSize=2", None),
    )
    .await;
    assert_eq!(page_two.body["items"].as_array().unwrap().len(), 1);
    assert_eq!(page_two.body["page"], 2);
}

#[tokio::test]
async fn test_list_licenses_filters_by_status() {
    let app = test_app();
    let revoked = issue_license(&app, 1);
    let expired = issue_license(&app, 1);
    issue_license(&app, 1);
    app.state
        .licenses
        .revoke(&revoked.record.license_id, None)
        .unwrap();
    expire_license(&app, &expired.record.license_id);

    for (status, expected_id) in [
        ("revoked", &revoked.record.license_id),
        ("expired", &expired.record.license_id),
    ] {
        let response = send(
            &app.router,
            admin_request(
                "GET",
                &format!("/api/v1/admin/licenses?status={}", status),
                None,
            ),
        )
        .await;
        assert_eq!(response.body["total"], 1, "status {}", status);
        assert_eq!(response.body["items"][0]["licenseId"], expected_id.as_str());
        assert_eq!(response.body["items"][0]["status"], status);
    }

    let active = send(
        &app.router,
        admin_request("GET", "/api/v1/admin/licenses?status=active", None),
    )
    .await;
    assert_eq!(active.body["total"], 1);
}

#[tokio::test]
async fn test_list_rejects_unknown_status_filter() {
    let app = test_app();
    let response = send(
        &app.router,
        admin_request("GET", "/api/v1/admin/licenses?status=bogus", None),
    )
    .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
}

// ============================================================================
// Revoke / restore
// ============================================================================

#[tokio::test]
async fn test_revoke_and_restore() {
    let app = test_app();
    let license = issue_license(&app, 1);
    let base = format!("/api/v1/admin/licenses/{}", license.record.license_id);

    let revoked = send(
        &app.router,
        admin_request(
            "POST",
            &format!("{}/revoke", base),
            Some(&json!({ "reason": "refund issued" })),
        ),
    )
    .await;
    assert_eq!(revoked.status, StatusCode::OK, "{}", revoked.body);
    assert_eq!(revoked.body["status"], "revoked");
    assert_eq!(revoked.body["revokeReason"], "refund issued");
    assert!(revoked.body["revokedAt"].is_string());

    let again = send(
        &app.router,
        admin_request("POST", &format!("{}/revoke", base), None),
    )
    .await;
    assert_eq!(again.status, StatusCode::CONFLICT);

    let restored = send(
        &app.router,
        admin_request("POST", &format!("{}/restore", base), None),
    )
    .await;
    assert_eq!(restored.status, StatusCode::OK);
    assert_eq!(restored.body["status"], "valid");
    assert!(restored.body.get("revokeReason").is_none());

    let again = send(
        &app.router,
        admin_request("POST", &format!("{}/restore", base), None),
    )
    .await;
    assert_eq!(again.status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_revoke_without_body() {
    let app = test_app();
    let license = issue_license(&app, 1);
    let response = send(
        &app.router,
        admin_request(
            "POST",
            &format!("/api/v1/admin/licenses/{}/revoke", license.record.license_id),
            None,
        ),
    )
    .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["status"], "revoked");
}

#[tokio::test]
async fn test_revoke_with_malformed_body_is_rejected() {
    let app = test_app();
    let license = issue_license(&app, 1);
    let request = Request::builder()
        .method("POST")
        .uri(format!("/api/v1/admin/licenses/{}/revoke", license.record.license_id))
        .header("x-admin-key", TEST_ADMIN_KEY)
        .extension(ConnectInfo(client_addr()))
        .body(Body::from("reason=refund"))
        .unwrap();

    let response = send(&app.router, request).await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert!(
        response.body["details"]
            .as_str()
            .is_some_and(|d| d.starts_with("Invalid JSON body")),
        "{}",
        response.body
    );

    let fetched = app.state.licenses.get(&license.record.license_id).unwrap();
    assert_eq!(fetched.status, LicenseStatus::Valid);
}

#[tokio::test]
async fn test_revoke_unknown_license_is_not_found() {
    let app = test_app();
    let response = send(
        &app.router,
        admin_request("POST", "/api/v1/admin/licenses/missing/revoke", None),
    )
    .await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
}

// ============================================================================
// Support renewal
// ============================================================================

#[tokio::test]
async fn test_renew_support_extends_from_current_expiry() {
    let app = test_app();
    let license = issue_license(&app, 1);
    let before = license.record.support_expiry_utc;

    let response = send(
        &app.router,
        admin_request(
            "POST",
            &format!(
                "/api/v1/admin/licenses/{}/renew-support",
                license.record.license_id
            ),
            Some(&json!({ "durationDays": 30 })),
        ),
    )
    .await;
    assert_eq!(response.status, StatusCode::OK, "{}", response.body);

    let after = timestamp(&response.body["supportExpiryUtc"]);
    assert_eq!((after - before).num_days(), 30);

    let record = record_from(&json!({ "license": response.body }));
    let public_key = codec::parse_public_key(&test_public_key()).unwrap();
    assert!(codec::verify(&record, &public_key), "support expiry is not signed");
}

#[tokio::test]
async fn test_renew_support_rejects_out_of_range() {
    let app = test_app();
    let license = issue_license(&app, 1);
    let uri = format!(
        "/api/v1/admin/licenses/{}/renew-support",
        license.record.license_id
    );
    for days in [0, 3651] {
        let response = send(
            &app.router,
            admin_request("POST", &uri, Some(&json!({ "durationDays": days }))),
        )
        .await;
        assert_eq!(response.status, StatusCode::BAD_REQUEST, "days {}", days);
    }
}

// ============================================================================
// Activation release
// ============================================================================

#[tokio::test]
async fn test_release_activation_frees_slot() {
    let app = test_app();
    let license = issue_license(&app, 1);
    let key = &license.record.license_key;
    let machine_a = machine("A");
    activate(&app, key, &machine_a).await;

    let uri = format!(
        "/api/v1/admin/licenses/{}/activations/{}",
        license.record.license_id, machine_a.hashed_id
    );
    let response = send(&app.router, admin_request("DELETE", &uri, None)).await;
    assert_eq!(response.status, StatusCode::OK, "{}", response.body);
    assert_eq!(response.body["activationCount"], 0);

    let record = record_from(&json!({ "license": response.body }));
    let public_key = codec::parse_public_key(&test_public_key()).unwrap();
    assert!(codec::verify(&record, &public_key), "release re-signs the record");

    let again = send(&app.router, admin_request("DELETE", &uri, None)).await;
    assert_eq!(again.status, StatusCode::NOT_FOUND);

    assert_eq!(activate(&app, key, &machine("B")).await["success"], true);
}

//! Tests for POST /api/v1/validate

use axum::http::StatusCode;

use crate::common::*;

async fn validate(app: &TestApp, license: &AdminLicense, identity: &HardwareIdentity) -> TestResponse {
    send(
        &app.router,
        json_request(
            "POST",
            "/api/v1/validate",
            &validate_body(
                &license.record.license_id,
                &license.record.license_key,
                identity,
            ),
        ),
    )
    .await
}

/// Machine "A" with some components swapped out.
fn drifted(replace: &[HardwareComponent]) -> HardwareIdentity {
    let mut set = machine_components("A");
    for component in replace {
        set.insert(*component, &format!("REPLACED-{}", component.as_ref()));
    }
    HardwareIdentity::from_components(&set)
}

#[tokio::test]
async fn test_activated_machine_validates_with_current_record() {
    let app = test_app();
    let license = issue_license(&app, 1);
    let machine_a = machine("A");
    activate(&app, &license.record.license_key, &machine_a).await;

    let response = validate(&app, &license, &machine_a).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["valid"], true);
    assert_eq!(response.body["status"], "valid");

    let record = record_from(&response.body);
    let public_key = codec::parse_public_key(&test_public_key()).unwrap();
    assert!(codec::verify(&record, &public_key));
    assert_eq!(record.activations.len(), 1);
}

#[tokio::test]
async fn test_minor_hardware_drift_still_validates() {
    let app = test_app();
    let license = issue_license(&app, 1);
    activate(&app, &license.record.license_key, &machine("A")).await;

    // 70% similarity, above the 60% threshold
    let response = validate(
        &app,
        &license,
        &drifted(&[HardwareComponent::Disk, HardwareComponent::Mac]),
    )
    .await;
    assert_eq!(response.body["valid"], true, "{}", response.body);
}

#[tokio::test]
async fn test_major_hardware_drift_is_a_mismatch() {
    let app = test_app();
    let license = issue_license(&app, 1);
    activate(&app, &license.record.license_key, &machine("A")).await;

    // Only the TPM survives: 10% similarity
    let response = validate(
        &app,
        &license,
        &drifted(&[
            HardwareComponent::Cpu,
            HardwareComponent::Bios,
            HardwareComponent::Disk,
            HardwareComponent::Mac,
            HardwareComponent::Motherboard,
        ]),
    )
    .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["valid"], false);
    assert_eq!(response.body["status"], "hardwareMismatch");
}

#[tokio::test]
async fn test_never_activated_machine_is_a_mismatch() {
    let app = test_app();
    let license = issue_license(&app, 2);
    activate(&app, &license.record.license_key, &machine("A")).await;

    let response = validate(&app, &license, &machine("B")).await;
    assert_eq!(response.body["valid"], false);
    assert_eq!(response.body["status"], "hardwareMismatch");
}

#[tokio::test]
async fn test_revoked_license_fails_validation() {
    let app = test_app();
    let license = issue_license(&app, 1);
    let machine_a = machine("A");
    activate(&app, &license.record.license_key, &machine_a).await;

    app.state
        .licenses
        .revoke(&license.record.license_id, None)
        .unwrap();
    let response = validate(&app, &license, &machine_a).await;
    assert_eq!(response.body["valid"], false);
    assert_eq!(response.body["status"], "revoked");

    app.state
        .licenses
        .restore(&license.record.license_id)
        .unwrap();
    let response = validate(&app, &license, &machine_a).await;
    assert_eq!(response.body["valid"], true);
}

#[tokio::test]
async fn test_expired_license_fails_validation() {
    let app = test_app();
    let license = issue_license(&app, 1);
    let machine_a = machine("A");
    activate(&app, &license.record.license_key, &machine_a).await;
    expire_license(&app, &license.record.license_id);

    let response = validate(&app, &license, &machine_a).await;
    assert_eq!(response.body["valid"], false);
    assert_eq!(response.body["status"], "expired");
}

#[tokio::test]
async fn test_revocation_wins_over_expiry() {
    let app = test_app();
    let license = issue_license(&app, 1);
    let machine_a = machine("A");
    activate(&app, &license.record.license_key, &machine_a).await;
    expire_license(&app, &license.record.license_id);
    app.state
        .licenses
        .revoke(&license.record.license_id, None)
        .unwrap();

    let response = validate(&app, &license, &machine_a).await;
    assert_eq!(response.body["status"], "revoked");
}

#[tokio::test]
async fn test_key_must_belong_to_license_id() {
    let app = test_app();
    let license = issue_license(&app, 1);
    let other = issue_license(&app, 1);
    let machine_a = machine("A");
    activate(&app, &license.record.license_key, &machine_a).await;

    let response = send(
        &app.router,
        json_request(
            "POST",
            "/api/v1/validate",
            &validate_body(
                &license.record.license_id,
                &other.record.license_key,
                &machine_a,
            ),
        ),
    )
    .await;
    assert_eq!(response.body["valid"], false);
    assert_eq!(response.body["status"], "notFound");
}

#[tokio::test]
async fn test_validation_refreshes_last_seen() {
    let app = test_app();
    let license = issue_license(&app, 1);
    let machine_a = machine("A");
    activate(&app, &license.record.license_key, &machine_a).await;

    {
        let conn = app.state.db.get().unwrap();
        conn.execute(
            "UPDATE activations SET last_seen_at = 0, app_version = '0.9.0'",
            [],
        )
        .unwrap();
    }

    validate(&app, &license, &machine_a).await;

    let conn = app.state.db.get().unwrap();
    let activations = queries::list_activations(&conn, &license.record.license_id).unwrap();
    assert!(activations[0].last_seen_at > 0);
    assert_eq!(activations[0].app_version, "1.2.3");
}

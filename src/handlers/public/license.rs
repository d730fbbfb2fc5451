use axum::{extract::State, http::HeaderMap};

use licensegate_sdk::{
    ActivateRequest, ActivateResponse, DeactivateRequest, DeactivateResponse, KeyFormat,
    LicenseStatus, ValidateRequest, ValidateResponse,
};

use crate::db::AppState;
use crate::error::Result;
use crate::extractors::Json;
use crate::util::extract_request_info;

/// POST /api/v1/activate
///
/// Entitlement refusals are `200 {success: false, status}`; only malformed
/// input is an HTTP error.
pub async fn activate(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ActivateRequest>,
) -> Result<Json<ActivateResponse>> {
    let (forwarded_for, user_agent) = extract_request_info(&headers);
    tracing::debug!(
        key = %KeyFormat::mask(&body.license_key),
        forwarded_for = ?forwarded_for,
        user_agent = ?user_agent,
        os_version = %body.os_version,
        "Activation requested"
    );

    let response = match state.licenses.activate(&body)? {
        Ok(license) => ActivateResponse {
            success: true,
            message: Some("License activated".into()),
            license: Some(license),
            status: Some(LicenseStatus::Valid),
        },
        Err(refusal) => ActivateResponse {
            success: false,
            message: Some(refusal.message),
            license: None,
            status: Some(refusal.status),
        },
    };
    Ok(Json(response))
}

/// POST /api/v1/deactivate
pub async fn deactivate(
    State(state): State<AppState>,
    Json(body): Json<DeactivateRequest>,
) -> Result<Json<DeactivateResponse>> {
    let response = match state.licenses.deactivate(&body)? {
        Ok(()) => DeactivateResponse {
            success: true,
            message: "Machine deactivated".into(),
        },
        Err(refusal) => DeactivateResponse {
            success: false,
            message: refusal.message,
        },
    };
    Ok(Json(response))
}

/// POST /api/v1/validate
///
/// A valid response carries the current signed record so renewals and
/// activation changes reach the client.
pub async fn validate(
    State(state): State<AppState>,
    Json(body): Json<ValidateRequest>,
) -> Result<Json<ValidateResponse>> {
    let response = match state.licenses.validate(&body)? {
        Ok(license) => ValidateResponse {
            valid: true,
            status: LicenseStatus::Valid,
            message: Some("License is valid".into()),
            license: Some(license),
        },
        Err(refusal) => ValidateResponse {
            valid: false,
            status: refusal.status,
            message: Some(refusal.message),
            license: None,
        },
    };
    Ok(Json(response))
}

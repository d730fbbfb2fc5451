use axum::{extract::State, http::StatusCode};
use serde::Deserialize;

use crate::db::AppState;
use crate::error::Result;
use crate::extractors::{Json, OptionalJson, Path, Query};
use crate::models::{AdminLicense, CreateLicense, CreateLicenseResponse, RenewSupport, RevokeLicense};
use crate::pagination::{Paginated, PaginationQuery};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivationPath {
    pub id: String,
    pub hardware_id: String,
}

/// POST /api/v1/admin/licenses
pub async fn create_license(
    State(state): State<AppState>,
    Json(body): Json<CreateLicense>,
) -> Result<(StatusCode, Json<CreateLicenseResponse>)> {
    let license = state.licenses.issue(&body)?;
    Ok((
        StatusCode::CREATED,
        Json(CreateLicenseResponse {
            success: true,
            license,
        }),
    ))
}

/// GET /api/v1/admin/licenses?page&pageSize&status
pub async fn list_licenses(
    State(state): State<AppState>,
    Query(query): Query<PaginationQuery>,
) -> Result<Json<Paginated<AdminLicense>>> {
    Ok(Json(state.licenses.list(&query)?))
}

/// GET /api/v1/admin/licenses/{id}
pub async fn get_license(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AdminLicense>> {
    Ok(Json(state.licenses.get(&id)?))
}

/// POST /api/v1/admin/licenses/{id}/revoke with an optional `{reason}` body
pub async fn revoke_license(
    State(state): State<AppState>,
    Path(id): Path<String>,
    OptionalJson(body): OptionalJson<RevokeLicense>,
) -> Result<Json<AdminLicense>> {
    let reason = body.and_then(|b| b.reason);
    Ok(Json(state.licenses.revoke(&id, reason.as_deref())?))
}

/// POST /api/v1/admin/licenses/{id}/restore
pub async fn restore_license(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AdminLicense>> {
    Ok(Json(state.licenses.restore(&id)?))
}

/// POST /api/v1/admin/licenses/{id}/renew-support
pub async fn renew_support(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<RenewSupport>,
) -> Result<Json<AdminLicense>> {
    Ok(Json(state.licenses.renew_support(&id, body.duration_days)?))
}

/// DELETE /api/v1/admin/licenses/{id}/activations/{hardwareId}
pub async fn release_activation(
    State(state): State<AppState>,
    Path(path): Path<ActivationPath>,
) -> Result<Json<AdminLicense>> {
    Ok(Json(
        state
            .licenses
            .release_activation(&path.id, &path.hardware_id)?,
    ))
}

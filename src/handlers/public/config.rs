use axum::extract::State;
use serde_json::{Value, json};

use licensegate_sdk::{MIN_VALID_SCORE, SCHEMA_VERSION, SIMILARITY_THRESHOLD, TRIAL_DURATION_DAYS};

use crate::db::AppState;
use crate::error::{AppError, Result};
use crate::extractors::{Json, Path};

/// GET /api/v1/config/{name}
///
/// Static client configuration. Known blobs: `features`, `update-channel`.
pub async fn get_config(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Value>> {
    let blob = match name.as_str() {
        "features" => json!({
            "trialEnabled": true,
            "trialDays": TRIAL_DURATION_DAYS,
            "offlineGraceDays": state.licenses.default_offline_grace_days(),
            "similarityThreshold": SIMILARITY_THRESHOLD,
            "minHardwareScore": MIN_VALID_SCORE,
        }),
        "update-channel" => json!({
            "channel": "stable",
            "serverVersion": env!("CARGO_PKG_VERSION"),
            "schemaVersion": SCHEMA_VERSION,
        }),
        _ => return Err(AppError::NotFound(format!("Unknown config '{}'", name))),
    };
    Ok(Json(blob))
}

use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;

use crate::db::AppState;
use crate::util::resident_memory_mb;

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
pub struct ProbeResult {
    healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

impl ProbeResult {
    fn ok(detail: Option<String>) -> Self {
        Self {
            healthy: true,
            detail,
        }
    }

    fn failed(detail: String) -> Self {
        Self {
            healthy: false,
            detail: Some(detail),
        }
    }
}

#[derive(Serialize)]
pub struct ReadyResponse {
    status: &'static str,
    database: ProbeResult,
    memory: ProbeResult,
}

/// GET /health/ready: 503 when any probe fails.
pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    let database = probe_database(&state);
    let memory = probe_memory(state.ready_max_rss_mb);

    let healthy = database.healthy && memory.healthy;
    if !healthy {
        tracing::warn!(
            database = database.healthy,
            memory = memory.healthy,
            "Readiness probe failed"
        );
    }
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(ReadyResponse {
            status: if healthy { "ready" } else { "unavailable" },
            database,
            memory,
        }),
    )
}

fn probe_database(state: &AppState) -> ProbeResult {
    let conn = match state.db.get() {
        Ok(conn) => conn,
        Err(e) => return ProbeResult::failed(format!("pool: {}", e)),
    };
    match conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0)) {
        Ok(_) => ProbeResult::ok(None),
        Err(e) => ProbeResult::failed(format!("query: {}", e)),
    }
}

fn probe_memory(max_rss_mb: u64) -> ProbeResult {
    memory_result(resident_memory_mb(), max_rss_mb)
}

/// A platform that reports no process memory counts as healthy.
fn memory_result(rss_mb: Option<u64>, max_rss_mb: u64) -> ProbeResult {
    match rss_mb {
        Some(rss) if rss > max_rss_mb => {
            ProbeResult::failed(format!("resident {} MiB exceeds {} MiB", rss, max_rss_mb))
        }
        Some(rss) => ProbeResult::ok(Some(format!("resident {} MiB", rss))),
        None => ProbeResult::ok(Some("resident size unavailable".into())),
    }
}

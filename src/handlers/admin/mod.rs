mod licenses;

pub use licenses::*;

use axum::{
    Router, middleware,
    routing::{delete, get, post},
};

use crate::db::AppState;
use crate::middleware::admin_auth;

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/api/v1/admin/licenses", post(create_license))
        .route("/api/v1/admin/licenses", get(list_licenses))
        .route("/api/v1/admin/licenses/{id}", get(get_license))
        .route("/api/v1/admin/licenses/{id}/revoke", post(revoke_license))
        .route("/api/v1/admin/licenses/{id}/restore", post(restore_license))
        .route(
            "/api/v1/admin/licenses/{id}/renew-support",
            post(renew_support),
        )
        .route(
            "/api/v1/admin/licenses/{id}/activations/{hardwareId}",
            delete(release_activation),
        )
        .layer(middleware::from_fn_with_state(state, admin_auth))
}

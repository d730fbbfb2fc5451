mod config;
mod health;
mod license;

pub use config::*;
pub use health::*;
pub use license::*;

use axum::{
    Router, middleware,
    routing::{MethodRouter, get, post},
};

use crate::db::AppState;
use crate::rate_limit::{RateLimit, RateLimiters, enforce};

fn limited(route: MethodRouter<AppState>, limit: &RateLimit) -> MethodRouter<AppState> {
    route.layer(middleware::from_fn_with_state(limit.clone(), enforce))
}

pub fn router(limits: &RateLimiters) -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(ready))
        .route(
            "/api/v1/activate",
            limited(post(activate), &limits.activate),
        )
        .route(
            "/api/v1/deactivate",
            limited(post(deactivate), &limits.deactivate),
        )
        .route(
            "/api/v1/validate",
            limited(post(validate), &limits.validate),
        )
        .route(
            "/api/v1/config/{name}",
            limited(get(get_config), &limits.config),
        )
}

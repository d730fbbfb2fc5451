//! Rate limiting for public endpoints.
//!
//! Each limited route gets its own keyed GCRA limiter, keyed by peer IP, so
//! the effective key is `(client ip, route)`. Quotas come in three classes:
//! - Strict: /api/v1/activate - creates machine bindings
//! - Standard: /api/v1/validate, /api/v1/deactivate
//! - Relaxed: /api/v1/config/{name}
//!
//! Configure via environment variables:
//! - RATE_LIMIT_STRICT_RPM (default: 10)
//! - RATE_LIMIT_STANDARD_RPM (default: 30)
//! - RATE_LIMIT_RELAXED_RPM (default: 60)
//!
//! Every response on a limited route carries `x-ratelimit-limit`,
//! `x-ratelimit-remaining` and `x-ratelimit-reset` (seconds). Rejections are
//! 429 problem+json with `retry-after`.

use std::net::IpAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderName, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{
    Quota, RateLimiter,
    clock::{Clock, DefaultClock},
    middleware::StateInformationMiddleware,
    state::keyed::DefaultKeyedStateStore,
};
use tower_governor::key_extractor::{KeyExtractor, PeerIpKeyExtractor};

use crate::config::RateLimitConfig;
use crate::error::AppError;

pub const LIMIT_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const REMAINING_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const RESET_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-reset");

type KeyedLimiter = RateLimiter<
    IpAddr,
    DefaultKeyedStateStore<IpAddr>,
    DefaultClock,
    StateInformationMiddleware,
>;

/// One route's limiter. Cloning shares the underlying state.
#[derive(Clone)]
pub struct RateLimit {
    limiter: Arc<KeyedLimiter>,
    requests_per_minute: u32,
}

impl RateLimit {
    /// Burst of `requests_per_minute`, replenished evenly over a minute.
    pub fn per_minute(requests_per_minute: u32) -> Self {
        let rpm = NonZeroU32::new(requests_per_minute).unwrap_or(NonZeroU32::MIN);
        let limiter = RateLimiter::dashmap(Quota::per_minute(rpm))
            .with_middleware::<StateInformationMiddleware>();
        Self {
            limiter: Arc::new(limiter),
            requests_per_minute: rpm.get(),
        }
    }

    /// Seconds to earn back one request.
    fn replenish_secs(&self) -> u64 {
        (60 / u64::from(self.requests_per_minute)).max(1)
    }

    fn decorate(&self, headers: &mut HeaderMap, remaining: u32, reset_secs: u64) {
        headers.insert(LIMIT_HEADER, HeaderValue::from(self.requests_per_minute));
        headers.insert(REMAINING_HEADER, HeaderValue::from(remaining));
        headers.insert(RESET_HEADER, HeaderValue::from(reset_secs));
    }

    /// Drop per-IP state that has fully replenished.
    fn retain_recent(&self) {
        self.limiter.retain_recent();
        self.limiter.shrink_to_fit();
    }
}

/// Limiters for every rate-limited public route.
#[derive(Clone)]
pub struct RateLimiters {
    pub activate: RateLimit,
    pub deactivate: RateLimit,
    pub validate: RateLimit,
    pub config: RateLimit,
}

impl RateLimiters {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            activate: RateLimit::per_minute(config.strict_rpm),
            deactivate: RateLimit::per_minute(config.standard_rpm),
            validate: RateLimit::per_minute(config.standard_rpm),
            config: RateLimit::per_minute(config.relaxed_rpm),
        }
    }

    fn all(&self) -> [&RateLimit; 4] {
        [&self.activate, &self.deactivate, &self.validate, &self.config]
    }

    /// Periodically forget idle clients so the keyed state stays bounded.
    pub fn spawn_cleanup(&self, interval: Duration) {
        let limiters = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                for limit in limiters.all() {
                    limit.retain_recent();
                }
                tracing::debug!("Rate limiter state pruned");
            }
        });
    }
}

/// Middleware enforcing a [`RateLimit`]; install with
/// `axum::middleware::from_fn_with_state(limit, enforce)`.
pub async fn enforce(State(limit): State<RateLimit>, request: Request, next: Next) -> Response {
    let ip = match PeerIpKeyExtractor.extract(&request) {
        Ok(ip) => ip,
        Err(e) => {
            tracing::error!("Rate limiter could not determine client IP: {}", e);
            return AppError::Internal("Client address unavailable".into()).into_response();
        }
    };

    match limit.limiter.check_key(&ip) {
        Ok(snapshot) => {
            let remaining = snapshot.remaining_burst_capacity();
            let used = u64::from(limit.requests_per_minute.saturating_sub(remaining));
            let mut response = next.run(request).await;
            limit.decorate(
                response.headers_mut(),
                remaining,
                used * limit.replenish_secs(),
            );
            response
        }
        Err(not_until) => {
            let wait = not_until.wait_time_from(DefaultClock::default().now());
            let retry_after = ceil_secs(wait);
            tracing::warn!(
                client_ip = %ip,
                path = %request.uri().path(),
                retry_after,
                "Rate limit exceeded"
            );
            let mut response = AppError::TooManyRequests { retry_after }.into_response();
            limit.decorate(response.headers_mut(), 0, retry_after);
            response
        }
    }
}

fn ceil_secs(wait: Duration) -> u64 {
    (wait.as_secs() + u64::from(wait.subsec_nanos() > 0)).max(1)
}

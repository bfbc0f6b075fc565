use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use std::collections::HashMap;

use crate::health::HealthChecker;
use crate::metrics::{GlobalMetrics, ThrottleMetrics};
use crate::middleware::KnownTokens;
use crate::rate_limiter::RateLimiter;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub public_limiter: RateLimiter,
    pub private_limiter: RateLimiter,
    pub tokens: KnownTokens,
}

#[derive(Debug, Serialize)]
pub struct LimiterMetrics {
    pub capacity: i64,
    pub window_sequence: u64,
    pub global: GlobalMetrics,
    /// Per-client counts for the current window. Omitted for limiters whose
    /// identities are credentials.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clients: Option<HashMap<String, ThrottleMetrics>>,
}

#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    pub public: LimiterMetrics,
    pub private: LimiterMetrics,
}

pub async fn access_granted() -> &'static str {
    "Access granted!"
}

pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let checker = HealthChecker::new(vec![
        ("public".to_string(), state.public_limiter),
        ("private".to_string(), state.private_limiter),
    ]);
    let health = checker.check_health().await;

    let status = if health.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, Json(health))
}

pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    Json(MetricsResponse {
        public: limiter_metrics(&state.public_limiter, true),
        private: limiter_metrics(&state.private_limiter, false),
    })
}

/// Private identities are bearer tokens and must never be echoed back.
fn limiter_metrics(limiter: &RateLimiter, include_clients: bool) -> LimiterMetrics {
    LimiterMetrics {
        capacity: limiter.capacity(),
        window_sequence: limiter.scheduler().current_window().sequence,
        global: limiter.metrics().get_global_metrics(),
        clients: include_clients.then(|| limiter.metrics().get_all_metrics()),
    }
}

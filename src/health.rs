use crate::rate_limiter::RateLimiter;
use crate::response::{HealthResponse, StoreStatus};
use std::time::Instant;

/// Probes the counter store behind each named limiter.
pub struct HealthChecker {
    limiters: Vec<(String, RateLimiter)>,
}

impl HealthChecker {
    pub fn new(limiters: Vec<(String, RateLimiter)>) -> Self {
        Self { limiters }
    }

    pub async fn check_health(&self) -> HealthResponse {
        let mut stores = Vec::with_capacity(self.limiters.len());
        for (name, limiter) in &self.limiters {
            stores.push(Self::check_store(name, limiter).await);
        }
        HealthResponse::new(stores)
    }

    async fn check_store(name: &str, limiter: &RateLimiter) -> StoreStatus {
        let start = Instant::now();
        let result = limiter.counter_store().ping().await;
        let response_time_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(()) => StoreStatus {
                name: name.to_string(),
                status: "healthy".to_string(),
                response_time_ms,
                error: None,
            },
            Err(err) => {
                tracing::warn!(store = name, error = %err, "Counter store health check failed");
                StoreStatus {
                    name: name.to_string(),
                    status: "unavailable".to_string(),
                    response_time_ms,
                    error: Some(err.to_string()),
                }
            }
        }
    }
}

//! The admission controller.
//!
//! Accounting is charge-then-check: a request's cost is added to the client's
//! window total before the total is compared with the capacity, so rejected
//! requests still consume quota. A single request costing more than the whole
//! capacity is therefore rejected and keeps blocking that client until the
//! window resets. This is the intended fixed-window policy, not a bug; a
//! check-then-charge variant would change the observable quota semantics.

use crate::error::{ThrottlerError, ThrottlerResult};
use crate::identity::ClientIdentity;
use crate::metrics::MetricsCollector;
use crate::rate_limit_config::{RateLimitConfig, RateLimitSettings, StoreFailurePolicy};
use crate::scheduler::WindowScheduler;
use crate::store::CounterStore;
use axum::http::request::Parts;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::time::Instant;
use tracing::{debug, error, warn};

/// Outcome of one admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub admitted: bool,
    pub identity: ClientIdentity,
    pub capacity: i64,
    pub total_after_charge: i64,
    /// `max(capacity - total_after_charge, 0)`.
    pub remaining: i64,
    pub reset_at: SystemTime,
    pub retry_after_secs: u64,
    /// Admitted without being charged because the store was unreachable and
    /// the limiter fails open.
    pub degraded: bool,
}

struct Inner {
    config: RateLimitConfig,
    scheduler: WindowScheduler,
    metrics: MetricsCollector,
}

/// Fixed-window admission controller.
///
/// Cloning is cheap; clones share the configuration and the window scheduler.
/// The scheduler stops when the last clone is dropped or on [`shutdown`].
///
/// [`shutdown`]: RateLimiter::shutdown
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<Inner>,
}

impl RateLimiter {
    /// Validate `config` and arm the first window. Must be called from within
    /// a tokio runtime.
    pub fn new(config: RateLimitConfig) -> ThrottlerResult<Self> {
        config.validate()?;

        let metrics = MetricsCollector::new();
        let scheduler = WindowScheduler::start(
            config.counter_store.clone(),
            config.settings.clear_interval,
            metrics.clone(),
        )?;

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                scheduler,
                metrics,
            }),
        })
    }

    pub fn settings(&self) -> &RateLimitSettings {
        &self.inner.config.settings
    }

    pub fn capacity(&self) -> i64 {
        self.inner.config.settings.capacity
    }

    pub fn scheduler(&self) -> &WindowScheduler {
        &self.inner.scheduler
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.inner.metrics
    }

    pub fn counter_store(&self) -> &Arc<dyn CounterStore> {
        &self.inner.config.counter_store
    }

    /// Bind this limiter to a per-route cost for use with
    /// [`enforce_rate_limit`](crate::middleware::enforce_rate_limit).
    pub fn limit(&self, cost: i64) -> CostedLimit {
        CostedLimit {
            limiter: self.clone(),
            cost,
        }
    }

    /// Resolve the client behind `request`, charge it `cost` and decide
    /// whether the request fits in the current window.
    ///
    /// Errors mean the request must be rejected. Nothing is charged when the
    /// cost is invalid or the identity cannot be resolved.
    pub async fn evaluate(&self, request: &Parts, cost: i64) -> ThrottlerResult<Decision> {
        if cost <= 0 {
            self.inner.metrics.record_error();
            return Err(ThrottlerError::InvalidCost(cost));
        }

        let identity = match self.inner.config.identity_resolver.resolve(request).await {
            Ok(identity) => identity,
            Err(err) => {
                self.inner.metrics.record_error();
                let err = match err {
                    err @ ThrottlerError::IdentityResolutionFailed(_) => err,
                    other => ThrottlerError::IdentityResolutionFailed(other.to_string()),
                };
                warn!(error = %err, "Rejecting request with unresolved client identity");
                return Err(err);
            }
        };

        let total = match self.counter_store().charge(identity.as_str(), cost).await {
            Ok(total) => total,
            Err(err) => {
                self.inner.metrics.record_error();
                let err = match err {
                    err @ ThrottlerError::StoreUnavailable(_) => err,
                    other => ThrottlerError::StoreUnavailable(other.to_string()),
                };
                return match self.settings().on_store_failure {
                    StoreFailurePolicy::FailClosed => {
                        error!(identity = %identity, error = %err, "Counter store unavailable; rejecting request");
                        Err(err)
                    }
                    StoreFailurePolicy::FailOpen => {
                        warn!(identity = %identity, error = %err, "Counter store unavailable; admitting uncharged request");
                        Ok(self.decide(identity, 0, true))
                    }
                };
            }
        };

        let decision = self.decide(identity, total, false);
        self.inner
            .metrics
            .record_request(decision.identity.as_str(), decision.admitted);

        debug!(
            identity = %decision.identity,
            cost,
            total = decision.total_after_charge,
            remaining = decision.remaining,
            admitted = decision.admitted,
            "Admission decision"
        );

        Ok(decision)
    }

    fn decide(&self, identity: ClientIdentity, total: i64, degraded: bool) -> Decision {
        let capacity = self.capacity();
        let admitted = degraded || total <= capacity;
        // A reset that is still clearing the store leaves `ends_at` in the
        // past; the counters only drop once it completes.
        let now = Instant::now();
        let reset_deadline = self.inner.scheduler.next_reset_deadline().max(now);
        let wait_secs = (reset_deadline.duration_since(now).as_millis() as u64).div_ceil(1000);

        Decision {
            admitted,
            identity,
            capacity,
            total_after_charge: total,
            remaining: capacity.saturating_sub(total).max(0),
            reset_at: self.inner.scheduler.wall_time(reset_deadline),
            retry_after_secs: if admitted { wait_secs } else { wait_secs.max(1) },
            degraded,
        }
    }

    /// Stop the window scheduler. Later evaluations keep working but the
    /// counters are no longer reset.
    pub async fn shutdown(&self) {
        self.inner.scheduler.shutdown().await;
    }
}

/// A limiter paired with the cost a particular route charges.
#[derive(Clone)]
pub struct CostedLimit {
    limiter: RateLimiter,
    cost: i64,
}

impl CostedLimit {
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn cost(&self) -> i64 {
        self.cost
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{HeaderResolver, IdentityResolver};
    use crate::store::InMemoryCounterStore;
    use async_trait::async_trait;
    use axum::http::Request;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const WINDOW: Duration = Duration::from_millis(60_000);

    fn request_as(token: &str) -> Parts {
        Request::builder()
            .uri("/private/1")
            .header("authorization", token)
            .body(())
            .unwrap()
            .into_parts()
            .0
    }

    fn limiter_with(capacity: i64, store: Arc<dyn CounterStore>) -> RateLimiter {
        let config = RateLimitConfig::new(
            RateLimitSettings::new(capacity, WINDOW),
            Arc::new(HeaderResolver::authorization()),
            store,
        );
        RateLimiter::new(config).unwrap()
    }

    #[derive(Default)]
    struct CountingStore {
        inner: InMemoryCounterStore,
        charges: AtomicUsize,
    }

    #[async_trait]
    impl CounterStore for CountingStore {
        async fn charge(&self, identity: &str, cost: i64) -> ThrottlerResult<i64> {
            self.charges.fetch_add(1, Ordering::SeqCst);
            self.inner.charge(identity, cost).await
        }

        async fn clear_all(&self) -> ThrottlerResult<()> {
            self.inner.clear_all().await
        }
    }

    struct DownStore;

    #[async_trait]
    impl CounterStore for DownStore {
        async fn charge(&self, _identity: &str, _cost: i64) -> ThrottlerResult<i64> {
            Err(ThrottlerError::StoreUnavailable("connection refused".into()))
        }

        async fn clear_all(&self) -> ThrottlerResult<()> {
            Err(ThrottlerError::StoreUnavailable("connection refused".into()))
        }
    }

    struct LookupFailure;

    #[async_trait]
    impl IdentityResolver for LookupFailure {
        async fn resolve(&self, _request: &Parts) -> ThrottlerResult<ClientIdentity> {
            Err(ThrottlerError::StoreUnavailable("user directory timed out".into()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_five_admits_five_requests() {
        let limiter = limiter_with(5, Arc::new(InMemoryCounterStore::new()));
        let request = request_as("alice");

        for expected_remaining in [4, 3, 2, 1, 0] {
            let decision = limiter.evaluate(&request, 1).await.unwrap();
            assert!(decision.admitted);
            assert_eq!(decision.remaining, expected_remaining);
            assert_eq!(decision.identity.as_str(), "alice");
        }

        let sixth = limiter.evaluate(&request, 1).await.unwrap();
        assert!(!sixth.admitted);
        assert_eq!(sixth.remaining, 0);
        assert_eq!(sixth.total_after_charge, 6);
        assert!(sixth.retry_after_secs > 0);
        assert!(sixth.retry_after_secs <= 60);
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_cost_is_charged_and_blocks_window() {
        let store = InMemoryCounterStore::new();
        let limiter = limiter_with(3, Arc::new(store.clone()));
        let request = request_as("bob");

        let decision = limiter.evaluate(&request, 5).await.unwrap();
        assert!(!decision.admitted);
        assert_eq!(decision.remaining, 0);
        assert_eq!(store.total("bob").unwrap(), 5);

        let follow_up = limiter.evaluate(&request, 1).await.unwrap();
        assert!(!follow_up.admitted);
        assert_eq!(follow_up.total_after_charge, 6);
        assert_eq!(follow_up.remaining, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_reset_restores_quota() {
        let store = InMemoryCounterStore::new();
        let limiter = limiter_with(2, Arc::new(store.clone()));
        let request = request_as("carol");

        for _ in 0..3 {
            limiter.evaluate(&request, 1).await.unwrap();
        }
        assert!(!limiter.evaluate(&request, 1).await.unwrap().admitted);

        let mut windows = limiter.scheduler().subscribe();
        windows.changed().await.unwrap();

        let decision = limiter.evaluate(&request, 1).await.unwrap();
        assert!(decision.admitted);
        assert_eq!(decision.total_after_charge, 1);
        assert_eq!(decision.remaining, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_evaluate_never_triggers_reset() {
        let limiter = limiter_with(1, Arc::new(InMemoryCounterStore::new()));
        let request = request_as("dave");

        for _ in 0..50 {
            limiter.evaluate(&request, 1).await.unwrap();
        }
        assert_eq!(limiter.scheduler().current_window().sequence, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_identity_failure_skips_charge() {
        let store = Arc::new(CountingStore::default());
        let config = RateLimitConfig::new(
            RateLimitSettings::new(5, WINDOW),
            Arc::new(LookupFailure),
            store.clone(),
        );
        let limiter = RateLimiter::new(config).unwrap();

        let result = limiter.evaluate(&request_as("erin"), 1).await;
        assert!(matches!(
            result,
            Err(ThrottlerError::IdentityResolutionFailed(_))
        ));
        assert_eq!(store.charges.load(Ordering::SeqCst), 0);
        assert_eq!(limiter.metrics().get_global_metrics().errors, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_cost_skips_charge() {
        let store = Arc::new(CountingStore::default());
        let limiter = limiter_with(5, store.clone());

        for cost in [0, -1] {
            let result = limiter.evaluate(&request_as("frank"), cost).await;
            assert!(matches!(result, Err(ThrottlerError::InvalidCost(c)) if c == cost));
        }
        assert_eq!(store.charges.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_failure_fails_closed_by_default() {
        let limiter = limiter_with(5, Arc::new(DownStore));
        let result = limiter.evaluate(&request_as("gina"), 1).await;
        assert!(matches!(result, Err(ThrottlerError::StoreUnavailable(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_failure_can_fail_open() {
        let config = RateLimitConfig::new(
            RateLimitSettings::new(5, WINDOW)
                .with_store_failure_policy(StoreFailurePolicy::FailOpen),
            Arc::new(HeaderResolver::authorization()),
            Arc::new(DownStore),
        );
        let limiter = RateLimiter::new(config).unwrap();

        let decision = limiter.evaluate(&request_as("gina"), 1).await.unwrap();
        assert!(decision.admitted);
        assert!(decision.degraded);
        assert_eq!(decision.remaining, 5);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_requests_admit_exactly_capacity() {
        let store = InMemoryCounterStore::new();
        let limiter = limiter_with(10, Arc::new(store.clone()));

        let mut handles = Vec::new();
        for _ in 0..50 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                limiter.evaluate(&request_as("shared"), 1).await.unwrap()
            }));
        }

        let mut admitted = 0;
        for handle in handles {
            let decision = handle.await.unwrap();
            assert!(decision.remaining >= 0);
            if decision.admitted {
                admitted += 1;
            }
        }

        assert_eq!(admitted, 10);
        assert_eq!(store.total("shared").unwrap(), 50);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_during_slow_reset_still_asks_client_to_wait() {
        struct SlowClear(InMemoryCounterStore);

        #[async_trait]
        impl CounterStore for SlowClear {
            async fn charge(&self, identity: &str, cost: i64) -> ThrottlerResult<i64> {
                self.0.charge(identity, cost).await
            }

            async fn clear_all(&self) -> ThrottlerResult<()> {
                tokio::time::sleep(Duration::from_secs(5)).await;
                self.0.clear_all().await
            }
        }

        let limiter = limiter_with(1, Arc::new(SlowClear(InMemoryCounterStore::new())));
        let request = request_as("hana");
        limiter.evaluate(&request, 1).await.unwrap();
        limiter.evaluate(&request, 1).await.unwrap();

        // Past the window end, with the clear still sleeping.
        tokio::time::advance(WINDOW + Duration::from_secs(1)).await;
        tokio::task::yield_now().await;
        assert_eq!(limiter.scheduler().current_window().sequence, 0);

        let decision = limiter.evaluate(&request, 1).await.unwrap();
        assert!(!decision.admitted);
        assert!(decision.retry_after_secs >= 1);
        assert!(decision.reset_at >= limiter.scheduler().next_reset_at());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_last_limiter_stops_resets() {
        let store = InMemoryCounterStore::new();
        let limiter = limiter_with(5, Arc::new(store.clone()));
        limiter.evaluate(&request_as("ivan"), 3).await.unwrap();

        let clone = limiter.clone();
        drop(limiter);
        drop(clone);

        tokio::time::advance(WINDOW * 3).await;
        tokio::task::yield_now().await;
        assert_eq!(store.total("ivan").unwrap(), 3);
    }

    #[tokio::test]
    async fn test_invalid_settings_rejected_at_construction() {
        let config = RateLimitConfig::new(
            RateLimitSettings::new(0, WINDOW),
            Arc::new(HeaderResolver::authorization()),
            Arc::new(InMemoryCounterStore::new()),
        );
        assert!(matches!(
            RateLimiter::new(config),
            Err(ThrottlerError::ValidationError(_))
        ));
    }
}

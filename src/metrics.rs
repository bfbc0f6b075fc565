use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Admission counts for one client in the current window.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrottleMetrics {
    pub total_requests: u64,
    pub admitted_requests: u64,
    pub rejected_requests: u64,
}

/// Lifetime counters for one limiter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalMetrics {
    pub total_requests: u64,
    pub admitted_requests: u64,
    pub rejected_requests: u64,
    pub errors: u64,
    pub resets: u64,
    pub failed_resets: u64,
}

#[derive(Debug, Default)]
struct Counters {
    total_requests: AtomicU64,
    admitted_requests: AtomicU64,
    rejected_requests: AtomicU64,
    errors: AtomicU64,
    resets: AtomicU64,
    failed_resets: AtomicU64,
}

#[derive(Debug, Default)]
struct ClientCounters {
    total_requests: AtomicU64,
    admitted_requests: AtomicU64,
    rejected_requests: AtomicU64,
}

impl ClientCounters {
    fn snapshot(&self) -> ThrottleMetrics {
        ThrottleMetrics {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            admitted_requests: self.admitted_requests.load(Ordering::Relaxed),
            rejected_requests: self.rejected_requests.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MetricsCollector {
    client_metrics: Arc<DashMap<String, ClientCounters>>,
    counters: Arc<Counters>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self, client_id: &str, admitted: bool) {
        self.counters.total_requests.fetch_add(1, Ordering::Relaxed);
        if admitted {
            self.counters.admitted_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters.rejected_requests.fetch_add(1, Ordering::Relaxed);
        }

        // Existing clients only take the shard's read lock.
        if let Some(client) = self.client_metrics.get(client_id) {
            Self::bump(&client, admitted);
            return;
        }
        let client = self
            .client_metrics
            .entry(client_id.to_string())
            .or_default();
        Self::bump(&client, admitted);
    }

    fn bump(client: &ClientCounters, admitted: bool) {
        client.total_requests.fetch_add(1, Ordering::Relaxed);
        if admitted {
            client.admitted_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            client.rejected_requests.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// A request that could not be evaluated at all.
    pub fn record_error(&self) {
        self.counters.total_requests.fetch_add(1, Ordering::Relaxed);
        self.counters.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Per-client counts only cover the window that just ended, so they are
    /// dropped along with the store's counters.
    pub fn record_reset(&self, succeeded: bool) {
        if succeeded {
            self.counters.resets.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters.failed_resets.fetch_add(1, Ordering::Relaxed);
        }
        self.client_metrics.clear();
    }

    pub fn get_client_metrics(&self, client_id: &str) -> Option<ThrottleMetrics> {
        self.client_metrics
            .get(client_id)
            .map(|client| client.snapshot())
    }

    pub fn get_all_metrics(&self) -> HashMap<String, ThrottleMetrics> {
        self.client_metrics
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().snapshot()))
            .collect()
    }

    pub fn get_global_metrics(&self) -> GlobalMetrics {
        GlobalMetrics {
            total_requests: self.counters.total_requests.load(Ordering::Relaxed),
            admitted_requests: self.counters.admitted_requests.load(Ordering::Relaxed),
            rejected_requests: self.counters.rejected_requests.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
            resets: self.counters.resets.load(Ordering::Relaxed),
            failed_resets: self.counters.failed_resets.load(Ordering::Relaxed),
        }
    }
}

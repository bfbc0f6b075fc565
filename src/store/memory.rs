use super::CounterStore;
use crate::error::{ThrottlerError, ThrottlerResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Process-local counter store backed by a mutex-guarded map.
///
/// Suitable for tests and single-instance deployments. Clones share the same
/// counters.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCounterStore {
    counters: Arc<Mutex<HashMap<String, i64>>>,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current total for `identity`, zero when absent.
    pub fn total(&self, identity: &str) -> ThrottlerResult<i64> {
        let counters = self.lock()?;
        Ok(counters.get(identity).copied().unwrap_or(0))
    }

    /// Number of identities charged in the current window.
    pub fn len(&self) -> ThrottlerResult<usize> {
        Ok(self.lock()?.len())
    }

    pub fn is_empty(&self) -> ThrottlerResult<bool> {
        Ok(self.len()? == 0)
    }

    fn lock(&self) -> ThrottlerResult<MutexGuard<'_, HashMap<String, i64>>> {
        self.counters.lock().map_err(|_| {
            ThrottlerError::StoreUnavailable("Failed to acquire counter lock".into())
        })
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn charge(&self, identity: &str, cost: i64) -> ThrottlerResult<i64> {
        let mut counters = self.lock()?;
        let total = counters.entry(identity.to_string()).or_insert(0);
        *total = total.saturating_add(cost);
        Ok(*total)
    }

    async fn clear_all(&self) -> ThrottlerResult<()> {
        let mut counters = self.lock()?;
        counters.clear();
        Ok(())
    }
}

//! Counter stores
//!
//! A counter store holds the accumulated cost of every client for the current
//! window. It is the single source of truth for quota accounting: limiters
//! keep no counts of their own and rely on the store's atomic increment.

mod memory;
mod redis;

pub use self::memory::InMemoryCounterStore;
pub use self::redis::RedisCounterStore;

use crate::error::ThrottlerResult;
use async_trait::async_trait;

/// Atomic keyed counter with a namespace-wide clear.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Add `cost` to the entry for `identity`, creating it at zero, and return
    /// the new total. Concurrent charges for one identity must never be lost.
    async fn charge(&self, identity: &str, cost: i64) -> ThrottlerResult<i64>;

    /// Drop every entry in this store's namespace.
    ///
    /// A charge racing with the clear may land on either side of it but is
    /// neither lost nor applied twice.
    async fn clear_all(&self) -> ThrottlerResult<()>;

    /// Check that the backing store is reachable.
    async fn ping(&self) -> ThrottlerResult<()> {
        Ok(())
    }
}

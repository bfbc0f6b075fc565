//! Fixed-window request admission control.
//!
//! A [`RateLimiter`] attributes each request to a client, charges the
//! client's counter in a shared [`CounterStore`] and rejects the request once
//! the window's capacity is exceeded. A [`WindowScheduler`] clears the store
//! at the end of every window.

pub mod config;
pub mod config_validator;
pub mod error;
pub mod handlers;
pub mod health;
pub mod identity;
pub mod metrics;
pub mod middleware;
pub mod rate_limit_config;
pub mod rate_limiter;
pub mod response;
pub mod scheduler;
pub mod server;
pub mod store;

pub use config::Config;
pub use error::{ThrottlerError, ThrottlerResult};
pub use identity::{ClientIdentity, ClientIpResolver, HeaderResolver, IdentityResolver};
pub use rate_limit_config::{RateLimitConfig, RateLimitSettings, StoreFailurePolicy};
pub use rate_limiter::{CostedLimit, Decision, RateLimiter};
pub use scheduler::{Window, WindowScheduler};
pub use server::create_app;
pub use store::{CounterStore, InMemoryCounterStore, RedisCounterStore};

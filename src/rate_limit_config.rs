use crate::error::{ThrottlerError, ThrottlerResult};
use crate::identity::IdentityResolver;
use crate::store::CounterStore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use validator::{Validate, ValidationError};

/// What `evaluate` does when the counter store cannot be reached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreFailurePolicy {
    /// Reject the request. Under-counting would let clients bypass their quota.
    #[default]
    FailClosed,
    /// Admit the request without charging it.
    FailOpen,
}

/// Tunable limits for one admission controller.
///
/// `capacity` is the cumulative cost a client may spend per window and
/// `clear_interval` is the window length (`"60s"`, `"5m"`, ...). Unknown fields
/// are rejected so that a typo never silently falls back to a default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct RateLimitSettings {
    #[validate(range(min = 1, message = "capacity must be greater than 0"))]
    pub capacity: i64,
    #[serde(with = "humantime_serde")]
    #[validate(custom(function = "validate_clear_interval"))]
    pub clear_interval: Duration,
    #[serde(default)]
    pub on_store_failure: StoreFailurePolicy,
}

fn validate_clear_interval(interval: &Duration) -> Result<(), ValidationError> {
    if interval.is_zero() {
        return Err(ValidationError::new("clear_interval")
            .with_message("clear interval must be greater than 0".into()));
    }
    Ok(())
}

impl RateLimitSettings {
    pub fn new(capacity: i64, clear_interval: Duration) -> Self {
        Self {
            capacity,
            clear_interval,
            on_store_failure: StoreFailurePolicy::default(),
        }
    }

    pub fn with_store_failure_policy(mut self, policy: StoreFailurePolicy) -> Self {
        self.on_store_failure = policy;
        self
    }

    /// Parse and validate settings from a JSON document.
    pub fn from_json(raw: &str) -> ThrottlerResult<Self> {
        let settings: Self = serde_json::from_str(raw)
            .map_err(|e| ThrottlerError::Configuration(format!("Invalid rate limit settings: {}", e)))?;
        settings.validate()?;
        Ok(settings)
    }
}

/// Everything an admission controller needs, fixed at construction.
#[derive(Clone)]
pub struct RateLimitConfig {
    pub settings: RateLimitSettings,
    pub identity_resolver: Arc<dyn IdentityResolver>,
    pub counter_store: Arc<dyn CounterStore>,
}

impl RateLimitConfig {
    pub fn new(
        settings: RateLimitSettings,
        identity_resolver: Arc<dyn IdentityResolver>,
        counter_store: Arc<dyn CounterStore>,
    ) -> Self {
        Self {
            settings,
            identity_resolver,
            counter_store,
        }
    }

    pub fn validate(&self) -> ThrottlerResult<()> {
        self.settings.validate()?;
        Ok(())
    }
}

impl fmt::Debug for RateLimitConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimitConfig")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

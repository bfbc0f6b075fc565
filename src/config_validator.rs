use crate::error::ThrottlerError;

/// Validates configuration objects for consistency and correctness
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validates a Redis URL
    pub fn validate_redis_url(url: &str) -> Result<(), ThrottlerError> {
        if url.is_empty() {
            return Err(ThrottlerError::ValidationError(
                "Redis URL cannot be empty".to_string(),
            ));
        }

        if !url.starts_with("redis://") && !url.starts_with("rediss://") {
            return Err(ThrottlerError::ValidationError(
                "Redis URL must start with 'redis://' or 'rediss://'".to_string(),
            ));
        }

        Ok(())
    }

    pub fn validate_database_index(index: i64) -> Result<(), ThrottlerError> {
        if index < 0 {
            return Err(ThrottlerError::ValidationError(format!(
                "Redis database index must not be negative, got {}",
                index
            )));
        }

        Ok(())
    }

    /// Each limiter clears its whole namespace on every window reset, so two
    /// limiters must never share one.
    pub fn validate_distinct_namespaces(first: i64, second: i64) -> Result<(), ThrottlerError> {
        if first == second {
            return Err(ThrottlerError::ValidationError(format!(
                "Public and private limiters cannot share Redis database {}",
                first
            )));
        }

        Ok(())
    }

    pub fn validate_log_level(level: &str) -> Result<(), ThrottlerError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&level.to_lowercase().as_str()) {
            return Err(ThrottlerError::ValidationError(format!(
                "Invalid log level '{}'. Must be one of: {:?}",
                level, valid_levels
            )));
        }

        Ok(())
    }
}

use crate::config_validator::ConfigValidator;
use crate::error::ThrottlerResult;
use crate::rate_limit_config::RateLimitSettings;
use clap::Parser;
use humantime_serde::re::humantime;
use std::net::SocketAddr;
use std::time::Duration;
use validator::Validate;

/// Demo server configuration, read from flags, the environment or `.env`.
#[derive(Debug, Clone, Parser)]
#[command(name = "quota-throttler", version, about)]
pub struct Config {
    /// Server bind address
    #[arg(long, env = "BIND_ADDR", default_value = "127.0.0.1:3000")]
    pub bind_addr: SocketAddr,

    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Redis connection URL; counters are kept in memory when unset
    #[arg(long, env = "REDIS_URL")]
    pub redis_url: Option<String>,

    /// Cost budget per window for the public route
    #[arg(long, env = "TOKEN_BUCKET_SIZE_PUBLIC", default_value_t = 10)]
    pub public_capacity: i64,

    #[arg(long, env = "TOKEN_RENEW_INTERVAL_PUBLIC", default_value = "60s", value_parser = humantime::parse_duration)]
    pub public_interval: Duration,

    /// Redis database holding the public counters
    #[arg(long, env = "CACHE_DB_INDEX_PUBLIC", default_value_t = 0)]
    pub public_database: i64,

    /// Cost budget per window for the private routes
    #[arg(long, env = "TOKEN_BUCKET_SIZE_PRIVATE", default_value_t = 10)]
    pub private_capacity: i64,

    #[arg(long, env = "TOKEN_RENEW_INTERVAL_PRIVATE", default_value = "60s", value_parser = humantime::parse_duration)]
    pub private_interval: Duration,

    /// Redis database holding the private counters
    #[arg(long, env = "CACHE_DB_INDEX_PRIVATE", default_value_t = 1)]
    pub private_database: i64,

    /// Comma-separated access tokens for the private routes; random tokens
    /// are generated when empty
    #[arg(long, env = "PRIVATE_TOKENS", value_delimiter = ',')]
    pub private_tokens: Vec<String>,

    /// Identify public clients by X-Forwarded-For / X-Real-IP
    #[arg(long, env = "TRUST_FORWARDED_HEADERS")]
    pub trust_forwarded_headers: bool,
}

impl Config {
    /// Load configuration from command-line flags and environment variables
    pub fn from_env() -> ThrottlerResult<Self> {
        let config = Config::parse();
        config.validate()?;
        Ok(config)
    }

    pub fn public_settings(&self) -> RateLimitSettings {
        RateLimitSettings::new(self.public_capacity, self.public_interval)
    }

    pub fn private_settings(&self) -> RateLimitSettings {
        RateLimitSettings::new(self.private_capacity, self.private_interval)
    }

    pub fn validate(&self) -> ThrottlerResult<()> {
        ConfigValidator::validate_log_level(&self.log_level)?;
        self.public_settings().validate()?;
        self.private_settings().validate()?;

        if let Some(redis_url) = &self.redis_url {
            ConfigValidator::validate_redis_url(redis_url)?;
            ConfigValidator::validate_database_index(self.public_database)?;
            ConfigValidator::validate_database_index(self.private_database)?;
            ConfigValidator::validate_distinct_namespaces(
                self.public_database,
                self.private_database,
            )?;
        }

        Ok(())
    }
}

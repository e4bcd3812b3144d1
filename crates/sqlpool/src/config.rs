//! Pool configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use sqlpool_core::{ConfigError, Result};

/// Environment variable names read by [`PoolConfig::from_env`].
pub const ENV_MIN_SIZE: &str = "SQLPOOL_MIN_SIZE";
pub const ENV_MAX_SIZE: &str = "SQLPOOL_MAX_SIZE";
pub const ENV_ACQUIRE_TIMEOUT_MS: &str = "SQLPOOL_ACQUIRE_TIMEOUT_MS";
pub const ENV_MAX_IDLE_TIME_MS: &str = "SQLPOOL_MAX_IDLE_TIME_MS";
pub const ENV_HEALTH_CHECK_INTERVAL_MS: &str = "SQLPOOL_HEALTH_CHECK_INTERVAL_MS";

/// Connection pool configuration.
///
/// A pool takes its own copy at construction, so the configuration is fixed
/// for the lifetime of the pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Connections opened at construction and kept by the reaper
    pub min_size: usize,
    /// Upper bound on live connections (idle + checked out)
    pub max_size: usize,
    /// Maximum time to wait for a connection in milliseconds
    pub acquire_timeout_ms: u64,
    /// Idle time after which a connection above the floor is evicted
    pub max_idle_time_ms: u64,
    /// Interval between reaper sweeps in milliseconds
    pub health_check_interval_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_size: 2,
            max_size: 10,
            acquire_timeout_ms: 5_000,        // 5 seconds
            max_idle_time_ms: 300_000,        // 5 minutes
            health_check_interval_ms: 30_000, // 30 seconds
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl PoolConfig {
    /// Create a configuration with the given bounds and default timings.
    pub fn new(min_size: usize, max_size: usize) -> Self {
        Self {
            min_size,
            max_size,
            ..Default::default()
        }
    }

    pub fn with_min_size(mut self, n: usize) -> Self {
        self.min_size = n;
        self
    }

    pub fn with_max_size(mut self, n: usize) -> Self {
        self.max_size = n;
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout_ms = millis(timeout);
        self
    }

    pub fn with_max_idle_time(mut self, idle: Duration) -> Self {
        self.max_idle_time_ms = millis(idle);
        self
    }

    pub fn with_health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval_ms = millis(interval);
        self
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn max_idle_time(&self) -> Duration {
        Duration::from_millis(self.max_idle_time_ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.max_size == 0 {
            return Err(ConfigError::new("max_size must be greater than 0").into());
        }
        if self.min_size > self.max_size {
            return Err(ConfigError::new(format!(
                "min_size ({}) cannot exceed max_size ({})",
                self.min_size, self.max_size
            ))
            .into());
        }
        if self.acquire_timeout_ms == 0 {
            return Err(ConfigError::new("acquire_timeout must be positive").into());
        }
        if self.max_idle_time_ms == 0 {
            return Err(ConfigError::new("max_idle_time must be positive").into());
        }
        if self.health_check_interval_ms == 0 {
            return Err(ConfigError::new("health_check_interval must be positive").into());
        }
        Ok(())
    }

    /// Create config from environment, falling back to defaults.
    ///
    /// Reads `SQLPOOL_MIN_SIZE`, `SQLPOOL_MAX_SIZE`, `SQLPOOL_ACQUIRE_TIMEOUT_MS`,
    /// `SQLPOOL_MAX_IDLE_TIME_MS` and `SQLPOOL_HEALTH_CHECK_INTERVAL_MS`.
    /// Values that fail to parse are logged and ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup (environment, file, map).
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(key: &str, raw: Option<String>, fallback: T) -> T {
            let Some(raw) = raw else {
                return fallback;
            };
            match raw.trim().parse() {
                Ok(v) => v,
                Err(_) => {
                    tracing::warn!(key = key, value = %raw, "Ignoring unparsable pool setting");
                    fallback
                }
            }
        }

        let defaults = Self::default();
        Self {
            min_size: parse(ENV_MIN_SIZE, lookup(ENV_MIN_SIZE), defaults.min_size),
            max_size: parse(ENV_MAX_SIZE, lookup(ENV_MAX_SIZE), defaults.max_size),
            acquire_timeout_ms: parse(
                ENV_ACQUIRE_TIMEOUT_MS,
                lookup(ENV_ACQUIRE_TIMEOUT_MS),
                defaults.acquire_timeout_ms,
            ),
            max_idle_time_ms: parse(
                ENV_MAX_IDLE_TIME_MS,
                lookup(ENV_MAX_IDLE_TIME_MS),
                defaults.max_idle_time_ms,
            ),
            health_check_interval_ms: parse(
                ENV_HEALTH_CHECK_INTERVAL_MS,
                lookup(ENV_HEALTH_CHECK_INTERVAL_MS),
                defaults.health_check_interval_ms,
            ),
        }
    }
}

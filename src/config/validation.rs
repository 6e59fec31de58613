//! Configuration validation
//!
//! The query stack assumes in-range values; this is the only place that
//! enforces them. Validation runs after file parsing and environment
//! overrides, so whatever source set a value gets the same checks.

use std::time::Duration;
use thiserror::Error;

use super::types::Config;

/// A configuration that failed validation.
#[derive(Debug, Error)]
#[error("invalid configuration: {reason}")]
pub struct ConfigError {
    pub reason: String,
}

impl ConfigError {
    fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Validate a loaded configuration.
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.ntp.servers.is_empty() && config.ntp.pools.is_empty() {
        return Err(ConfigError::new("no NTP servers or pools configured"));
    }

    for server in &config.ntp.servers {
        if server.trim().is_empty() {
            return Err(ConfigError::new("empty server address"));
        }
        if server.len() > 255 {
            return Err(ConfigError::new(format!("server address too long: {server}")));
        }
    }

    if !(2..=4).contains(&config.ntp.version) {
        return Err(ConfigError::new(format!(
            "ntp version must be 2, 3 or 4, got {}",
            config.ntp.version
        )));
    }

    if config.ntp.timeout < Duration::from_millis(500) {
        return Err(ConfigError::new("ntp timeout below 500ms"));
    }
    if config.ntp.timeout > Duration::from_secs(60) {
        return Err(ConfigError::new("ntp timeout above 60s"));
    }

    if !(1..=20).contains(&config.ntp.samples_per_server) {
        return Err(ConfigError::new(format!(
            "samples_per_server must be in 1..=20, got {}",
            config.ntp.samples_per_server
        )));
    }

    if !(1..=100).contains(&config.ntp.max_concurrency) {
        return Err(ConfigError::new(format!(
            "max_concurrency must be in 1..=100, got {}",
            config.ntp.max_concurrency
        )));
    }

    if config.ntp.scrape_interval < Duration::from_secs(1) {
        return Err(ConfigError::new("scrape_interval below 1s"));
    }

    if config.ntp.rate_limit.enabled {
        let rl = &config.ntp.rate_limit;
        if rl.global_rate == 0 || rl.per_server_rate == 0 || rl.burst_size == 0 {
            return Err(ConfigError::new(
                "rate limit rates and burst must be positive when enabled",
            ));
        }
    }

    if config.ntp.circuit_breaker.enabled {
        let cb = &config.ntp.circuit_breaker;
        if !(0.0..=1.0).contains(&cb.failure_threshold) || cb.failure_threshold == 0.0 {
            return Err(ConfigError::new(format!(
                "circuit breaker failure_threshold must be in (0, 1], got {}",
                cb.failure_threshold
            )));
        }
        if cb.max_requests == 0 {
            return Err(ConfigError::new("circuit breaker max_requests must be positive"));
        }
    }

    if config.ntp.adaptive_sampling.enabled {
        let adaptive = &config.ntp.adaptive_sampling;
        if adaptive.high_drift_samples < adaptive.default_samples {
            return Err(ConfigError::new(
                "adaptive high_drift_samples below default_samples",
            ));
        }
        if adaptive.high_drift_samples > 20 {
            return Err(ConfigError::new("adaptive high_drift_samples above 20"));
        }
    }

    let dns = &config.ntp.dns_cache;
    if dns.min_ttl > dns.max_ttl {
        return Err(ConfigError::new("dns cache min_ttl above max_ttl"));
    }

    for pool in &config.ntp.pools {
        if pool.name.trim().is_empty() {
            return Err(ConfigError::new("pool with empty name"));
        }
        if !(1..=20).contains(&pool.max_servers) {
            return Err(ConfigError::new(format!(
                "pool {} max_servers must be in 1..=20, got {}",
                pool.name, pool.max_servers
            )));
        }
    }

    let level = config.logging.level.to_ascii_lowercase();
    if !["trace", "debug", "info", "warn", "error"].contains(&level.as_str()) {
        return Err(ConfigError::new(format!(
            "unknown log level: {}",
            config.logging.level
        )));
    }

    let format = config.logging.format.to_ascii_lowercase();
    if !["json", "text"].contains(&format.as_str()) {
        return Err(ConfigError::new(format!(
            "log format must be json or text, got {}",
            config.logging.format
        )));
    }

    if config.logging.enable_file && config.logging.file_path.trim().is_empty() {
        return Err(ConfigError::new(
            "log file_path is required when enable_file is set",
        ));
    }

    if config.metrics.namespace.trim().is_empty() {
        return Err(ConfigError::new("metrics namespace is empty"));
    }

    Ok(())
}

//! Configuration loading: TOML file base, environment overrides on top
//!
//! Priority: environment variables > file > defaults. A missing file is not
//! an error for the env-only path; a file that exists but does not parse is.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::warn;

use super::types::Config;
use super::validation;

/// Load configuration from a TOML file, apply environment overrides, then
/// validate.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let mut config: Config = toml::from_str(&text)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;

    apply_env_overrides(&mut config);
    validation::validate(&config)?;
    Ok(config)
}

/// Build configuration from defaults and environment variables only.
pub fn load_config_from_env() -> Result<Config> {
    let mut config = Config::default();
    apply_env_overrides(&mut config);
    validation::validate(&config)?;
    Ok(config)
}

/// Default configuration, useful for generating a starter file.
#[must_use]
pub fn create_default_config() -> Config {
    Config::default()
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = env_string(name)?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(variable = name, value = %raw, "ignoring unparsable environment override");
            None
        }
    }
}

fn env_secs(name: &str) -> Option<Duration> {
    env_parse::<u64>(name).map(Duration::from_secs)
}

fn env_comma_list(name: &str) -> Option<Vec<String>> {
    env_string(name).map(|raw| {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
            .collect()
    })
}

/// Apply supported environment variables over an existing configuration.
pub fn apply_env_overrides(config: &mut Config) {
    // HTTP server
    if let Some(address) = env_string("NTP_EXPORTER_ADDRESS") {
        config.server.address = address;
    }
    if let Some(port) = env_parse("NTP_EXPORTER_PORT") {
        config.server.port = port;
    }

    // NTP querying
    if let Some(servers) = env_comma_list("NTP_SERVERS") {
        config.ntp.servers = servers;
    }
    if let Some(timeout) = env_secs("NTP_TIMEOUT") {
        config.ntp.timeout = timeout;
    }
    if let Some(version) = env_parse("NTP_VERSION") {
        config.ntp.version = version;
    }
    if let Some(samples) = env_parse("NTP_SAMPLES") {
        config.ntp.samples_per_server = samples;
    }
    if let Some(concurrency) = env_parse("NTP_MAX_CONCURRENCY") {
        config.ntp.max_concurrency = concurrency;
    }
    if let Some(interval) = env_secs("NTP_SCRAPE_INTERVAL") {
        config.ntp.scrape_interval = interval;
    }
    if let Some(enable) = env_parse("NTP_ENABLE_KERNEL") {
        config.ntp.enable_kernel = enable;
    }

    // Rate limiting
    if let Some(enabled) = env_parse("RATE_LIMIT_ENABLED") {
        config.ntp.rate_limit.enabled = enabled;
    }
    if let Some(rate) = env_parse("RATE_LIMIT_GLOBAL") {
        config.ntp.rate_limit.global_rate = rate;
    }
    if let Some(rate) = env_parse("RATE_LIMIT_PER_SERVER") {
        config.ntp.rate_limit.per_server_rate = rate;
    }
    if let Some(burst) = env_parse("RATE_LIMIT_BURST_SIZE") {
        config.ntp.rate_limit.burst_size = burst;
    }

    // Circuit breaker
    if let Some(enabled) = env_parse("CIRCUIT_BREAKER_ENABLED") {
        config.ntp.circuit_breaker.enabled = enabled;
    }
    if let Some(max_requests) = env_parse("CIRCUIT_BREAKER_MAX_REQUESTS") {
        config.ntp.circuit_breaker.max_requests = max_requests;
    }
    if let Some(interval) = env_secs("CIRCUIT_BREAKER_INTERVAL") {
        config.ntp.circuit_breaker.interval = interval;
    }
    if let Some(timeout) = env_secs("CIRCUIT_BREAKER_TIMEOUT") {
        config.ntp.circuit_breaker.timeout = timeout;
    }
    if let Some(threshold) = env_parse("CIRCUIT_BREAKER_FAILURE_THRESHOLD") {
        config.ntp.circuit_breaker.failure_threshold = threshold;
    }

    // Adaptive sampling
    if let Some(enabled) = env_parse("ADAPTIVE_SAMPLING_ENABLED") {
        config.ntp.adaptive_sampling.enabled = enabled;
    }
    if let Some(samples) = env_parse("ADAPTIVE_SAMPLING_DEFAULT_SAMPLES") {
        config.ntp.adaptive_sampling.default_samples = samples;
    }
    if let Some(samples) = env_parse("ADAPTIVE_SAMPLING_HIGH_DRIFT_SAMPLES") {
        config.ntp.adaptive_sampling.high_drift_samples = samples;
    }

    // Worker pool
    if let Some(enabled) = env_parse("WORKER_POOL_ENABLED") {
        config.ntp.worker_pool.enabled = enabled;
    }
    if let Some(size) = env_parse("WORKER_POOL_SIZE") {
        config.ntp.worker_pool.size = size;
    }

    // DNS cache
    if let Some(ttl) = env_secs("DNS_CACHE_MIN_TTL") {
        config.ntp.dns_cache.min_ttl = ttl;
    }
    if let Some(ttl) = env_secs("DNS_CACHE_MAX_TTL") {
        config.ntp.dns_cache.max_ttl = ttl;
    }

    // Logging and metrics
    if let Some(level) = env_string("LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(namespace) = env_string("METRICS_NAMESPACE") {
        config.metrics.namespace = namespace;
    }
}

//! Configuration type definitions
//!
//! The full application configuration as loaded from TOML, with defaults for
//! everything so a missing file still yields a runnable exporter. The core
//! treats these values as trusted; range checks live in the validation
//! module and run at load time.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::defaults;
use super::duration::{duration_millis, duration_secs};
use crate::ntp::pool::PoolStrategy;

/// Complete application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    /// HTTP exposition settings
    #[serde(default)]
    pub server: HttpConfig,
    /// NTP querying and fault-tolerance settings
    #[serde(default)]
    pub ntp: NtpConfig,
    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Metric naming settings
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// HTTP server settings for the scrape endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HttpConfig {
    /// Address to bind to
    pub address: String,
    /// Port to listen on
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            address: defaults::http_address(),
            port: defaults::http_port(),
        }
    }
}

/// NTP measurement configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NtpConfig {
    /// Individual servers to monitor (hostname or IP)
    pub servers: Vec<String>,
    /// Pools to monitor
    pub pools: Vec<PoolConfig>,
    /// Per-exchange timeout, in seconds
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
    /// NTP protocol version (2, 3 or 4)
    pub version: u8,
    /// Samples per server for multi-sample collectors
    pub samples_per_server: usize,
    /// Upper bound on concurrent queries
    pub max_concurrency: usize,
    /// Interval between collection cycles, in seconds
    #[serde(with = "duration_secs")]
    pub scrape_interval: Duration,
    /// Offset threshold for the clock-offset-exceeded gauge, in milliseconds
    #[serde(with = "duration_millis")]
    pub max_clock_offset: Duration,
    /// Read kernel NTP discipline state (Linux only)
    pub enable_kernel: bool,
    pub rate_limit: RateLimitSettings,
    pub circuit_breaker: CircuitBreakerSettings,
    pub adaptive_sampling: AdaptiveSamplingSettings,
    pub worker_pool: WorkerPoolSettings,
    pub dns_cache: DnsCacheSettings,
}

impl Default for NtpConfig {
    fn default() -> Self {
        Self {
            servers: defaults::ntp_servers(),
            pools: Vec::new(),
            timeout: defaults::ntp_timeout(),
            version: defaults::ntp_version(),
            samples_per_server: defaults::samples_per_server(),
            max_concurrency: defaults::max_concurrency(),
            scrape_interval: defaults::scrape_interval(),
            max_clock_offset: defaults::max_clock_offset(),
            enable_kernel: false,
            rate_limit: RateLimitSettings::default(),
            circuit_breaker: CircuitBreakerSettings::default(),
            adaptive_sampling: AdaptiveSamplingSettings::default(),
            worker_pool: WorkerPoolSettings::default(),
            dns_cache: DnsCacheSettings::default(),
        }
    }
}

/// One monitored pool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PoolConfig {
    /// Pool DNS name
    pub name: String,
    /// Server selection strategy
    #[serde(default)]
    pub strategy: PoolStrategy,
    /// Cap on servers taken from resolution
    #[serde(default = "defaults::pool_max_servers")]
    pub max_servers: usize,
    /// Host to query when pool resolution fails
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,
}

/// Outbound rate limiting.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RateLimitSettings {
    pub enabled: bool,
    /// Queries per second across all targets
    pub global_rate: u32,
    /// Queries per second per target
    pub per_server_rate: u32,
    /// Bucket capacity shared by both limits
    pub burst_size: u32,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            global_rate: defaults::rate_limit_global(),
            per_server_rate: defaults::rate_limit_per_server(),
            burst_size: defaults::rate_limit_burst(),
        }
    }
}

/// Per-target circuit breaking.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    pub enabled: bool,
    /// Probes admitted while half-open
    pub max_requests: u32,
    /// Rolling counter window in the closed state, in seconds
    #[serde(with = "duration_secs")]
    pub interval: Duration,
    /// Open period before probing, in seconds
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
    /// Failure ratio in [0, 1] that trips the breaker
    pub failure_threshold: f64,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            enabled: defaults::circuit_breaker_enabled(),
            max_requests: defaults::circuit_breaker_max_requests(),
            interval: defaults::circuit_breaker_interval(),
            timeout: defaults::circuit_breaker_timeout(),
            failure_threshold: defaults::circuit_breaker_failure_threshold(),
        }
    }
}

/// Two-phase adaptive sampling.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AdaptiveSamplingSettings {
    pub enabled: bool,
    pub default_samples: usize,
    pub high_drift_samples: usize,
    /// Median offset that counts as high drift, in milliseconds
    #[serde(with = "duration_millis")]
    pub drift_threshold: Duration,
    /// Wall-clock budget for one sampling run, in seconds
    #[serde(with = "duration_secs")]
    pub max_duration: Duration,
}

impl Default for AdaptiveSamplingSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            default_samples: defaults::adaptive_default_samples(),
            high_drift_samples: defaults::adaptive_high_drift_samples(),
            drift_threshold: defaults::adaptive_drift_threshold(),
            max_duration: defaults::adaptive_max_duration(),
        }
    }
}

/// Parallel fan-out for `all`-strategy pools.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkerPoolSettings {
    pub enabled: bool,
    pub size: usize,
}

impl Default for WorkerPoolSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            size: defaults::worker_pool_size(),
        }
    }
}

/// Adaptive-TTL DNS cache.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DnsCacheSettings {
    /// Lower TTL bound, in seconds
    #[serde(with = "duration_secs")]
    pub min_ttl: Duration,
    /// Upper TTL bound, in seconds
    #[serde(with = "duration_secs")]
    pub max_ttl: Duration,
    /// Background cleanup cadence, in seconds
    #[serde(with = "duration_secs")]
    pub cleanup_interval: Duration,
}

impl Default for DnsCacheSettings {
    fn default() -> Self {
        Self {
            min_ttl: defaults::dns_cache_min_ttl(),
            max_ttl: defaults::dns_cache_max_ttl(),
            cleanup_interval: defaults::dns_cache_cleanup_interval(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum level: trace, debug, info, warn, error
    pub level: String,
    /// Output format: "json" or "text"
    pub format: String,
    /// Also write to a rolling log file
    pub enable_file: bool,
    /// Log file path when `enable_file` is set
    pub file_path: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::log_level(),
            format: defaults::log_format(),
            enable_file: false,
            file_path: defaults::log_file_path(),
        }
    }
}

/// Metric naming.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MetricsConfig {
    /// Prefix for every metric family
    pub namespace: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            namespace: defaults::metrics_namespace(),
        }
    }
}

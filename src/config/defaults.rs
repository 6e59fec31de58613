//! Default values for unspecified configuration fields
//!
//! Each default lives in its own function so serde `default = "..."`
//! attributes and `Default` impls share one source of truth.

use std::time::Duration;

// HTTP server

pub fn http_address() -> String {
    "0.0.0.0".to_string()
}

pub const fn http_port() -> u16 {
    9559
}

// NTP querying

pub fn ntp_servers() -> Vec<String> {
    vec!["pool.ntp.org".to_string(), "time.google.com".to_string()]
}

pub const fn ntp_timeout() -> Duration {
    Duration::from_secs(5)
}

pub const fn ntp_version() -> u8 {
    4
}

pub const fn samples_per_server() -> usize {
    3
}

pub const fn max_concurrency() -> usize {
    10
}

pub const fn scrape_interval() -> Duration {
    Duration::from_secs(30)
}

pub const fn max_clock_offset() -> Duration {
    Duration::from_millis(100)
}

// Rate limiting

pub const fn rate_limit_global() -> u32 {
    1000
}

pub const fn rate_limit_per_server() -> u32 {
    60
}

pub const fn rate_limit_burst() -> u32 {
    10
}

// Circuit breaker (on by default for fault tolerance)

pub const fn circuit_breaker_enabled() -> bool {
    true
}

pub const fn circuit_breaker_max_requests() -> u32 {
    3
}

pub const fn circuit_breaker_interval() -> Duration {
    Duration::from_secs(60)
}

pub const fn circuit_breaker_timeout() -> Duration {
    Duration::from_secs(30)
}

pub const fn circuit_breaker_failure_threshold() -> f64 {
    0.6
}

// Adaptive sampling (off by default)

pub const fn adaptive_default_samples() -> usize {
    3
}

pub const fn adaptive_high_drift_samples() -> usize {
    10
}

pub const fn adaptive_drift_threshold() -> Duration {
    Duration::from_millis(50)
}

pub const fn adaptive_max_duration() -> Duration {
    Duration::from_secs(30)
}

// Worker pool (off by default, sequential querying)

pub const fn worker_pool_size() -> usize {
    5
}

// DNS cache

pub const fn dns_cache_min_ttl() -> Duration {
    Duration::from_secs(5 * 60)
}

pub const fn dns_cache_max_ttl() -> Duration {
    Duration::from_secs(60 * 60)
}

pub const fn dns_cache_cleanup_interval() -> Duration {
    Duration::from_secs(10 * 60)
}

// Pools

pub const fn pool_max_servers() -> usize {
    4
}

// Logging

pub fn log_level() -> String {
    "info".to_string()
}

pub fn log_format() -> String {
    "json".to_string()
}

pub fn log_file_path() -> String {
    "ntp-exporter.log".to_string()
}

// Metrics

pub fn metrics_namespace() -> String {
    "ntp".to_string()
}

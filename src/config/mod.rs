//! Configuration module
//!
//! Types, defaults, TOML loading with environment overrides, and validation
//! for the exporter.

pub mod defaults;
mod duration;
mod loading;
mod types;
mod validation;

pub use duration::{duration_millis, duration_secs};
pub use loading::{apply_env_overrides, create_default_config, load_config, load_config_from_env};
pub use types::{
    AdaptiveSamplingSettings, CircuitBreakerSettings, Config, DnsCacheSettings, HttpConfig,
    LoggingConfig, MetricsConfig, NtpConfig, PoolConfig, RateLimitSettings, WorkerPoolSettings,
};
pub use validation::{ConfigError, validate};

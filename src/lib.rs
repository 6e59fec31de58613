//! # NTP Exporter Library
//!
//! A Prometheus exporter that measures the quality, security and kernel
//! coherence of a configured set of NTP servers and pools.
//!
//! ## Architecture
//!
//! The crate is organized into layers around one capability: issuing NTP
//! queries and turning them into metrics.
//!
//! - **ntp**: the measurement engine: wire client, rate limiter, circuit
//!   breaker, DNS cache, pool, worker pool, statistics, adaptive sampler,
//!   response validator, kernel state reader
//! - **collector**: the four collectors (base, quality, security, hybrid),
//!   their registry, and the periodic collection loop
//! - **metrics**: the Prometheus families the collectors write into
//! - **server**: HTTP exposition (`/metrics`, `/health`, `/`)
//! - **config**: TOML configuration with environment overrides
//!
//! ## Design
//!
//! Everything that touches the network programs against the [`ntp::client::NtpQuerier`]
//! trait, so fault-tolerance layers stack by composition: the wire client is
//! optionally rate limited, optionally wrapped in per-server circuit
//! breakers, and the result is handed to pools, samplers and collectors
//! unchanged. One misbehaving target never poisons a collection cycle; its
//! failure is logged under its own label and the batch moves on.

pub mod collector;
pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod ntp;
pub mod server;

pub use config::{Config, create_default_config, load_config, load_config_from_env};
pub use error::QueryError;
pub use metrics::{MetricsRegistry, NtpMetrics};

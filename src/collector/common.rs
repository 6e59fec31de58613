//! Shared collector plumbing
//!
//! Every collector owns a [`CollectorBase`]: configuration, metric handles,
//! and the layered querier (wire client, optional rate limiting, optional
//! per-server circuit breaking). The server iteration helper enforces the
//! one rule all collectors share: a failing target is logged and skipped,
//! never allowed to poison the rest of the batch.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::warn;

use crate::config::Config;
use crate::metrics::NtpMetrics;
use crate::ntp::breaker::{BreakerConfig, CircuitBreakerClient};
use crate::ntp::client::{NtpClient, NtpQuerier};
use crate::ntp::ratelimit::RateLimiter;

/// Build the query stack the configuration asks for: the wire client, rate
/// limited when enabled, wrapped in per-server circuit breakers when
/// enabled.
#[must_use]
pub fn build_querier(config: &Config) -> Arc<dyn NtpQuerier> {
    let ntp = &config.ntp;

    let base: Arc<dyn NtpQuerier> = if ntp.rate_limit.enabled {
        let limiter = Arc::new(RateLimiter::new(
            ntp.rate_limit.global_rate,
            ntp.rate_limit.per_server_rate,
            ntp.rate_limit.burst_size,
        ));
        Arc::new(NtpClient::with_rate_limiter(
            ntp.timeout,
            ntp.version,
            limiter,
        ))
    } else {
        Arc::new(NtpClient::new(ntp.timeout, ntp.version))
    };

    if ntp.circuit_breaker.enabled {
        Arc::new(CircuitBreakerClient::new(
            base,
            BreakerConfig {
                max_requests: ntp.circuit_breaker.max_requests,
                interval: ntp.circuit_breaker.interval,
                timeout: ntp.circuit_breaker.timeout,
                failure_threshold: ntp.circuit_breaker.failure_threshold,
            },
        ))
    } else {
        base
    }
}

/// State shared by all collectors.
pub struct CollectorBase {
    config: Arc<Config>,
    metrics: Arc<NtpMetrics>,
    querier: Arc<dyn NtpQuerier>,
    name: &'static str,
    enabled: bool,
}

impl CollectorBase {
    /// Base with the querier built from configuration.
    #[must_use]
    pub fn new(config: Arc<Config>, metrics: Arc<NtpMetrics>, name: &'static str) -> Self {
        let querier = build_querier(&config);
        Self::with_querier(config, metrics, name, querier)
    }

    /// Base with an injected querier (tests, shared stacks).
    #[must_use]
    pub fn with_querier(
        config: Arc<Config>,
        metrics: Arc<NtpMetrics>,
        name: &'static str,
        querier: Arc<dyn NtpQuerier>,
    ) -> Self {
        Self {
            config,
            metrics,
            querier,
            name,
            enabled: true,
        }
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn metrics(&self) -> &NtpMetrics {
        &self.metrics
    }

    #[must_use]
    pub fn querier(&self) -> &Arc<dyn NtpQuerier> {
        &self.querier
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Run `collect_fn` for every configured server in declaration order.
    /// Per-server failures are logged with the server label and swallowed.
    pub async fn iterate_servers<'a, F>(&'a self, metric_type: &str, mut collect_fn: F)
    where
        F: FnMut(String) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>>,
    {
        for server in &self.config.ntp.servers {
            if let Err(err) = collect_fn(server.clone()).await {
                warn!(
                    server = %server,
                    error = %err,
                    "failed to collect {metric_type} metrics"
                );
            }
        }
    }
}

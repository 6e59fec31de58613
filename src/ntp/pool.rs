//! NTP pool resolution, server selection and aggregated querying
//!
//! A pool is a DNS name that fans out to several servers. Resolution goes
//! through the shared DNS cache; selection follows the configured strategy;
//! querying is sequential unless a worker pool is attached for the `all`
//! strategy.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::QueryError;
use crate::ntp::client::{NtpQuerier, Response};
use crate::ntp::dns_cache::DnsCache;
use crate::ntp::worker::WorkerPool;

/// Fallback pool width when the configuration leaves it unset.
const DEFAULT_MAX_SERVERS: usize = 4;

/// Server selection strategy for a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolStrategy {
    /// Query the first addresses, stopping once enough answered
    #[default]
    BestN,
    /// Query a single address picked by wall-clock seconds
    RoundRobin,
    /// Query every resolved address
    All,
}

impl PoolStrategy {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BestN => "best_n",
            Self::RoundRobin => "round_robin",
            Self::All => "all",
        }
    }
}

impl std::fmt::Display for PoolStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregated result of one pool query.
#[derive(Debug)]
pub struct PoolResponse {
    pub pool_name: String,
    /// Addresses the pool resolved to (after truncation)
    pub servers: Vec<String>,
    /// Successful responses from the selected servers
    pub responses: Vec<Response>,
    /// Servers that answered
    pub active_servers: usize,
    /// Servers resolved before querying
    pub total_servers: usize,
    /// Offset with the smallest absolute value, in seconds
    pub best_offset: f64,
    /// Time spent on DNS resolution
    pub dns_resolution: Duration,
}

/// One configured NTP pool.
pub struct Pool {
    name: String,
    strategy: PoolStrategy,
    max_servers: usize,
    fallback: Option<String>,
    querier: Arc<dyn NtpQuerier>,
    dns_cache: Arc<DnsCache>,
    worker_pool: Option<WorkerPool>,
}

impl Pool {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        strategy: PoolStrategy,
        max_servers: usize,
        fallback: Option<String>,
        querier: Arc<dyn NtpQuerier>,
        dns_cache: Arc<DnsCache>,
    ) -> Self {
        Self {
            name: name.into(),
            strategy,
            max_servers: if max_servers == 0 {
                DEFAULT_MAX_SERVERS
            } else {
                max_servers
            },
            fallback,
            querier,
            dns_cache,
            worker_pool: None,
        }
    }

    /// Attach a worker pool for parallel fan-out. Only the `all` strategy
    /// uses it.
    pub fn enable_worker_pool(&mut self, size: usize) {
        self.worker_pool = Some(WorkerPool::new(size, Arc::clone(&self.querier)));
    }

    /// Pool name as configured.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resolve the pool name to addresses, trying the fallback host when
    /// resolution fails. The result is truncated to `max_servers` with order
    /// preserved.
    async fn resolve(
        &self,
        cancel: &CancellationToken,
    ) -> Result<(Vec<String>, Duration), QueryError> {
        let start = Instant::now();
        match self.dns_cache.resolve(cancel, &self.name).await {
            Ok(mut ips) => {
                ips.truncate(self.max_servers);
                let elapsed = start.elapsed();
                debug!(
                    pool = %self.name,
                    servers = ips.len(),
                    duration_secs = elapsed.as_secs_f64(),
                    "pool DNS resolved"
                );
                Ok((ips, elapsed))
            }
            Err(err) => {
                warn!(pool = %self.name, error = %err, "failed to resolve pool DNS");
                if let Some(fallback) = &self.fallback {
                    info!(pool = %self.name, fallback = %fallback, "using fallback server");
                    return Ok((vec![fallback.clone()], start.elapsed()));
                }
                Err(err)
            }
        }
    }

    /// Query the pool per its strategy and aggregate the responses.
    pub async fn query(
        &self,
        cancel: &CancellationToken,
        samples: usize,
    ) -> Result<PoolResponse, QueryError> {
        let (servers, dns_resolution) = self.resolve(cancel).await?;

        let mut response = PoolResponse {
            pool_name: self.name.clone(),
            total_servers: servers.len(),
            servers,
            responses: Vec::new(),
            active_servers: 0,
            best_offset: 0.0,
            dns_resolution,
        };

        let selected = self.select_servers(&response.servers);

        if let (Some(worker_pool), PoolStrategy::All) = (&self.worker_pool, self.strategy) {
            match worker_pool.execute(cancel, &selected, samples).await {
                Ok(results) => {
                    for result in results.into_values() {
                        if result.error.is_none() {
                            if let Some(first) = result.responses.into_iter().next() {
                                response.responses.push(first);
                                response.active_servers += 1;
                            }
                        }
                    }
                }
                Err(err) => {
                    warn!(pool = %self.name, error = %err, "worker pool execution failed");
                }
            }
        } else {
            for server in &selected {
                if cancel.is_cancelled() {
                    return Err(QueryError::Cancelled);
                }

                match self.querier.query(cancel, server).await {
                    Ok(resp) => {
                        response.responses.push(resp);
                        response.active_servers += 1;
                    }
                    Err(err) => {
                        debug!(
                            pool = %self.name,
                            server = %server,
                            strategy = %self.strategy,
                            error = %err,
                            "failed to query pool server"
                        );
                        continue;
                    }
                }

                if self.strategy == PoolStrategy::BestN
                    && response.active_servers >= self.max_servers
                {
                    break;
                }
            }
        }

        response.best_offset = best_offset(&response.responses);

        info!(
            pool = %self.name,
            strategy = %self.strategy,
            active = response.active_servers,
            total = response.total_servers,
            best_offset = response.best_offset,
            "pool query completed"
        );

        Ok(response)
    }

    /// Pick the servers to query for the configured strategy.
    fn select_servers(&self, servers: &[String]) -> Vec<String> {
        match self.strategy {
            PoolStrategy::All | PoolStrategy::BestN => servers.to_vec(),
            PoolStrategy::RoundRobin => {
                if servers.is_empty() {
                    return Vec::new();
                }
                let index = unix_seconds() as usize % servers.len();
                vec![servers[index].clone()]
            }
        }
    }
}

/// Wall-clock seconds driving round-robin selection.
fn unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
}

/// Offset with the smallest absolute value; zero for an empty batch.
fn best_offset(responses: &[Response]) -> f64 {
    responses
        .iter()
        .map(|r| r.offset_seconds)
        .min_by(|a, b| {
            a.abs()
                .partial_cmp(&b.abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ntp::dns_cache::DnsCacheConfig;
    use crate::ntp::mock::{MockQuerier, MockResolver, sample_response};

    fn cache_with(resolver: MockResolver) -> Arc<DnsCache> {
        Arc::new(DnsCache::with_resolver(
            DnsCacheConfig::default(),
            Box::new(resolver),
        ))
    }

    #[tokio::test]
    async fn all_strategy_queries_every_resolved_server() {
        let resolver = MockResolver::new().with_default_ips(&["10.0.0.1", "10.0.0.2", "10.0.0.3"]);
        let mock = Arc::new(MockQuerier::new().with_default_response(sample_response("x")));
        let pool = Pool::new(
            "pool.example.org",
            PoolStrategy::All,
            8,
            None,
            Arc::clone(&mock) as Arc<dyn NtpQuerier>,
            cache_with(resolver),
        );
        let cancel = CancellationToken::new();

        let response = pool.query(&cancel, 1).await.unwrap();
        assert_eq!(response.total_servers, 3);
        assert_eq!(response.active_servers, 3);
        assert_eq!(response.responses.len(), 3);
        assert_eq!(mock.total_calls(), 3);
    }

    #[tokio::test]
    async fn resolution_is_truncated_to_max_servers() {
        let resolver = MockResolver::new()
            .with_default_ips(&["10.0.0.1", "10.0.0.2", "10.0.0.3", "10.0.0.4"]);
        let mock = Arc::new(MockQuerier::new().with_default_response(sample_response("x")));
        let pool = Pool::new(
            "pool.example.org",
            PoolStrategy::All,
            2,
            None,
            mock as Arc<dyn NtpQuerier>,
            cache_with(resolver),
        );
        let cancel = CancellationToken::new();

        let response = pool.query(&cancel, 1).await.unwrap();
        assert_eq!(response.total_servers, 2);
        assert_eq!(response.servers, vec!["10.0.0.1", "10.0.0.2"]);
    }

    #[tokio::test]
    async fn round_robin_selects_one_server_by_wall_clock() {
        let resolver = MockResolver::new().with_default_ips(&["10.0.0.1", "10.0.0.2"]);
        let mock = Arc::new(MockQuerier::new().with_default_response(sample_response("x")));
        let pool = Pool::new(
            "pool.example.org",
            PoolStrategy::RoundRobin,
            4,
            None,
            Arc::clone(&mock) as Arc<dyn NtpQuerier>,
            cache_with(resolver),
        );
        let cancel = CancellationToken::new();

        let response = pool.query(&cancel, 1).await.unwrap();
        assert_eq!(response.active_servers, 1);
        assert_eq!(mock.total_calls(), 1);
        let queried = &response.responses[0].server;
        assert!(queried == "10.0.0.1" || queried == "10.0.0.2");
    }

    #[tokio::test]
    async fn fallback_is_used_when_resolution_fails() {
        let resolver = MockResolver::new();
        resolver.enqueue_failure("pool.example.org");
        let mock = Arc::new(MockQuerier::new().with_default_response(sample_response("x")));
        let pool = Pool::new(
            "pool.example.org",
            PoolStrategy::BestN,
            4,
            Some("backup.example.org".to_string()),
            Arc::clone(&mock) as Arc<dyn NtpQuerier>,
            cache_with(resolver),
        );
        let cancel = CancellationToken::new();

        let response = pool.query(&cancel, 1).await.unwrap();
        assert_eq!(response.servers, vec!["backup.example.org"]);
        assert_eq!(response.active_servers, 1);
        assert_eq!(mock.calls("backup.example.org"), 1);
    }

    #[tokio::test]
    async fn resolution_failure_without_fallback_propagates() {
        let resolver = MockResolver::new();
        resolver.enqueue_failure("pool.example.org");
        let mock = Arc::new(MockQuerier::new());
        let pool = Pool::new(
            "pool.example.org",
            PoolStrategy::BestN,
            4,
            None,
            mock as Arc<dyn NtpQuerier>,
            cache_with(resolver),
        );
        let cancel = CancellationToken::new();

        let err = pool.query(&cancel, 1).await.unwrap_err();
        assert!(matches!(err, QueryError::ResolutionFailed { .. }));
    }

    #[tokio::test]
    async fn failed_servers_are_skipped() {
        let resolver = MockResolver::new().with_default_ips(&["10.0.0.1", "10.0.0.2"]);
        let mock = Arc::new(MockQuerier::new().with_default_response(sample_response("x")));
        mock.enqueue(
            "10.0.0.1",
            Err(QueryError::Timeout {
                server: "10.0.0.1".to_string(),
                timeout: Duration::from_secs(5),
            }),
        );
        let pool = Pool::new(
            "pool.example.org",
            PoolStrategy::All,
            4,
            None,
            mock as Arc<dyn NtpQuerier>,
            cache_with(resolver),
        );
        let cancel = CancellationToken::new();

        let response = pool.query(&cancel, 1).await.unwrap();
        assert_eq!(response.total_servers, 2);
        assert_eq!(response.active_servers, 1);
    }

    #[tokio::test]
    async fn best_offset_has_smallest_magnitude() {
        let resolver =
            MockResolver::new().with_default_ips(&["10.0.0.1", "10.0.0.2", "10.0.0.3"]);
        let mock = Arc::new(MockQuerier::new());
        for (ip, offset) in [
            ("10.0.0.1", 0.050),
            ("10.0.0.2", -0.002),
            ("10.0.0.3", 0.010),
        ] {
            let mut resp = sample_response(ip);
            resp.offset_seconds = offset;
            mock.enqueue(ip, Ok(resp));
        }
        let pool = Pool::new(
            "pool.example.org",
            PoolStrategy::All,
            4,
            None,
            mock as Arc<dyn NtpQuerier>,
            cache_with(resolver),
        );
        let cancel = CancellationToken::new();

        let response = pool.query(&cancel, 1).await.unwrap();
        assert!((response.best_offset - (-0.002)).abs() < 1e-12);
    }

    #[tokio::test]
    async fn worker_pool_path_takes_first_response_per_server() {
        let resolver = MockResolver::new().with_default_ips(&["10.0.0.1", "10.0.0.2"]);
        let mock = Arc::new(MockQuerier::new().with_default_response(sample_response("x")));
        let mut pool = Pool::new(
            "pool.example.org",
            PoolStrategy::All,
            4,
            None,
            mock as Arc<dyn NtpQuerier>,
            cache_with(resolver),
        );
        pool.enable_worker_pool(2);
        let cancel = CancellationToken::new();

        let response = pool.query(&cancel, 3).await.unwrap();
        assert_eq!(response.active_servers, 2);
        // One response kept per server even though three samples were taken.
        assert_eq!(response.responses.len(), 2);
    }

    #[tokio::test]
    async fn cancellation_between_servers_is_observed() {
        let resolver = MockResolver::new().with_default_ips(&["10.0.0.1", "10.0.0.2"]);
        let mock = Arc::new(MockQuerier::new().with_default_response(sample_response("x")));
        let pool = Pool::new(
            "pool.example.org",
            PoolStrategy::BestN,
            4,
            None,
            mock as Arc<dyn NtpQuerier>,
            cache_with(resolver),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = pool.query(&cancel, 1).await.unwrap_err();
        assert!(matches!(err, QueryError::Cancelled));
    }
}

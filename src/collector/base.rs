//! Base collector: per-server gauges and pool aggregates
//!
//! One query per configured server each cycle, plus one pool query per
//! configured pool. An unreachable server only gets its reachability gauge
//! cleared; every other gauge keeps its previous value.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::metrics::NtpMetrics;
use crate::ntp::client::{NtpQuerier, Response};
use crate::ntp::dns_cache::DnsCache;
use crate::ntp::pool::{Pool, PoolStrategy};

use super::common::CollectorBase;

/// Standard NTP metrics collector.
pub struct BaseCollector {
    base: CollectorBase,
    pools: Vec<Pool>,
}

impl BaseCollector {
    #[must_use]
    pub fn new(config: Arc<Config>, metrics: Arc<NtpMetrics>, dns_cache: Arc<DnsCache>) -> Self {
        let base = CollectorBase::new(Arc::clone(&config), metrics, "base");
        Self::assemble(config, base, dns_cache)
    }

    /// Constructor-level injection point for tests.
    #[must_use]
    pub fn with_querier(
        config: Arc<Config>,
        metrics: Arc<NtpMetrics>,
        dns_cache: Arc<DnsCache>,
        querier: Arc<dyn NtpQuerier>,
    ) -> Self {
        let base = CollectorBase::with_querier(Arc::clone(&config), metrics, "base", querier);
        Self::assemble(config, base, dns_cache)
    }

    fn assemble(config: Arc<Config>, base: CollectorBase, dns_cache: Arc<DnsCache>) -> Self {
        let pools = config
            .ntp
            .pools
            .iter()
            .map(|pool_cfg| {
                let mut pool = Pool::new(
                    pool_cfg.name.clone(),
                    pool_cfg.strategy,
                    pool_cfg.max_servers,
                    pool_cfg.fallback.clone(),
                    Arc::clone(base.querier()),
                    Arc::clone(&dns_cache),
                );
                if config.ntp.worker_pool.enabled && pool_cfg.strategy == PoolStrategy::All {
                    pool.enable_worker_pool(config.ntp.worker_pool.size);
                }
                pool
            })
            .collect();

        Self { base, pools }
    }

    pub(super) fn base(&self) -> &CollectorBase {
        &self.base
    }

    /// Run one collection cycle over servers and pools.
    pub async fn collect(&self, cancel: &CancellationToken) -> anyhow::Result<()> {
        let config = self.base.config();
        let metrics = self.base.metrics();

        info!(
            servers = config.ntp.servers.len(),
            pools = self.pools.len(),
            "starting NTP collection"
        );

        for server in &config.ntp.servers {
            match self.base.querier().query(cancel, server).await {
                Ok(response) => {
                    metrics.server_reachable.with_label_values(&[server]).set(1.0);
                    self.update_server_metrics(&response);
                }
                Err(err) => {
                    warn!(server = %server, error = %err, "failed to collect from server");
                    metrics.server_reachable.with_label_values(&[server]).set(0.0);
                }
            }
        }

        for pool in &self.pools {
            if let Err(err) = self.collect_from_pool(cancel, pool).await {
                warn!(pool = %pool.name(), error = %err, "failed to collect from pool");
            }
        }

        Ok(())
    }

    async fn collect_from_pool(
        &self,
        cancel: &CancellationToken,
        pool: &Pool,
    ) -> anyhow::Result<()> {
        let config = self.base.config();
        let metrics = self.base.metrics();

        let response = pool.query(cancel, config.ntp.samples_per_server).await?;

        metrics
            .pool_servers_active
            .with_label_values(&[&response.pool_name])
            .set(response.active_servers as f64);
        metrics
            .pool_servers_total
            .with_label_values(&[&response.pool_name])
            .set(response.total_servers as f64);
        metrics
            .pool_dns_resolution_seconds
            .with_label_values(&[&response.pool_name])
            .set(response.dns_resolution.as_secs_f64());
        metrics
            .pool_best_offset_seconds
            .with_label_values(&[&response.pool_name])
            .set(response.best_offset);

        for server_response in &response.responses {
            self.update_server_metrics(server_response);
        }

        Ok(())
    }

    /// Write every base gauge for one response.
    fn update_server_metrics(&self, response: &Response) {
        let config = self.base.config();
        let metrics = self.base.metrics();
        let server = response.server.as_str();
        let stratum = response.stratum.to_string();
        let version = config.ntp.version.to_string();

        metrics
            .offset_seconds
            .with_label_values(&[server, &stratum, &version])
            .set(response.offset_seconds);
        metrics
            .rtt_seconds
            .with_label_values(&[server])
            .set(response.rtt_seconds);
        metrics
            .stratum
            .with_label_values(&[server])
            .set(f64::from(response.stratum));
        metrics
            .reference_timestamp_seconds
            .with_label_values(&[server])
            .set(response.reference_unix_seconds());
        metrics
            .root_delay_seconds
            .with_label_values(&[server])
            .set(response.root_delay.as_secs_f64());
        metrics
            .root_dispersion_seconds
            .with_label_values(&[server])
            .set(response.root_dispersion.as_secs_f64());
        metrics
            .root_distance_seconds
            .with_label_values(&[server])
            .set(response.root_distance.as_secs_f64());
        metrics
            .precision_seconds
            .with_label_values(&[server])
            .set(response.precision.as_secs_f64());
        metrics
            .leap_indicator
            .with_label_values(&[server])
            .set(f64::from(response.leap_indicator));

        let exceeded = response.offset_seconds.abs() > config.ntp.max_clock_offset.as_secs_f64();
        metrics
            .clock_offset_exceeded
            .with_label_values(&[server])
            .set(if exceeded { 1.0 } else { 0.0 });

        debug!(
            server,
            offset = response.offset_seconds,
            rtt = response.rtt_seconds,
            stratum = response.stratum,
            "base metrics updated"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::metrics::MetricsRegistry;
    use crate::ntp::dns_cache::DnsCacheConfig;
    use crate::ntp::mock::{MockQuerier, MockResolver, sample_response};
    use crate::ntp::pool::PoolStrategy;
    use std::time::Duration;

    fn test_cache(resolver: MockResolver) -> Arc<DnsCache> {
        Arc::new(DnsCache::with_resolver(
            DnsCacheConfig::default(),
            Box::new(resolver),
        ))
    }

    fn collector_for(
        config: Config,
        mock: Arc<MockQuerier>,
        resolver: MockResolver,
    ) -> (BaseCollector, Arc<crate::metrics::NtpMetrics>) {
        let registry = MetricsRegistry::new("ntp").unwrap();
        let metrics = registry.metrics();
        let collector = BaseCollector::with_querier(
            Arc::new(config),
            Arc::clone(&metrics),
            test_cache(resolver),
            mock,
        );
        (collector, metrics)
    }

    #[tokio::test]
    async fn happy_path_sets_all_base_gauges() {
        let mut config = Config::default();
        config.ntp.servers = vec!["10.0.0.1".to_string()];
        config.ntp.pools.clear();

        let mock = Arc::new(MockQuerier::new());
        mock.enqueue("10.0.0.1", Ok(sample_response("10.0.0.1")));

        let (collector, metrics) = collector_for(config, mock, MockResolver::new());
        collector.collect(&CancellationToken::new()).await.unwrap();

        let offset = metrics
            .offset_seconds
            .with_label_values(&["10.0.0.1", "2", "4"])
            .get();
        assert!((offset - 0.0032).abs() < 1e-12);
        assert_eq!(
            metrics.rtt_seconds.with_label_values(&["10.0.0.1"]).get(),
            0.040
        );
        assert_eq!(
            metrics
                .server_reachable
                .with_label_values(&["10.0.0.1"])
                .get(),
            1.0
        );
        assert_eq!(metrics.stratum.with_label_values(&["10.0.0.1"]).get(), 2.0);
        assert_eq!(
            metrics
                .leap_indicator
                .with_label_values(&["10.0.0.1"])
                .get(),
            0.0
        );
        // 3.2 ms offset against a 100 ms threshold.
        assert_eq!(
            metrics
                .clock_offset_exceeded
                .with_label_values(&["10.0.0.1"])
                .get(),
            0.0
        );
        assert!(
            metrics
                .root_delay_seconds
                .with_label_values(&["10.0.0.1"])
                .get()
                > 0.0
        );
    }

    #[tokio::test]
    async fn unreachable_server_only_clears_reachability() {
        let mut config = Config::default();
        config.ntp.servers = vec!["192.0.2.1".to_string()];
        config.ntp.pools.clear();

        let mock = Arc::new(MockQuerier::new());
        mock.enqueue_failures("192.0.2.1", 1);

        let (collector, metrics) = collector_for(config, mock, MockResolver::new());
        collector.collect(&CancellationToken::new()).await.unwrap();

        assert_eq!(
            metrics
                .server_reachable
                .with_label_values(&["192.0.2.1"])
                .get(),
            0.0
        );
        // No offset series must exist for this server.
        use prometheus::core::Collector as _;
        let families = metrics.offset_seconds.collect();
        let series: usize = families.iter().map(|f| f.get_metric().len()).sum();
        assert_eq!(series, 0);
    }

    #[tokio::test]
    async fn offset_over_threshold_sets_exceeded_gauge() {
        let mut config = Config::default();
        config.ntp.servers = vec!["10.0.0.1".to_string()];
        config.ntp.pools.clear();
        config.ntp.max_clock_offset = Duration::from_millis(100);

        let mut response = sample_response("10.0.0.1");
        response.offset_seconds = 0.250;
        let mock = Arc::new(MockQuerier::new());
        mock.enqueue("10.0.0.1", Ok(response));

        let (collector, metrics) = collector_for(config, mock, MockResolver::new());
        collector.collect(&CancellationToken::new()).await.unwrap();

        assert_eq!(
            metrics
                .clock_offset_exceeded
                .with_label_values(&["10.0.0.1"])
                .get(),
            1.0
        );
    }

    #[tokio::test]
    async fn pool_query_emits_pool_gauges_and_member_metrics() {
        let mut config = Config::default();
        config.ntp.servers.clear();
        config.ntp.pools = vec![PoolConfig {
            name: "pool.example.org".to_string(),
            strategy: PoolStrategy::All,
            max_servers: 4,
            fallback: None,
        }];

        let resolver = MockResolver::new().with_default_ips(&["10.1.0.1", "10.1.0.2"]);
        let mock = Arc::new(MockQuerier::new().with_default_response(sample_response("x")));

        let (collector, metrics) = collector_for(config, mock, resolver);
        collector.collect(&CancellationToken::new()).await.unwrap();

        assert_eq!(
            metrics
                .pool_servers_active
                .with_label_values(&["pool.example.org"])
                .get(),
            2.0
        );
        assert_eq!(
            metrics
                .pool_servers_total
                .with_label_values(&["pool.example.org"])
                .get(),
            2.0
        );
        // Pool members get base gauges too.
        assert_eq!(
            metrics.rtt_seconds.with_label_values(&["10.1.0.1"]).get(),
            0.040
        );
    }

    #[tokio::test]
    async fn failed_pool_does_not_abort_collection() {
        let mut config = Config::default();
        config.ntp.servers = vec!["10.0.0.1".to_string()];
        config.ntp.pools = vec![PoolConfig {
            name: "broken.example.org".to_string(),
            strategy: PoolStrategy::BestN,
            max_servers: 4,
            fallback: None,
        }];

        let resolver = MockResolver::new();
        resolver.enqueue_failure("broken.example.org");
        let mock = Arc::new(MockQuerier::new());
        mock.enqueue("10.0.0.1", Ok(sample_response("10.0.0.1")));

        let (collector, metrics) = collector_for(config, mock, resolver);
        collector.collect(&CancellationToken::new()).await.unwrap();

        assert_eq!(
            metrics
                .server_reachable
                .with_label_values(&["10.0.0.1"])
                .get(),
            1.0
        );
    }
}

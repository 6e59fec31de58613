//! Security collector: trust scores, kiss-of-death and anomaly counters

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::Config;
use crate::metrics::NtpMetrics;
use crate::ntp::client::NtpQuerier;
use crate::ntp::validator::Validator;

use super::common::CollectorBase;

/// Validator-driven security metrics collector.
pub struct SecurityCollector {
    base: CollectorBase,
    validator: Validator,
}

impl SecurityCollector {
    #[must_use]
    pub fn new(config: Arc<Config>, metrics: Arc<NtpMetrics>) -> Self {
        Self {
            base: CollectorBase::new(config, metrics, "security"),
            validator: Validator::new(),
        }
    }

    /// Constructor-level injection point for tests.
    #[must_use]
    pub fn with_querier(
        config: Arc<Config>,
        metrics: Arc<NtpMetrics>,
        querier: Arc<dyn NtpQuerier>,
    ) -> Self {
        Self {
            base: CollectorBase::with_querier(config, metrics, "security", querier),
            validator: Validator::new(),
        }
    }

    pub(super) fn base(&self) -> &CollectorBase {
        &self.base
    }

    /// Validate one response per configured server and emit the verdicts.
    pub async fn collect(&self, cancel: &CancellationToken) -> anyhow::Result<()> {
        self.base
            .iterate_servers("security", |server| {
                Box::pin(self.collect_from_server(cancel, server))
            })
            .await;
        Ok(())
    }

    async fn collect_from_server(
        &self,
        cancel: &CancellationToken,
        server: String,
    ) -> anyhow::Result<()> {
        let metrics = self.base.metrics();

        let response = self.base.querier().query(cancel, &server).await?;
        let validation = self.validator.validate(&response);

        metrics
            .server_trust_score
            .with_label_values(&[&server])
            .set(validation.trust_score);

        if response.is_kiss_of_death() {
            metrics
                .kiss_of_death_total
                .with_label_values(&[&server, &response.kiss_code])
                .inc();
            warn!(server = %server, code = %response.kiss_code, "kiss-of-death received");
        }

        if response.is_suspicious() {
            let reason = self.validator.suspicion_reason(&response);
            metrics
                .server_suspicious_total
                .with_label_values(&[&server, reason])
                .inc();
            warn!(server = %server, reason, "suspicious NTP server detected");
        }

        if let Some(error) = &response.validation_error {
            metrics
                .malformed_responses_total
                .with_label_values(&[&server])
                .inc();
            warn!(server = %server, error = %error, "malformed NTP response");
        }

        debug!(
            server = %server,
            trust_score = validation.trust_score,
            valid = validation.valid,
            "security metrics updated"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricsRegistry;
    use crate::ntp::mock::{MockQuerier, sample_response};

    fn collector_for(
        servers: &[&str],
        mock: Arc<MockQuerier>,
    ) -> (SecurityCollector, Arc<NtpMetrics>) {
        let mut config = Config::default();
        config.ntp.servers = servers.iter().map(ToString::to_string).collect();
        let registry = MetricsRegistry::new("ntp").unwrap();
        let metrics = registry.metrics();
        let collector =
            SecurityCollector::with_querier(Arc::new(config), Arc::clone(&metrics), mock);
        (collector, metrics)
    }

    #[tokio::test]
    async fn healthy_server_scores_full_trust() {
        let mock = Arc::new(MockQuerier::new());
        mock.enqueue("10.0.0.1", Ok(sample_response("10.0.0.1")));

        let (collector, metrics) = collector_for(&["10.0.0.1"], mock);
        collector.collect(&CancellationToken::new()).await.unwrap();

        assert_eq!(
            metrics
                .server_trust_score
                .with_label_values(&["10.0.0.1"])
                .get(),
            1.0
        );
    }

    #[tokio::test]
    async fn kiss_of_death_increments_labeled_counter_once() {
        let mut response = sample_response("10.0.0.1");
        response.stratum = 0;
        response.kiss_code = "RATE".to_string();
        let mock = Arc::new(MockQuerier::new());
        mock.enqueue("10.0.0.1", Ok(response));

        let (collector, metrics) = collector_for(&["10.0.0.1"], mock);
        collector.collect(&CancellationToken::new()).await.unwrap();

        assert_eq!(
            metrics
                .kiss_of_death_total
                .with_label_values(&["10.0.0.1", "RATE"])
                .get(),
            1.0
        );
        // KoD responses also count as suspicious, with the KoD reason.
        assert_eq!(
            metrics
                .server_suspicious_total
                .with_label_values(&["10.0.0.1", "kod_received"])
                .get(),
            1.0
        );
        let trust = metrics
            .server_trust_score
            .with_label_values(&["10.0.0.1"])
            .get();
        assert!(trust <= 0.5);
    }

    #[tokio::test]
    async fn malformed_response_increments_counter() {
        let mut response = sample_response("10.0.0.1");
        response.validation_error = Some("zero server timestamp".to_string());
        let mock = Arc::new(MockQuerier::new());
        mock.enqueue("10.0.0.1", Ok(response));

        let (collector, metrics) = collector_for(&["10.0.0.1"], mock);
        collector.collect(&CancellationToken::new()).await.unwrap();

        assert_eq!(
            metrics
                .malformed_responses_total
                .with_label_values(&["10.0.0.1"])
                .get(),
            1.0
        );
        assert_eq!(
            metrics
                .server_suspicious_total
                .with_label_values(&["10.0.0.1", "validation_failed"])
                .get(),
            1.0
        );
    }

    #[tokio::test]
    async fn unreachable_server_emits_no_security_metrics() {
        let mock = Arc::new(MockQuerier::new());
        mock.enqueue_failures("192.0.2.1", 1);

        let (collector, metrics) = collector_for(&["192.0.2.1"], mock);
        collector.collect(&CancellationToken::new()).await.unwrap();

        use prometheus::core::Collector as _;
        let families = metrics.server_trust_score.collect();
        let series: usize = families.iter().map(|f| f.get_metric().len()).sum();
        assert_eq!(series, 0);
    }

    #[tokio::test]
    async fn stratum_too_high_counts_as_suspicious() {
        let mut response = sample_response("10.0.0.1");
        response.stratum = 16;
        let mock = Arc::new(MockQuerier::new());
        mock.enqueue("10.0.0.1", Ok(response));

        let (collector, metrics) = collector_for(&["10.0.0.1"], mock);
        collector.collect(&CancellationToken::new()).await.unwrap();

        assert_eq!(
            metrics
                .server_suspicious_total
                .with_label_values(&["10.0.0.1", "stratum_too_high"])
                .get(),
            1.0
        );
    }
}

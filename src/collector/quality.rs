//! Quality collector: multi-sample statistics per server

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::Config;
use crate::metrics::NtpMetrics;
use crate::ntp::client::NtpQuerier;
use crate::ntp::sampler::{AdaptiveSampler, AdaptiveSamplingConfig};
use crate::ntp::stats;

use super::common::CollectorBase;

/// Jitter / stability / packet-loss collector.
pub struct QualityCollector {
    base: CollectorBase,
    sampler: Option<AdaptiveSampler>,
}

impl QualityCollector {
    #[must_use]
    pub fn new(config: Arc<Config>, metrics: Arc<NtpMetrics>) -> Self {
        let base = CollectorBase::new(Arc::clone(&config), metrics, "quality");
        Self::assemble(config, base)
    }

    /// Constructor-level injection point for tests.
    #[must_use]
    pub fn with_querier(
        config: Arc<Config>,
        metrics: Arc<NtpMetrics>,
        querier: Arc<dyn NtpQuerier>,
    ) -> Self {
        let base = CollectorBase::with_querier(Arc::clone(&config), metrics, "quality", querier);
        Self::assemble(config, base)
    }

    fn assemble(config: Arc<Config>, base: CollectorBase) -> Self {
        let sampler = config.ntp.adaptive_sampling.enabled.then(|| {
            AdaptiveSampler::new(
                AdaptiveSamplingConfig {
                    default_samples: config.ntp.adaptive_sampling.default_samples,
                    high_drift_samples: config.ntp.adaptive_sampling.high_drift_samples,
                    drift_threshold: config.ntp.adaptive_sampling.drift_threshold,
                    max_duration: config.ntp.adaptive_sampling.max_duration,
                },
                Arc::clone(base.querier()),
            )
        });
        Self { base, sampler }
    }

    pub(super) fn base(&self) -> &CollectorBase {
        &self.base
    }

    /// Sample every configured server and emit the derived statistics.
    pub async fn collect(&self, cancel: &CancellationToken) -> anyhow::Result<()> {
        self.base
            .iterate_servers("quality", |server| {
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
        let config = self.base.config();
        let metrics = self.base.metrics();

        let statistics = if let Some(sampler) = &self.sampler {
            let responses = sampler.sample(cancel, &server).await?;
            stats::calculate_statistics(&responses, responses.len())
        } else {
            let requested = config.ntp.samples_per_server;
            let responses = self
                .base
                .querier()
                .query_multiple(cancel, &server, requested)
                .await?;
            stats::calculate_statistics(&responses, requested)
        };

        metrics
            .jitter_seconds
            .with_label_values(&[&server])
            .set(statistics.jitter);
        metrics
            .stability_seconds
            .with_label_values(&[&server])
            .set(statistics.stddev_offset);
        metrics
            .asymmetry_seconds
            .with_label_values(&[&server])
            .set(statistics.asymmetry);
        metrics
            .samples_count
            .with_label_values(&[&server])
            .set(statistics.samples_count as f64);
        metrics
            .packet_loss_ratio
            .with_label_values(&[&server])
            .set(statistics.packet_loss_ratio);

        debug!(
            server = %server,
            jitter = statistics.jitter,
            stability = statistics.stddev_offset,
            samples = statistics.samples_count,
            "quality metrics updated"
        );

        Ok(())
    }
}

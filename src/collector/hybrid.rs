//! Hybrid collector: kernel clock state correlated with wire measurements
//!
//! Runs only when kernel monitoring is enabled. Each cycle reads the kernel
//! NTP discipline state once, emits it labeled by node identity, then
//! queries every configured server and scores how well the two views of the
//! local clock agree.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::Config;
use crate::metrics::NtpMetrics;
use crate::ntp::client::NtpQuerier;
use crate::ntp::kernel::{KernelReader, KernelTimex};

use super::common::CollectorBase;

/// NTP/kernel correlation collector.
pub struct HybridCollector {
    base: CollectorBase,
    kernel_reader: KernelReader,
    node_name: String,
}

impl HybridCollector {
    #[must_use]
    pub fn new(config: Arc<Config>, metrics: Arc<NtpMetrics>) -> Self {
        let base = CollectorBase::new(Arc::clone(&config), metrics, "hybrid");
        Self::assemble(config, base)
    }

    /// Constructor-level injection point for tests.
    #[must_use]
    pub fn with_querier(
        config: Arc<Config>,
        metrics: Arc<NtpMetrics>,
        querier: Arc<dyn NtpQuerier>,
    ) -> Self {
        let base = CollectorBase::with_querier(Arc::clone(&config), metrics, "hybrid", querier);
        Self::assemble(config, base)
    }

    fn assemble(config: Arc<Config>, base: CollectorBase) -> Self {
        Self {
            base,
            kernel_reader: KernelReader::new(config.ntp.enable_kernel),
            node_name: node_name(),
        }
    }

    pub(super) fn base(&self) -> &CollectorBase {
        &self.base
    }

    pub(super) fn is_enabled(&self) -> bool {
        self.base.config().ntp.enable_kernel
    }

    /// Node identity used for test assertions.
    #[must_use]
    pub fn node(&self) -> &str {
        &self.node_name
    }

    /// One hybrid cycle. A failed kernel read skips the cycle with a single
    /// warning; NTP-side failures are handled per server as usual.
    pub async fn collect(&self, cancel: &CancellationToken) -> anyhow::Result<()> {
        if !self.is_enabled() {
            debug!("kernel monitoring disabled, skipping hybrid collection");
            return Ok(());
        }

        let kernel_state = match self.kernel_reader.read() {
            Ok(state) => state,
            Err(err) => {
                warn!(error = %err, "failed to read kernel timex state");
                return Ok(());
            }
        };

        self.update_kernel_metrics(&kernel_state);

        self.base
            .iterate_servers("hybrid", |server| {
                Box::pin(self.correlate_server(cancel, server, kernel_state))
            })
            .await;

        Ok(())
    }

    fn update_kernel_metrics(&self, state: &KernelTimex) {
        let metrics = self.base.metrics();
        let node = self.node_name.as_str();

        metrics
            .kernel_offset_seconds
            .with_label_values(&[node])
            .set(state.offset_seconds);
        metrics
            .kernel_frequency_ppm
            .with_label_values(&[node])
            .set(state.frequency_ppm());
        metrics
            .kernel_max_error_seconds
            .with_label_values(&[node])
            .set(state.max_error.as_secs_f64());
        metrics
            .kernel_est_error_seconds
            .with_label_values(&[node])
            .set(state.est_error.as_secs_f64());
        metrics
            .kernel_precision_seconds
            .with_label_values(&[node])
            .set(state.precision.as_secs_f64());
        metrics
            .kernel_status_code
            .with_label_values(&[node])
            .set(f64::from(state.status_code));
        metrics
            .kernel_sync_status
            .with_label_values(&[node, state.sync_status.as_str()])
            .set(if state.is_synchronized() { 1.0 } else { 0.0 });

        debug!(
            node,
            offset = state.offset_seconds,
            freq_ppm = state.frequency_ppm(),
            status = %state.sync_status,
            "kernel metrics updated"
        );
    }

    async fn correlate_server(
        &self,
        cancel: &CancellationToken,
        server: String,
        kernel_state: KernelTimex,
    ) -> anyhow::Result<()> {
        let metrics = self.base.metrics();

        let response = self.base.querier().query(cancel, &server).await?;

        let ntp_offset = response.offset_seconds;
        let kernel_offset = kernel_state.offset_seconds;
        let divergence = (ntp_offset - kernel_offset).abs();
        let coherence = calculate_coherence(ntp_offset, kernel_offset);

        metrics
            .ntp_kernel_divergence_seconds
            .with_label_values(&[&self.node_name, &server])
            .set(divergence);
        metrics
            .ntp_kernel_coherence
            .with_label_values(&[&self.node_name, &server])
            .set(coherence);

        if divergence > 0.010 {
            warn!(
                node = %self.node_name,
                server = %server,
                divergence,
                ntp_offset,
                kernel_offset,
                "significant NTP/kernel divergence detected"
            );
        }

        Ok(())
    }
}

/// Agreement between the wire-measured and kernel-disciplined offsets.
///
/// Piecewise over the absolute difference `d` in seconds: perfect below
/// 1 ms, linear ramps through the 5 / 10 / 50 ms bands, exponential decay
/// beyond. Symmetric in its arguments; equal inputs score exactly 1.0.
#[must_use]
pub fn calculate_coherence(ntp_offset_seconds: f64, kernel_offset_seconds: f64) -> f64 {
    const PERFECT: f64 = 0.001;
    const EXCELLENT: f64 = 0.005;
    const GOOD: f64 = 0.010;
    const ACCEPTABLE: f64 = 0.050;

    let divergence = (ntp_offset_seconds - kernel_offset_seconds).abs();

    if divergence < PERFECT {
        1.0
    } else if divergence < EXCELLENT {
        1.0 - (divergence - PERFECT) / (EXCELLENT - PERFECT) * 0.1
    } else if divergence < GOOD {
        0.9 - (divergence - EXCELLENT) / (GOOD - EXCELLENT) * 0.2
    } else if divergence < ACCEPTABLE {
        0.7 - (divergence - GOOD) / (ACCEPTABLE - GOOD) * 0.2
    } else {
        (0.5 * (-5.0 * divergence).exp()).clamp(0.0, 1.0)
    }
}

/// Node identity: `NODE_NAME` env, then hostname, then `unknown`. Resolved
/// once at construction.
fn node_name() -> String {
    if let Ok(name) = std::env::var("NODE_NAME") {
        if !name.is_empty() {
            return name;
        }
    }

    #[cfg(unix)]
    if let Ok(hostname) = nix::unistd::gethostname() {
        if let Ok(name) = hostname.into_string() {
            if !name.is_empty() {
                return name;
            }
        }
    }

    "unknown".to_string()
}

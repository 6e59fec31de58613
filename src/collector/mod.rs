//! Metric collectors and the registry that drives them
//!
//! Four collectors share the query stack: base gauges, quality statistics,
//! security verdicts, and (on Linux, opt-in) kernel correlation. The
//! registry runs them in registration order each cycle; a collector failure
//! is logged and reported but never stops the others.

mod base;
mod common;
mod hybrid;
mod quality;
mod security;

pub use base::BaseCollector;
pub use common::{CollectorBase, build_querier};
pub use hybrid::{HybridCollector, calculate_coherence};
pub use quality::QualityCollector;
pub use security::SecurityCollector;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::metrics::NtpMetrics;

/// Contract every collector satisfies.
#[async_trait]
pub trait Collector: Send + Sync {
    /// Stable collector name (metric label).
    fn name(&self) -> &'static str;

    /// Disabled collectors are skipped by the registry.
    fn enabled(&self) -> bool;

    /// Run one collection cycle.
    async fn collect(&self, cancel: &CancellationToken) -> anyhow::Result<()>;
}

#[async_trait]
impl Collector for BaseCollector {
    fn name(&self) -> &'static str {
        self.base().name()
    }

    fn enabled(&self) -> bool {
        self.base().enabled()
    }

    async fn collect(&self, cancel: &CancellationToken) -> anyhow::Result<()> {
        BaseCollector::collect(self, cancel).await
    }
}

#[async_trait]
impl Collector for QualityCollector {
    fn name(&self) -> &'static str {
        self.base().name()
    }

    fn enabled(&self) -> bool {
        self.base().enabled()
    }

    async fn collect(&self, cancel: &CancellationToken) -> anyhow::Result<()> {
        QualityCollector::collect(self, cancel).await
    }
}

#[async_trait]
impl Collector for SecurityCollector {
    fn name(&self) -> &'static str {
        self.base().name()
    }

    fn enabled(&self) -> bool {
        self.base().enabled()
    }

    async fn collect(&self, cancel: &CancellationToken) -> anyhow::Result<()> {
        SecurityCollector::collect(self, cancel).await
    }
}

#[async_trait]
impl Collector for HybridCollector {
    fn name(&self) -> &'static str {
        self.base().name()
    }

    fn enabled(&self) -> bool {
        self.is_enabled()
    }

    async fn collect(&self, cancel: &CancellationToken) -> anyhow::Result<()> {
        HybridCollector::collect(self, cancel).await
    }
}

/// Ordered set of collectors, populated once at startup.
pub struct CollectorRegistry {
    collectors: Vec<Box<dyn Collector>>,
    metrics: Arc<NtpMetrics>,
}

impl CollectorRegistry {
    #[must_use]
    pub fn new(metrics: Arc<NtpMetrics>) -> Self {
        Self {
            collectors: Vec::new(),
            metrics,
        }
    }

    pub fn register(&mut self, collector: Box<dyn Collector>) {
        self.collectors.push(collector);
    }

    /// Registered collectors, enabled or not.
    #[must_use]
    pub fn count(&self) -> usize {
        self.collectors.len()
    }

    /// Collectors that will actually run.
    #[must_use]
    pub fn enabled_count(&self) -> usize {
        self.collectors.iter().filter(|c| c.enabled()).count()
    }

    /// Run every enabled collector in registration order. Each collector's
    /// duration is observed; the first error is returned after all
    /// collectors had their turn.
    pub async fn collect_all(&self, cancel: &CancellationToken) -> anyhow::Result<()> {
        let mut first_error = None;

        for collector in &self.collectors {
            if !collector.enabled() {
                continue;
            }

            let start = Instant::now();
            let result = collector.collect(cancel).await;
            self.metrics
                .collector_duration_seconds
                .with_label_values(&[collector.name()])
                .observe(start.elapsed().as_secs_f64());

            if let Err(err) = result {
                warn!(collector = collector.name(), error = %err, "collection failed");
                if first_error.is_none() {
                    first_error = Some(err.context(collector.name()));
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Periodic collection driver: one immediate cycle, then one per interval
/// tick until cancelled. Every cycle's duration lands on the scrape
/// histogram and its outcome on the scrapes counter.
pub async fn run_collection_loop(
    registry: Arc<CollectorRegistry>,
    metrics: Arc<NtpMetrics>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let cycle = |label: &'static str| {
        let registry = Arc::clone(&registry);
        let metrics = Arc::clone(&metrics);
        let cancel = cancel.clone();
        async move {
            let start = Instant::now();
            let result = registry.collect_all(&cancel).await;
            let elapsed = start.elapsed();
            metrics.scrape_duration_seconds.observe(elapsed.as_secs_f64());

            match result {
                Ok(()) => {
                    metrics.scrapes_total.with_label_values(&["success"]).inc();
                    info!(
                        cycle = label,
                        duration_secs = elapsed.as_secs_f64(),
                        "collection cycle completed"
                    );
                }
                Err(err) => {
                    metrics.scrapes_total.with_label_values(&["failure"]).inc();
                    warn!(cycle = label, error = %err, "collection cycle failed");
                }
            }
        }
    };

    // Metrics should exist before the first external scrape arrives.
    cycle("initial").await;

    info!(interval_secs = interval.as_secs_f64(), "collection loop started");
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // interval's first tick completes immediately; the initial cycle already
    // ran, so consume it.
    ticker.tick().await;

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                info!("collection loop stopped");
                return;
            }
            _ = ticker.tick() => {
                cycle("periodic").await;
            }
        }
    }
}

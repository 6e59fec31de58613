//! Prometheus metric families for the exporter
//!
//! All families live on a dedicated registry (no process default) so tests
//! can build isolated instances. Durations are emitted in seconds; the
//! collectors convert at the emission boundary and nowhere else.

use std::sync::Arc;

use prometheus::{
    CounterVec, Encoder, Gauge, GaugeVec, Histogram, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};
use thiserror::Error;

/// Errors from metric registration or encoding.
#[derive(Debug, Error)]
pub enum MetricsError {
    /// Metric failed to register (duplicate name, bad label set)
    #[error("failed to register metric: {0}")]
    RegistrationFailed(#[from] prometheus::Error),

    /// Gathered samples could not be encoded as text
    #[error("failed to encode metrics: {0}")]
    EncodingFailed(String),
}

/// Every metric family the collectors write into.
#[derive(Clone, Debug)]
pub struct NtpMetrics {
    // Base NTP metrics
    pub offset_seconds: GaugeVec,
    pub clock_offset_exceeded: GaugeVec,
    pub rtt_seconds: GaugeVec,
    pub server_reachable: GaugeVec,
    pub stratum: GaugeVec,
    pub reference_timestamp_seconds: GaugeVec,
    pub root_delay_seconds: GaugeVec,
    pub root_dispersion_seconds: GaugeVec,
    pub root_distance_seconds: GaugeVec,
    pub precision_seconds: GaugeVec,
    pub leap_indicator: GaugeVec,

    // Quality metrics
    pub jitter_seconds: GaugeVec,
    pub stability_seconds: GaugeVec,
    pub asymmetry_seconds: GaugeVec,
    pub samples_count: GaugeVec,
    pub packet_loss_ratio: GaugeVec,

    // Security metrics
    pub server_trust_score: GaugeVec,
    pub kiss_of_death_total: CounterVec,
    pub server_suspicious_total: CounterVec,
    pub malformed_responses_total: CounterVec,

    // Pool metrics
    pub pool_servers_active: GaugeVec,
    pub pool_servers_total: GaugeVec,
    pub pool_dns_resolution_seconds: GaugeVec,
    pub pool_best_offset_seconds: GaugeVec,

    // Kernel state metrics (hybrid mode)
    pub kernel_offset_seconds: GaugeVec,
    pub kernel_frequency_ppm: GaugeVec,
    pub kernel_max_error_seconds: GaugeVec,
    pub kernel_est_error_seconds: GaugeVec,
    pub kernel_precision_seconds: GaugeVec,
    pub kernel_status_code: GaugeVec,
    pub kernel_sync_status: GaugeVec,

    // NTP/kernel correlation metrics
    pub ntp_kernel_divergence_seconds: GaugeVec,
    pub ntp_kernel_coherence: GaugeVec,

    // Exporter operational metrics
    pub build_info: GaugeVec,
    pub servers_configured: Gauge,
    pub scrape_duration_seconds: Histogram,
    pub scrapes_total: CounterVec,
    pub collector_duration_seconds: HistogramVec,
}

impl NtpMetrics {
    /// Create every family and register it on `registry`.
    pub fn new(registry: &Registry, namespace: &str) -> Result<Self, MetricsError> {
        let gauge_vec = |name: &str, help: &str, labels: &[&str]| -> Result<GaugeVec, MetricsError> {
            let vec = GaugeVec::new(Opts::new(name, help).namespace(namespace.to_string()), labels)?;
            registry.register(Box::new(vec.clone()))?;
            Ok(vec)
        };
        let counter_vec =
            |name: &str, help: &str, labels: &[&str]| -> Result<CounterVec, MetricsError> {
                let vec =
                    CounterVec::new(Opts::new(name, help).namespace(namespace.to_string()), labels)?;
                registry.register(Box::new(vec.clone()))?;
                Ok(vec)
            };

        let metrics = Self {
            offset_seconds: gauge_vec(
                "offset_seconds",
                "Time offset between local clock and NTP server in seconds",
                &["server", "stratum", "version"],
            )?,
            clock_offset_exceeded: gauge_vec(
                "clock_offset_exceeded",
                "Whether the clock offset exceeds the configured threshold (1 = exceeded, 0 = within limits)",
                &["server"],
            )?,
            rtt_seconds: gauge_vec(
                "rtt_seconds",
                "Round-trip time to NTP server in seconds",
                &["server"],
            )?,
            server_reachable: gauge_vec(
                "server_reachable",
                "Whether the NTP server is reachable (1) or not (0)",
                &["server"],
            )?,
            stratum: gauge_vec("stratum", "NTP server stratum level (0-16)", &["server"])?,
            reference_timestamp_seconds: gauge_vec(
                "reference_timestamp_seconds",
                "Reference timestamp of the NTP server in Unix seconds",
                &["server"],
            )?,
            root_delay_seconds: gauge_vec(
                "root_delay_seconds",
                "Root delay of the NTP server in seconds",
                &["server"],
            )?,
            root_dispersion_seconds: gauge_vec(
                "root_dispersion_seconds",
                "Root dispersion of the NTP server in seconds",
                &["server"],
            )?,
            root_distance_seconds: gauge_vec(
                "root_distance_seconds",
                "Calculated root distance in seconds",
                &["server"],
            )?,
            precision_seconds: gauge_vec(
                "precision_seconds",
                "Precision of the NTP server in seconds",
                &["server"],
            )?,
            leap_indicator: gauge_vec(
                "leap_indicator",
                "Leap second indicator (0=no warning, 1=61s, 2=59s, 3=unsync)",
                &["server"],
            )?,

            jitter_seconds: gauge_vec(
                "jitter_seconds",
                "Jitter calculated from multiple samples in seconds",
                &["server"],
            )?,
            stability_seconds: gauge_vec(
                "stability_seconds",
                "Stability of time offset (standard deviation) in seconds",
                &["server"],
            )?,
            asymmetry_seconds: gauge_vec(
                "asymmetry_seconds",
                "Network asymmetry in seconds",
                &["server"],
            )?,
            samples_count: gauge_vec(
                "samples_count",
                "Number of samples used for calculation",
                &["server"],
            )?,
            packet_loss_ratio: gauge_vec(
                "packet_loss_ratio",
                "Packet loss ratio during measurements (0-1)",
                &["server"],
            )?,

            server_trust_score: gauge_vec(
                "server_trust_score",
                "Trust score for the NTP server (0-1)",
                &["server"],
            )?,
            kiss_of_death_total: counter_vec(
                "kiss_of_death_total",
                "Total number of Kiss-of-Death packets received",
                &["server", "code"],
            )?,
            server_suspicious_total: counter_vec(
                "server_suspicious_total",
                "Total number of suspicious server detections",
                &["server", "reason"],
            )?,
            malformed_responses_total: counter_vec(
                "malformed_responses_total",
                "Total number of malformed NTP responses",
                &["server"],
            )?,

            pool_servers_active: gauge_vec(
                "pool_servers_active",
                "Number of active servers in the pool",
                &["pool"],
            )?,
            pool_servers_total: gauge_vec(
                "pool_servers_total",
                "Total number of servers in the pool",
                &["pool"],
            )?,
            pool_dns_resolution_seconds: gauge_vec(
                "pool_dns_resolution_seconds",
                "DNS resolution duration for pool in seconds",
                &["pool"],
            )?,
            pool_best_offset_seconds: gauge_vec(
                "pool_best_offset_seconds",
                "Best offset from pool servers in seconds",
                &["pool"],
            )?,

            kernel_offset_seconds: gauge_vec(
                "kernel_offset_seconds",
                "Kernel time offset in seconds (from adjtimex)",
                &["node"],
            )?,
            kernel_frequency_ppm: gauge_vec(
                "kernel_frequency_ppm",
                "Kernel frequency adjustment in PPM",
                &["node"],
            )?,
            kernel_max_error_seconds: gauge_vec(
                "kernel_max_error_seconds",
                "Kernel maximum time error in seconds",
                &["node"],
            )?,
            kernel_est_error_seconds: gauge_vec(
                "kernel_est_error_seconds",
                "Kernel estimated time error in seconds",
                &["node"],
            )?,
            kernel_precision_seconds: gauge_vec(
                "kernel_precision_seconds",
                "Kernel clock precision in seconds",
                &["node"],
            )?,
            kernel_status_code: gauge_vec(
                "kernel_status_code",
                "Kernel NTP status code",
                &["node"],
            )?,
            kernel_sync_status: gauge_vec(
                "kernel_sync_status",
                "Kernel synchronization status (1=synchronized, 0=unsynchronized)",
                &["node", "status"],
            )?,

            ntp_kernel_divergence_seconds: gauge_vec(
                "ntp_kernel_divergence_seconds",
                "Absolute difference between NTP and kernel offsets in seconds",
                &["node", "server"],
            )?,
            ntp_kernel_coherence: gauge_vec(
                "ntp_kernel_coherence",
                "Agreement between NTP and kernel offsets (0-1)",
                &["node", "server"],
            )?,

            build_info: gauge_vec(
                "build_info",
                "Build information for the exporter",
                &["version"],
            )?,
            servers_configured: {
                let gauge = Gauge::with_opts(
                    Opts::new(
                        "servers_configured",
                        "Number of configured NTP servers and pools",
                    )
                    .namespace(namespace.to_string()),
                )?;
                registry.register(Box::new(gauge.clone()))?;
                gauge
            },
            scrape_duration_seconds: {
                let histogram = Histogram::with_opts(
                    HistogramOpts::new("scrape_duration_seconds", "Duration of NTP scrape in seconds")
                        .namespace(namespace.to_string()),
                )?;
                registry.register(Box::new(histogram.clone()))?;
                histogram
            },
            scrapes_total: counter_vec(
                "scrapes_total",
                "Total number of scrape cycles by outcome",
                &["status"],
            )?,
            collector_duration_seconds: {
                let histogram = HistogramVec::new(
                    HistogramOpts::new(
                        "collector_duration_seconds",
                        "Duration of each collector run in seconds",
                    )
                    .namespace(namespace.to_string()),
                    &["collector"],
                )?;
                registry.register(Box::new(histogram.clone()))?;
                histogram
            },
        };

        Ok(metrics)
    }
}

/// Registry plus the metric handles registered on it.
#[derive(Clone)]
pub struct MetricsRegistry {
    registry: Registry,
    metrics: Arc<NtpMetrics>,
}

impl MetricsRegistry {
    /// Build a fresh registry with every family registered under `namespace`.
    pub fn new(namespace: &str) -> Result<Self, MetricsError> {
        let registry = Registry::new();
        let metrics = NtpMetrics::new(&registry, namespace)?;
        Ok(Self {
            registry,
            metrics: Arc::new(metrics),
        })
    }

    /// Handles for collectors to write through.
    #[must_use]
    pub fn metrics(&self) -> Arc<NtpMetrics> {
        Arc::clone(&self.metrics)
    }

    /// The underlying prometheus registry (for exposition).
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Gather and encode everything in Prometheus text format.
    pub fn encode_text(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&families, &mut buffer)
            .map_err(|e| MetricsError::EncodingFailed(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| MetricsError::EncodingFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_builds_and_encodes() {
        let registry = MetricsRegistry::new("ntp").unwrap();
        let metrics = registry.metrics();

        metrics
            .server_reachable
            .with_label_values(&["10.0.0.1"])
            .set(1.0);
        metrics
            .kiss_of_death_total
            .with_label_values(&["10.0.0.1", "RATE"])
            .inc();

        let output = registry.encode_text().unwrap();
        assert!(output.contains("ntp_server_reachable"));
        assert!(output.contains("ntp_kiss_of_death_total"));
        assert!(output.contains("code=\"RATE\""));
    }

    #[test]
    fn namespace_prefixes_every_family() {
        let registry = MetricsRegistry::new("timecheck").unwrap();
        let metrics = registry.metrics();
        metrics.servers_configured.set(2.0);

        let output = registry.encode_text().unwrap();
        assert!(output.contains("timecheck_servers_configured 2"));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let registry = Registry::new();
        NtpMetrics::new(&registry, "ntp").unwrap();
        let err = NtpMetrics::new(&registry, "ntp").unwrap_err();
        assert!(matches!(err, MetricsError::RegistrationFailed(_)));
    }

    #[test]
    fn gauges_read_back_what_was_set() {
        let registry = MetricsRegistry::new("ntp").unwrap();
        let metrics = registry.metrics();

        metrics
            .offset_seconds
            .with_label_values(&["10.0.0.1", "2", "4"])
            .set(0.0032);
        let value = metrics
            .offset_seconds
            .with_label_values(&["10.0.0.1", "2", "4"])
            .get();
        assert!((value - 0.0032).abs() < 1e-12);
    }
}

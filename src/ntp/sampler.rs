//! Two-phase adaptive sampling
//!
//! The first batch uses the default sample count. When its median offset
//! crosses the drift threshold and the time budget allows, the batch is
//! widened to the high-drift count and statistics are recomputed. The
//! confidence score is telemetry only; it never changes sampling decisions.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::QueryError;
use crate::ntp::client::{NtpQuerier, Response};
use crate::ntp::stats::{self, Statistics};

/// Adaptive sampling tuning.
#[derive(Debug, Clone, Copy)]
pub struct AdaptiveSamplingConfig {
    /// Samples for the initial batch
    pub default_samples: usize,
    /// Total samples once high drift is detected
    pub high_drift_samples: usize,
    /// Median offset that counts as high drift
    pub drift_threshold: Duration,
    /// Wall-clock budget for the whole sampling run
    pub max_duration: Duration,
}

impl Default for AdaptiveSamplingConfig {
    fn default() -> Self {
        Self {
            default_samples: 3,
            high_drift_samples: 10,
            drift_threshold: Duration::from_millis(50),
            max_duration: Duration::from_secs(30),
        }
    }
}

/// Sampler widening its batch on detected drift.
pub struct AdaptiveSampler {
    config: AdaptiveSamplingConfig,
    querier: Arc<dyn NtpQuerier>,
}

impl AdaptiveSampler {
    #[must_use]
    pub fn new(config: AdaptiveSamplingConfig, querier: Arc<dyn NtpQuerier>) -> Self {
        let defaults = AdaptiveSamplingConfig::default();
        let config = AdaptiveSamplingConfig {
            default_samples: if config.default_samples == 0 {
                defaults.default_samples
            } else {
                config.default_samples
            },
            high_drift_samples: if config.high_drift_samples == 0 {
                defaults.high_drift_samples
            } else {
                config.high_drift_samples
            },
            drift_threshold: if config.drift_threshold.is_zero() {
                defaults.drift_threshold
            } else {
                config.drift_threshold
            },
            max_duration: if config.max_duration.is_zero() {
                defaults.max_duration
            } else {
                config.max_duration
            },
        };
        Self { config, querier }
    }

    /// Sample a server adaptively. A batch where every sample failed comes
    /// back as an empty set, not an error; drift policy needs data to act.
    pub async fn sample(
        &self,
        cancel: &CancellationToken,
        server: &str,
    ) -> Result<Vec<Response>, QueryError> {
        let start = Instant::now();

        let mut responses = match self
            .querier
            .query_multiple(cancel, server, self.config.default_samples)
            .await
        {
            Ok(responses) => responses,
            Err(QueryError::AllSamplesFailed { .. }) => {
                warn!(server, "no responses received from initial sampling");
                return Ok(Vec::new());
            }
            Err(err) => return Err(err),
        };

        let mut statistics = stats::calculate_statistics(&responses, self.config.default_samples);
        debug!(
            server,
            samples = responses.len(),
            median_drift = statistics.median_offset,
            stddev = statistics.stddev_offset,
            "initial sampling completed"
        );

        let drift_threshold = self.config.drift_threshold.as_secs_f64();
        if statistics.median_offset.abs() > drift_threshold {
            let elapsed = start.elapsed();
            if elapsed < self.config.max_duration {
                let additional = self
                    .config
                    .high_drift_samples
                    .saturating_sub(self.config.default_samples);
                info!(
                    server,
                    drift = statistics.median_offset.abs(),
                    threshold = drift_threshold,
                    extra_samples = additional,
                    "high drift detected, increasing samples"
                );

                if additional > 0 {
                    let remaining = self.config.max_duration - elapsed;
                    let extra = tokio::time::timeout(
                        remaining,
                        self.querier.query_multiple(cancel, server, additional),
                    )
                    .await;

                    if let Ok(Ok(extra)) = extra {
                        if !extra.is_empty() {
                            responses.extend(extra);
                            statistics = stats::calculate_statistics(&responses, responses.len());
                            info!(
                                server,
                                total_samples = responses.len(),
                                new_median = statistics.median_offset,
                                new_stddev = statistics.stddev_offset,
                                "additional sampling completed"
                            );
                        }
                    }
                }
            } else {
                warn!(
                    server,
                    elapsed_secs = elapsed.as_secs_f64(),
                    "max duration reached, skipping additional sampling"
                );
            }
        }

        let confidence = self.confidence(&statistics, responses.len());
        debug!(
            server,
            confidence,
            samples = responses.len(),
            "sampling confidence calculated"
        );

        Ok(responses)
    }

    /// Confidence in a sampling run, in [0, 1]. Logged for operators; never
    /// used for control flow.
    #[must_use]
    pub fn confidence(&self, statistics: &Statistics, sample_count: usize) -> f64 {
        let mut confidence = 1.0;

        // Unstable offsets: up to 0.3 penalty, maxed out at 100 ms stddev.
        if statistics.stddev_offset > 0.010 {
            confidence -= (statistics.stddev_offset / 0.100).min(0.3);
        }

        // Network instability: up to 0.2 penalty, maxed out at 200 ms jitter.
        if statistics.jitter > 0.020 {
            confidence -= (statistics.jitter / 0.200).min(0.2);
        }

        if statistics.packet_loss_ratio > 0.1 {
            confidence -= statistics.packet_loss_ratio.min(0.3);
        }

        if sample_count >= self.config.high_drift_samples {
            confidence += 0.1;
        }

        confidence.clamp(0.0, 1.0)
    }

    /// Sample count to use given an already-measured offset.
    #[must_use]
    pub fn optimal_sample_count(&self, initial_offset_seconds: f64) -> usize {
        if initial_offset_seconds.abs() > self.config.drift_threshold.as_secs_f64() {
            self.config.high_drift_samples
        } else {
            self.config.default_samples
        }
    }

    /// Sample several servers in listed order. Failing servers are omitted
    /// from the mapping; cancellation stops the iteration and returns what
    /// was collected.
    pub async fn sample_multiple_servers(
        &self,
        cancel: &CancellationToken,
        servers: &[String],
    ) -> HashMap<String, Vec<Response>> {
        let mut results = HashMap::new();

        for server in servers {
            if cancel.is_cancelled() {
                return results;
            }
            match self.sample(cancel, server).await {
                Ok(responses) => {
                    results.insert(server.clone(), responses);
                }
                Err(err) => {
                    warn!(server = %server, error = %err, "failed to sample server");
                }
            }
        }

        results
    }
}

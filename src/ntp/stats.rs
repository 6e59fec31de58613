//! Batch statistics over multi-sample query results
//!
//! All math happens in f64 seconds; conversion to gauge values is a no-op at
//! emission time. The sample standard deviation (N−1 denominator) is used
//! for both offset stability and RTT jitter.

use crate::ntp::client::Response;

/// Derived statistics for one server's sample batch.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Statistics {
    /// Median clock offset in seconds
    pub median_offset: f64,
    /// Mean clock offset in seconds
    pub mean_offset: f64,
    /// Sample standard deviation of offsets in seconds
    pub stddev_offset: f64,
    /// Sample standard deviation of RTTs in seconds
    pub jitter: f64,
    /// Spread of RTTs (max − min) in seconds
    pub asymmetry: f64,
    /// Samples that actually arrived
    pub samples_count: usize,
    /// Lost fraction of the requested samples, in [0, 1]
    pub packet_loss_ratio: f64,
}

/// Compute statistics from a batch of responses against the originally
/// requested sample count. An empty batch yields the all-zero struct with
/// total packet loss.
#[must_use]
pub fn calculate_statistics(responses: &[Response], requested: usize) -> Statistics {
    if responses.is_empty() {
        return Statistics {
            packet_loss_ratio: 1.0,
            ..Statistics::default()
        };
    }

    let offsets: Vec<f64> = responses.iter().map(|r| r.offset_seconds).collect();
    let rtts: Vec<f64> = responses.iter().map(|r| r.rtt_seconds).collect();

    let asymmetry = if rtts.len() >= 2 {
        let max = rtts.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let min = rtts.iter().copied().fold(f64::INFINITY, f64::min);
        max - min
    } else {
        0.0
    };

    Statistics {
        median_offset: median(&offsets),
        mean_offset: mean(&offsets),
        stddev_offset: stddev(&offsets),
        jitter: stddev(&rtts),
        asymmetry,
        samples_count: responses.len(),
        packet_loss_ratio: packet_loss(responses.len(), requested),
    }
}

/// Lost fraction, floored at zero when more samples arrived than requested.
#[must_use]
pub fn packet_loss(received: usize, requested: usize) -> f64 {
    if requested == 0 {
        return 0.0;
    }
    let lost = requested.saturating_sub(received);
    lost as f64 / requested as f64
}

/// Median; the two central values are averaged for even-length input.
fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = sorted.len();
    if n % 2 == 0 {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    } else {
        sorted[n / 2]
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation; zero for fewer than two values.
fn stddev(values: &[f64]) -> f64 {
    if values.len() <= 1 {
        return 0.0;
    }
    let m = mean(values);
    let variance =
        values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ntp::mock::sample_response;
    use proptest::prelude::*;

    fn batch(offsets_and_rtts: &[(f64, f64)]) -> Vec<Response> {
        offsets_and_rtts
            .iter()
            .map(|&(offset, rtt)| {
                let mut response = sample_response("s");
                response.offset_seconds = offset;
                response.rtt_seconds = rtt;
                response
            })
            .collect()
    }

    #[test]
    fn empty_batch_is_total_loss() {
        let stats = calculate_statistics(&[], 5);
        assert_eq!(stats.samples_count, 0);
        assert_eq!(stats.packet_loss_ratio, 1.0);
        assert_eq!(stats.median_offset, 0.0);
        assert_eq!(stats.mean_offset, 0.0);
        assert_eq!(stats.stddev_offset, 0.0);
        assert_eq!(stats.jitter, 0.0);
        assert_eq!(stats.asymmetry, 0.0);
    }

    #[test]
    fn single_sample_collapses_spread_measures() {
        let stats = calculate_statistics(&batch(&[(0.010, 0.050)]), 1);
        assert_eq!(stats.samples_count, 1);
        assert_eq!(stats.median_offset, 0.010);
        assert_eq!(stats.mean_offset, 0.010);
        assert_eq!(stats.stddev_offset, 0.0);
        assert_eq!(stats.jitter, 0.0);
        assert_eq!(stats.asymmetry, 0.0);
        assert_eq!(stats.packet_loss_ratio, 0.0);
    }

    #[test]
    fn identical_samples_have_zero_deviation() {
        let stats = calculate_statistics(&batch(&[(0.005, 0.02), (0.005, 0.02), (0.005, 0.02)]), 3);
        assert_eq!(stats.stddev_offset, 0.0);
        assert_eq!(stats.jitter, 0.0);
        assert_eq!(stats.asymmetry, 0.0);
        assert_eq!(stats.median_offset, 0.005);
    }

    #[test]
    fn median_of_odd_batch() {
        let stats = calculate_statistics(&batch(&[(0.3, 0.0), (0.1, 0.0), (0.2, 0.0)]), 3);
        assert!((stats.median_offset - 0.2).abs() < 1e-12);
    }

    #[test]
    fn median_of_even_batch_averages_central_pair() {
        let stats =
            calculate_statistics(&batch(&[(0.4, 0.0), (0.1, 0.0), (0.2, 0.0), (0.3, 0.0)]), 4);
        assert!((stats.median_offset - 0.25).abs() < 1e-12);
    }

    #[test]
    fn median_handles_negative_offsets() {
        let stats = calculate_statistics(&batch(&[(-0.08, 0.0), (-0.02, 0.0), (-0.05, 0.0)]), 3);
        assert!((stats.median_offset - (-0.05)).abs() < 1e-12);
        assert!(stats.mean_offset < 0.0);
    }

    #[test]
    fn stddev_uses_sample_denominator() {
        // Offsets 1, 2, 3: mean 2, sample variance ((1+0+1)/2) = 1.
        let stats = calculate_statistics(&batch(&[(1.0, 0.0), (2.0, 0.0), (3.0, 0.0)]), 3);
        assert!((stats.stddev_offset - 1.0).abs() < 1e-12);
    }

    #[test]
    fn jitter_is_stddev_of_rtts() {
        let stats = calculate_statistics(&batch(&[(0.0, 0.010), (0.0, 0.020), (0.0, 0.030)]), 3);
        assert!((stats.jitter - 0.010).abs() < 1e-12);
    }

    #[test]
    fn asymmetry_is_rtt_spread() {
        let stats = calculate_statistics(&batch(&[(0.0, 0.015), (0.0, 0.060), (0.0, 0.040)]), 3);
        assert!((stats.asymmetry - 0.045).abs() < 1e-12);
    }

    #[test]
    fn packet_loss_counts_missing_samples() {
        let stats = calculate_statistics(&batch(&[(0.0, 0.0), (0.0, 0.0)]), 5);
        assert!((stats.packet_loss_ratio - 0.6).abs() < 1e-12);
    }

    #[test]
    fn packet_loss_boundaries() {
        assert_eq!(packet_loss(0, 0), 0.0);
        assert_eq!(packet_loss(3, 3), 0.0);
        assert_eq!(packet_loss(0, 4), 1.0);
        // Over-delivery floors at zero rather than going negative.
        assert_eq!(packet_loss(7, 5), 0.0);
    }

    proptest! {
        #[test]
        fn loss_ratio_stays_in_unit_interval(received in 0usize..50, requested in 0usize..50) {
            let ratio = packet_loss(received, requested);
            prop_assert!((0.0..=1.0).contains(&ratio));
        }

        #[test]
        fn median_is_bounded_by_extremes(values in proptest::collection::vec(-10.0f64..10.0, 1..20)) {
            let responses = batch(&values.iter().map(|&v| (v, 0.0)).collect::<Vec<_>>());
            let stats = calculate_statistics(&responses, values.len());
            let min = values.iter().copied().fold(f64::INFINITY, f64::min);
            let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            prop_assert!(stats.median_offset >= min - 1e-9);
            prop_assert!(stats.median_offset <= max + 1e-9);
        }
    }
}

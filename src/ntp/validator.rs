//! Response validation and trust scoring
//!
//! Verdicts are pure functions of the response: errors clear the `valid`
//! flag, warnings only dent the trust score, and every deduction is clamped
//! so the score stays inside [0, 1].

use crate::constants::validation::{
    MAX_ACCEPTABLE_RTT, MAX_CLOCK_SKEW, MAX_VALID_STRATUM, MIN_VALID_STRATUM,
};
use crate::ntp::client::Response;

/// Outcome of validating one response.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    /// Confidence in the server, 1.0 = fully trusted
    pub trust_score: f64,
}

/// NTP response validator.
#[derive(Debug, Clone)]
pub struct Validator {
    max_clock_skew_secs: f64,
    max_rtt_secs: f64,
    min_stratum: u8,
    max_stratum: u8,
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}

impl Validator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_clock_skew_secs: MAX_CLOCK_SKEW.as_secs_f64(),
            max_rtt_secs: MAX_ACCEPTABLE_RTT.as_secs_f64(),
            min_stratum: MIN_VALID_STRATUM,
            max_stratum: MAX_VALID_STRATUM,
        }
    }

    /// Produce the verdict for a response.
    #[must_use]
    pub fn validate(&self, resp: &Response) -> ValidationResult {
        let mut result = ValidationResult {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
            trust_score: 1.0,
        };

        if resp.stratum < self.min_stratum {
            result.errors.push(format!(
                "stratum {} below minimum {}",
                resp.stratum, self.min_stratum
            ));
            result.valid = false;
            result.trust_score -= 0.3;
        }
        if resp.stratum > self.max_stratum {
            result.errors.push(format!(
                "stratum {} above maximum {}",
                resp.stratum, self.max_stratum
            ));
            result.valid = false;
            result.trust_score -= 0.3;
        }

        if resp.is_kiss_of_death() {
            result
                .errors
                .push(format!("kiss-of-death received: {}", resp.kiss_code));
            result.valid = false;
            result.trust_score -= 0.5;
        }

        if resp.rtt_seconds < 0.0 {
            result.errors.push("negative RTT".to_string());
            result.valid = false;
            result.trust_score -= 0.3;
        }

        if resp.offset_seconds.abs() >= self.max_clock_skew_secs {
            result
                .warnings
                .push(format!("large clock offset: {:.3}s", resp.offset_seconds));
            result.trust_score -= 0.2;
        }

        if resp.rtt_seconds > self.max_rtt_secs {
            result
                .warnings
                .push(format!("high RTT: {:.3}s", resp.rtt_seconds));
            result.trust_score -= 0.1;
        }

        if resp.leap_indicator == 3 {
            result
                .warnings
                .push("clock not synchronized (leap indicator = 3)".to_string());
            result.trust_score -= 0.2;
        }

        if resp.reference_time.is_none() {
            result.warnings.push("zero reference time".to_string());
            result.trust_score -= 0.1;
        }

        result.trust_score = result.trust_score.clamp(0.0, 1.0);
        result
    }

    /// First matching suspicion tag, in fixed priority order.
    #[must_use]
    pub fn suspicion_reason(&self, resp: &Response) -> &'static str {
        if resp.stratum == 0 && !resp.is_kiss_of_death() {
            return "invalid_stratum";
        }
        if resp.stratum > self.max_stratum {
            return "stratum_too_high";
        }
        if resp.is_kiss_of_death() {
            return "kod_received";
        }
        if resp.offset_seconds.abs() >= self.max_clock_skew_secs {
            return "time_mismatch";
        }
        if resp.rtt_seconds > self.max_rtt_secs {
            return "high_rtt";
        }
        if !resp.is_valid() {
            return "validation_failed";
        }
        "unknown"
    }
}

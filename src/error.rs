//! Error types for NTP querying and the fault-tolerance layers around it
//!
//! Every failure a query can hit on its way to the wire (or back) has its own
//! variant so callers can tell a breaker rejection from a genuine network
//! fault. Collectors log and swallow these per server; nothing here aborts a
//! collection cycle.

use std::time::Duration;
use thiserror::Error;

/// Errors produced by the NTP query stack
#[derive(Debug, Error)]
pub enum QueryError {
    /// Transport-level failure (socket create, send, receive)
    #[error("network error querying {server}: {source}")]
    Network {
        server: String,
        #[source]
        source: std::io::Error,
    },

    /// The exchange exceeded its deadline
    #[error("query to {server} timed out after {timeout:?}")]
    Timeout { server: String, timeout: Duration },

    /// Caller-initiated cancellation observed
    #[error("query cancelled")]
    Cancelled,

    /// Reply bytes were received but failed structural validation
    #[error("malformed response from {server}: {reason}")]
    MalformedResponse { server: String, reason: String },

    /// Rejected by the local rate limiter
    #[error("rate limit exceeded for {server}")]
    RateLimited { server: String },

    /// Rejected because the per-server circuit breaker is open
    #[error("circuit breaker open for {server}")]
    CircuitOpen { server: String },

    /// Every sample of a multi-sample query failed
    #[error("all {count} NTP queries failed for server {server}")]
    AllSamplesFailed { server: String, count: usize },

    /// DNS resolution failed with no usable cache entry and no fallback
    #[error("failed to resolve {host}: {reason}")]
    ResolutionFailed { host: String, reason: String },

    /// Operation invoked with an empty target list
    #[error("no servers to query")]
    NoServers,

    /// Worker pool re-entry attempt
    #[error("worker pool already running")]
    AlreadyRunning,
}

impl QueryError {
    /// True when the error came from the fault-isolation layers rather than
    /// the network itself (useful for log verbosity decisions).
    #[must_use]
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::CircuitOpen { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_error_names_server() {
        let err = QueryError::Network {
            server: "time.example.com".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
        };
        let msg = err.to_string();
        assert!(msg.contains("time.example.com"));
        assert!(msg.contains("refused"));
    }

    #[test]
    fn all_samples_failed_names_host_and_count() {
        let err = QueryError::AllSamplesFailed {
            server: "10.0.0.1".to_string(),
            count: 5,
        };
        let msg = err.to_string();
        assert!(msg.contains("10.0.0.1"));
        assert!(msg.contains('5'));
    }

    #[test]
    fn rejections_are_classified() {
        assert!(
            QueryError::CircuitOpen {
                server: "s".to_string()
            }
            .is_rejection()
        );
        assert!(
            QueryError::RateLimited {
                server: "s".to_string()
            }
            .is_rejection()
        );
        assert!(!QueryError::NoServers.is_rejection());
    }
}

//! NTP wire client
//!
//! One exchange per call: send a client-mode packet, accept the first
//! well-formed reply, derive offset and round-trip time from the four
//! timestamps. The client never retries; fault policy lives in the layers
//! wrapping it (rate limiter, circuit breaker, collectors).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::constants::{protocol, query, validation};
use crate::error::QueryError;
use crate::ntp::packet::{self, Packet};
use crate::ntp::ratelimit::RateLimiter;

/// One completed NTP exchange, immutable once constructed.
#[derive(Debug, Clone)]
pub struct Response {
    /// Target server exactly as configured
    pub server: String,
    /// Clock offset in seconds (positive: server clock is ahead)
    pub offset_seconds: f64,
    /// Round-trip time in seconds, clamped at zero on receive
    pub rtt_seconds: f64,
    /// Server stratum
    pub stratum: u8,
    /// Server reference timestamp, `None` when zero on the wire
    pub reference_time: Option<SystemTime>,
    /// Root delay to the reference clock
    pub root_delay: Duration,
    /// Root dispersion to the reference clock
    pub root_dispersion: Duration,
    /// Root distance: dispersion + delay / 2
    pub root_distance: Duration,
    /// Server clock precision
    pub precision: Duration,
    /// Server poll interval
    pub poll: Duration,
    /// Leap indicator (3 = clock not synchronized)
    pub leap_indicator: u8,
    /// Raw reference identifier
    pub reference_id: u32,
    /// Kiss-of-death code from a stratum-0 reply, empty when none
    pub kiss_code: String,
    /// Set when the reply parsed but failed structural validation
    pub validation_error: Option<String>,
}

impl Response {
    /// True when the server answered with a kiss-of-death code.
    #[must_use]
    pub fn is_kiss_of_death(&self) -> bool {
        !self.kiss_code.is_empty()
    }

    /// True when the reply passed structural validation.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.validation_error.is_none()
    }

    /// Heuristic check for replies that should not be trusted.
    #[must_use]
    pub fn is_suspicious(&self) -> bool {
        if self.stratum < validation::MIN_VALID_STRATUM
            || self.stratum > validation::MAX_VALID_STRATUM
        {
            return true;
        }
        if self.is_kiss_of_death() || !self.is_valid() {
            return true;
        }
        if self.offset_seconds.abs() >= validation::MAX_CLOCK_SKEW.as_secs_f64() {
            return true;
        }
        self.rtt_seconds > validation::MAX_ACCEPTABLE_RTT.as_secs_f64()
    }

    /// Reference timestamp as Unix seconds for metric emission (0 = unknown).
    #[must_use]
    pub fn reference_unix_seconds(&self) -> f64 {
        self.reference_time
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map_or(0.0, |d| d.as_secs_f64())
    }
}

/// Capability the whole query stack programs against. Decorators (rate
/// limiting is inside the client, circuit breaking wraps it) and consumers
/// (pool, worker pool, sampler, collectors) only see this trait.
#[async_trait]
pub trait NtpQuerier: Send + Sync {
    /// Perform a single NTP exchange with `server`.
    async fn query(
        &self,
        cancel: &CancellationToken,
        server: &str,
    ) -> Result<Response, QueryError>;

    /// Issue up to `count` sequential exchanges with a short inter-query
    /// delay. Failed samples are skipped; cancellation returns the partial
    /// set collected so far.
    async fn query_multiple(
        &self,
        cancel: &CancellationToken,
        server: &str,
        count: usize,
    ) -> Result<Vec<Response>, QueryError>;
}

/// UDP NTP client with optional rate limiting.
pub struct NtpClient {
    timeout: Duration,
    version: u8,
    rate_limiter: Option<Arc<RateLimiter>>,
}

impl NtpClient {
    /// Create a client without rate limiting.
    #[must_use]
    pub fn new(timeout: Duration, version: u8) -> Self {
        Self {
            timeout,
            version,
            rate_limiter: None,
        }
    }

    /// Create a client that gates every exchange through the given limiter.
    #[must_use]
    pub fn with_rate_limiter(timeout: Duration, version: u8, limiter: Arc<RateLimiter>) -> Self {
        Self {
            timeout,
            version,
            rate_limiter: Some(limiter),
        }
    }

    /// Resolve the configured server string to a socket address.
    ///
    /// `host:port` forms are used verbatim; bare hosts get the NTP port.
    async fn resolve_target(&self, server: &str) -> Result<SocketAddr, QueryError> {
        if let Ok(addr) = server.parse::<SocketAddr>() {
            return Ok(addr);
        }
        let mut addrs = tokio::net::lookup_host((server, protocol::NTP_PORT))
            .await
            .map_err(|source| QueryError::Network {
                server: server.to_string(),
                source,
            })?;
        addrs.next().ok_or_else(|| QueryError::ResolutionFailed {
            host: server.to_string(),
            reason: "no addresses returned".to_string(),
        })
    }

    /// One request/response exchange, without timeout or cancellation
    /// handling (the caller wraps this future).
    async fn exchange(&self, server: &str) -> Result<Response, QueryError> {
        let target = self.resolve_target(server).await?;
        let bind_addr = if target.is_ipv4() {
            SocketAddr::from((std::net::Ipv4Addr::UNSPECIFIED, 0))
        } else {
            SocketAddr::from((std::net::Ipv6Addr::UNSPECIFIED, 0))
        };

        let net_err = |source: std::io::Error| QueryError::Network {
            server: server.to_string(),
            source,
        };

        let socket = UdpSocket::bind(bind_addr).await.map_err(net_err)?;
        socket.connect(target).await.map_err(net_err)?;

        let t1_raw = packet::system_time_to_timestamp(SystemTime::now());
        let request = Packet::client_request(self.version, t1_raw);
        socket.send(&request.encode()).await.map_err(net_err)?;

        let mut buf = [0u8; 512];
        let n = socket.recv(&mut buf).await.map_err(net_err)?;
        let t4_raw = packet::system_time_to_timestamp(SystemTime::now());

        let reply = Packet::decode(&buf[..n]).map_err(|e| QueryError::MalformedResponse {
            server: server.to_string(),
            reason: e.to_string(),
        })?;

        Ok(build_response(server, &reply, t1_raw, t4_raw))
    }
}

/// Assemble a [`Response`] from a decoded reply and the local send/receive
/// timestamps.
fn build_response(server: &str, reply: &Packet, t1_raw: u64, t4_raw: u64) -> Response {
    let kiss_code = reply.kiss_code().unwrap_or_default();

    let t1 = packet::timestamp_to_unix_nanos(t1_raw);
    let t2 = packet::timestamp_to_unix_nanos(reply.receive_ts);
    let t3 = packet::timestamp_to_unix_nanos(reply.transmit_ts);
    let t4 = packet::timestamp_to_unix_nanos(t4_raw);

    let (offset_seconds, rtt_seconds, timestamps_usable) = match (t1, t2, t3, t4) {
        (Some(t1), Some(t2), Some(t3), Some(t4)) => {
            let offset_ns = ((t2 - t1) + (t3 - t4)) / 2;
            let rtt_ns = ((t4 - t1) - (t3 - t2)).max(0);
            (
                offset_ns as f64 / 1e9,
                rtt_ns as f64 / 1e9,
                true,
            )
        }
        _ => (0.0, 0.0, false),
    };

    let mut problems = Vec::new();
    if reply.mode != protocol::MODE_SERVER {
        problems.push(format!("unexpected mode {} in reply", reply.mode));
    }
    if reply.origin_ts != t1_raw {
        problems.push("origin timestamp does not match request".to_string());
    }
    if !timestamps_usable {
        problems.push("zero server timestamp".to_string());
    }
    if reply.stratum == 0 && kiss_code.is_empty() {
        problems.push("stratum 0 without kiss code".to_string());
    }
    if reply.stratum >= 16 {
        problems.push(format!("unsynchronized stratum {}", reply.stratum));
    }

    let root_delay = packet::short_to_duration(reply.root_delay);
    let root_dispersion = packet::short_to_duration(reply.root_dispersion);

    Response {
        server: server.to_string(),
        offset_seconds,
        rtt_seconds,
        stratum: reply.stratum,
        reference_time: packet::timestamp_to_unix_nanos(reply.reference_ts)
            .filter(|&ns| ns >= 0)
            .map(|ns| UNIX_EPOCH + Duration::from_nanos(ns as u64)),
        root_delay,
        root_dispersion,
        root_distance: root_dispersion + root_delay / 2,
        precision: packet::exponent_to_duration(reply.precision),
        poll: packet::exponent_to_duration(reply.poll),
        leap_indicator: reply.leap,
        reference_id: reply.reference_id,
        kiss_code,
        validation_error: if problems.is_empty() {
            None
        } else {
            Some(problems.join("; "))
        },
    }
}

#[async_trait]
impl NtpQuerier for NtpClient {
    async fn query(
        &self,
        cancel: &CancellationToken,
        server: &str,
    ) -> Result<Response, QueryError> {
        if let Some(limiter) = &self.rate_limiter {
            limiter.wait(cancel, server).await?;
        }

        let result = tokio::select! {
            () = cancel.cancelled() => return Err(QueryError::Cancelled),
            result = tokio::time::timeout(self.timeout, self.exchange(server)) => result,
        };

        match result {
            Ok(Ok(response)) => {
                if let Some(reason) = &response.validation_error {
                    debug!(server, reason, "NTP response failed validation");
                } else {
                    debug!(
                        server,
                        offset = response.offset_seconds,
                        rtt = response.rtt_seconds,
                        stratum = response.stratum,
                        "NTP query successful"
                    );
                }
                Ok(response)
            }
            Ok(Err(err)) => Err(err),
            Err(_elapsed) => Err(QueryError::Timeout {
                server: server.to_string(),
                timeout: self.timeout,
            }),
        }
    }

    async fn query_multiple(
        &self,
        cancel: &CancellationToken,
        server: &str,
        count: usize,
    ) -> Result<Vec<Response>, QueryError> {
        let mut responses = Vec::with_capacity(count);

        for attempt in 0..count {
            if cancel.is_cancelled() {
                if responses.is_empty() {
                    return Err(QueryError::Cancelled);
                }
                return Ok(responses);
            }

            match self.query(cancel, server).await {
                Ok(response) => responses.push(response),
                Err(err) => {
                    debug!(server, attempt = attempt + 1, error = %err, "NTP sample failed");
                }
            }

            if attempt + 1 < count {
                tokio::select! {
                    () = cancel.cancelled() => {
                        if responses.is_empty() {
                            return Err(QueryError::Cancelled);
                        }
                        return Ok(responses);
                    }
                    () = tokio::time::sleep(query::DELAY_BETWEEN_SAMPLES) => {}
                }
            }
        }

        if responses.is_empty() {
            return Err(QueryError::AllSamplesFailed {
                server: server.to_string(),
                count,
            });
        }

        debug!(
            server,
            successful = responses.len(),
            total = count,
            "multi-sample query completed"
        );
        Ok(responses)
    }
}

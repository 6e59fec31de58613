//! Per-server circuit breaking around an [`NtpQuerier`]
//!
//! Each target gets an independent three-state machine. In `Closed` the
//! breaker counts outcomes over a rolling interval and trips once the
//! failure ratio crosses the configured threshold; `Open` rejects without
//! touching the network; after the open timeout a limited number of
//! `HalfOpen` probes decide between closing again and re-opening.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::QueryError;
use crate::ntp::client::{NtpQuerier, Response};

/// Requests a breaker must have seen in the current interval before it can
/// trip. Prevents a single failed probe from opening the circuit.
const MIN_REQUESTS_TO_TRIP: u32 = 3;

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Requests pass through; outcomes are counted
    Closed,
    /// Requests are rejected immediately
    Open,
    /// A bounded number of probes may pass through
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half-open",
        })
    }
}

/// Outcome counters for the current window
#[derive(Debug, Clone, Copy, Default)]
pub struct Counts {
    pub requests: u32,
    pub total_successes: u32,
    pub total_failures: u32,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
}

impl Counts {
    fn record_success(&mut self) {
        self.total_successes += 1;
        self.consecutive_successes += 1;
        self.consecutive_failures = 0;
    }

    fn record_failure(&mut self) {
        self.total_failures += 1;
        self.consecutive_failures += 1;
        self.consecutive_successes = 0;
    }

    fn failure_ratio(&self) -> f64 {
        if self.requests == 0 {
            return 0.0;
        }
        f64::from(self.total_failures) / f64::from(self.requests)
    }
}

/// Breaker tuning, shared by every per-server instance
#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    /// Probes admitted while half-open; reaching this many successes closes
    pub max_requests: u32,
    /// Rolling window after which closed-state counters reset
    pub interval: Duration,
    /// How long the breaker stays open before probing
    pub timeout: Duration,
    /// Failure ratio in [0, 1] that trips a closed breaker
    pub failure_threshold: f64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            max_requests: 3,
            interval: Duration::from_secs(60),
            timeout: Duration::from_secs(30),
            failure_threshold: 0.6,
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    counts: Counts,
    /// When the breaker entered `Open`
    opened_at: Option<Instant>,
    /// Start of the current closed-state counting window
    window_start: Instant,
}

/// State machine for a single target.
#[derive(Debug)]
pub struct CircuitBreaker {
    server: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(server: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            server: server.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                counts: Counts::default(),
                opened_at: None,
                window_start: Instant::now(),
            }),
        }
    }

    /// Apply time-driven transitions: open-timeout expiry and the rolling
    /// closed-state window reset. Must hold the lock.
    fn advance(&self, inner: &mut BreakerInner, now: Instant) {
        match inner.state {
            CircuitState::Open => {
                let expired = inner
                    .opened_at
                    .is_some_and(|at| now.duration_since(at) >= self.config.timeout);
                if expired {
                    debug!(server = %self.server, "circuit breaker half-open, probing");
                    inner.state = CircuitState::HalfOpen;
                    inner.counts = Counts::default();
                    inner.opened_at = None;
                }
            }
            CircuitState::Closed => {
                if !self.config.interval.is_zero()
                    && now.duration_since(inner.window_start) >= self.config.interval
                {
                    inner.counts = Counts::default();
                    inner.window_start = now;
                }
            }
            CircuitState::HalfOpen => {}
        }
    }

    fn trip(&self, inner: &mut BreakerInner, now: Instant) {
        warn!(
            server = %self.server,
            failures = inner.counts.total_failures,
            requests = inner.counts.requests,
            "circuit breaker opened"
        );
        inner.state = CircuitState::Open;
        inner.counts = Counts::default();
        inner.opened_at = Some(now);
    }

    /// Admission check, counting the request when admitted.
    fn before_request(&self) -> Result<(), QueryError> {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        let now = Instant::now();
        self.advance(&mut inner, now);

        match inner.state {
            CircuitState::Open => Err(QueryError::CircuitOpen {
                server: self.server.clone(),
            }),
            CircuitState::HalfOpen if inner.counts.requests >= self.config.max_requests => {
                Err(QueryError::CircuitOpen {
                    server: self.server.clone(),
                })
            }
            _ => {
                inner.counts.requests += 1;
                Ok(())
            }
        }
    }

    fn on_success(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        let now = Instant::now();
        self.advance(&mut inner, now);
        inner.counts.record_success();

        if inner.state == CircuitState::HalfOpen
            && inner.counts.consecutive_successes >= self.config.max_requests
        {
            debug!(server = %self.server, "circuit breaker closed");
            inner.state = CircuitState::Closed;
            inner.counts = Counts::default();
            inner.window_start = now;
        }
    }

    fn on_failure(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        let now = Instant::now();
        self.advance(&mut inner, now);
        inner.counts.record_failure();

        match inner.state {
            CircuitState::Closed => {
                if inner.counts.requests >= MIN_REQUESTS_TO_TRIP
                    && inner.counts.failure_ratio() >= self.config.failure_threshold
                {
                    self.trip(&mut inner, now);
                }
            }
            CircuitState::HalfOpen => self.trip(&mut inner, now),
            CircuitState::Open => {}
        }
    }

    /// Current state, with time-driven transitions applied.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        self.advance(&mut inner, Instant::now());
        inner.state
    }

    /// Snapshot of the current window's counters.
    #[must_use]
    pub fn counts(&self) -> Counts {
        self.inner.lock().expect("breaker lock poisoned").counts
    }
}

/// [`NtpQuerier`] decorator applying one [`CircuitBreaker`] per target.
pub struct CircuitBreakerClient {
    querier: Arc<dyn NtpQuerier>,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
    config: BreakerConfig,
}

impl CircuitBreakerClient {
    #[must_use]
    pub fn new(querier: Arc<dyn NtpQuerier>, config: BreakerConfig) -> Self {
        Self {
            querier,
            breakers: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Get or lazily create the breaker for a target. Read lock on the hot
    /// path; insertion re-checks under the write lock.
    fn breaker_for(&self, server: &str) -> Arc<CircuitBreaker> {
        {
            let breakers = self.breakers.read().expect("breaker map poisoned");
            if let Some(breaker) = breakers.get(server) {
                return Arc::clone(breaker);
            }
        }

        let mut breakers = self.breakers.write().expect("breaker map poisoned");
        if let Some(breaker) = breakers.get(server) {
            return Arc::clone(breaker);
        }
        let breaker = Arc::new(CircuitBreaker::new(server, self.config));
        breakers.insert(server.to_string(), Arc::clone(&breaker));
        breaker
    }

    /// State of a target's breaker; unseen targets report `Closed`.
    #[must_use]
    pub fn state(&self, server: &str) -> CircuitState {
        let breakers = self.breakers.read().expect("breaker map poisoned");
        breakers
            .get(server)
            .map_or(CircuitState::Closed, |b| b.state())
    }

    /// States of every breaker created so far.
    #[must_use]
    pub fn all_states(&self) -> HashMap<String, CircuitState> {
        let breakers = self.breakers.read().expect("breaker map poisoned");
        breakers
            .iter()
            .map(|(server, breaker)| (server.clone(), breaker.state()))
            .collect()
    }
}

#[async_trait]
impl NtpQuerier for CircuitBreakerClient {
    async fn query(
        &self,
        cancel: &CancellationToken,
        server: &str,
    ) -> Result<Response, QueryError> {
        let breaker = self.breaker_for(server);
        breaker.before_request()?;

        match self.querier.query(cancel, server).await {
            Ok(response) => {
                breaker.on_success();
                Ok(response)
            }
            Err(err) => {
                breaker.on_failure();
                Err(err)
            }
        }
    }

    async fn query_multiple(
        &self,
        cancel: &CancellationToken,
        server: &str,
        count: usize,
    ) -> Result<Vec<Response>, QueryError> {
        let breaker = self.breaker_for(server);
        breaker.before_request()?;

        match self.querier.query_multiple(cancel, server, count).await {
            Ok(responses) => {
                breaker.on_success();
                Ok(responses)
            }
            Err(err) => {
                breaker.on_failure();
                Err(err)
            }
        }
    }
}

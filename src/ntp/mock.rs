//! Programmable fakes for the query stack
//!
//! `MockQuerier` stands in for the wire client anywhere an [`NtpQuerier`] is
//! accepted; `MockResolver` does the same for DNS resolution. Both are used
//! by the unit tests in this crate and by the integration tests under
//! `tests/`.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::QueryError;
use crate::ntp::client::{NtpQuerier, Response};
use crate::ntp::dns_cache::HostResolver;

/// A plausible healthy response for tests to start from.
#[must_use]
pub fn sample_response(server: &str) -> Response {
    Response {
        server: server.to_string(),
        offset_seconds: 0.0032,
        rtt_seconds: 0.040,
        stratum: 2,
        reference_time: Some(std::time::SystemTime::now()),
        root_delay: Duration::from_millis(8),
        root_dispersion: Duration::from_millis(4),
        root_distance: Duration::from_millis(8),
        precision: Duration::from_micros(1),
        poll: Duration::from_secs(64),
        leap_indicator: 0,
        reference_id: 0x0a00_0001,
        kiss_code: String::new(),
        validation_error: None,
    }
}

/// Scripted querier. Results are enqueued per server and consumed in order;
/// when a server's queue runs dry the default response (if any) is replayed,
/// otherwise a timeout error is produced.
#[derive(Default)]
pub struct MockQuerier {
    scripts: Mutex<HashMap<String, VecDeque<Result<Response, QueryError>>>>,
    default_response: Mutex<Option<Response>>,
    call_counts: Mutex<HashMap<String, usize>>,
    total_calls: AtomicUsize,
    /// Optional artificial latency per query, for concurrency tests
    query_delay: Mutex<Option<Duration>>,
}

impl MockQuerier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replay `response` whenever a server's script is exhausted.
    #[must_use]
    pub fn with_default_response(self, response: Response) -> Self {
        *self.default_response.lock().unwrap() = Some(response);
        self
    }

    /// Delay every query by `delay` (used to hold the worker pool busy).
    #[must_use]
    pub fn with_query_delay(self, delay: Duration) -> Self {
        *self.query_delay.lock().unwrap() = Some(delay);
        self
    }

    /// Append one scripted result for `server`.
    pub fn enqueue(&self, server: &str, result: Result<Response, QueryError>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(server.to_string())
            .or_default()
            .push_back(result);
    }

    /// Append `n` timeout failures for `server`.
    pub fn enqueue_failures(&self, server: &str, n: usize) {
        for _ in 0..n {
            self.enqueue(
                server,
                Err(QueryError::Timeout {
                    server: server.to_string(),
                    timeout: Duration::from_secs(5),
                }),
            );
        }
    }

    /// Total queries issued across all servers.
    #[must_use]
    pub fn total_calls(&self) -> usize {
        self.total_calls.load(Ordering::SeqCst)
    }

    /// Queries issued against one server.
    #[must_use]
    pub fn calls(&self, server: &str) -> usize {
        self.call_counts
            .lock()
            .unwrap()
            .get(server)
            .copied()
            .unwrap_or(0)
    }

    fn next_result(&self, server: &str) -> Result<Response, QueryError> {
        self.total_calls.fetch_add(1, Ordering::SeqCst);
        *self
            .call_counts
            .lock()
            .unwrap()
            .entry(server.to_string())
            .or_insert(0) += 1;

        if let Some(result) = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(server)
            .and_then(VecDeque::pop_front)
        {
            return result;
        }

        match self.default_response.lock().unwrap().clone() {
            Some(mut response) => {
                response.server = server.to_string();
                Ok(response)
            }
            None => Err(QueryError::Timeout {
                server: server.to_string(),
                timeout: Duration::from_secs(5),
            }),
        }
    }
}

#[async_trait]
impl NtpQuerier for MockQuerier {
    async fn query(
        &self,
        cancel: &CancellationToken,
        server: &str,
    ) -> Result<Response, QueryError> {
        if cancel.is_cancelled() {
            return Err(QueryError::Cancelled);
        }
        let delay = *self.query_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.next_result(server)
    }

    async fn query_multiple(
        &self,
        cancel: &CancellationToken,
        server: &str,
        count: usize,
    ) -> Result<Vec<Response>, QueryError> {
        let mut responses = Vec::new();
        for _ in 0..count {
            if cancel.is_cancelled() {
                if responses.is_empty() {
                    return Err(QueryError::Cancelled);
                }
                return Ok(responses);
            }
            match self.query(cancel, server).await {
                Ok(response) => responses.push(response),
                Err(QueryError::Cancelled) => break,
                Err(_) => {}
            }
        }
        if responses.is_empty() {
            return Err(QueryError::AllSamplesFailed {
                server: server.to_string(),
                count,
            });
        }
        Ok(responses)
    }
}

/// Scripted DNS resolver.
#[derive(Default)]
pub struct MockResolver {
    results: Mutex<HashMap<String, VecDeque<std::io::Result<Vec<String>>>>>,
    default_ips: Mutex<Option<Vec<String>>>,
    calls: AtomicUsize,
}

impl MockResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every un-scripted lookup with these addresses.
    #[must_use]
    pub fn with_default_ips(self, ips: &[&str]) -> Self {
        *self.default_ips.lock().unwrap() = Some(ips.iter().map(ToString::to_string).collect());
        self
    }

    /// Append one scripted lookup result for `host`.
    pub fn enqueue(&self, host: &str, result: std::io::Result<Vec<String>>) {
        self.results
            .lock()
            .unwrap()
            .entry(host.to_string())
            .or_default()
            .push_back(result);
    }

    /// Append a lookup failure for `host`.
    pub fn enqueue_failure(&self, host: &str) {
        self.enqueue(
            host,
            Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no such host",
            )),
        );
    }

    /// Number of lookups performed (cache hits never reach the resolver).
    #[must_use]
    pub fn lookups(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HostResolver for MockResolver {
    async fn resolve(&self, host: &str) -> std::io::Result<Vec<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(result) = self
            .results
            .lock()
            .unwrap()
            .get_mut(host)
            .and_then(VecDeque::pop_front)
        {
            return result;
        }
        match self.default_ips.lock().unwrap().clone() {
            Some(ips) => Ok(ips),
            None => Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no scripted result for {host}"),
            )),
        }
    }
}

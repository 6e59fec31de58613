//! Bounded-parallelism executor for per-server query jobs
//!
//! One job per server, at most `size` in flight at a time. The pool is not
//! re-entrant: a second `execute` on the same instance fails fast while the
//! first is still running. Cancellation stops handing out permits; jobs that
//! never started report the cancellation as their error.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::QueryError;
use crate::ntp::client::{NtpQuerier, Response};
use crate::ntp::stats::{self, Statistics};

/// Outcome of one server's job.
#[derive(Debug)]
pub struct JobResult {
    pub server: String,
    pub responses: Vec<Response>,
    pub error: Option<QueryError>,
    /// Wall-clock time the job spent querying
    pub duration: Duration,
}

/// Clears the running flag when `execute` unwinds on any path.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Bounded worker pool over an [`NtpQuerier`].
pub struct WorkerPool {
    size: usize,
    querier: Arc<dyn NtpQuerier>,
    running: AtomicBool,
}

impl WorkerPool {
    /// Create a pool with the given parallelism; zero is normalized to one.
    #[must_use]
    pub fn new(size: usize, querier: Arc<dyn NtpQuerier>) -> Self {
        Self {
            size: size.max(1),
            querier,
            running: AtomicBool::new(false),
        }
    }

    /// Configured parallelism.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Run one `query_multiple` job per server, collecting results by server
    /// name. Jobs that fail stay in the result map with their error set.
    pub async fn execute(
        &self,
        cancel: &CancellationToken,
        servers: &[String],
        samples: usize,
    ) -> Result<HashMap<String, JobResult>, QueryError> {
        if servers.is_empty() {
            return Err(QueryError::NoServers);
        }
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(QueryError::AlreadyRunning);
        }
        let _guard = RunningGuard(&self.running);

        let semaphore = Arc::new(Semaphore::new(self.size));
        let mut handles = Vec::with_capacity(servers.len());

        for server in servers {
            let server = server.clone();
            let querier = Arc::clone(&self.querier);
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();

            handles.push(tokio::spawn(async move {
                let permit = tokio::select! {
                    () = cancel.cancelled() => None,
                    permit = semaphore.acquire_owned() => permit.ok(),
                };
                let Some(_permit) = permit else {
                    return JobResult {
                        server,
                        responses: Vec::new(),
                        error: Some(QueryError::Cancelled),
                        duration: Duration::ZERO,
                    };
                };

                let start = Instant::now();
                match querier.query_multiple(&cancel, &server, samples).await {
                    Ok(responses) => JobResult {
                        server,
                        responses,
                        error: None,
                        duration: start.elapsed(),
                    },
                    Err(error) => JobResult {
                        server,
                        responses: Vec::new(),
                        error: Some(error),
                        duration: start.elapsed(),
                    },
                }
            }));
        }

        let mut results = HashMap::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(result) => {
                    results.insert(result.server.clone(), result);
                }
                Err(err) => warn!(error = %err, "worker task failed to join"),
            }
        }

        Ok(results)
    }

    /// `execute` followed by per-server statistics. A server with no
    /// successful samples yields an all-zero struct with total packet loss.
    pub async fn query_all(
        &self,
        cancel: &CancellationToken,
        servers: &[String],
        samples: usize,
    ) -> Result<HashMap<String, Statistics>, QueryError> {
        let results = self.execute(cancel, servers, samples).await?;

        Ok(results
            .into_iter()
            .map(|(server, result)| {
                let statistics = if result.error.is_some() {
                    stats::calculate_statistics(&[], samples)
                } else {
                    stats::calculate_statistics(&result.responses, samples)
                };
                (server, statistics)
            })
            .collect())
    }
}

//! Token-bucket rate limiting for outbound NTP queries
//!
//! Two gates cooperate: one global bucket shared by every target and one
//! bucket per target, created lazily on first sight and retained for the
//! process lifetime. `wait` blocks until both grant a token or the caller
//! cancels; `allow` is the non-blocking variant used for probes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::error::QueryError;

/// Classic token bucket. Refill happens on access; no background task.
#[derive(Debug)]
struct TokenBucket {
    /// Tokens added per second
    rate: f64,
    /// Bucket capacity
    burst: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(rate: u32, burst: u32) -> Self {
        let burst = f64::from(burst.max(1));
        Self {
            rate: f64::from(rate.max(1)),
            burst,
            tokens: burst,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.burst);
        self.last_refill = now;
    }

    /// Take one token, or report how long until one becomes available.
    fn try_acquire(&mut self, now: Instant) -> Option<Duration> {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            None
        } else {
            Some(Duration::from_secs_f64((1.0 - self.tokens) / self.rate))
        }
    }
}

/// Global + per-target rate limiter.
pub struct RateLimiter {
    global: Mutex<TokenBucket>,
    per_server: RwLock<HashMap<String, Arc<Mutex<TokenBucket>>>>,
    per_server_rate: u32,
    burst: u32,
}

impl RateLimiter {
    /// Create a limiter with the given global rate, per-target rate, and
    /// shared burst size (all per second).
    #[must_use]
    pub fn new(global_rate: u32, per_server_rate: u32, burst: u32) -> Self {
        Self {
            global: Mutex::new(TokenBucket::new(global_rate, burst)),
            per_server: RwLock::new(HashMap::new()),
            per_server_rate,
            burst,
        }
    }

    /// Block until both the global and the per-target bucket grant a token.
    ///
    /// Cancellation while throttled surfaces as [`QueryError::RateLimited`]:
    /// the caller's deadline fired because of local throttling, not the
    /// network.
    pub async fn wait(&self, cancel: &CancellationToken, server: &str) -> Result<(), QueryError> {
        self.acquire(cancel, server, &self.global).await?;
        let bucket = self.bucket_for(server);
        self.acquire(cancel, server, &bucket).await
    }

    /// Non-blocking check used by probes. Consumes tokens on success.
    #[must_use]
    pub fn allow(&self, server: &str) -> bool {
        let now = Instant::now();
        if self
            .global
            .lock()
            .expect("rate limiter lock poisoned")
            .try_acquire(now)
            .is_some()
        {
            return false;
        }
        let bucket = self.bucket_for(server);
        let mut bucket = bucket.lock().expect("rate limiter lock poisoned");
        bucket.try_acquire(now).is_none()
    }

    async fn acquire(
        &self,
        cancel: &CancellationToken,
        server: &str,
        bucket: &Mutex<TokenBucket>,
    ) -> Result<(), QueryError> {
        loop {
            let wait = bucket
                .lock()
                .expect("rate limiter lock poisoned")
                .try_acquire(Instant::now());

            match wait {
                None => return Ok(()),
                Some(delay) => {
                    tokio::select! {
                        () = cancel.cancelled() => {
                            return Err(QueryError::RateLimited {
                                server: server.to_string(),
                            });
                        }
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// Get or lazily create the bucket for a target. Hot path takes the read
    /// lock only; insertion re-checks under the write lock.
    fn bucket_for(&self, server: &str) -> Arc<Mutex<TokenBucket>> {
        {
            let buckets = self.per_server.read().expect("rate limiter map poisoned");
            if let Some(bucket) = buckets.get(server) {
                return Arc::clone(bucket);
            }
        }

        let mut buckets = self.per_server.write().expect("rate limiter map poisoned");
        if let Some(bucket) = buckets.get(server) {
            return Arc::clone(bucket);
        }
        let bucket = Arc::new(Mutex::new(TokenBucket::new(
            self.per_server_rate,
            self.burst,
        )));
        buckets.insert(server.to_string(), Arc::clone(&bucket));
        bucket
    }

    /// Number of per-target buckets created so far.
    #[must_use]
    pub fn tracked_servers(&self) -> usize {
        self.per_server
            .read()
            .expect("rate limiter map poisoned")
            .len()
    }
}

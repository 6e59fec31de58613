//! Adaptive-TTL DNS cache for pool hostnames
//!
//! Resolution history drives the TTL: first sight gets the middle of the
//! configured range, a clean refresh gets the maximum, a refresh after
//! errors gets the minimum. When resolution fails and a previous entry is
//! still around, the stale addresses are served rather than failing the
//! pool query.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::constants::{protocol, query};
use crate::error::QueryError;

/// Resolution seam, injectable for tests.
#[async_trait]
pub trait HostResolver: Send + Sync {
    /// Resolve a hostname to its addresses as strings.
    async fn resolve(&self, host: &str) -> std::io::Result<Vec<String>>;
}

/// System resolver backed by tokio's `lookup_host`.
pub struct SystemResolver;

#[async_trait]
impl HostResolver for SystemResolver {
    async fn resolve(&self, host: &str) -> std::io::Result<Vec<String>> {
        let addrs: Vec<String> = tokio::net::lookup_host((host, protocol::NTP_PORT))
            .await?
            .map(|addr| addr.ip().to_string())
            .collect();
        if addrs.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no addresses for {host}"),
            ));
        }
        Ok(addrs)
    }
}

/// One cached resolution.
#[derive(Debug, Clone)]
pub struct DnsCacheEntry {
    pub ips: Vec<String>,
    pub expires_at: Instant,
    pub ttl: Duration,
    /// Consecutive failed refreshes since the last success
    pub error_count: u32,
}

/// TTL bounds for the cache.
#[derive(Debug, Clone, Copy)]
pub struct DnsCacheConfig {
    pub min_ttl: Duration,
    pub max_ttl: Duration,
}

impl Default for DnsCacheConfig {
    fn default() -> Self {
        Self {
            min_ttl: Duration::from_secs(5 * 60),
            max_ttl: Duration::from_secs(60 * 60),
        }
    }
}

/// Hostname → address cache with adaptive TTL and stale-on-error fallback.
pub struct DnsCache {
    entries: RwLock<HashMap<String, DnsCacheEntry>>,
    min_ttl: Duration,
    max_ttl: Duration,
    resolver: Box<dyn HostResolver>,
}

impl DnsCache {
    /// Cache using the system resolver.
    #[must_use]
    pub fn new(config: DnsCacheConfig) -> Self {
        Self::with_resolver(config, Box::new(SystemResolver))
    }

    /// Cache with an injected resolver (tests, alternative backends).
    #[must_use]
    pub fn with_resolver(config: DnsCacheConfig, resolver: Box<dyn HostResolver>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            min_ttl: config.min_ttl,
            max_ttl: config.max_ttl,
            resolver,
        }
    }

    /// Resolve a hostname, consulting the cache first.
    ///
    /// IP literals bypass the cache entirely. A failed refresh falls back to
    /// the stale entry when one exists, bumping its `error_count`.
    pub async fn resolve(
        &self,
        cancel: &CancellationToken,
        hostname: &str,
    ) -> Result<Vec<String>, QueryError> {
        if hostname.parse::<IpAddr>().is_ok() {
            return Ok(vec![hostname.to_string()]);
        }

        let had_entry = {
            let entries = self.entries.read().expect("dns cache lock poisoned");
            match entries.get(hostname) {
                Some(entry) if Instant::now() < entry.expires_at => {
                    debug!(hostname, ips = entry.ips.len(), "DNS cache hit");
                    return Ok(entry.ips.clone());
                }
                Some(entry) => Some(entry.error_count),
                None => None,
            }
        };

        debug!(hostname, "DNS cache miss, resolving");
        let lookup = tokio::time::timeout(
            query::DEFAULT_RESOLVE_TIMEOUT,
            self.resolver.resolve(hostname),
        );
        let result = tokio::select! {
            () = cancel.cancelled() => return Err(QueryError::Cancelled),
            result = lookup => match result {
                Ok(inner) => inner,
                Err(_elapsed) => Err(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "resolution timed out",
                )),
            },
        };

        match result {
            Ok(ips) => {
                let ttl = self.adaptive_ttl(had_entry);
                let mut entries = self.entries.write().expect("dns cache lock poisoned");
                entries.insert(
                    hostname.to_string(),
                    DnsCacheEntry {
                        ips: ips.clone(),
                        expires_at: Instant::now() + ttl,
                        ttl,
                        error_count: 0,
                    },
                );
                debug!(hostname, ips = ips.len(), ttl_secs = ttl.as_secs_f64(), "DNS cache updated");
                Ok(ips)
            }
            Err(err) => {
                if had_entry.is_some() {
                    let mut entries = self.entries.write().expect("dns cache lock poisoned");
                    if let Some(entry) = entries.get_mut(hostname) {
                        entry.error_count += 1;
                        warn!(
                            hostname,
                            error = %err,
                            error_count = entry.error_count,
                            "DNS resolution failed, serving stale entry"
                        );
                        return Ok(entry.ips.clone());
                    }
                }
                Err(QueryError::ResolutionFailed {
                    host: hostname.to_string(),
                    reason: err.to_string(),
                })
            }
        }
    }

    /// TTL for a fresh entry, from resolution history.
    fn adaptive_ttl(&self, prior_errors: Option<u32>) -> Duration {
        match prior_errors {
            None => (self.min_ttl + self.max_ttl) / 2,
            Some(errors) if errors > 0 => self.min_ttl,
            Some(_) => self.max_ttl,
        }
    }

    /// Remove a single hostname from the cache.
    pub fn invalidate(&self, hostname: &str) {
        let mut entries = self.entries.write().expect("dns cache lock poisoned");
        entries.remove(hostname);
        debug!(hostname, "DNS cache entry invalidated");
    }

    /// Remove everything.
    pub fn clear(&self) {
        let mut entries = self.entries.write().expect("dns cache lock poisoned");
        entries.clear();
        info!("DNS cache cleared");
    }

    /// Drop expired entries, returning how many were removed. The write lock
    /// is only taken when something actually expired.
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<String> = {
            let entries = self.entries.read().expect("dns cache lock poisoned");
            entries
                .iter()
                .filter(|(_, entry)| now >= entry.expires_at)
                .map(|(host, _)| host.clone())
                .collect()
        };

        if expired.is_empty() {
            return 0;
        }

        let mut entries = self.entries.write().expect("dns cache lock poisoned");
        let mut removed = 0;
        for host in expired {
            // Re-check under the write lock: a concurrent refresh may have
            // replaced the entry since the scan.
            if entries
                .get(&host)
                .is_some_and(|entry| now >= entry.expires_at)
            {
                entries.remove(&host);
                removed += 1;
            }
        }
        if removed > 0 {
            debug!(removed, "cleaned up expired DNS entries");
        }
        removed
    }

    /// Snapshot of one entry (primarily for tests and diagnostics).
    #[must_use]
    pub fn entry(&self, hostname: &str) -> Option<DnsCacheEntry> {
        let entries = self.entries.read().expect("dns cache lock poisoned");
        entries.get(hostname).cloned()
    }

    /// Number of cached hostnames, expired or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().expect("dns cache lock poisoned").len()
    }

    /// True when no entries are cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Spawn the periodic cleanup task. Stops when `cancel` fires.
    pub fn spawn_cleanup(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            info!(interval_secs = interval.as_secs_f64(), "DNS cache cleanup task started");
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick of tokio's interval fires immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        info!("DNS cache cleanup task stopped");
                        return;
                    }
                    _ = ticker.tick() => {
                        cache.cleanup_expired();
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ntp::mock::MockResolver;

    fn short_ttl_config() -> DnsCacheConfig {
        DnsCacheConfig {
            min_ttl: Duration::from_millis(10),
            max_ttl: Duration::from_millis(40),
        }
    }

    fn cache_with(resolver: MockResolver) -> DnsCache {
        DnsCache::with_resolver(short_ttl_config(), Box::new(resolver))
    }

    #[tokio::test]
    async fn ip_literals_bypass_the_cache() {
        let resolver = MockResolver::new();
        let cache = cache_with(resolver);
        let cancel = CancellationToken::new();

        let ips = cache.resolve(&cancel, "192.0.2.7").await.unwrap();
        assert_eq!(ips, vec!["192.0.2.7".to_string()]);
        let ips = cache.resolve(&cancel, "2001:db8::1").await.unwrap();
        assert_eq!(ips, vec!["2001:db8::1".to_string()]);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn hit_path_does_not_resolve_again() {
        let resolver = MockResolver::new().with_default_ips(&["10.0.0.1", "10.0.0.2"]);
        let cache = cache_with(resolver);
        let cancel = CancellationToken::new();

        let first = cache.resolve(&cancel, "pool.example.org").await.unwrap();
        let second = cache.resolve(&cancel, "pool.example.org").await.unwrap();
        assert_eq!(first, second);

        let entry = cache.entry("pool.example.org").unwrap();
        assert_eq!(entry.error_count, 0);
    }

    #[tokio::test]
    async fn first_store_uses_mid_range_ttl() {
        let resolver = MockResolver::new().with_default_ips(&["10.0.0.1"]);
        let cache = cache_with(resolver);
        let cancel = CancellationToken::new();

        cache.resolve(&cancel, "pool.example.org").await.unwrap();
        let entry = cache.entry("pool.example.org").unwrap();
        assert_eq!(entry.ttl, Duration::from_millis(25));
        assert!(entry.ttl >= short_ttl_config().min_ttl);
        assert!(entry.ttl <= short_ttl_config().max_ttl);
    }

    #[tokio::test]
    async fn clean_refresh_uses_max_ttl() {
        let resolver = MockResolver::new().with_default_ips(&["10.0.0.1"]);
        let cache = cache_with(resolver);
        let cancel = CancellationToken::new();

        cache.resolve(&cancel, "pool.example.org").await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        cache.resolve(&cancel, "pool.example.org").await.unwrap();

        let entry = cache.entry("pool.example.org").unwrap();
        assert_eq!(entry.ttl, short_ttl_config().max_ttl);
    }

    #[tokio::test]
    async fn stale_entry_served_on_resolution_failure() {
        let resolver = MockResolver::new();
        resolver.enqueue("pool.example.org", Ok(vec!["10.0.0.1".to_string()]));
        resolver.enqueue_failure("pool.example.org");
        let cache = cache_with(resolver);
        let cancel = CancellationToken::new();

        cache.resolve(&cancel, "pool.example.org").await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        let ips = cache.resolve(&cancel, "pool.example.org").await.unwrap();
        assert_eq!(ips, vec!["10.0.0.1".to_string()]);
        assert_eq!(cache.entry("pool.example.org").unwrap().error_count, 1);
    }

    #[tokio::test]
    async fn refresh_after_errors_uses_min_ttl() {
        let resolver = MockResolver::new();
        resolver.enqueue("pool.example.org", Ok(vec!["10.0.0.1".to_string()]));
        resolver.enqueue_failure("pool.example.org");
        resolver.enqueue("pool.example.org", Ok(vec!["10.0.0.9".to_string()]));
        let cache = cache_with(resolver);
        let cancel = CancellationToken::new();

        cache.resolve(&cancel, "pool.example.org").await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        // Expired entry, failed refresh: stale served, error recorded.
        cache.resolve(&cancel, "pool.example.org").await.unwrap();
        assert_eq!(cache.entry("pool.example.org").unwrap().error_count, 1);

        // Entry is still expired, so the next resolve refreshes; the error
        // history pins the new TTL to the minimum.
        let ips = cache.resolve(&cancel, "pool.example.org").await.unwrap();
        assert_eq!(ips, vec!["10.0.0.9".to_string()]);
        let entry = cache.entry("pool.example.org").unwrap();
        assert_eq!(entry.ttl, short_ttl_config().min_ttl);
        assert_eq!(entry.error_count, 0);
    }

    #[tokio::test]
    async fn failure_without_entry_propagates() {
        let resolver = MockResolver::new();
        resolver.enqueue_failure("missing.example.org");
        let cache = cache_with(resolver);
        let cancel = CancellationToken::new();

        let err = cache
            .resolve(&cancel, "missing.example.org")
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::ResolutionFailed { .. }));
    }

    #[tokio::test]
    async fn invalidate_and_clear() {
        let resolver = MockResolver::new().with_default_ips(&["10.0.0.1"]);
        let cache = cache_with(resolver);
        let cancel = CancellationToken::new();

        cache.resolve(&cancel, "a.example.org").await.unwrap();
        cache.resolve(&cancel, "b.example.org").await.unwrap();
        assert_eq!(cache.len(), 2);

        cache.invalidate("a.example.org");
        assert!(cache.entry("a.example.org").is_none());
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn cleanup_removes_only_expired_entries() {
        let resolver = MockResolver::new().with_default_ips(&["10.0.0.1"]);
        let cache = cache_with(resolver);
        let cancel = CancellationToken::new();

        cache.resolve(&cancel, "old.example.org").await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        cache.resolve(&cancel, "new.example.org").await.unwrap();

        let removed = cache.cleanup_expired();
        assert_eq!(removed, 1);
        assert!(cache.entry("old.example.org").is_none());
        assert!(cache.entry("new.example.org").is_some());
    }

    #[tokio::test]
    async fn cleanup_task_stops_on_cancel() {
        let resolver = MockResolver::new().with_default_ips(&["10.0.0.1"]);
        let cache = Arc::new(cache_with(resolver));
        let cancel = CancellationToken::new();

        let handle = cache.spawn_cleanup(Duration::from_millis(5), cancel.clone());
        tokio::time::sleep(Duration::from_millis(15)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("cleanup task did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn pre_cancelled_resolution_returns_cancelled() {
        let resolver = MockResolver::new().with_default_ips(&["10.0.0.1"]);
        let cache = cache_with(resolver);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = cache.resolve(&cancel, "pool.example.org").await.unwrap_err();
        assert!(matches!(err, QueryError::Cancelled));
    }
}

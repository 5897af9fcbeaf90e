use crate::config::DnsCacheConfig;
use dashmap::DashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

/// Outcome of a successful resolution, as stored in the cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsResolution {
    /// Queried name, or the CNAME target when the answer carried one;
    /// the target is recorded but never chased
    pub hostname: String,
    pub addresses: Vec<IpAddr>,
    /// Seconds of validity, the minimum TTL over the answer records
    pub ttl: u32,
    /// Wall-clock milliseconds at resolution time
    pub timestamp_ms: i64,
}

impl DnsResolution {
    fn is_fresh(&self, now_ms: i64) -> bool {
        now_ms - self.timestamp_ms <= i64::from(self.ttl) * 1000
    }
}

/// Cache statistics snapshot
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheStats {
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
    /// Percentage of lookups served from the cache
    pub hit_rate: f64,
}

/// TTL-aware resolution cache keyed by hostname
///
/// A lookup that finds a stale entry deletes it as a side effect and
/// counts as a miss.
pub struct DnsCache {
    entries: DashMap<String, DnsResolution>,
    hits: AtomicU64,
    misses: AtomicU64,
    config: DnsCacheConfig,
    cleanup: Mutex<Option<watch::Sender<bool>>>,
}

impl Default for DnsCache {
    fn default() -> Self {
        Self::new(DnsCacheConfig::default())
    }
}

impl DnsCache {
    pub fn new(config: DnsCacheConfig) -> Self {
        Self {
            entries: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            config,
            cleanup: Mutex::new(None),
        }
    }

    /// Fetch a fresh entry; a stale one is evicted on the way out
    pub fn get(&self, hostname: &str) -> Option<DnsResolution> {
        let now = now_ms();
        let fresh = match self.entries.get(hostname) {
            Some(entry) if entry.is_fresh(now) => Some(entry.value().clone()),
            Some(_) => None,
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };
        match fresh {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry)
            }
            None => {
                self.entries.remove(hostname);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Freshness check with the same eviction side effect as [`get`]
    ///
    /// [`get`]: DnsCache::get
    pub fn has(&self, hostname: &str) -> bool {
        self.get(hostname).is_some()
    }

    /// Store a resolution, overwriting any entry for the same hostname
    pub fn set(&self, resolution: DnsResolution) {
        self.entries.insert(resolution.hostname.clone(), resolution);
    }

    /// Sweep every stale entry; returns the number evicted
    pub fn cleanup(&self) -> usize {
        let now = now_ms();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_fresh(now));
        before - self.entries.len()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total == 0 { 0.0 } else { 100.0 * hits as f64 / total as f64 };
        CacheStats { size: self.entries.len(), hits, misses, hit_rate }
    }

    /// Start the recurring stale-entry sweep; a second call is a no-op
    pub fn start_auto_cleanup(self: &Arc<Self>) {
        let mut guard = match self.cleanup.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if guard.is_some() {
            return;
        }
        let (tx, mut rx) = watch::channel(false);
        *guard = Some(tx);
        let cache = Arc::clone(self);
        let interval = Duration::from_millis(cache.config.cleanup_interval_ms);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // the first tick completes immediately
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let evicted = cache.cleanup();
                        if evicted > 0 {
                            debug!(evicted, "DNS cache sweep");
                        }
                    }
                    result = rx.changed() => {
                        if result.is_err() || *rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });
    }

    /// Stop the recurring sweep started by `start_auto_cleanup`
    pub fn stop_auto_cleanup(&self) {
        let mut guard = match self.cleanup.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(tx) = guard.take() {
            let _ = tx.send(true);
        }
    }
}

impl Drop for DnsCache {
    fn drop(&mut self) {
        self.stop_auto_cleanup();
    }
}

pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolution(hostname: &str, ttl: u32, age_ms: i64) -> DnsResolution {
        DnsResolution {
            hostname: hostname.to_string(),
            addresses: vec!["1.2.3.4".parse().expect("ip")],
            ttl,
            timestamp_ms: now_ms() - age_ms,
        }
    }

    #[test]
    fn test_fresh_entry_is_returned() {
        let cache = DnsCache::default();
        let entry = resolution("h", 1, 500);
        cache.set(entry.clone());
        assert_eq!(cache.get("h"), Some(entry));
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn test_stale_entry_is_evicted_on_lookup() {
        let cache = DnsCache::default();
        cache.set(resolution("h", 1, 2000));
        assert_eq!(cache.get("h"), None);
        let stats = cache.stats();
        assert_eq!(stats.size, 0);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_has_mirrors_get_side_effects() {
        let cache = DnsCache::default();
        cache.set(resolution("h", 1, 2000));
        assert!(!cache.has("h"));
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_set_overwrites_by_hostname() {
        let cache = DnsCache::default();
        cache.set(resolution("h", 300, 0));
        let updated = DnsResolution {
            addresses: vec!["5.6.7.8".parse().expect("ip")],
            ..resolution("h", 300, 0)
        };
        cache.set(updated.clone());
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("h").map(|r| r.addresses), Some(updated.addresses));
    }

    #[test]
    fn test_cleanup_sweeps_only_stale_entries() {
        let cache = DnsCache::default();
        cache.set(resolution("fresh", 300, 0));
        cache.set(resolution("stale-1", 1, 5000));
        cache.set(resolution("stale-2", 1, 5000));
        assert_eq!(cache.cleanup(), 2);
        assert_eq!(cache.len(), 1);
        assert!(cache.has("fresh"));
    }

    #[test]
    fn test_hit_rate() {
        let cache = DnsCache::default();
        cache.set(resolution("h", 300, 0));
        assert!(cache.has("h"));
        assert!(!cache.has("missing"));
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate - 50.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_auto_cleanup_task_sweeps() {
        let cache = Arc::new(DnsCache::new(DnsCacheConfig { cleanup_interval_ms: 20 }));
        cache.set(resolution("stale", 1, 5000));
        cache.start_auto_cleanup();
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(cache.len(), 0);
        cache.stop_auto_cleanup();
    }
}

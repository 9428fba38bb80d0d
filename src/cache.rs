use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::debug;

use crate::probe::NodeHealth;

struct CacheEntry {
    health: NodeHealth,
    expires_at: Instant,
}

#[derive(Debug, Clone, Copy)]
pub struct CacheStats {
    pub total_entries: usize,
    pub valid_entries: usize,
    pub expired_entries: usize,
    pub cache_duration_ms: u64,
}

/// Process-local `node.name -> NodeHealth` mapping with a fixed TTL.
/// Readers (the selector, on the request path) never block on writers
/// (probes, the reaper); `get` never returns an entry past its expiry.
pub struct HealthCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    ttl: Duration,
}

impl HealthCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns `None` if absent or expired. Never mutates under the read
    /// lock -- expiry cleanup is the reaper's job.
    pub fn get(&self, name: &str) -> Option<NodeHealth> {
        let map = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let entry = map.get(name)?;
        if entry.expires_at < Instant::now() {
            return None;
        }
        Some(entry.health.clone())
    }

    pub fn set(&self, name: &str, health: NodeHealth) {
        let mut map = self.entries.write().unwrap_or_else(|e| e.into_inner());
        map.insert(
            name.to_string(),
            CacheEntry {
                health,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    pub fn delete(&self, name: &str) {
        self.entries.write().unwrap_or_else(|e| e.into_inner()).remove(name);
    }

    pub fn clear(&self) {
        self.entries.write().unwrap_or_else(|e| e.into_inner()).clear();
    }

    pub fn size(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn stats(&self) -> CacheStats {
        let now = Instant::now();
        let map = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let total = map.len();
        let valid = map.values().filter(|e| e.expires_at >= now).count();
        CacheStats {
            total_entries: total,
            valid_entries: valid,
            expired_entries: total - valid,
            cache_duration_ms: self.ttl.as_millis() as u64,
        }
    }

    /// Drops expired entries under a write lock. Intended to run on a timer
    /// at half the TTL.
    pub fn reap_expired(&self) -> usize {
        let now = Instant::now();
        let mut map = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let before = map.len();
        map.retain(|_, entry| entry.expires_at >= now);
        let removed = before - map.len();
        if removed > 0 {
            debug!(removed, "reaped expired cache entries");
        }
        removed
    }

    pub fn all_names_present(&self, names: &[String]) -> bool {
        let map = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        names.iter().all(|n| map.get(n).map(|e| e.expires_at >= now).unwrap_or(false))
    }

    pub fn get_all(&self, names: &[String]) -> HashMap<String, NodeHealth> {
        let map = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        names
            .iter()
            .filter_map(|n| {
                map.get(n)
                    .filter(|e| e.expires_at >= now)
                    .map(|e| (n.clone(), e.health.clone()))
            })
            .collect()
    }
}

/// Spawns the background reaper at half the cache's TTL.
/// Returns a shutdown handle tied to the host's provision/cleanup lifecycle.
pub fn spawn_reaper(cache: Arc<HealthCache>) -> (watch::Sender<bool>, tokio::task::JoinHandle<()>) {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let period = cache.ttl() / 2;
    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period.max(Duration::from_millis(1)));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    cache.reap_expired();
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
    });
    (shutdown_tx, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn sample(name: &str) -> NodeHealth {
        NodeHealth::synthetic_unhealthy(name, "http://x", ErrorKind::Transport, "test")
    }

    #[test]
    fn set_then_get_within_ttl() {
        let cache = HealthCache::new(Duration::from_secs(30));
        cache.set("a", sample("a"));
        assert!(cache.get("a").is_some());
    }

    #[test]
    fn get_after_ttl_is_absent() {
        let cache = HealthCache::new(Duration::from_millis(1));
        cache.set("a", sample("a"));
        std::thread::sleep(Duration::from_millis(10));
        assert!(cache.get("a").is_none());
    }

    #[test]
    fn reap_removes_only_expired() {
        let cache = HealthCache::new(Duration::from_millis(1));
        cache.set("a", sample("a"));
        std::thread::sleep(Duration::from_millis(10));
        cache.set("b", sample("b"));
        // b has a fresh TTL of 1ms too, but we reap immediately, so the
        // exact outcome of b is racy; what matters is the stale "a" is gone.
        let removed = cache.reap_expired();
        assert!(removed >= 1);
    }
}

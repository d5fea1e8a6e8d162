//! In-memory answer cache with per-entry absolute expiry.
//!
//! One instance is built at startup and shared through `Arc`; tests build
//! their own. A single reader/writer lock guards the map: reads share it,
//! writes and the sweep take it exclusively.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::keys::{CacheClass, CacheKey};

/// Default interval of the background sweep.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Expiry durations, one per class. Fixed once the cache is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheTtl {
    pub search: Duration,
    pub id: Duration,
    pub hot: Duration,
}

impl CacheTtl {
    pub fn for_class(&self, class: CacheClass) -> Duration {
        match class {
            CacheClass::Search => self.search,
            CacheClass::Id => self.id,
            CacheClass::Hot => self.hot,
        }
    }
}

impl Default for CacheTtl {
    fn default() -> Self {
        Self {
            search: Duration::from_secs(10 * 60),
            id: Duration::from_secs(30 * 60),
            hot: Duration::from_secs(60 * 60),
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CacheStats {
    pub total_items: usize,
    pub expired_items: usize,
    pub valid_items: usize,
    pub by_class: HashMap<&'static str, usize>,
    pub ttl_secs: HashMap<&'static str, u64>,
}

#[derive(Debug)]
pub struct ExpiringCache<V> {
    entries: RwLock<HashMap<CacheKey, CacheEntry<V>>>,
    ttl: CacheTtl,
}

impl<V: Clone + Send + Sync + 'static> ExpiringCache<V> {
    pub fn new(ttl: CacheTtl) -> Self {
        info!(
            search_secs = ttl.search.as_secs(),
            id_secs = ttl.id.as_secs(),
            hot_secs = ttl.hot.as_secs(),
            "answer cache ready"
        );
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> CacheTtl {
        self.ttl
    }

    /// Returns the live value at `key`. Expired entries read as absent but
    /// are left for the sweep.
    pub async fn get(&self, key: &CacheKey) -> Option<V> {
        let entries = self.entries.read().await;
        let now = Instant::now();
        match entries.get(key) {
            None => {
                debug!(key = %key, total_items = entries.len(), "cache miss");
                None
            }
            Some(entry) if entry.is_expired(now) => {
                debug!(
                    key = %key,
                    expired_for_ms = now.duration_since(entry.expires_at).as_millis() as u64,
                    "cache entry expired"
                );
                None
            }
            Some(entry) => {
                debug!(
                    key = %key,
                    remaining_ms = entry.expires_at.duration_since(now).as_millis() as u64,
                    "cache hit"
                );
                Some(entry.value.clone())
            }
        }
    }

    /// Stores `value` until `now + ttl`, replacing any previous entry.
    pub async fn set(&self, key: CacheKey, value: V, ttl: Duration) {
        let mut entries = self.entries.write().await;
        let expires_at = Instant::now() + ttl;
        debug!(key = %key, ttl_secs = ttl.as_secs(), "cache set");
        entries.insert(key, CacheEntry { value, expires_at });
    }

    /// Stores `value` with the TTL of the key's class.
    pub async fn set_for_class(&self, key: CacheKey, value: V) {
        let ttl = self.ttl.for_class(key.class);
        self.set(key, value, ttl).await;
    }

    /// Deletes every expired entry and returns how many were removed.
    pub async fn invalidate_expired(&self) -> usize {
        let mut entries = self.entries.write().await;
        let now = Instant::now();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed, remaining = entries.len(), "expired cache entries removed");
        }
        removed
    }

    /// Removes every entry of one class, expired or not.
    pub async fn clear(&self, class: CacheClass) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|key, _| key.class != class);
        let removed = before - entries.len();
        info!(class = %class, removed, "cache class cleared");
        removed
    }

    pub async fn clear_all(&self) -> usize {
        let mut entries = self.entries.write().await;
        let removed = entries.len();
        entries.clear();
        info!(removed, "cache cleared");
        removed
    }

    /// Number of stored entries, including expired ones not yet swept.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn stats(&self) -> CacheStats {
        let entries = self.entries.read().await;
        let now = Instant::now();
        let mut by_class: HashMap<&'static str, usize> =
            CacheClass::ALL.iter().map(|c| (c.tag(), 0)).collect();
        let mut expired_items = 0;
        for (key, entry) in entries.iter() {
            if entry.is_expired(now) {
                expired_items += 1;
            }
            *by_class.entry(key.class.tag()).or_default() += 1;
        }
        CacheStats {
            total_items: entries.len(),
            expired_items,
            valid_items: entries.len() - expired_items,
            by_class,
            ttl_secs: CacheClass::ALL
                .iter()
                .map(|c| (c.tag(), self.ttl.for_class(*c).as_secs()))
                .collect(),
        }
    }

    /// Starts the periodic sweep. The task holds the lock only for the scan.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            info!(interval_secs = interval.as_secs(), "cache sweeper started");
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            loop {
                ticker.tick().await;
                let removed = cache.invalidate_expired().await;
                if removed > 0 {
                    let remaining = cache.len().await;
                    info!(removed, remaining, "cache sweep finished");
                }
            }
        })
    }
}

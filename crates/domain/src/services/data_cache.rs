//! TTL + size-bounded cache for chart payloads.
//!
//! Entries are stored serialized so the byte budget reflects what is actually
//! held. Expired entries are dropped lazily on read and proactively by
//! [`DataCache::sweep_expired`]. When an insert would exceed the byte budget,
//! least-recently-used entries are evicted first.

use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use super::cache_key::CacheKey;
use super::clock::SharedClock;
use crate::models::ChartKind;

/// Data cache configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// TTL applied when a caller does not supply one.
    pub default_ttl: Duration,
    /// Upper bound on stored bytes (keys + serialized payloads).
    pub max_size_bytes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::minutes(5),
            max_size_bytes: 64 * 1024 * 1024,
        }
    }
}

/// A successful lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheHit<T> {
    pub payload: T,
    pub fetched_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Counters describing cache behaviour since construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub size_bytes: usize,
    pub max_size_bytes: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
}

#[derive(Debug)]
struct CacheEntry {
    payload: Vec<u8>,
    fetched_at: DateTime<Utc>,
    ttl: Duration,
    last_access: u64,
}

impl CacheEntry {
    fn expires_at(&self) -> DateTime<Utc> {
        self.fetched_at + self.ttl
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }

    fn size(&self, key: &CacheKey) -> usize {
        self.payload.len() + key.as_str().len()
    }
}

#[derive(Debug, Default)]
struct CacheInner {
    entries: HashMap<CacheKey, CacheEntry>,
    size_bytes: usize,
    tick: u64,
    stats: CacheStats,
}

impl CacheInner {
    fn remove(&mut self, key: &CacheKey) -> bool {
        match self.entries.remove(key) {
            Some(entry) => {
                self.size_bytes -= entry.size(key);
                true
            }
            None => false,
        }
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn evict_lru(&mut self) -> bool {
        let victim = self
            .entries
            .iter()
            .min_by_key(|(_, e)| e.last_access)
            .map(|(k, _)| k.clone());
        match victim {
            Some(key) => {
                debug!(cache_key = %key, "Evicting least recently used cache entry");
                self.remove(&key);
                self.stats.evictions += 1;
                counter!("chart_cache_evictions_total", "reason" => "capacity").increment(1);
                true
            }
            None => false,
        }
    }
}

/// The chart data cache. Exclusively owns its entries.
pub struct DataCache {
    config: CacheConfig,
    clock: SharedClock,
    inner: Mutex<CacheInner>,
}

impl DataCache {
    pub fn new(config: CacheConfig, clock: SharedClock) -> Self {
        Self {
            config,
            clock,
            inner: Mutex::new(CacheInner::default()),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner> {
        // A panic while holding the lock cannot leave entries half-written
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Looks up a live entry. Absent, expired and undecodable entries are all misses.
    pub fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<CacheHit<T>> {
        let now = self.clock.now();
        let mut inner = self.lock();

        let expired = match inner.entries.get(key) {
            Some(entry) => entry.is_expired(now),
            None => {
                record_miss(&mut inner);
                return None;
            }
        };

        if expired {
            inner.remove(key);
            inner.stats.expirations += 1;
            record_miss(&mut inner);
            counter!("chart_cache_evictions_total", "reason" => "expired").increment(1);
            return None;
        }

        let tick = inner.next_tick();
        let decoded = {
            let entry = inner.entries.get_mut(key)?;
            entry.last_access = tick;
            serde_json::from_slice::<T>(&entry.payload)
                .map(|payload| CacheHit {
                    payload,
                    fetched_at: entry.fetched_at,
                    expires_at: entry.expires_at(),
                })
        };

        match decoded {
            Ok(hit) => {
                inner.stats.hits += 1;
                counter!("chart_cache_hits_total").increment(1);
                Some(hit)
            }
            Err(e) => {
                warn!(cache_key = %key, error = %e, "Dropping undecodable cache entry");
                inner.remove(key);
                record_miss(&mut inner);
                None
            }
        }
    }

    /// Stores a payload, replacing any existing entry for `key`.
    ///
    /// Returns `false` when the payload could not be cached (serialization
    /// failure or larger than the whole budget).
    pub fn put<T: Serialize>(&self, key: &CacheKey, payload: &T, ttl: Option<Duration>) -> bool {
        let bytes = match serde_json::to_vec(payload) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(cache_key = %key, error = %e, "Failed to serialize cache payload");
                self.invalidate(key);
                return false;
            }
        };

        let ttl = ttl.unwrap_or(self.config.default_ttl);
        let now = self.clock.now();
        let mut inner = self.lock();
        inner.remove(key);

        let entry_size = bytes.len() + key.as_str().len();
        if entry_size > self.config.max_size_bytes {
            warn!(
                cache_key = %key,
                entry_size = entry_size,
                max_size_bytes = self.config.max_size_bytes,
                "Payload exceeds cache budget, not caching"
            );
            return false;
        }

        while inner.size_bytes + entry_size > self.config.max_size_bytes {
            if !inner.evict_lru() {
                break;
            }
        }

        let tick = inner.next_tick();
        inner.size_bytes += entry_size;
        inner.entries.insert(
            key.clone(),
            CacheEntry {
                payload: bytes,
                fetched_at: now,
                ttl,
                last_access: tick,
            },
        );
        true
    }

    pub fn invalidate(&self, key: &CacheKey) -> bool {
        self.lock().remove(key)
    }

    /// Removes every entry for one chart kind.
    pub fn invalidate_kind(&self, kind: ChartKind) -> usize {
        let mut inner = self.lock();
        let keys: Vec<CacheKey> = inner
            .entries
            .keys()
            .filter(|k| k.is_kind(kind))
            .cloned()
            .collect();
        for key in &keys {
            inner.remove(key);
        }
        keys.len()
    }

    pub fn invalidate_all(&self) -> usize {
        let mut inner = self.lock();
        let count = inner.entries.len();
        inner.entries.clear();
        inner.size_bytes = 0;
        count
    }

    /// Removes all expired entries. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let mut inner = self.lock();
        let expired: Vec<CacheKey> = inner
            .entries
            .iter()
            .filter(|(_, e)| e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            inner.remove(key);
        }
        inner.stats.expirations += expired.len() as u64;
        if !expired.is_empty() {
            counter!("chart_cache_evictions_total", "reason" => "expired")
                .increment(expired.len() as u64);
        }
        expired.len()
    }

    pub fn size_bytes(&self) -> usize {
        self.lock().size_bytes
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        CacheStats {
            entries: inner.entries.len(),
            size_bytes: inner.size_bytes,
            max_size_bytes: self.config.max_size_bytes,
            ..inner.stats
        }
    }
}

fn record_miss(inner: &mut CacheInner) {
    inner.stats.misses += 1;
    counter!("chart_cache_misses_total").increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FilterState;
    use crate::services::clock::ManualClock;
    use serde_json::{json, Value};
    use std::sync::Arc;

    fn cache_with(max_size_bytes: usize) -> (DataCache, ManualClock) {
        let clock = ManualClock::default();
        let cache = DataCache::new(
            CacheConfig {
                default_ttl: Duration::minutes(5),
                max_size_bytes,
            },
            Arc::new(clock.clone()),
        );
        (cache, clock)
    }

    fn key(kind: ChartKind, company: i64) -> CacheKey {
        let mut filters = FilterState::default();
        filters.companies.selected_companies.insert(company);
        CacheKey::derive(kind, &filters)
    }

    #[test]
    fn test_put_then_get_hits() {
        let (cache, _clock) = cache_with(1 << 20);
        let k = key(ChartKind::Summary, 1);
        assert!(cache.put(&k, &json!({"total": 10}), None));

        let hit = cache.get::<Value>(&k).expect("expected a hit");
        assert_eq!(hit.payload, json!({"total": 10}));
        assert_eq!(hit.expires_at - hit.fetched_at, Duration::minutes(5));
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn test_entry_expires_after_ttl() {
        let (cache, clock) = cache_with(1 << 20);
        let k = key(ChartKind::Summary, 1);
        cache.put(&k, &json!([1, 2, 3]), Some(Duration::seconds(30)));

        clock.advance(Duration::seconds(29));
        assert!(cache.get::<Value>(&k).is_some());

        clock.advance(Duration::seconds(1));
        assert!(cache.get::<Value>(&k).is_none());
        // Lazily evicted on read
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.size_bytes(), 0);
        assert_eq!(cache.stats().expirations, 1);
    }

    #[test]
    fn test_absent_key_is_miss() {
        let (cache, _clock) = cache_with(1 << 20);
        assert!(cache.get::<Value>(&key(ChartKind::Summary, 9)).is_none());
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_put_overwrites_and_tracks_size() {
        let (cache, _clock) = cache_with(1 << 20);
        let k = key(ChartKind::RevenueTrend, 1);
        cache.put(&k, &"a".repeat(100), None);
        let first = cache.size_bytes();
        cache.put(&k, &"b".repeat(10), None);
        assert_eq!(cache.len(), 1);
        assert_eq!(first - cache.size_bytes(), 90);
        assert_eq!(cache.get::<String>(&k).unwrap().payload, "b".repeat(10));
    }

    #[test]
    fn test_lru_eviction_when_over_budget() {
        let payload = "x".repeat(200);
        let k1 = key(ChartKind::Summary, 1);
        let entry_size = serde_json::to_vec(&payload).unwrap().len() + k1.as_str().len();
        let (cache, _clock) = cache_with(entry_size * 2);

        let k2 = key(ChartKind::Summary, 2);
        let k3 = key(ChartKind::Summary, 3);
        cache.put(&k1, &payload, None);
        cache.put(&k2, &payload, None);

        // Touch k1 so k2 becomes least recently used
        assert!(cache.get::<String>(&k1).is_some());

        cache.put(&k3, &payload, None);
        assert_eq!(cache.len(), 2);
        assert!(cache.get::<String>(&k1).is_some());
        assert!(cache.get::<String>(&k2).is_none());
        assert!(cache.get::<String>(&k3).is_some());
        assert_eq!(cache.stats().evictions, 1);
        assert!(cache.size_bytes() <= entry_size * 2);
    }

    #[test]
    fn test_oversized_payload_not_cached() {
        let (cache, _clock) = cache_with(64);
        let k = key(ChartKind::Summary, 1);
        assert!(!cache.put(&k, &"y".repeat(500), None));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_undecodable_entry_is_dropped() {
        let (cache, _clock) = cache_with(1 << 20);
        let k = key(ChartKind::Summary, 1);
        cache.put(&k, &"not a number", None);

        assert!(cache.get::<u64>(&k).is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_invalidate_variants() {
        let (cache, _clock) = cache_with(1 << 20);
        let a = key(ChartKind::Summary, 1);
        let b = key(ChartKind::Summary, 2);
        let c = key(ChartKind::RevenueTrend, 1);
        for k in [&a, &b, &c] {
            cache.put(k, &1, None);
        }

        assert!(cache.invalidate(&a));
        assert!(!cache.invalidate(&a));
        assert_eq!(cache.invalidate_kind(ChartKind::Summary), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.invalidate_all(), 1);
        assert_eq!(cache.size_bytes(), 0);
    }

    #[test]
    fn test_sweep_removes_only_expired() {
        let (cache, clock) = cache_with(1 << 20);
        let short = key(ChartKind::Summary, 1);
        let long = key(ChartKind::Summary, 2);
        cache.put(&short, &1, Some(Duration::seconds(10)));
        cache.put(&long, &2, Some(Duration::hours(1)));

        clock.advance(Duration::minutes(1));
        assert_eq!(cache.sweep_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.get::<i32>(&long).is_some());
    }
}

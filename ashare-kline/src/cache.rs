//! Read-through cache for ETF metadata lookups.
//!
//! Owned by a store instance. Every ETF write invalidates the written code,
//! so a cached entry can only be stale through another process writing the
//! same database, and then for at most one TTL.
//!
//! Readers that miss take a [`generation`](EtfCache::generation) before going
//! to the database and fill through [`put_if_generation`](EtfCache::put_if_generation),
//! so a row read before a concurrent write is never cached after it.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use crate::instruments::EtfInfo;

/// Cache entry with TTL
#[derive(Debug, Clone)]
struct CacheEntry<T> {
    data: T,
    expires_at: DateTime<Utc>,
}

impl<T> CacheEntry<T> {
    fn new(data: T, ttl_secs: i64) -> Self {
        Self {
            data,
            expires_at: Utc::now() + Duration::seconds(ttl_secs),
        }
    }

    fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}

/// ETF metadata cache keyed by ETF code
pub struct EtfCache {
    entries: RwLock<HashMap<String, CacheEntry<EtfInfo>>>,
    /// Bumped under the write lock by every invalidation.
    generation: AtomicU64,
    ttl_secs: i64,
}

impl EtfCache {
    /// Default TTL: 5 minutes
    pub const DEFAULT_TTL_SECS: i64 = 300;

    pub fn new() -> Self {
        Self::with_ttl(Self::DEFAULT_TTL_SECS)
    }

    pub fn with_ttl(ttl_secs: i64) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            generation: AtomicU64::new(0),
            ttl_secs,
        }
    }

    /// Cached info for `etf_code`, if present and fresh.
    pub fn get(&self, etf_code: &str) -> Option<EtfInfo> {
        let cache = self.entries.read().ok()?;

        cache.get(etf_code).and_then(|entry| {
            if entry.is_expired() {
                None
            } else {
                Some(entry.data.clone())
            }
        })
    }

    pub fn put(&self, info: EtfInfo) {
        let entry = CacheEntry::new(info, self.ttl_secs);

        if let Ok(mut cache) = self.entries.write() {
            cache.insert(entry.data.etf_code.clone(), entry);
        }
    }

    /// Current invalidation generation.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Store `info` only if nothing was invalidated since `generation` was
    /// taken. Returns whether the entry was stored.
    pub fn put_if_generation(&self, info: EtfInfo, generation: u64) -> bool {
        let entry = CacheEntry::new(info, self.ttl_secs);

        match self.entries.write() {
            Ok(mut cache) if self.generation.load(Ordering::Acquire) == generation => {
                cache.insert(entry.data.etf_code.clone(), entry);
                true
            }
            _ => false,
        }
    }

    /// Forget one code.
    pub fn invalidate(&self, etf_code: &str) {
        let mut cache = match self.entries.write() {
            Ok(cache) => cache,
            Err(poisoned) => poisoned.into_inner(),
        };
        self.generation.fetch_add(1, Ordering::AcqRel);
        cache.remove(etf_code);
    }

    pub fn clear_expired(&self) {
        if let Ok(mut cache) = self.entries.write() {
            cache.retain(|_, entry| !entry.is_expired());
        }
    }

    pub fn clear_all(&self) {
        let mut cache = match self.entries.write() {
            Ok(cache) => cache,
            Err(poisoned) => poisoned.into_inner(),
        };
        self.generation.fetch_add(1, Ordering::AcqRel);
        cache.clear();
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self.entries.read().ok();
        let (total, expired) = entries
            .map(|c| {
                let total = c.len();
                let expired = c.values().filter(|e| e.is_expired()).count();
                (total, expired)
            })
            .unwrap_or((0, 0));

        CacheStats {
            total_entries: total,
            expired_entries: expired,
            active_entries: total - expired,
        }
    }
}

impl Default for EtfCache {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EtfCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EtfCache")
            .field("ttl_secs", &self.ttl_secs)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Cache statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub total_entries: usize,
    pub expired_entries: usize,
    pub active_entries: usize,
}

//! Resolution cache
//!
//! Resolutions are pure functions of their inputs, so entries never need
//! invalidating; the LRU bound is the only way out. Entries are inserted once
//! a resolution has completed, never while it is being computed.

use std::fmt;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use lru::LruCache;
use metrics::counter;
use ruma::RoomId;
use sha2::{Digest, Sha256};
use tracing::trace;

use matrixon_core::{StateMap, StateMapId};

use super::Resolution;

/// Fingerprint of a room id and the set of input state maps
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey([u8; 32]);

impl CacheKey {
    /// Input order and repeated inputs do not change the key.
    pub fn for_inputs(room_id: &RoomId, state_maps: &[StateMap]) -> Self {
        let mut ids: Vec<StateMapId> = state_maps.iter().map(StateMap::identity).collect();
        ids.sort();
        ids.dedup();

        let mut hasher = Sha256::new();
        hasher.update((room_id.as_str().len() as u64).to_be_bytes());
        hasher.update(room_id.as_str().as_bytes());
        for id in &ids {
            hasher.update(id.as_bytes());
        }
        Self(hasher.finalize().into())
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheKey(")?;
        for byte in &self.0[..8] {
            write!(f, "{:02x}", byte)?;
        }
        write!(f, ")")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub capacity: usize,
}

pub struct ResolutionCache {
    entries: Mutex<LruCache<CacheKey, Arc<Resolution>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResolutionCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: &CacheKey) -> Option<Arc<Resolution>> {
        let found = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned();

        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            counter!("matrixon_stateres_cache_hits_total").increment(1);
            trace!(?key, "Resolution cache hit");
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            counter!("matrixon_stateres_cache_misses_total").increment(1);
            trace!(?key, "Resolution cache miss");
        }
        found
    }

    pub fn insert(&self, key: CacheKey, resolution: Arc<Resolution>) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .put(key, resolution);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: entries.len(),
            capacity: entries.cap().get(),
        }
    }
}

impl fmt::Debug for ResolutionCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolutionCache").field("stats", &self.stats()).finish()
    }
}

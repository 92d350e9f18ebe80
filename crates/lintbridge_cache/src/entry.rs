//! Cache entry data structures.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// A fully constructed cache entry.
///
/// Entries are only ever observed after construction completed; a value that
/// is still being built lives in a pending slot and is invisible to readers.
#[derive(Debug)]
pub struct CacheEntry<V> {
    /// The cached value, shared with every reader.
    value: Arc<V>,
    /// Content fingerprint the value was built from.
    fingerprint: Option<String>,
    /// When the value finished construction.
    created_at: Instant,
    /// Number of reads served from this entry.
    hits: AtomicU64,
}

impl<V> CacheEntry<V> {
    /// Creates a new entry.
    pub fn new(value: V, fingerprint: Option<String>) -> Self {
        Self {
            value: Arc::new(value),
            fingerprint,
            created_at: Instant::now(),
            hits: AtomicU64::new(0),
        }
    }

    /// Returns a shared handle to the value.
    pub fn value(&self) -> Arc<V> {
        Arc::clone(&self.value)
    }

    /// Returns the fingerprint this entry was built from.
    pub fn fingerprint(&self) -> Option<&str> {
        self.fingerprint.as_deref()
    }

    /// Checks whether the entry matches the given fingerprint.
    ///
    /// An entry stored without a fingerprint matches anything, and a lookup
    /// without a fingerprint accepts any entry.
    pub fn is_fresh(&self, fingerprint: Option<&str>) -> bool {
        match (self.fingerprint.as_deref(), fingerprint) {
            (Some(stored), Some(current)) => stored == current,
            _ => true,
        }
    }

    /// Time elapsed since construction.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Records a read.
    pub(crate) fn touch(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of reads served.
    pub fn hit_count(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }
}

//! Program cache manager.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::CacheEntry;

/// A key slot: either still under construction or holding a finished entry.
struct Slot<V> {
    fingerprint: Option<String>,
    cell: OnceCell<CacheEntry<V>>,
}

impl<V> Slot<V> {
    fn pending(fingerprint: Option<String>) -> Self {
        Self {
            fingerprint,
            cell: OnceCell::new(),
        }
    }

    fn ready(entry: CacheEntry<V>) -> Self {
        Self {
            fingerprint: entry.fingerprint().map(str::to_owned),
            cell: OnceCell::with_value(entry),
        }
    }

    fn matches(&self, fingerprint: Option<&str>) -> bool {
        match (self.fingerprint.as_deref(), fingerprint) {
            (Some(stored), Some(current)) => stored == current,
            _ => true,
        }
    }
}

/// Counters describing cache usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Constructed entries currently stored.
    pub entries: usize,
    /// Lookups served from a constructed entry.
    pub hits: u64,
    /// Lookups that found nothing usable.
    pub misses: u64,
    /// Constructions started through `get_or_try_insert_with`.
    pub builds: u64,
}

/// Memoizes expensive values keyed by manifest identity.
///
/// Construction through [`ProgramCache::get_or_try_insert_with`] is
/// single-flight: callers racing on one key block until the first
/// construction finishes, and all of them observe the same `Arc`. A failed
/// construction is not cached, so the next caller retries.
///
/// The cache never evicts on its own. Entries go away through
/// [`ProgramCache::invalidate`], [`ProgramCache::clear`], or when a lookup
/// presents a different content fingerprint for the same key.
pub struct ProgramCache<K, V> {
    slots: Mutex<HashMap<K, Arc<Slot<V>>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    builds: AtomicU64,
}

impl<K, V> ProgramCache<K, V>
where
    K: Eq + Hash + Clone + Debug,
{
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            builds: AtomicU64::new(0),
        }
    }

    /// Gets a previously cached value.
    ///
    /// Values still under construction are reported as absent.
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        self.get_fresh(key, None)
    }

    /// Gets a cached value only if it was built from `fingerprint`.
    pub fn get_fresh(&self, key: &K, fingerprint: Option<&str>) -> Option<Arc<V>> {
        let slot = self.slots.lock().get(key).cloned();
        let value = slot
            .and_then(|slot| slot.cell.get().filter(|e| e.is_fresh(fingerprint)).map(read));
        self.record(value.is_some());
        value
    }

    /// Stores a value, replacing whatever the key held.
    pub fn set(&self, key: K, value: V) -> Arc<V> {
        self.set_with_fingerprint(key, None, value)
    }

    /// Stores a value built from the given fingerprint.
    pub fn set_with_fingerprint(&self, key: K, fingerprint: Option<String>, value: V) -> Arc<V> {
        let entry = CacheEntry::new(value, fingerprint);
        let value = entry.value();
        self.slots.lock().insert(key, Arc::new(Slot::ready(entry)));
        value
    }

    /// Returns the cached value for `key`, building it with `build` if needed.
    ///
    /// If the stored entry was built from another fingerprint, it is replaced.
    pub fn get_or_try_insert_with<E, F>(
        &self,
        key: K,
        fingerprint: Option<&str>,
        build: F,
    ) -> Result<Arc<V>, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        let slot = {
            let mut slots = self.slots.lock();
            if slots.get(&key).is_some_and(|slot| !slot.matches(fingerprint)) {
                debug!("Fingerprint changed for {:?}, replacing cache entry", key);
                slots.remove(&key);
            }
            Arc::clone(
                slots
                    .entry(key.clone())
                    .or_insert_with(|| Arc::new(Slot::pending(fingerprint.map(str::to_owned)))),
            )
        };

        let mut built = false;
        let entry = match slot.cell.get_or_try_init(|| {
            built = true;
            self.builds.fetch_add(1, Ordering::Relaxed);
            debug!("Building cache entry for {:?}", key);
            build().map(|value| CacheEntry::new(value, slot.fingerprint.clone()))
        }) {
            Ok(entry) => entry,
            Err(e) => {
                self.discard_pending(&key, &slot);
                return Err(e);
            }
        };

        if built {
            self.misses.fetch_add(1, Ordering::Relaxed);
            Ok(entry.value())
        } else {
            self.hits.fetch_add(1, Ordering::Relaxed);
            Ok(read(entry))
        }
    }

    /// Finds the first constructed entry satisfying `predicate`.
    pub fn find<P>(&self, predicate: P) -> Option<(K, Arc<V>)>
    where
        P: Fn(&K, &V) -> bool,
    {
        let slots = self.slots.lock();
        let found = slots.iter().find_map(|(key, slot)| {
            slot.cell
                .get()
                .filter(|entry| predicate(key, &entry.value()))
                .map(|entry| (key.clone(), read(entry)))
        });
        drop(slots);
        self.record(found.is_some());
        found
    }

    /// Removes one entry. Returns whether it was present.
    pub fn invalidate(&self, key: &K) -> bool {
        let removed = self.slots.lock().remove(key).is_some();
        if removed {
            debug!("Invalidated cache entry {:?}", key);
        }
        removed
    }

    /// Drops every entry.
    pub fn clear(&self) {
        let mut slots = self.slots.lock();
        let count = slots.len();
        slots.clear();
        info!("Cleared {} cache entries", count);
    }

    /// Checks whether a constructed entry exists for `key`.
    pub fn contains_key(&self, key: &K) -> bool {
        self.slots
            .lock()
            .get(key)
            .is_some_and(|slot| slot.cell.get().is_some())
    }

    /// Keys of all constructed entries.
    pub fn keys(&self) -> Vec<K> {
        self.slots
            .lock()
            .iter()
            .filter(|(_, slot)| slot.cell.get().is_some())
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Returns the number of constructed entries.
    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .values()
            .filter(|slot| slot.cell.get().is_some())
            .count()
    }

    /// Returns true if no constructed entry is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of usage counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            builds: self.builds.load(Ordering::Relaxed),
        }
    }

    /// Removes `slot` if it is still the key's unbuilt slot.
    fn discard_pending(&self, key: &K, slot: &Arc<Slot<V>>) {
        let mut slots = self.slots.lock();
        let stale = slots
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, slot) && current.cell.get().is_none());
        if stale {
            slots.remove(key);
        }
    }

    fn record(&self, hit: bool) {
        let counter = if hit { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

impl<K, V> Default for ProgramCache<K, V>
where
    K: Eq + Hash + Clone + Debug,
{
    fn default() -> Self {
        Self::new()
    }
}

fn read<V>(entry: &CacheEntry<V>) -> Arc<V> {
    entry.touch();
    entry.value()
}

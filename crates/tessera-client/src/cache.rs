//! Bounded, shared caches for prepared statements and schema descriptors.
//!
//! Entries are evicted with SIEVE: a hit sets the entry's `visited` bit, and
//! on insert into a full cache a hand sweeps the slots, clearing set bits and
//! evicting the first entry whose bit is already clear. Lookups and inserts are
//! O(1) amortized.
//!
//! [`LoadingCache`] stores one [`OnceCell`] per key, so concurrent misses for
//! the same key share a single in-flight load.

use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::OnceCell;

use crate::error::Result;

// ============================================================================
// SIEVE
// ============================================================================

#[derive(Debug)]
struct Slot<K, V> {
    key: K,
    value: V,
    visited: bool,
}

/// Fixed-capacity map with SIEVE eviction.
#[derive(Debug)]
pub(crate) struct Sieve<K, V> {
    slots: Vec<Option<Slot<K, V>>>,
    index: HashMap<K, usize>,
    free: Vec<usize>,
    hand: usize,
    capacity: usize,
}

impl<K, V> Sieve<K, V>
where
    K: Eq + Hash + Clone,
{
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    pub(crate) fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "cache capacity must be > 0");
        Self {
            slots: Vec::with_capacity(capacity),
            index: HashMap::with_capacity(capacity),
            free: Vec::new(),
            hand: 0,
            capacity,
        }
    }

    /// Looks up `key` and marks it visited.
    pub(crate) fn get(&mut self, key: &K) -> Option<&V> {
        let idx = *self.index.get(key)?;
        let slot = self.slots[idx].as_mut()?;
        slot.visited = true;
        Some(&slot.value)
    }

    /// Looks up `key` without touching its visited bit.
    pub(crate) fn peek(&self, key: &K) -> Option<&V> {
        let idx = *self.index.get(key)?;
        self.slots[idx].as_ref().map(|slot| &slot.value)
    }

    /// Inserts or replaces `key`, evicting one entry if the cache is full.
    /// Returns the evicted key, if any.
    pub(crate) fn insert(&mut self, key: K, value: V) -> Option<K> {
        if let Some(&idx) = self.index.get(&key) {
            if let Some(slot) = self.slots[idx].as_mut() {
                slot.value = value;
                slot.visited = true;
                return None;
            }
        }

        let fresh = Slot {
            key: key.clone(),
            value,
            visited: false,
        };

        if let Some(idx) = self.free.pop() {
            self.slots[idx] = Some(fresh);
            self.index.insert(key, idx);
            return None;
        }

        if self.slots.len() < self.capacity {
            self.index.insert(key, self.slots.len());
            self.slots.push(Some(fresh));
            return None;
        }

        let victim = self.sweep();
        let evicted = self.slots[victim].replace(fresh).map(|old| old.key);
        if let Some(old_key) = &evicted {
            self.index.remove(old_key);
        }
        self.index.insert(key, victim);
        evicted
    }

    pub(crate) fn remove(&mut self, key: &K) -> Option<V> {
        let idx = self.index.remove(key)?;
        let slot = self.slots[idx].take()?;
        self.free.push(idx);
        Some(slot.value)
    }

    pub(crate) fn len(&self) -> usize {
        self.index.len()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    /// Advances the hand to the next unvisited slot. Only called when every
    /// slot is occupied, so two laps always find one.
    fn sweep(&mut self) -> usize {
        loop {
            let idx = self.hand;
            self.hand = (self.hand + 1) % self.capacity;
            match self.slots[idx].as_mut() {
                Some(slot) if slot.visited => slot.visited = false,
                _ => return idx,
            }
        }
    }
}

// ============================================================================
// Loading cache
// ============================================================================

/// Bounded cache that populates itself on first access.
///
/// Values are cloned out on every hit, so `V` should be cheap to clone
/// (`Arc`-wrapped descriptors, prepared handles).
#[derive(Debug)]
pub struct LoadingCache<K, V> {
    name: &'static str,
    entries: Mutex<Sieve<K, Arc<OnceCell<V>>>>,
}

impl<K, V> LoadingCache<K, V>
where
    K: Eq + Hash + Clone + Debug,
    V: Clone,
{
    /// Creates a cache holding at most `capacity` entries. `name` labels log
    /// events.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    pub fn new(name: &'static str, capacity: usize) -> Self {
        Self {
            name,
            entries: Mutex::new(Sieve::new(capacity)),
        }
    }

    /// Returns the cached value for `key`, running `load` on a miss.
    ///
    /// Concurrent callers missing on the same key wait for one load. A failed
    /// load is returned to the caller that ran it and leaves no entry behind.
    pub async fn get_or_load<F, Fut>(&self, key: K, load: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        let cell = self.cell_for(&key);

        if let Some(value) = cell.get() {
            tracing::trace!(cache = self.name, ?key, "cache hit");
            return Ok(value.clone());
        }

        match cell.get_or_try_init(load).await {
            Ok(value) => Ok(value.clone()),
            Err(error) => {
                tracing::warn!(cache = self.name, ?key, %error, "cache load failed");
                let mut entries = self.lock();
                let stale = entries
                    .peek(&key)
                    .is_some_and(|current| Arc::ptr_eq(current, &cell) && !current.initialized());
                if stale {
                    entries.remove(&key);
                }
                Err(error)
            }
        }
    }

    /// Returns the value for `key` if it is loaded.
    pub fn get(&self, key: &K) -> Option<V> {
        self.lock().get(key).and_then(|cell| cell.get().cloned())
    }

    /// Drops the entry for `key`.
    pub fn invalidate(&self, key: &K) {
        self.lock().remove(key);
    }

    /// Number of entries, including loads still in flight.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.lock().capacity()
    }

    fn cell_for(&self, key: &K) -> Arc<OnceCell<V>> {
        let mut entries = self.lock();
        if let Some(cell) = entries.get(key) {
            return Arc::clone(cell);
        }

        tracing::debug!(cache = self.name, ?key, "cache miss");
        let cell = Arc::new(OnceCell::new());
        if let Some(evicted) = entries.insert(key.clone(), Arc::clone(&cell)) {
            tracing::debug!(cache = self.name, ?evicted, "cache eviction");
        }
        cell
    }

    // Entries stay consistent across a panicking holder: every mutation is a
    // single map operation.
    fn lock(&self) -> MutexGuard<'_, Sieve<K, Arc<OnceCell<V>>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

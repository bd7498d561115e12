//! Ordered set of held entries and their bulk release.

use indexmap::IndexMap;
use std::fmt;
use std::sync::Arc;

use crate::entry::CacheEntry;
use crate::key::IdentityKey;
use crate::registry::CacheRegistry;

/// Summary of a bulk release.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReleaseReport {
    /// Entries whose mutex was released.
    pub released: usize,
    /// Placeholders unlinked from the registry.
    pub removed_placeholders: usize,
    /// Entries that were no longer held when released.
    pub not_held: usize,
}

/// Entries held by one acquisition, in acquisition order.
///
/// Each entry appears at most once, so a release touches every mutex exactly
/// once. Dropping a set that still holds entries releases them and logs a
/// warning; callers are expected to call [`release_all`](Self::release_all).
pub struct LockSet<O> {
    registry: Arc<CacheRegistry<O>>,
    held: IndexMap<IdentityKey, Arc<CacheEntry<O>>>,
}

impl<O> LockSet<O> {
    /// Creates an empty set bound to `registry`.
    #[must_use]
    pub fn new(registry: Arc<CacheRegistry<O>>) -> Self {
        Self {
            registry,
            held: IndexMap::new(),
        }
    }

    /// Records a held entry. Returns `false` if its identity was already held.
    pub fn insert(&mut self, entry: Arc<CacheEntry<O>>) -> bool {
        if self.held.contains_key(entry.key()) {
            return false;
        }
        self.held.insert(entry.key().clone(), entry);
        true
    }

    /// Returns true if `key` is held by this set.
    #[must_use]
    pub fn contains(&self, key: &IdentityKey) -> bool {
        self.held.contains_key(key)
    }

    /// Held entry for `key`.
    #[must_use]
    pub fn entry(&self, key: &IdentityKey) -> Option<&Arc<CacheEntry<O>>> {
        self.held.get(key)
    }

    /// Held identities in acquisition order.
    pub fn keys(&self) -> impl Iterator<Item = &IdentityKey> {
        self.held.keys()
    }

    /// Held entries in acquisition order.
    pub fn entries(&self) -> impl Iterator<Item = &Arc<CacheEntry<O>>> {
        self.held.values()
    }

    /// Number of held entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.held.len()
    }

    /// Returns true if nothing is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }

    /// Registry the entries belong to.
    #[must_use]
    pub fn registry(&self) -> &Arc<CacheRegistry<O>> {
        &self.registry
    }

    /// Releases every held entry once and empties the set.
    ///
    /// Placeholders are unlinked from the registry before their last hold is
    /// released, so no other thread can populate an entry that is about to
    /// disappear. A failure on one entry never stops the others from being
    /// released.
    pub fn release_all(&mut self) -> ReleaseReport {
        let mut report = ReleaseReport::default();
        for (key, entry) in self.held.drain(..) {
            let last_hold = entry.mutex().depth() == 1;
            if last_hold && entry.is_placeholder() && self.registry.remove(&entry) {
                report.removed_placeholders += 1;
            }
            if entry.release() {
                report.released += 1;
            } else {
                report.not_held += 1;
                tracing::warn!(%key, "released a cache entry that was not held");
            }
        }
        report
    }
}

impl<O> Drop for LockSet<O> {
    fn drop(&mut self) {
        if !self.held.is_empty() {
            tracing::warn!(
                held = self.held.len(),
                "lock set dropped while holding entries, releasing"
            );
            self.release_all();
        }
    }
}

impl<O> fmt::Debug for LockSet<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.held.keys()).finish()
    }
}

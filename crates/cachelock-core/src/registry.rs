//! Identity registry: `(type, key)` to [`CacheEntry`].
//!
//! Backed by a sharded `DashMap`, so find-or-insert is atomic per key: two
//! threads racing to create the same identity always end up sharing one entry.
//! The registry also owns the [`WaitQueue`] used by merge requesters, so the
//! queue lives exactly as long as the cache it arbitrates.

use dashmap::DashMap;
use rustc_hash::FxBuildHasher;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::LockPolicy;
use crate::entry::CacheEntry;
use crate::error::Result;
use crate::key::IdentityKey;
use crate::mutex::WaitOutcome;
use crate::wait_queue::{RequesterId, WaitQueue};

/// Result of a non-blocking lock attempt on an identity.
#[derive(Debug)]
pub enum TryLock<O> {
    /// The calling thread now holds the entry.
    Locked(Arc<CacheEntry<O>>),
    /// Another thread holds the entry.
    Contended(Arc<CacheEntry<O>>),
}

/// Shared cache of entries keyed by identity.
pub struct CacheRegistry<O> {
    entries: DashMap<IdentityKey, Arc<CacheEntry<O>>, FxBuildHasher>,
    wait_queue: WaitQueue,
    policy: LockPolicy,
    next_requester: AtomicU64,
    blocked_appends: AtomicUsize,
    shutting_down: AtomicBool,
}

impl<O> Default for CacheRegistry<O> {
    fn default() -> Self {
        Self::new(LockPolicy::default())
    }
}

impl<O> CacheRegistry<O> {
    /// Creates an empty registry. A `max_tries` of zero is raised to one.
    #[must_use]
    pub fn new(policy: LockPolicy) -> Self {
        Self {
            entries: DashMap::with_hasher(FxBuildHasher),
            wait_queue: WaitQueue::new(),
            policy: LockPolicy {
                max_tries: policy.max_tries.max(1),
                ..policy
            },
            next_requester: AtomicU64::new(1),
            blocked_appends: AtomicUsize::new(0),
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Lock tuning in effect.
    #[must_use]
    pub fn policy(&self) -> &LockPolicy {
        &self.policy
    }

    /// Queue of blocked merge requesters.
    #[must_use]
    pub fn wait_queue(&self) -> &WaitQueue {
        &self.wait_queue
    }

    /// Allocates a requester id for a bulk acquisition.
    pub fn next_requester_id(&self) -> RequesterId {
        self.next_requester.fetch_add(1, Ordering::Relaxed)
    }

    /// Returns the entry for `key`, inserting a placeholder if absent.
    ///
    /// Concurrent callers with the same key all receive the same entry.
    pub fn get_or_create_entry(&self, key: &IdentityKey) -> Arc<CacheEntry<O>> {
        if let Some(entry) = self.entries.get(key) {
            return Arc::clone(entry.value());
        }
        let entry = self
            .entries
            .entry(key.clone())
            .or_insert_with(|| Arc::new(CacheEntry::placeholder(key.clone())));
        Arc::clone(entry.value())
    }

    /// Returns the entry for `key` without creating one.
    #[must_use]
    pub fn lookup(&self, key: &IdentityKey) -> Option<Arc<CacheEntry<O>>> {
        self.entries.get(key).map(|e| Arc::clone(e.value()))
    }

    /// Returns true if `entry` is the one currently registered for its key.
    #[must_use]
    pub fn is_current(&self, entry: &Arc<CacheEntry<O>>) -> bool {
        self.entries
            .get(entry.key())
            .is_some_and(|e| Arc::ptr_eq(e.value(), entry))
    }

    /// Unlinks `entry`.
    ///
    /// No-op returning `false` if it was already removed or replaced.
    pub fn remove(&self, entry: &Arc<CacheEntry<O>>) -> bool {
        self.entries
            .remove_if(entry.key(), |_, current| Arc::ptr_eq(current, entry))
            .is_some()
    }

    /// Removes whatever entry is registered for `key`.
    pub fn evict(&self, key: &IdentityKey) -> Option<Arc<CacheEntry<O>>> {
        self.entries.remove(key).map(|(_, entry)| entry)
    }

    /// Tries to lock the registered entry for `key` without blocking.
    ///
    /// An entry that gets unlinked between lookup and lock is released and the
    /// lookup repeated, so a `Locked` result always refers to the live entry.
    pub fn try_acquire_entry(&self, key: &IdentityKey) -> TryLock<O> {
        loop {
            let entry = self.get_or_create_entry(key);
            if !entry.try_acquire() {
                return TryLock::Contended(entry);
            }
            if self.is_current(&entry) {
                return TryLock::Locked(entry);
            }
            entry.release();
        }
    }

    /// Locks the registered entry for `key`, waiting up to `timeout`
    /// (`None` waits until it is released).
    pub fn acquire_entry_timeout(
        &self,
        key: &IdentityKey,
        timeout: Option<Duration>,
    ) -> (WaitOutcome, Arc<CacheEntry<O>>) {
        loop {
            let entry = self.get_or_create_entry(key);
            let outcome = entry.mutex().acquire_timeout(timeout);
            if outcome != WaitOutcome::Released {
                return (outcome, entry);
            }
            if self.is_current(&entry) {
                return (outcome, entry);
            }
            entry.release();
        }
    }

    /// Caches `object` under `key`, blocking until the entry is free.
    ///
    /// # Errors
    ///
    /// Propagates `Error::NotLockOwner` from the payload write, which cannot
    /// happen while the entry lock is held here.
    pub fn put(&self, key: &IdentityKey, object: Arc<O>) -> Result<Arc<CacheEntry<O>>> {
        let entry = loop {
            let entry = self.get_or_create_entry(key);
            entry.mutex().acquire();
            if self.is_current(&entry) {
                break entry;
            }
            entry.release();
        };
        let written = entry.set_payload(object);
        entry.release();
        written.map(|()| entry)
    }

    /// Cached object for `key`, recording the read.
    #[must_use]
    pub fn get(&self, key: &IdentityKey) -> Option<Arc<O>> {
        let entry = self.lookup(key)?;
        let payload = entry.payload()?;
        entry.touch();
        Some(payload)
    }

    /// Number of registered entries, placeholders included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no entry is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registered identities.
    #[must_use]
    pub fn keys(&self) -> Vec<IdentityKey> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    /// Number of entries whose mutex is currently held.
    #[must_use]
    pub fn held_count(&self) -> usize {
        self.snapshot()
            .iter()
            .filter(|e| e.mutex().is_acquired())
            .count()
    }

    /// Number of entries without a payload.
    #[must_use]
    pub fn placeholder_count(&self) -> usize {
        self.snapshot().iter().filter(|e| e.is_placeholder()).count()
    }

    /// Wakes every waiter on every entry with an interrupted outcome.
    pub fn interrupt_waiters(&self) {
        for entry in self.snapshot() {
            entry.mutex().interrupt();
        }
    }

    /// Number of merges currently blocked in an append while holding locks.
    #[must_use]
    pub fn blocked_appends(&self) -> usize {
        self.blocked_appends.load(Ordering::Acquire)
    }

    /// Counts the caller as a blocked append until the guard is dropped.
    pub(crate) fn block_append(&self) -> BlockedAppend<'_> {
        self.blocked_appends.fetch_add(1, Ordering::AcqRel);
        BlockedAppend {
            counter: &self.blocked_appends,
        }
    }

    /// Marks the registry as shutting down and interrupts all waiters.
    ///
    /// Interrupted waits then surface as `Error::WaitInterrupted` instead of
    /// being retried.
    pub fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::Release);
        self.interrupt_waiters();
    }

    /// Returns true once [`shutdown`](Self::shutdown) was called.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Entries copied out so no shard lock is held while touching mutexes.
    fn snapshot(&self) -> Vec<Arc<CacheEntry<O>>> {
        self.entries.iter().map(|e| Arc::clone(e.value())).collect()
    }
}

/// Registration of one blocked append, see [`CacheRegistry::block_append`].
pub(crate) struct BlockedAppend<'a> {
    counter: &'a AtomicUsize,
}

impl Drop for BlockedAppend<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::AcqRel);
    }
}

//! Cache entry: one identity's payload slot plus its mutex.

use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{Error, Result};
use crate::key::IdentityKey;
use crate::mutex::EntryMutex;

/// Milliseconds since the Unix epoch.
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

/// Concurrency state of one cached object.
///
/// An entry without a payload is a placeholder: it reserves the identity while
/// some thread populates it. Readers that find one treat the object as not yet
/// available.
pub struct CacheEntry<O> {
    key: IdentityKey,
    payload: RwLock<Option<Arc<O>>>,
    mutex: EntryMutex,
    last_read: AtomicU64,
    invalidated: AtomicBool,
}

impl<O> CacheEntry<O> {
    /// Creates a placeholder entry.
    #[must_use]
    pub fn placeholder(key: IdentityKey) -> Self {
        Self {
            key,
            payload: RwLock::new(None),
            mutex: EntryMutex::new(),
            last_read: AtomicU64::new(now_millis()),
            invalidated: AtomicBool::new(false),
        }
    }

    /// Identity of this entry.
    #[must_use]
    pub fn key(&self) -> &IdentityKey {
        &self.key
    }

    /// The entry's mutex.
    #[must_use]
    pub fn mutex(&self) -> &EntryMutex {
        &self.mutex
    }

    /// Cached object, possibly stale if read without holding the mutex.
    #[must_use]
    pub fn payload(&self) -> Option<Arc<O>> {
        self.payload.read().clone()
    }

    /// Returns true if the entry has no payload yet.
    #[must_use]
    pub fn is_placeholder(&self) -> bool {
        self.payload.read().is_none()
    }

    /// Returns true if `object` is the instance cached here.
    #[must_use]
    pub fn holds(&self, object: &Arc<O>) -> bool {
        self.payload
            .read()
            .as_ref()
            .is_some_and(|cached| Arc::ptr_eq(cached, object))
    }

    /// Replaces the payload. The caller must hold the entry's mutex.
    ///
    /// Setting a payload counts as a refresh: the entry is revalidated and its
    /// read time reset.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotLockOwner` if the calling thread does not hold the
    /// mutex.
    pub fn set_payload(&self, object: Arc<O>) -> Result<()> {
        if !self.mutex.is_held_by_current_thread() {
            return Err(Error::NotLockOwner(self.key.clone()));
        }
        *self.payload.write() = Some(object);
        self.revalidate();
        Ok(())
    }

    /// Records a read of the payload.
    pub fn touch(&self) {
        self.last_read.store(now_millis(), Ordering::Relaxed);
    }

    /// Time of the last read or refresh, in milliseconds since the epoch.
    #[must_use]
    pub fn last_read_millis(&self) -> u64 {
        self.last_read.load(Ordering::Relaxed)
    }

    /// Marks the cached value as invalid.
    pub fn invalidate(&self) {
        self.invalidated.store(true, Ordering::Release);
    }

    /// Clears the invalid mark and resets the read time.
    pub fn revalidate(&self) {
        self.invalidated.store(false, Ordering::Release);
        self.touch();
    }

    /// Returns true if [`invalidate`](Self::invalidate) was called since the
    /// last refresh.
    #[must_use]
    pub fn is_invalidated(&self) -> bool {
        self.invalidated.load(Ordering::Acquire)
    }

    /// Acquires the entry mutex without blocking.
    pub fn try_acquire(&self) -> bool {
        self.mutex.try_acquire()
    }

    /// Releases one level of the entry mutex.
    pub fn release(&self) -> bool {
        self.mutex.release()
    }
}

impl<O> fmt::Debug for CacheEntry<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEntry")
            .field("key", &self.key)
            .field("placeholder", &self.is_placeholder())
            .field("holder", &self.mutex.active_holder())
            .field("invalidated", &self.is_invalidated())
            .finish_non_exhaustive()
    }
}

//! Write lock manager: clone-lock retry loop and deadlock-avoiding bulk
//! acquisition for merges.
//!
//! # Deadlock Avoidance
//!
//! Merge requesters try-lock their whole change set. On contention a requester
//! that is not at the head of the registry's [`WaitQueue`] releases everything
//! it holds, joins the queue if it is not already in it, and waits a bounded
//! time on the contended entry before retrying. The head (the *prevailing*
//! requester) keeps what it holds and blocks until the contended entry is
//! released to it.
//!
//! Only the head ever blocks while holding locks, and every other thread
//! releases before waiting, so the holder of whatever the head waits on always
//! gets to finish or release. The queue is strictly FIFO: a requester keeps
//! its position across retries and leaves only when it completes or fails.
//!
//! [`WriteLockManager::append_lock`] is the one exception: a merge already in
//! progress cannot give up what it holds. It waits in short slices and counts
//! itself as a blocked append in the registry. The head re-checks that count
//! every `max_wait` (or `prevailing_wait` when set). If any append is blocked
//! it releases its own locks, keeps its queue position and waits, lock-free,
//! for the entry it wanted.

use std::sync::Arc;

use crate::change_set::ChangeSet;
use crate::entry::CacheEntry;
use crate::error::{Error, Result};
use crate::key::{IdentityKey, PrimaryKey};
use crate::lock_set::{LockSet, ReleaseReport};
use crate::mutex::WaitOutcome;
use crate::registry::{CacheRegistry, TryLock};
use crate::session::{Identifiable, LockSession};
use crate::walker::{CloneLocks, GraphLockWalker, LockAttempt};
use crate::wait_queue::{QueueTicket, RequesterId};

/// Result of [`WriteLockManager::acquire_locks_for_clone`].
#[derive(Debug)]
pub enum CloneOutcome<O> {
    /// The clone root and its eager graph are locked.
    Locked(CloneLocks<O>),
    /// The root must be refreshed rather than cloned; nothing is held.
    Refresh(IdentityKey),
}

/// Locks held for one merge.
#[derive(Debug)]
pub struct MergeLocks<O> {
    requester: RequesterId,
    locks: LockSet<O>,
}

impl<O> MergeLocks<O> {
    /// Requester id used in the wait queue.
    #[must_use]
    pub fn requester(&self) -> RequesterId {
        self.requester
    }

    /// The held entries.
    #[must_use]
    pub fn locks(&self) -> &LockSet<O> {
        &self.locks
    }

    /// Number of held entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Returns true if nothing is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    /// Returns true if `key` is held.
    #[must_use]
    pub fn contains(&self, key: &IdentityKey) -> bool {
        self.locks.contains(key)
    }

    /// Held entry for `key`.
    #[must_use]
    pub fn entry(&self, key: &IdentityKey) -> Option<&Arc<CacheEntry<O>>> {
        self.locks.entry(key)
    }

    /// Writes every change's working copy into its held entry.
    ///
    /// Returns the number of entries written. Changes without an object or
    /// whose identity is not held here are skipped.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotLockOwner` if called from a thread other than the
    /// one that acquired the locks.
    pub fn merge(&self, change_set: &ChangeSet<O>) -> Result<usize> {
        let mut written = 0;
        for change in change_set.changes() {
            let (Some(key), Some(object)) = (change.key(), change.object()) else {
                continue;
            };
            if let Some(entry) = self.locks.entry(key) {
                entry.set_payload(Arc::clone(object))?;
                written += 1;
            }
        }
        Ok(written)
    }

    /// Releases every held entry.
    pub fn release_all(&mut self) -> ReleaseReport {
        self.locks.release_all()
    }
}

/// Coordinates clone and merge locking over one registry.
pub struct WriteLockManager<O> {
    registry: Arc<CacheRegistry<O>>,
}

impl<O> Clone for WriteLockManager<O> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<O: Identifiable> WriteLockManager<O> {
    /// Creates a manager over `registry`.
    #[must_use]
    pub fn new(registry: Arc<CacheRegistry<O>>) -> Self {
        Self { registry }
    }

    /// The managed registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<CacheRegistry<O>> {
        &self.registry
    }

    /// Locks `root` and every entity a clone of it would copy.
    ///
    /// Each attempt is a non-blocking graph walk. On contention nothing is
    /// held; the thread waits (bounded by the clone wait) for the contended
    /// entry and walks again, up to `max_tries` attempts.
    ///
    /// # Errors
    ///
    /// - `Error::MaxTriesOnClone` when the retry bound is exceeded.
    /// - `Error::WaitInterrupted` when the registry shuts down mid-wait.
    /// - `Error::MissingDescriptor` for unmapped types.
    pub fn acquire_locks_for_clone<S>(&self, root: &Arc<O>, session: &S) -> Result<CloneOutcome<O>>
    where
        S: LockSession<O>,
    {
        let policy = *self.registry.policy();
        let walker = GraphLockWalker::new(&self.registry, session);
        for attempt in 1..=policy.max_tries {
            let entry = match walker.walk(root)? {
                LockAttempt::Acquired(locks) => return Ok(CloneOutcome::Locked(locks)),
                LockAttempt::Refresh(key) => return Ok(CloneOutcome::Refresh(key)),
                LockAttempt::Contended(entry) => entry,
            };
            tracing::debug!(key = %entry.key(), attempt, "clone walk contended");
            if entry.mutex().wait_for_release(Some(policy.clone_wait)) == WaitOutcome::Interrupted
                && self.registry.is_shutting_down()
            {
                return Err(Error::WaitInterrupted(entry.key().clone()));
            }
        }

        let root_key = session
            .extract_key(root)
            .unwrap_or_else(|| IdentityKey::new(root.entity_type(), PrimaryKey::new(Vec::new())));
        tracing::error!(%root_key, tries = policy.max_tries, "max tries exceeded on clone");
        Err(Error::MaxTriesOnClone {
            root: root_key,
            tries: policy.max_tries,
        })
    }

    /// Locks every identity in `change_set` for a merge.
    ///
    /// Returns only when all are held. With `lock_on_merge` disabled this
    /// returns an empty lock set immediately.
    ///
    /// # Errors
    ///
    /// Returns `Error::WaitInterrupted` if the registry shuts down while this
    /// requester waits. Nothing is held when an error is returned.
    pub fn acquire_required_locks(&self, change_set: &ChangeSet<O>) -> Result<MergeLocks<O>> {
        let requester = self.registry.next_requester_id();
        let mut locks = LockSet::new(Arc::clone(&self.registry));
        if !self.registry.policy().lock_on_merge {
            return Ok(MergeLocks { requester, locks });
        }

        let mut ticket = None;
        let result = self.acquire_change_set(requester, change_set, &mut locks, &mut ticket);
        if let Some(ticket) = ticket {
            self.registry.wait_queue().remove(ticket);
        }
        match result {
            Ok(()) => Ok(MergeLocks { requester, locks }),
            Err(e) => {
                locks.release_all();
                Err(e)
            }
        }
    }

    fn acquire_change_set(
        &self,
        requester: RequesterId,
        change_set: &ChangeSet<O>,
        locks: &mut LockSet<O>,
        ticket: &mut Option<QueueTicket>,
    ) -> Result<()> {
        let policy = *self.registry.policy();
        let queue = self.registry.wait_queue();

        'retry: loop {
            for key in change_set.keys() {
                if locks.contains(key) {
                    continue;
                }
                let contended = match self.registry.try_acquire_entry(key) {
                    TryLock::Locked(entry) => {
                        locks.insert(entry);
                        continue;
                    }
                    TryLock::Contended(entry) => entry,
                };

                if ticket.is_some_and(|t| queue.is_head(t)) {
                    let slice = policy.prevailing_wait.unwrap_or(policy.max_wait);
                    let (outcome, entry) = self.registry.acquire_entry_timeout(key, Some(slice));
                    match outcome {
                        WaitOutcome::Released => {
                            locks.insert(entry);
                        }
                        WaitOutcome::TimedOut => {
                            if self.registry.blocked_appends() > 0 {
                                tracing::debug!(
                                    %key,
                                    requester,
                                    "prevailing requester yielding to a blocked append"
                                );
                                locks.release_all();
                                if entry.mutex().wait_for_release(Some(policy.max_wait))
                                    == WaitOutcome::Interrupted
                                    && self.registry.is_shutting_down()
                                {
                                    return Err(Error::WaitInterrupted(key.clone()));
                                }
                            } else if policy.prevailing_wait.is_some() {
                                tracing::warn!(%key, requester, "prevailing wait timed out");
                            }
                        }
                        WaitOutcome::Interrupted => {
                            if self.registry.is_shutting_down() {
                                return Err(Error::WaitInterrupted(key.clone()));
                            }
                            locks.release_all();
                        }
                    }
                    continue 'retry;
                }

                locks.release_all();
                if ticket.is_none() {
                    *ticket = Some(queue.enqueue(requester));
                    tracing::warn!(
                        %key,
                        requester,
                        holder = ?contended.mutex().active_holder(),
                        "deadlock encountered on write, requester queued"
                    );
                }
                match contended.mutex().wait_for_release(Some(policy.max_wait)) {
                    WaitOutcome::Released => {}
                    WaitOutcome::TimedOut => {
                        tracing::warn!(%key, requester, "max time exceeded waiting for write lock");
                    }
                    WaitOutcome::Interrupted => {
                        if self.registry.is_shutting_down() {
                            return Err(Error::WaitInterrupted(key.clone()));
                        }
                    }
                }
                continue 'retry;
            }
            return Ok(());
        }
    }

    /// Locks one more identity for an in-flight merge.
    ///
    /// Used for objects that appear during the merge and were not in the
    /// change set. A placeholder entry is populated with `object`. The calling
    /// thread keeps its other locks while waiting, so each wait is bounded by
    /// `append_wait`, the number of attempts is capped, and the prevailing
    /// requester is told to yield while this call is blocked.
    ///
    /// # Errors
    ///
    /// Returns `Error::MaxTriesOnMerge` when the bound is exceeded, or
    /// `Error::WaitInterrupted` on shutdown. In both cases every lock in
    /// `merge` is released first.
    pub fn append_lock(
        &self,
        merge: &mut MergeLocks<O>,
        key: IdentityKey,
        object: Arc<O>,
    ) -> Result<Arc<CacheEntry<O>>> {
        if let Some(entry) = merge.locks.entry(&key) {
            return Ok(Arc::clone(entry));
        }
        let policy = *self.registry.policy();
        let mut blocked = None;
        for _ in 0..policy.max_tries {
            match self.registry.try_acquire_entry(&key) {
                TryLock::Locked(entry) => {
                    if entry.is_placeholder() {
                        if let Err(e) = entry.set_payload(object) {
                            entry.release();
                            merge.locks.release_all();
                            return Err(e);
                        }
                    }
                    merge.locks.insert(Arc::clone(&entry));
                    return Ok(entry);
                }
                TryLock::Contended(entry) => {
                    blocked.get_or_insert_with(|| self.registry.block_append());
                    if entry.mutex().wait_for_release(Some(policy.append_wait))
                        == WaitOutcome::Interrupted
                        && self.registry.is_shutting_down()
                    {
                        merge.locks.release_all();
                        return Err(Error::WaitInterrupted(key));
                    }
                }
            }
        }

        tracing::error!(%key, tries = policy.max_tries, "max tries exceeded on merge");
        merge.locks.release_all();
        Err(Error::MaxTriesOnMerge {
            key,
            tries: policy.max_tries,
        })
    }
}

//! Graph lock walker: locks a clone root and everything it eagerly reaches.
//!
//! One call to [`GraphLockWalker::walk`] is one attempt. Every lock is taken
//! with a non-blocking try; the first contended entry aborts the walk, the
//! locks taken so far are released, and the contended entry is handed back so
//! the caller can wait on it. Blocking inside the walk could deadlock two
//! threads cloning the same cyclic graph from different roots.

use rustc_hash::FxHashSet;
use std::sync::Arc;

use crate::descriptor::{Descriptor, ReferenceKind};
use crate::entry::CacheEntry;
use crate::error::{Error, Result};
use crate::key::IdentityKey;
use crate::lock_set::{LockSet, ReleaseReport};
use crate::registry::{CacheRegistry, TryLock};
use crate::session::{Identifiable, LockSession};

/// Outcome of one walk attempt.
#[derive(Debug)]
pub enum LockAttempt<O> {
    /// Every required entry is held.
    Acquired(CloneLocks<O>),
    /// This entry could not be locked; nothing is held.
    Contended(Arc<CacheEntry<O>>),
    /// The root's cached value is invalidated and must be refreshed instead
    /// of cloned; nothing is held.
    Refresh(IdentityKey),
}

/// Locks held for one clone.
#[derive(Debug)]
pub struct CloneLocks<O> {
    locks: LockSet<O>,
    needs_refresh: Vec<IdentityKey>,
}

impl<O> CloneLocks<O> {
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

    /// Related objects skipped because their cached value is invalidated.
    #[must_use]
    pub fn needs_refresh(&self) -> &[IdentityKey] {
        &self.needs_refresh
    }

    /// Releases every held entry.
    pub fn release_all(&mut self) -> ReleaseReport {
        self.locks.release_all()
    }
}

enum NodeLock<O> {
    Locked,
    Contended(Arc<CacheEntry<O>>),
}

/// Per-attempt bookkeeping.
struct LockRequest<O> {
    acquired: LockSet<O>,
    visited_for_refresh: FxHashSet<IdentityKey>,
    visited_unkeyed: FxHashSet<usize>,
    needs_refresh: Vec<IdentityKey>,
}

/// Walks a live object graph taking clone locks.
pub struct GraphLockWalker<'a, O, S> {
    registry: &'a Arc<CacheRegistry<O>>,
    session: &'a S,
}

impl<'a, O, S> GraphLockWalker<'a, O, S>
where
    O: Identifiable,
    S: LockSession<O>,
{
    /// Creates a walker over `registry` using `session` for metadata.
    #[must_use]
    pub fn new(registry: &'a Arc<CacheRegistry<O>>, session: &'a S) -> Self {
        Self { registry, session }
    }

    /// Makes one attempt to lock `root` and its eagerly reachable entities.
    ///
    /// Either every required entry ends up held, or nothing is held when this
    /// returns.
    ///
    /// # Errors
    ///
    /// Returns `Error::MissingDescriptor` if an object on the walk has no
    /// descriptor. Locks taken before the error are released.
    pub fn walk(&self, root: &Arc<O>) -> Result<LockAttempt<O>> {
        let descriptor = self.descriptor_of(root)?;
        let mut request = LockRequest {
            acquired: LockSet::new(Arc::clone(self.registry)),
            visited_for_refresh: FxHashSet::default(),
            visited_unkeyed: FxHashSet::default(),
            needs_refresh: Vec::new(),
        };

        if let Some(key) = self.session.extract_key(root) {
            request.visited_for_refresh.insert(key.clone());
            if let Some(entry) = self.registry.lookup(&key) {
                if self.session.is_invalidated(&entry)
                    && self.session.should_refresh_in_stale_read(&descriptor)
                {
                    return Ok(LockAttempt::Refresh(key));
                }
            }
            if let NodeLock::Contended(entry) = self.lock_node(root, key, &mut request) {
                request.acquired.release_all();
                return Ok(LockAttempt::Contended(entry));
            }
        } else {
            request.visited_unkeyed.insert(Arc::as_ptr(root) as usize);
        }

        match self.lock_related(root, &descriptor, &mut request) {
            Ok(NodeLock::Locked) => Ok(LockAttempt::Acquired(CloneLocks {
                locks: request.acquired,
                needs_refresh: request.needs_refresh,
            })),
            Ok(NodeLock::Contended(entry)) => {
                request.acquired.release_all();
                Ok(LockAttempt::Contended(entry))
            }
            Err(e) => {
                request.acquired.release_all();
                Err(e)
            }
        }
    }

    fn descriptor_of(&self, object: &O) -> Result<Arc<Descriptor<O>>> {
        let entity = object.entity_type();
        self.session
            .descriptor(&entity)
            .ok_or_else(|| Error::MissingDescriptor(entity.to_string()))
    }

    /// Try-locks one entity's entry and records it.
    fn lock_node(
        &self,
        object: &Arc<O>,
        key: IdentityKey,
        request: &mut LockRequest<O>,
    ) -> NodeLock<O> {
        if request.acquired.contains(&key) {
            return NodeLock::Locked;
        }
        match self.registry.try_acquire_entry(&key) {
            TryLock::Contended(entry) => NodeLock::Contended(entry),
            TryLock::Locked(entry) => {
                request.acquired.insert(Arc::clone(&entry));
                // Some other instance is cached under this identity.
                if !entry.is_placeholder() && !entry.holds(object) {
                    return NodeLock::Contended(entry);
                }
                NodeLock::Locked
            }
        }
    }

    /// Locks everything reachable from `origin` through lockable fields.
    ///
    /// Depth-first with an explicit stack; stops at the first contention.
    fn lock_related(
        &self,
        origin: &Arc<O>,
        descriptor: &Descriptor<O>,
        request: &mut LockRequest<O>,
    ) -> Result<NodeLock<O>> {
        let mut pending: Vec<(Arc<O>, ReferenceKind)> = Vec::new();
        push_targets(origin, descriptor, &mut pending);

        while let Some((object, kind)) = pending.pop() {
            let descriptor = self.descriptor_of(&object)?;
            let key = match kind {
                ReferenceKind::Entity => self.session.extract_key(&object),
                ReferenceKind::Aggregate => None,
            };
            let Some(key) = key else {
                // No identity of its own: traverse once, lock nothing.
                if request.visited_unkeyed.insert(Arc::as_ptr(&object) as usize) {
                    push_targets(&object, &descriptor, &mut pending);
                }
                continue;
            };
            if request.acquired.contains(&key) {
                continue;
            }
            // Seen but not held: already set aside for refresh.
            if !request.visited_for_refresh.insert(key.clone()) {
                continue;
            }
            if let Some(entry) = self.registry.lookup(&key) {
                if self.session.is_invalidated(&entry)
                    && self.session.should_refresh_in_stale_read(&descriptor)
                {
                    request.needs_refresh.push(key);
                    continue;
                }
            }
            match self.lock_node(&object, key, request) {
                NodeLock::Locked => push_targets(&object, &descriptor, &mut pending),
                contended @ NodeLock::Contended(_) => return Ok(contended),
            }
        }
        Ok(NodeLock::Locked)
    }
}

fn push_targets<O>(
    object: &Arc<O>,
    descriptor: &Descriptor<O>,
    pending: &mut Vec<(Arc<O>, ReferenceKind)>,
) {
    for relationship in descriptor.lockable_relationships() {
        let kind = relationship.reference_kind();
        pending.extend(relationship.targets(object).into_iter().map(|t| (t, kind)));
    }
}

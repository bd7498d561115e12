//! Session collaborator: descriptor lookup, key extraction, invalidation.

use rustc_hash::FxHashMap;
use std::sync::Arc;

use crate::config::InvalidationConfig;
use crate::descriptor::Descriptor;
use crate::entry::{now_millis, CacheEntry};
use crate::key::{EntityType, IdentityKey, PrimaryKey};

/// A domain object that can live in the cache.
pub trait Identifiable: Send + Sync + 'static {
    /// Mapped type of this object.
    fn entity_type(&self) -> EntityType;

    /// Primary key, or `None` for objects without their own identity
    /// (aggregates, or new objects not yet assigned one).
    fn primary_key(&self) -> Option<PrimaryKey>;
}

/// Context consulted while walking and locking object graphs.
pub trait LockSession<O: Identifiable>: Send + Sync {
    /// Descriptor of `entity`, if mapped.
    fn descriptor(&self, entity: &EntityType) -> Option<Arc<Descriptor<O>>>;

    /// Cache identity of `object`.
    fn extract_key(&self, object: &O) -> Option<IdentityKey> {
        object
            .primary_key()
            .map(|key| IdentityKey::new(object.entity_type(), key))
    }

    /// Returns true if the entry's cached value must not be trusted.
    fn is_invalidated(&self, entry: &CacheEntry<O>) -> bool {
        entry.is_invalidated()
    }

    /// Returns true if invalidated objects of this type are refreshed rather
    /// than cloned.
    fn should_refresh_in_stale_read(&self, descriptor: &Descriptor<O>) -> bool {
        descriptor.stale_read_override().unwrap_or(false)
    }
}

/// Descriptor set plus invalidation policy.
pub struct Session<O> {
    descriptors: FxHashMap<EntityType, Arc<Descriptor<O>>>,
    invalidation: InvalidationConfig,
}

impl<O> Default for Session<O> {
    fn default() -> Self {
        Self {
            descriptors: FxHashMap::default(),
            invalidation: InvalidationConfig::default(),
        }
    }
}

impl<O> Session<O> {
    /// Creates a session with no descriptors.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the invalidation policy.
    #[must_use]
    pub fn with_invalidation(mut self, invalidation: InvalidationConfig) -> Self {
        self.invalidation = invalidation;
        self
    }

    /// Registers a descriptor, replacing any previous one for its type.
    #[must_use]
    pub fn with_descriptor(mut self, descriptor: Descriptor<O>) -> Self {
        self.register(descriptor);
        self
    }

    /// Registers a descriptor, replacing any previous one for its type.
    pub fn register(&mut self, descriptor: Descriptor<O>) {
        self.descriptors
            .insert(descriptor.entity().clone(), Arc::new(descriptor));
    }

    /// Number of registered descriptors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Returns true if no descriptor is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

impl<O: Identifiable> LockSession<O> for Session<O> {
    fn descriptor(&self, entity: &EntityType) -> Option<Arc<Descriptor<O>>> {
        self.descriptors.get(entity).cloned()
    }

    fn is_invalidated(&self, entry: &CacheEntry<O>) -> bool {
        if entry.is_invalidated() {
            return true;
        }
        self.invalidation.time_to_live_ms.is_some_and(|ttl| {
            now_millis().saturating_sub(entry.last_read_millis()) > ttl
        })
    }

    fn should_refresh_in_stale_read(&self, descriptor: &Descriptor<O>) -> bool {
        descriptor
            .stale_read_override()
            .unwrap_or(self.invalidation.refresh_on_stale_read)
    }
}

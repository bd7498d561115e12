//! Change sets: identities an in-flight transaction will merge.

use std::sync::Arc;

use crate::key::IdentityKey;
use crate::session::Identifiable;

/// One changed object.
#[derive(Debug, Clone)]
pub struct ObjectChange<O> {
    key: Option<IdentityKey>,
    object: Option<Arc<O>>,
}

impl<O> ObjectChange<O> {
    /// Identity to lock; `None` for objects without an assigned key.
    #[must_use]
    pub fn key(&self) -> Option<&IdentityKey> {
        self.key.as_ref()
    }

    /// Working copy to merge, if any.
    #[must_use]
    pub fn object(&self) -> Option<&Arc<O>> {
        self.object.as_ref()
    }
}

/// Ordered collection of changes requiring locks before merge.
#[derive(Debug, Clone)]
pub struct ChangeSet<O> {
    changes: Vec<ObjectChange<O>>,
}

impl<O> Default for ChangeSet<O> {
    fn default() -> Self {
        Self {
            changes: Vec::new(),
        }
    }
}

impl<O> ChangeSet<O> {
    /// Creates an empty change set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a change for `key` with the working copy to merge.
    #[must_use]
    pub fn with_change(mut self, key: IdentityKey, object: Arc<O>) -> Self {
        self.push(key, Some(object));
        self
    }

    /// Adds a key to lock without an object to merge.
    #[must_use]
    pub fn with_key(mut self, key: IdentityKey) -> Self {
        self.push(key, None);
        self
    }

    /// Adds a change.
    pub fn push(&mut self, key: IdentityKey, object: Option<Arc<O>>) {
        self.changes.push(ObjectChange {
            key: Some(key),
            object,
        });
    }

    /// Adds an object that has no identity yet; it is never locked.
    pub fn push_new(&mut self, object: Arc<O>) {
        self.changes.push(ObjectChange {
            key: None,
            object: Some(object),
        });
    }

    /// All changes in insertion order.
    #[must_use]
    pub fn changes(&self) -> &[ObjectChange<O>] {
        &self.changes
    }

    /// Identities requiring locks.
    pub fn keys(&self) -> impl Iterator<Item = &IdentityKey> {
        self.changes.iter().filter_map(ObjectChange::key)
    }

    /// Number of changes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Returns true if there are no changes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

impl<O: Identifiable> ChangeSet<O> {
    /// Builds a change set from objects, keyed by their own identity.
    #[must_use]
    pub fn from_objects(objects: impl IntoIterator<Item = Arc<O>>) -> Self {
        let mut set = Self::new();
        for object in objects {
            match object.primary_key() {
                Some(key) => set.push(IdentityKey::new(object.entity_type(), key), Some(object)),
                None => set.push_new(object),
            }
        }
        set
    }
}

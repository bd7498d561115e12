//! Object descriptors: which relationships a clone walk must follow.
//!
//! A [`Relationship`] is a tagged variant over the mapping shapes that matter
//! for locking. Each one knows how to enumerate its targets on a live object,
//! and whether it cascades locks. Deferred (lazily loaded) references are not
//! copied by a clone, so they never cascade.

use std::fmt;
use std::sync::Arc;

use crate::key::EntityType;

type TargetsFn<O> = Arc<dyn Fn(&O) -> Vec<Arc<O>> + Send + Sync>;

/// Whether a relationship's target has its own cache identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    /// Target is an entity with its own cache entry; it is locked.
    Entity,
    /// Target is embedded in its owner; it is traversed but not locked.
    Aggregate,
}

/// Mapping shape of a relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationshipKind {
    /// Single entity reference.
    OneToOne,
    /// Collection of entity references.
    OneToMany,
    /// Embedded object(s) without identity.
    Aggregate {
        /// True for aggregate collections.
        collection: bool,
    },
}

/// One relationship field of a descriptor.
pub struct Relationship<O> {
    name: String,
    kind: RelationshipKind,
    deferred: bool,
    targets: TargetsFn<O>,
}

impl<O> Relationship<O> {
    fn with_kind<F>(name: &str, kind: RelationshipKind, targets: F) -> Self
    where
        F: Fn(&O) -> Vec<Arc<O>> + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            kind,
            deferred: false,
            targets: Arc::new(targets),
        }
    }

    /// Single-valued entity reference.
    pub fn one_to_one<F>(name: &str, target: F) -> Self
    where
        F: Fn(&O) -> Option<Arc<O>> + Send + Sync + 'static,
    {
        Self::with_kind(name, RelationshipKind::OneToOne, move |o| {
            target(o).into_iter().collect()
        })
    }

    /// Collection of entity references.
    pub fn one_to_many<F>(name: &str, targets: F) -> Self
    where
        F: Fn(&O) -> Vec<Arc<O>> + Send + Sync + 'static,
    {
        Self::with_kind(name, RelationshipKind::OneToMany, targets)
    }

    /// Embedded object.
    pub fn aggregate<F>(name: &str, target: F) -> Self
    where
        F: Fn(&O) -> Option<Arc<O>> + Send + Sync + 'static,
    {
        Self::with_kind(
            name,
            RelationshipKind::Aggregate { collection: false },
            move |o| target(o).into_iter().collect(),
        )
    }

    /// Collection of embedded objects.
    pub fn aggregate_collection<F>(name: &str, targets: F) -> Self
    where
        F: Fn(&O) -> Vec<Arc<O>> + Send + Sync + 'static,
    {
        Self::with_kind(
            name,
            RelationshipKind::Aggregate { collection: true },
            targets,
        )
    }

    /// Marks the relationship as lazily loaded; it no longer cascades locks.
    #[must_use]
    pub fn deferred(mut self) -> Self {
        self.deferred = true;
        self
    }

    /// Field name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Mapping shape.
    #[must_use]
    pub fn kind(&self) -> RelationshipKind {
        self.kind
    }

    /// Returns true if a clone walk must lock through this field.
    #[must_use]
    pub fn is_lockable(&self) -> bool {
        !self.deferred
    }

    /// Returns true if the field holds several targets.
    #[must_use]
    pub fn is_collection(&self) -> bool {
        matches!(
            self.kind,
            RelationshipKind::OneToMany | RelationshipKind::Aggregate { collection: true }
        )
    }

    /// Whether targets have their own identity.
    #[must_use]
    pub fn reference_kind(&self) -> ReferenceKind {
        match self.kind {
            RelationshipKind::OneToOne | RelationshipKind::OneToMany => ReferenceKind::Entity,
            RelationshipKind::Aggregate { .. } => ReferenceKind::Aggregate,
        }
    }

    /// Current targets of this field on `object`.
    #[must_use]
    pub fn targets(&self, object: &O) -> Vec<Arc<O>> {
        (self.targets)(object)
    }
}

impl<O> fmt::Debug for Relationship<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Relationship")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("deferred", &self.deferred)
            .finish_non_exhaustive()
    }
}

/// Locking-relevant metadata of one entity or aggregate type.
pub struct Descriptor<O> {
    entity: EntityType,
    relationships: Vec<Relationship<O>>,
    refresh_on_stale_read: Option<bool>,
}

impl<O> Descriptor<O> {
    /// Creates a descriptor with no relationships.
    #[must_use]
    pub fn new(entity: impl Into<EntityType>) -> Self {
        Self {
            entity: entity.into(),
            relationships: Vec::new(),
            refresh_on_stale_read: None,
        }
    }

    /// Adds a relationship field.
    #[must_use]
    pub fn with(mut self, relationship: Relationship<O>) -> Self {
        self.relationships.push(relationship);
        self
    }

    /// Overrides the session-wide stale-read policy for this type.
    #[must_use]
    pub fn refresh_on_stale_read(mut self, refresh: bool) -> Self {
        self.refresh_on_stale_read = Some(refresh);
        self
    }

    /// Described type.
    #[must_use]
    pub fn entity(&self) -> &EntityType {
        &self.entity
    }

    /// All relationship fields.
    #[must_use]
    pub fn relationships(&self) -> &[Relationship<O>] {
        &self.relationships
    }

    /// Fields a clone walk must follow.
    pub fn lockable_relationships(&self) -> impl Iterator<Item = &Relationship<O>> {
        self.relationships.iter().filter(|r| r.is_lockable())
    }

    /// Per-type stale-read override, if set.
    #[must_use]
    pub fn stale_read_override(&self) -> Option<bool> {
        self.refresh_on_stale_read
    }
}

impl<O> fmt::Debug for Descriptor<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Descriptor")
            .field("entity", &self.entity)
            .field("relationships", &self.relationships)
            .field("refresh_on_stale_read", &self.refresh_on_stale_read)
            .finish()
    }
}

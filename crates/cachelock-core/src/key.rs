//! Identity keys: entity type plus an ordered primary-key tuple.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// One component of a primary key.
///
/// Serialized with its column kind (`{"uuid": "..."}`), so a text column that
/// happens to hold a UUID string stays distinct from a UUID column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyValue {
    /// Signed integer column.
    Int(i64),
    /// Text column.
    Text(String),
    /// UUID column.
    Uuid(uuid::Uuid),
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Text(v) => write!(f, "'{v}'"),
            Self::Uuid(v) => write!(f, "{v}"),
        }
    }
}

impl From<i64> for KeyValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<&str> for KeyValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for KeyValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<uuid::Uuid> for KeyValue {
    fn from(v: uuid::Uuid) -> Self {
        Self::Uuid(v)
    }
}

/// Ordered primary-key tuple of an object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PrimaryKey(Vec<KeyValue>);

impl PrimaryKey {
    /// Creates a key from its components.
    #[must_use]
    pub fn new(values: Vec<KeyValue>) -> Self {
        Self(values)
    }

    /// Single-column key.
    #[must_use]
    pub fn single(value: impl Into<KeyValue>) -> Self {
        Self(vec![value.into()])
    }

    /// Single integer column, the common surrogate-key case.
    #[must_use]
    pub fn int(id: i64) -> Self {
        Self(vec![KeyValue::Int(id)])
    }

    /// Key components in column order.
    #[must_use]
    pub fn values(&self) -> &[KeyValue] {
        &self.0
    }

    /// Number of key columns.
    #[must_use]
    pub fn arity(&self) -> usize {
        self.0.len()
    }
}

impl fmt::Display for PrimaryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, v) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{v}")?;
        }
        f.write_str(")")
    }
}

impl From<i64> for PrimaryKey {
    fn from(v: i64) -> Self {
        Self::single(v)
    }
}

/// Name of a mapped entity type. Cheap to clone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityType(Arc<str>);

impl EntityType {
    /// Creates an entity type name.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self(Arc::from(name))
    }

    /// The type name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityType {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Registry key: `(type, primary key)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IdentityKey {
    entity: EntityType,
    key: PrimaryKey,
}

impl IdentityKey {
    /// Creates an identity key.
    #[must_use]
    pub fn new(entity: impl Into<EntityType>, key: impl Into<PrimaryKey>) -> Self {
        Self {
            entity: entity.into(),
            key: key.into(),
        }
    }

    /// Identity with a single integer key column.
    #[must_use]
    pub fn int(entity: impl Into<EntityType>, id: i64) -> Self {
        Self::new(entity, PrimaryKey::int(id))
    }

    /// Entity type part.
    #[must_use]
    pub fn entity(&self) -> &EntityType {
        &self.entity
    }

    /// Primary key part.
    #[must_use]
    pub fn key(&self) -> &PrimaryKey {
        &self.key
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.entity, self.key)
    }
}

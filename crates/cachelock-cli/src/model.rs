//! Demo domain model: records that reference other records.

use cachelock_core::{
    CacheRegistry, Descriptor, EntityType, Identifiable, IdentityKey, PrimaryKey, Relationship,
    Session,
};
use parking_lot::Mutex;
use std::sync::Arc;

pub const RECORD: &str = "Record";

/// A cached record with eager links to other records.
pub struct Record {
    id: i64,
    links: Mutex<Vec<Arc<Record>>>,
}

impl Record {
    pub fn new(id: i64) -> Arc<Self> {
        Arc::new(Self {
            id,
            links: Mutex::new(Vec::new()),
        })
    }

    pub fn key(&self) -> IdentityKey {
        IdentityKey::int(RECORD, self.id)
    }

    pub fn link(&self, target: &Arc<Record>) {
        self.links.lock().push(Arc::clone(target));
    }
}

impl Identifiable for Record {
    fn entity_type(&self) -> EntityType {
        EntityType::new(RECORD)
    }

    fn primary_key(&self) -> Option<PrimaryKey> {
        Some(PrimaryKey::int(self.id))
    }
}

pub fn session() -> Session<Record> {
    Session::new().with_descriptor(
        Descriptor::new(RECORD)
            .with(Relationship::one_to_many("links", |r: &Record| r.links.lock().clone())),
    )
}

/// Builds and caches a chain of `depth` records; the last links back to the
/// first when `cycle` is set. Returns the chain head, `None` for an empty
/// chain.
pub fn cached_chain(
    registry: &CacheRegistry<Record>,
    depth: usize,
    cycle: bool,
) -> cachelock_core::Result<Option<Arc<Record>>> {
    let records: Vec<_> = (1..=depth as i64).map(Record::new).collect();
    for pair in records.windows(2) {
        pair[0].link(&pair[1]);
    }
    if let (true, Some(first), Some(last)) = (cycle, records.first(), records.last()) {
        last.link(first);
    }
    for record in &records {
        registry.put(&record.key(), Arc::clone(record))?;
    }
    Ok(records.first().cloned())
}

//! Shared fixtures for unit tests: a small mutable object graph.

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use crate::config::LockPolicy;
use crate::descriptor::{Descriptor, Relationship};
use crate::key::{EntityType, IdentityKey, PrimaryKey};
use crate::registry::CacheRegistry;
use crate::session::{Identifiable, Session};

/// Timeout for deadlock detection (if a scenario takes longer, likely deadlocked)
pub(crate) const DEADLOCK_TIMEOUT: Duration = Duration::from_secs(10);

pub(crate) const NODE: &str = "Node";
pub(crate) const PART: &str = "Part";

/// Graph node. `eager` and `parts` cascade locks; `lazy` does not.
pub(crate) struct Node {
    entity: &'static str,
    id: Option<i64>,
    eager: Mutex<Vec<Arc<Node>>>,
    lazy: Mutex<Vec<Arc<Node>>>,
    parts: Mutex<Vec<Arc<Node>>>,
}

impl Node {
    fn build(entity: &'static str, id: Option<i64>) -> Arc<Self> {
        Arc::new(Self {
            entity,
            id,
            eager: Mutex::new(Vec::new()),
            lazy: Mutex::new(Vec::new()),
            parts: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn entity(id: i64) -> Arc<Self> {
        Self::build(NODE, Some(id))
    }

    pub(crate) fn unkeyed() -> Arc<Self> {
        Self::build(NODE, None)
    }

    pub(crate) fn part() -> Arc<Self> {
        Self::build(PART, None)
    }

    pub(crate) fn link(&self, target: &Arc<Node>) {
        self.eager.lock().push(Arc::clone(target));
    }

    pub(crate) fn link_lazy(&self, target: &Arc<Node>) {
        self.lazy.lock().push(Arc::clone(target));
    }

    pub(crate) fn add_part(&self, part: &Arc<Node>) {
        self.parts.lock().push(Arc::clone(part));
    }

    pub(crate) fn key(&self) -> IdentityKey {
        IdentityKey::int(self.entity, self.id.unwrap_or_default())
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

impl Identifiable for Node {
    fn entity_type(&self) -> EntityType {
        EntityType::new(self.entity)
    }

    fn primary_key(&self) -> Option<PrimaryKey> {
        self.id.map(PrimaryKey::int)
    }
}

pub(crate) fn node_descriptor(entity: &str) -> Descriptor<Node> {
    Descriptor::new(entity)
        .with(Relationship::one_to_many("eager", |n: &Node| n.eager.lock().clone()))
        .with(Relationship::one_to_many("lazy", |n: &Node| n.lazy.lock().clone()).deferred())
        .with(Relationship::aggregate_collection("parts", |n: &Node| {
            n.parts.lock().clone()
        }))
}

pub(crate) fn session() -> Session<Node> {
    Session::new()
        .with_descriptor(node_descriptor(NODE))
        .with_descriptor(node_descriptor(PART))
}

pub(crate) fn fast_policy() -> LockPolicy {
    LockPolicy::default()
        .with_max_tries(50)
        .with_max_wait(Duration::from_millis(20))
        .with_clone_wait(Duration::from_millis(5))
}

pub(crate) fn registry() -> Arc<CacheRegistry<Node>> {
    Arc::new(CacheRegistry::new(fast_policy()))
}

/// Caches each node under its own key.
pub(crate) fn cache_all(registry: &CacheRegistry<Node>, nodes: &[&Arc<Node>]) {
    for node in nodes {
        registry
            .put(&node.key(), Arc::clone(node))
            .expect("put into registry");
    }
}

/// Runs `scenario` on a worker thread and panics if it does not finish in time.
pub(crate) fn run_with_deadlock_timeout<F>(name: &str, scenario: F)
where
    F: FnOnce() + Send + 'static,
{
    let completed = Arc::new(AtomicBool::new(false));
    let completed_clone = Arc::clone(&completed);
    let handle = thread::spawn(move || {
        scenario();
        completed_clone.store(true, Ordering::SeqCst);
    });

    let start = Instant::now();
    while !completed.load(Ordering::SeqCst) && !handle.is_finished() {
        if start.elapsed() > DEADLOCK_TIMEOUT {
            panic!("DEADLOCK DETECTED: {name} did not complete within timeout");
        }
        thread::sleep(Duration::from_millis(10));
    }

    handle.join().expect("scenario thread panicked");
}

/// An entry lock held by a background thread until [`Holder::release`].
pub(crate) struct Holder {
    release: mpsc::Sender<()>,
    handle: thread::JoinHandle<()>,
}

impl Holder {
    pub(crate) fn release(self) {
        let _ = self.release.send(());
        self.handle.join().expect("holder thread panicked");
    }
}

/// Locks `key` on another thread and returns once it is held.
pub(crate) fn hold_on_other_thread(
    registry: &Arc<CacheRegistry<Node>>,
    key: &IdentityKey,
) -> Holder {
    let (release, wait_release) = mpsc::channel::<()>();
    let (held, wait_held) = mpsc::channel::<()>();
    let registry = Arc::clone(registry);
    let key = key.clone();
    let handle = thread::spawn(move || {
        let (_, entry) = registry.acquire_entry_timeout(&key, None);
        held.send(()).expect("signal held");
        let _ = wait_release.recv();
        entry.release();
    });
    wait_held.recv().expect("holder never acquired");
    Holder { release, handle }
}

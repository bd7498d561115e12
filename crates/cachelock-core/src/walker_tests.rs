//! Tests for `walker` module

use super::walker::*;
use crate::config::InvalidationConfig;
use crate::descriptor::Descriptor;
use crate::error::Error;
use crate::key::IdentityKey;
use crate::session::Session;
use crate::test_support::{
    cache_all, hold_on_other_thread, node_descriptor, registry, session, Node, NODE,
};

fn acquired(attempt: LockAttempt<Node>) -> CloneLocks<Node> {
    match attempt {
        LockAttempt::Acquired(locks) => locks,
        other => panic!("expected locks, got {other:?}"),
    }
}

fn held_keys(locks: &CloneLocks<Node>) -> Vec<IdentityKey> {
    locks.locks().keys().cloned().collect()
}

fn refreshing_session() -> Session<Node> {
    session().with_invalidation(InvalidationConfig {
        time_to_live_ms: None,
        refresh_on_stale_read: true,
    })
}

#[test]
fn test_walk_locks_eager_chain() {
    // Arrange - A -> B -> C, all cached
    let registry = registry();
    let session = session();
    let (a, b, c) = (Node::entity(1), Node::entity(2), Node::entity(3));
    a.link(&b);
    b.link(&c);
    cache_all(&registry, &[&a, &b, &c]);

    // Act
    let mut locks = acquired(GraphLockWalker::new(&registry, &session).walk(&a).expect("walk"));

    // Assert
    assert_eq!(locks.len(), 3);
    for node in [&a, &b, &c] {
        assert!(locks.contains(&node.key()));
        let entry = registry.lookup(&node.key()).expect("cached");
        assert!(entry.mutex().is_held_by_current_thread());
    }
    assert!(locks.needs_refresh().is_empty());

    locks.release_all();
    assert_eq!(registry.held_count(), 0);
}

#[test]
fn test_walk_terminates_on_cycle() {
    let registry = registry();
    let session = session();
    let (a, b) = (Node::entity(1), Node::entity(2));
    a.link(&b);
    b.link(&a);
    cache_all(&registry, &[&a, &b]);

    let mut locks = acquired(GraphLockWalker::new(&registry, &session).walk(&a).expect("walk"));

    assert_eq!(locks.len(), 2);
    for key in [a.key(), b.key()] {
        assert_eq!(registry.lookup(&key).expect("cached").mutex().depth(), 1);
    }
    locks.release_all();
}

#[test]
fn test_walk_skips_deferred_references() {
    let registry = registry();
    let session = session();
    let (a, lazy) = (Node::entity(1), Node::entity(2));
    a.link_lazy(&lazy);
    cache_all(&registry, &[&a, &lazy]);

    let mut locks = acquired(GraphLockWalker::new(&registry, &session).walk(&a).expect("walk"));

    assert_eq!(locks.len(), 1);
    assert!(!locks.contains(&lazy.key()));
    locks.release_all();
}

#[test]
fn test_walk_traverses_aggregates_without_locking_them() {
    // Arrange - A owns a part; the part references entity D
    let registry = registry();
    let session = session();
    let (a, d) = (Node::entity(1), Node::entity(4));
    let part = Node::part();
    a.add_part(&part);
    part.link(&d);
    cache_all(&registry, &[&a, &d]);

    // Act
    let mut locks = acquired(GraphLockWalker::new(&registry, &session).walk(&a).expect("walk"));

    // Assert
    assert_eq!(held_keys(&locks), vec![a.key(), d.key()]);
    assert_eq!(registry.len(), 2, "aggregates never get entries");
    locks.release_all();
}

#[test]
fn test_unkeyed_root_locks_only_related_entities() {
    let registry = registry();
    let session = session();
    let root = Node::unkeyed();
    let b = Node::entity(2);
    root.link(&b);
    cache_all(&registry, &[&b]);

    let mut locks = acquired(GraphLockWalker::new(&registry, &session).walk(&root).expect("walk"));

    assert_eq!(held_keys(&locks), vec![b.key()]);
    locks.release_all();
}

#[test]
fn test_contention_releases_everything() {
    // Arrange - another thread holds B
    let registry = registry();
    let session = session();
    let (a, b, c) = (Node::entity(1), Node::entity(2), Node::entity(3));
    a.link(&c);
    a.link(&b);
    cache_all(&registry, &[&a, &b, &c]);
    let holder = hold_on_other_thread(&registry, &b.key());

    // Act
    let attempt = GraphLockWalker::new(&registry, &session).walk(&a).expect("walk");

    // Assert
    let LockAttempt::Contended(entry) = attempt else {
        panic!("expected contention on B");
    };
    assert_eq!(entry.key(), &b.key());
    assert_eq!(registry.held_count(), 1, "only the other thread's lock remains");
    for key in [a.key(), c.key()] {
        assert!(!registry.lookup(&key).expect("cached").mutex().is_acquired());
    }
    holder.release();
}

#[test]
fn test_contention_on_uncached_graph_leaves_no_placeholders() {
    let registry = registry();
    let session = session();
    let (a, b) = (Node::entity(1), Node::entity(2));
    a.link(&b);
    let holder = hold_on_other_thread(&registry, &b.key());

    let attempt = GraphLockWalker::new(&registry, &session).walk(&a).expect("walk");

    assert!(matches!(attempt, LockAttempt::Contended(_)));
    assert!(registry.lookup(&a.key()).is_none());
    holder.release();
}

#[test]
fn test_other_instance_under_same_identity_is_contention() {
    let registry = registry();
    let session = session();
    let a = Node::entity(1);
    let stale_b = Node::entity(2);
    let cached_b = Node::entity(2);
    a.link(&stale_b);
    cache_all(&registry, &[&a, &cached_b]);

    let attempt = GraphLockWalker::new(&registry, &session).walk(&a).expect("walk");

    assert!(matches!(attempt, LockAttempt::Contended(ref e) if e.key() == &stale_b.key()));
    assert_eq!(registry.held_count(), 0);
}

#[test]
fn test_uncached_graph_placeholders_removed_on_release() {
    let registry = registry();
    let session = session();
    let (a, b) = (Node::entity(1), Node::entity(2));
    a.link(&b);

    let mut locks = acquired(GraphLockWalker::new(&registry, &session).walk(&a).expect("walk"));
    assert_eq!(registry.placeholder_count(), 2);

    let report = locks.release_all();

    assert_eq!(report.removed_placeholders, 2);
    assert!(registry.is_empty());
}

#[test]
fn test_invalidated_root_requests_refresh() {
    let registry = registry();
    let session = refreshing_session();
    let a = Node::entity(1);
    cache_all(&registry, &[&a]);
    registry.lookup(&a.key()).expect("cached").invalidate();

    let attempt = GraphLockWalker::new(&registry, &session).walk(&a).expect("walk");

    assert!(matches!(attempt, LockAttempt::Refresh(ref key) if key == &a.key()));
    assert_eq!(registry.held_count(), 0);
}

#[test]
fn test_invalidated_related_entity_is_listed_not_locked() {
    // Arrange - B is stale, C hangs off B
    let registry = registry();
    let session = refreshing_session();
    let (a, b, c) = (Node::entity(1), Node::entity(2), Node::entity(3));
    a.link(&b);
    b.link(&c);
    cache_all(&registry, &[&a, &b, &c]);
    registry.lookup(&b.key()).expect("cached").invalidate();

    // Act
    let mut locks = acquired(GraphLockWalker::new(&registry, &session).walk(&a).expect("walk"));

    // Assert
    assert_eq!(locks.needs_refresh(), &[b.key()]);
    assert_eq!(held_keys(&locks), vec![a.key()]);
    locks.release_all();
}

#[test]
fn test_stale_entity_reached_twice_stays_unlocked() {
    // Arrange - A -> B (stale) and A -> D -> B
    let registry = registry();
    let session = refreshing_session();
    let (a, b, d) = (Node::entity(1), Node::entity(2), Node::entity(4));
    a.link(&b);
    a.link(&d);
    d.link(&b);
    cache_all(&registry, &[&a, &b, &d]);
    registry.lookup(&b.key()).expect("cached").invalidate();

    // Act
    let mut locks = acquired(GraphLockWalker::new(&registry, &session).walk(&a).expect("walk"));

    // Assert
    assert_eq!(locks.needs_refresh(), &[b.key()]);
    assert!(!locks.contains(&b.key()));
    assert_eq!(locks.len(), 2);
    locks.release_all();
}

#[test]
fn test_invalidated_entity_is_locked_without_refresh_policy() {
    let registry = registry();
    let session = session();
    let (a, b) = (Node::entity(1), Node::entity(2));
    a.link(&b);
    cache_all(&registry, &[&a, &b]);
    registry.lookup(&b.key()).expect("cached").invalidate();

    let mut locks = acquired(GraphLockWalker::new(&registry, &session).walk(&a).expect("walk"));

    assert!(locks.contains(&b.key()));
    assert!(locks.needs_refresh().is_empty());
    locks.release_all();
}

#[test]
fn test_missing_descriptor_releases_partial_locks() {
    let registry = registry();
    let session = Session::new().with_descriptor(node_descriptor(NODE));
    let a = Node::entity(1);
    let part = Node::part();
    a.add_part(&part);
    cache_all(&registry, &[&a]);

    let result = GraphLockWalker::new(&registry, &session).walk(&a);

    assert!(matches!(result, Err(Error::MissingDescriptor(ref name)) if name == "Part"));
    assert_eq!(registry.held_count(), 0);
}

#[test]
fn test_descriptor_override_beats_session_default() {
    let registry = registry();
    let session = refreshing_session().with_descriptor(
        Descriptor::new(NODE).refresh_on_stale_read(false),
    );
    let a = Node::entity(1);
    cache_all(&registry, &[&a]);
    registry.lookup(&a.key()).expect("cached").invalidate();

    let mut locks = acquired(GraphLockWalker::new(&registry, &session).walk(&a).expect("walk"));

    assert!(locks.contains(&IdentityKey::int(NODE, 1)));
    locks.release_all();
}

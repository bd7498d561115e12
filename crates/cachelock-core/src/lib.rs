//! # `cachelock` Core
//!
//! Per-identity cache locks with deadlock avoidance for object-graph clones
//! and bulk merges.
//!
//! A shared object cache maps each identity `(type, primary key)` to a
//! [`CacheEntry`] carrying a reentrant [`EntryMutex`]. Two kinds of callers
//! lock many entries at once:
//!
//! - **Clones** copy an object and everything it eagerly references into a
//!   transaction's working space. [`WriteLockManager::acquire_locks_for_clone`]
//!   walks the live graph with non-blocking tries and retries from scratch on
//!   contention.
//! - **Merges** write a transaction's change set back into the cache.
//!   [`WriteLockManager::acquire_required_locks`] arbitrates competing
//!   requesters with a FIFO wait queue whose head alone may block while
//!   holding locks.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use cachelock_core::{CacheRegistry, ChangeSet, LockPolicy, WriteLockManager};
//! use std::sync::Arc;
//!
//! let registry = Arc::new(CacheRegistry::new(LockPolicy::default()));
//! let manager = WriteLockManager::new(Arc::clone(&registry));
//!
//! let changes = ChangeSet::from_objects(vec![order, customer]);
//! let mut locks = manager.acquire_required_locks(&changes)?;
//! locks.merge(&changes)?;
//! locks.release_all();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::significant_drop_tightening)]
#![allow(clippy::significant_drop_in_scrutinee)]
#![allow(clippy::doc_markdown)]

pub mod change_set;
pub mod config;
pub mod descriptor;
pub mod entry;
pub mod error;
pub mod key;
#[cfg(test)]
mod key_tests;
pub mod lock_set;
pub mod manager;
pub mod mutex;
pub mod registry;
pub mod session;
#[cfg(test)]
pub(crate) mod test_support;
pub mod wait_queue;
pub mod walker;
#[cfg(test)]
mod walker_tests;

pub use change_set::{ChangeSet, ObjectChange};
pub use config::{CachelockConfig, ConfigError, LockPolicy};
pub use descriptor::{Descriptor, ReferenceKind, Relationship, RelationshipKind};
pub use entry::CacheEntry;
pub use error::{Error, Result};
pub use key::{EntityType, IdentityKey, KeyValue, PrimaryKey};
pub use lock_set::{LockSet, ReleaseReport};
pub use manager::{CloneOutcome, MergeLocks, WriteLockManager};
pub use mutex::{EntryMutex, WaitOutcome};
pub use registry::{CacheRegistry, TryLock};
pub use session::{Identifiable, LockSession, Session};
pub use wait_queue::{QueueTicket, RequesterId, WaitQueue};
pub use walker::{CloneLocks, GraphLockWalker, LockAttempt};

//! Loom concurrency tests for the entry mutex handoff.
//!
//! Loom explores every interleaving of a small model built from its own sync
//! primitives. The model mirrors `EntryMutex`: holder and depth behind one
//! mutex, a condvar notified when the depth reaches zero, and waiters that
//! re-check the state under the lock before sleeping.
//!
//! # Running Loom Tests
//!
//! ```bash
//! RUSTFLAGS="--cfg loom" cargo test --features loom --test loom_tests --release
//! ```

#![cfg(all(loom, feature = "loom"))]

use loom::sync::atomic::{AtomicUsize, Ordering};
use loom::sync::{Arc, Condvar, Mutex};
use loom::thread;

mod loom_entry_mutex {
    use loom::sync::{Condvar, Mutex};
    use loom::thread::{self, ThreadId};

    #[derive(Default)]
    struct State {
        holder: Option<ThreadId>,
        depth: u32,
    }

    pub struct LoomEntryMutex {
        state: Mutex<State>,
        released: Condvar,
    }

    impl LoomEntryMutex {
        pub fn new() -> Self {
            Self {
                state: Mutex::new(State::default()),
                released: Condvar::new(),
            }
        }

        pub fn try_acquire(&self) -> bool {
            let me = thread::current().id();
            let mut state = self.state.lock().unwrap();
            match state.holder {
                Some(holder) if holder != me => false,
                _ => {
                    state.holder = Some(me);
                    state.depth += 1;
                    true
                }
            }
        }

        pub fn acquire(&self) {
            let me = thread::current().id();
            let mut state = self.state.lock().unwrap();
            while state.holder.is_some_and(|h| h != me) {
                state = self.released.wait(state).unwrap();
            }
            state.holder = Some(me);
            state.depth += 1;
        }

        pub fn wait_for_release(&self) {
            let me = thread::current().id();
            let mut state = self.state.lock().unwrap();
            while state.holder.is_some_and(|h| h != me) {
                state = self.released.wait(state).unwrap();
            }
        }

        pub fn release(&self) -> bool {
            let mut state = self.state.lock().unwrap();
            if state.depth == 0 {
                return false;
            }
            state.depth -= 1;
            if state.depth == 0 {
                state.holder = None;
                self.released.notify_all();
            }
            true
        }

        pub fn depth(&self) -> u32 {
            self.state.lock().unwrap().depth
        }
    }
}

use loom_entry_mutex::LoomEntryMutex;

/// Two threads never hold the entry at the same time.
#[test]
fn loom_mutual_exclusion() {
    loom::model(|| {
        let mutex = Arc::new(LoomEntryMutex::new());
        let inside = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let m = Arc::clone(&mutex);
                let i = Arc::clone(&inside);
                thread::spawn(move || {
                    m.acquire();
                    assert_eq!(i.fetch_add(1, Ordering::SeqCst), 0);
                    i.fetch_sub(1, Ordering::SeqCst);
                    m.release();
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(mutex.depth(), 0);
    });
}

/// A failed try followed by a wait always observes the release.
#[test]
fn loom_try_then_wait_sees_release() {
    loom::model(|| {
        let mutex = Arc::new(LoomEntryMutex::new());
        let ready = Arc::new((Mutex::new(false), Condvar::new()));

        let holder_mutex = Arc::clone(&mutex);
        let holder_ready = Arc::clone(&ready);
        let holder = thread::spawn(move || {
            holder_mutex.acquire();
            let (flag, cvar) = &*holder_ready;
            *flag.lock().unwrap() = true;
            cvar.notify_one();
            holder_mutex.release();
        });

        let (flag, cvar) = &*ready;
        let mut held = flag.lock().unwrap();
        while !*held {
            held = cvar.wait(held).unwrap();
        }
        drop(held);

        if mutex.try_acquire() {
            mutex.release();
        } else {
            mutex.wait_for_release();
        }
        assert!(mutex.try_acquire());
        mutex.release();
        holder.join().unwrap();
        assert_eq!(mutex.depth(), 0);
    });
}

/// Reentrant holds release the entry only at depth zero.
#[test]
fn loom_reentrant_release() {
    loom::model(|| {
        let mutex = Arc::new(LoomEntryMutex::new());
        assert!(mutex.try_acquire());
        assert!(mutex.try_acquire());

        let other = Arc::clone(&mutex);
        let contender = thread::spawn(move || {
            other.acquire();
            other.release();
        });

        mutex.release();
        mutex.release();
        contender.join().unwrap();
        assert_eq!(mutex.depth(), 0);
    });
}

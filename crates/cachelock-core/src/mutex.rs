//! Per-entry reentrant mutex with waiter notification.
//!
//! Unlike `parking_lot::ReentrantMutex`, holding an [`EntryMutex`] is not tied
//! to a guard's lifetime: a thread acquires entries one by one while walking an
//! object graph and releases them later in bulk, possibly from a different
//! stack frame. The holder is tracked by [`ThreadId`] so that re-acquiring on
//! the same thread nests instead of self-deadlocking.
//!
//! # Thread-Safety
//!
//! All state lives behind one `parking_lot::Mutex`, paired with a `Condvar`
//! that is notified (all waiters) whenever the hold depth drops to zero or the
//! mutex is interrupted.

use parking_lot::{Condvar, Mutex};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

/// How a wait on an [`EntryMutex`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The mutex was free (or became free) when the wait ended.
    ///
    /// For [`EntryMutex::acquire_timeout`] this also means the caller now
    /// holds it.
    Released,
    /// The timeout elapsed while another thread still held the mutex.
    TimedOut,
    /// [`EntryMutex::interrupt`] was called while waiting.
    Interrupted,
}

#[derive(Debug, Default)]
struct MutexState {
    holder: Option<ThreadId>,
    depth: u32,
    /// Bumped by `interrupt`; waiters compare against the value seen on entry.
    interrupts: u64,
}

impl MutexState {
    /// Takes the mutex for `me` if free or already ours.
    fn try_take(&mut self, me: ThreadId) -> bool {
        match self.holder {
            None => {
                self.holder = Some(me);
                self.depth = 1;
                true
            }
            Some(holder) if holder == me => {
                self.depth += 1;
                true
            }
            Some(_) => false,
        }
    }

    fn held_by_other(&self, me: ThreadId) -> bool {
        matches!(self.holder, Some(holder) if holder != me)
    }
}

/// Exclusive, reentrant lock owned by one cache entry.
#[derive(Debug, Default)]
pub struct EntryMutex {
    state: Mutex<MutexState>,
    released: Condvar,
}

impl EntryMutex {
    /// Creates a free mutex.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires without blocking.
    ///
    /// Returns `true` if the mutex was free or already held by the calling
    /// thread (the hold depth is incremented), `false` otherwise.
    pub fn try_acquire(&self) -> bool {
        let me = thread::current().id();
        self.state.lock().try_take(me)
    }

    /// Blocks until the mutex is free, then acquires it.
    ///
    /// Interrupts are ignored; use [`acquire_timeout`](Self::acquire_timeout)
    /// where a wait must be abandonable.
    pub fn acquire(&self) {
        let me = thread::current().id();
        let mut state = self.state.lock();
        while !state.try_take(me) {
            self.released.wait(&mut state);
        }
    }

    /// Blocks until the mutex can be acquired, the timeout elapses or the
    /// mutex is interrupted. `None` waits without a deadline.
    pub fn acquire_timeout(&self, timeout: Option<Duration>) -> WaitOutcome {
        let me = thread::current().id();
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.state.lock();
        let seen = state.interrupts;
        loop {
            if state.try_take(me) {
                return WaitOutcome::Released;
            }
            if state.interrupts != seen {
                return WaitOutcome::Interrupted;
            }
            match deadline {
                Some(deadline) => {
                    if self.released.wait_until(&mut state, deadline).timed_out() {
                        if state.try_take(me) {
                            return WaitOutcome::Released;
                        }
                        return WaitOutcome::TimedOut;
                    }
                }
                None => self.released.wait(&mut state),
            }
        }
    }

    /// Waits until no other thread holds the mutex, without acquiring it.
    ///
    /// The held check happens under the state lock, so a release that lands
    /// between a failed [`try_acquire`](Self::try_acquire) and this call is
    /// observed immediately instead of being lost.
    pub fn wait_for_release(&self, timeout: Option<Duration>) -> WaitOutcome {
        let me = thread::current().id();
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.state.lock();
        let seen = state.interrupts;
        while state.held_by_other(me) {
            if state.interrupts != seen {
                return WaitOutcome::Interrupted;
            }
            match deadline {
                Some(deadline) => {
                    if self.released.wait_until(&mut state, deadline).timed_out() {
                        return if state.held_by_other(me) {
                            WaitOutcome::TimedOut
                        } else {
                            WaitOutcome::Released
                        };
                    }
                }
                None => self.released.wait(&mut state),
            }
        }
        WaitOutcome::Released
    }

    /// Releases one level of holding.
    ///
    /// When the depth reaches zero every waiter is woken, since several
    /// threads may be waiting only to re-run their own graph walks. Returns
    /// `false` if the mutex was not held.
    pub fn release(&self) -> bool {
        let mut state = self.state.lock();
        if state.depth == 0 {
            return false;
        }
        state.depth -= 1;
        if state.depth == 0 {
            state.holder = None;
            drop(state);
            self.released.notify_all();
        }
        true
    }

    /// Wakes every waiter with [`WaitOutcome::Interrupted`].
    pub fn interrupt(&self) {
        self.state.lock().interrupts += 1;
        self.released.notify_all();
    }

    /// Returns true if some thread holds the mutex.
    #[must_use]
    pub fn is_acquired(&self) -> bool {
        self.state.lock().holder.is_some()
    }

    /// Thread currently holding the mutex.
    #[must_use]
    pub fn active_holder(&self) -> Option<ThreadId> {
        self.state.lock().holder
    }

    /// Nesting depth of the current hold (0 when free).
    #[must_use]
    pub fn depth(&self) -> u32 {
        self.state.lock().depth
    }

    /// Returns true if the calling thread holds the mutex.
    #[must_use]
    pub fn is_held_by_current_thread(&self) -> bool {
        self.state.lock().holder == Some(thread::current().id())
    }
}

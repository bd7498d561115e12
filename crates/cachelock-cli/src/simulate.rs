//! Merge contention simulation.
//!
//! Each thread repeatedly merges a window of consecutive keys. Windows of
//! neighbouring threads overlap, and odd threads list their keys in reverse,
//! so without the wait queue two threads would lock the shared keys in
//! opposite orders.

use cachelock_core::{CacheRegistry, ChangeSet, LockPolicy, WriteLockManager};
use serde::Serialize;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Instant;

use crate::model::Record;

/// Simulation shape.
#[derive(Debug, Clone, Copy)]
pub struct SimulationConfig {
    pub threads: usize,
    pub keys: usize,
    /// Keys shared by consecutive windows; a window spans `overlap + 1` keys.
    pub overlap: usize,
    pub rounds: usize,
}

impl SimulationConfig {
    pub fn window(&self) -> usize {
        self.overlap + 1
    }

    /// Checks that every window fits in the key space.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.threads > 0, "--threads must be at least 1");
        anyhow::ensure!(self.keys > 0, "--keys must be at least 1");
        anyhow::ensure!(
            self.window() <= self.keys,
            "--overlap {} needs at least {} keys, got {}",
            self.overlap,
            self.window(),
            self.keys
        );
        Ok(())
    }

    /// Key ids merged by `thread` in `round`.
    pub fn change_ids(&self, thread: usize, round: usize) -> Vec<i64> {
        let start = thread + round;
        let mut ids: Vec<i64> = (0..self.window())
            .map(|i| ((start + i) % self.keys) as i64 + 1)
            .collect();
        if thread % 2 == 1 {
            ids.reverse();
        }
        ids
    }
}

/// Outcome of one simulation thread.
#[derive(Debug, Clone, Serialize)]
pub struct ThreadReport {
    pub thread: usize,
    pub merges: usize,
    pub elapsed_ms: u128,
    pub error: Option<String>,
}

/// Outcome of a whole simulation.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub threads: Vec<ThreadReport>,
    pub elapsed_ms: u128,
    pub held_after: usize,
    pub queued_after: usize,
}

impl SimulationReport {
    pub fn failures(&self) -> usize {
        self.threads.iter().filter(|t| t.error.is_some()).count()
    }

    pub fn succeeded(&self) -> bool {
        self.failures() == 0 && self.held_after == 0 && self.queued_after == 0
    }
}

/// Runs the simulation against a fresh registry.
pub fn run(config: SimulationConfig, policy: LockPolicy) -> SimulationReport {
    let registry = Arc::new(CacheRegistry::new(policy));
    let manager = WriteLockManager::new(Arc::clone(&registry));
    let barrier = Arc::new(Barrier::new(config.threads));
    let started = Instant::now();

    let handles: Vec<_> = (0..config.threads)
        .map(|t| {
            let manager = manager.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                run_thread(&manager, config, t)
            })
        })
        .collect();

    let threads = handles
        .into_iter()
        .enumerate()
        .map(|(t, handle)| {
            handle.join().unwrap_or_else(|_| ThreadReport {
                thread: t,
                merges: 0,
                elapsed_ms: 0,
                error: Some("thread panicked".to_string()),
            })
        })
        .collect();

    SimulationReport {
        threads,
        elapsed_ms: started.elapsed().as_millis(),
        held_after: registry.held_count(),
        queued_after: registry.wait_queue().len(),
    }
}

fn run_thread(
    manager: &WriteLockManager<Record>,
    config: SimulationConfig,
    index: usize,
) -> ThreadReport {
    let started = Instant::now();
    let mut merges = 0;
    let mut error = None;

    for round in 0..config.rounds {
        let changes =
            ChangeSet::from_objects(config.change_ids(index, round).into_iter().map(Record::new));
        let result = manager.acquire_required_locks(&changes).and_then(|mut locks| {
            let merged = locks.merge(&changes);
            locks.release_all();
            merged
        });
        match result {
            Ok(_) => merges += 1,
            Err(e) => {
                tracing::error!(thread = index, round, code = e.code(), "merge failed: {e}");
                error = Some(e.to_string());
                break;
            }
        }
    }

    tracing::debug!(thread = index, merges, "simulation thread finished");
    ThreadReport {
        thread: index,
        merges,
        elapsed_ms: started.elapsed().as_millis(),
        error,
    }
}

#[cfg(test)]
#[path = "simulate_tests.rs"]
mod tests;

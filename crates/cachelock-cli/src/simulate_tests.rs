//! Tests for the simulation module.

use super::*;
use std::time::Duration;

fn config(threads: usize, keys: usize, overlap: usize, rounds: usize) -> SimulationConfig {
    SimulationConfig {
        threads,
        keys,
        overlap,
        rounds,
    }
}

#[test]
fn test_windows_overlap_and_alternate_order() {
    let config = config(2, 6, 2, 1);

    assert_eq!(config.change_ids(0, 0), vec![1, 2, 3]);
    assert_eq!(config.change_ids(1, 0), vec![4, 3, 2]);
}

#[test]
fn test_windows_wrap_around_key_space() {
    let config = config(1, 4, 1, 10);

    assert_eq!(config.change_ids(0, 3), vec![4, 1]);
}

#[test]
fn test_validate_rejects_oversized_window() {
    assert!(config(2, 3, 3, 1).validate().is_err());
    assert!(config(0, 3, 1, 1).validate().is_err());
    assert!(config(2, 4, 3, 1).validate().is_ok());
}

#[test]
fn test_simulation_completes_without_leaks() {
    let policy = LockPolicy::default()
        .with_max_wait(Duration::from_millis(10))
        .with_clone_wait(Duration::from_millis(2));

    let report = run(config(4, 6, 2, 50), policy);

    assert!(report.succeeded(), "{report:?}");
    assert!(report.threads.iter().all(|t| t.merges == 50));
}

//! Integration tests for CPU utilization sampling.
//!
//! The store is pointed at a fabricated /proc/stat that is rewritten between
//! calls, so each non-blocking call sees a known delta.

use std::fs;
use std::path::Path;
use tempfile::tempdir;

use herakles_proc_inspect::{CpuSampleStore, ProcFs};

/// Writes /proc/stat with the aggregate line and two identical cores.
/// Counters are ticks at 100 per second.
fn write_stat(root: &Path, user: u64, system: u64, idle: u64) {
    let line = |label: &str| format!("{label} {user} 0 {system} {idle} 0 0 0 0 0 0\n");
    fs::write(
        root.join("stat"),
        format!(
            "{}{}{}intr 0\nbtime 1000\n",
            line("cpu "),
            line("cpu0"),
            line("cpu1")
        ),
    )
    .unwrap();
}

#[test]
fn test_non_blocking_sequence() {
    let dir = tempdir().expect("Failed to create temp dir");
    write_stat(dir.path(), 100, 100, 800);
    let store = CpuSampleStore::new(ProcFs::new(dir.path()), 100.0);

    // first call seeds the baseline
    assert_eq!(store.cpu_percent(0.0).unwrap(), 0.0);

    // +30 busy, +70 idle
    write_stat(dir.path(), 120, 110, 870);
    assert_eq!(store.cpu_percent(0.0).unwrap(), 30.0);

    // +0 busy, +100 idle
    write_stat(dir.path(), 120, 110, 970);
    let idle_interval = store.cpu_percent(0.0).unwrap();
    assert!(idle_interval >= 0.0);
    assert!(idle_interval.is_finite());
}

#[test]
fn test_scopes_keep_separate_baselines() {
    let dir = tempdir().expect("Failed to create temp dir");
    write_stat(dir.path(), 100, 100, 800);
    let store = CpuSampleStore::new(ProcFs::new(dir.path()), 100.0);

    assert_eq!(store.cpu_percent(0.0).unwrap(), 0.0);
    assert_eq!(store.per_cpu_percent(0.0).unwrap(), vec![0.0, 0.0]);

    write_stat(dir.path(), 150, 100, 850);
    assert_eq!(store.per_cpu_percent(0.0).unwrap(), vec![50.0, 50.0]);

    // the aggregate baseline was not moved by the per-core call
    assert_eq!(store.cpu_percent(0.0).unwrap(), 50.0);

    let first_fields = store.cpu_times_percent(0.0).unwrap();
    assert_eq!(first_fields.user, 0.0);
    write_stat(dir.path(), 175, 100, 925);
    let fields = store.cpu_times_percent(0.0).unwrap();
    assert_eq!(fields.user, 25.0);
    assert_eq!(fields.idle, 75.0);
}

#[test]
fn test_blocking_does_not_touch_baseline() {
    let dir = tempdir().expect("Failed to create temp dir");
    write_stat(dir.path(), 100, 100, 800);
    let store = CpuSampleStore::new(ProcFs::new(dir.path()), 100.0);

    // file is static during the sleep: no busy delta, falls back to the share since boot
    let blocking = store.cpu_percent(0.01).unwrap();
    assert_eq!(blocking, 20.0);

    // still the first non-blocking call
    assert_eq!(store.cpu_percent(0.0).unwrap(), 0.0);
}

#[test]
fn test_counter_decrease_reports_zero() {
    let dir = tempdir().expect("Failed to create temp dir");
    write_stat(dir.path(), 500, 500, 800);
    let store = CpuSampleStore::new(ProcFs::new(dir.path()), 100.0);
    store.cpu_percent(0.0).unwrap();

    write_stat(dir.path(), 100, 100, 900);
    assert_eq!(store.cpu_percent(0.0).unwrap(), 0.0);
}

#[test]
fn test_reset_reseeds() {
    let dir = tempdir().expect("Failed to create temp dir");
    write_stat(dir.path(), 100, 100, 800);
    let store = CpuSampleStore::new(ProcFs::new(dir.path()), 100.0);
    store.cpu_percent(0.0).unwrap();

    store.reset();
    write_stat(dir.path(), 200, 100, 800);
    assert_eq!(store.cpu_percent(0.0).unwrap(), 0.0);
}

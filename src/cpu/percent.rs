//! CPU utilization from pairs of snapshots.
//!
//! [`CpuSampleStore`] keeps the last observed snapshot per scope so that a
//! non-blocking call can report usage since the previous call.

use serde::Serialize;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

use crate::cpu::times::{read_cpu_times, read_per_cpu_times, CpuSnapshot};
use crate::error::Result;
use crate::procfs::ProcFs;
use crate::system::round_to;

/// Share of elapsed time per counter, in percent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CpuTimesPercent {
    pub user: f64,
    pub nice: f64,
    pub system: f64,
    pub idle: f64,
    pub iowait: f64,
    pub irq: f64,
    pub softirq: f64,
    pub steal: f64,
    pub guest: f64,
    pub guest_nice: f64,
}

impl From<CpuSnapshot> for CpuTimesPercent {
    fn from(s: CpuSnapshot) -> Self {
        Self {
            user: s.user,
            nice: s.nice,
            system: s.system,
            idle: s.idle,
            iowait: s.iowait,
            irq: s.irq,
            softirq: s.softirq,
            steal: s.steal,
            guest: s.guest,
            guest_nice: s.guest_nice,
        }
    }
}

/// Busy percentage between two snapshots of the same scope, rounded to 2 decimals.
///
/// Never negative and never NaN: decreasing busy time yields `0.0`, and an
/// interval too short to move any busy counter falls back to the busy share
/// accumulated since boot.
pub fn cpu_percent_between(start: &CpuSnapshot, last: &CpuSnapshot) -> f64 {
    let start_sum = start.total();
    let last_sum = last.total();
    let start_busy = start_sum - start.idle;
    let last_busy = last_sum - last.idle;

    if last_busy < start_busy {
        return 0.0;
    }

    let busy_delta = last_busy - start_busy;
    let percent = if busy_delta == 0.0 {
        let denom = last_sum + start_sum;
        if denom <= 0.0 {
            return 0.0;
        }
        (last_busy + start_busy) / denom * 100.0
    } else {
        let all_delta = last_sum - start_sum;
        if all_delta <= 0.0 {
            return 0.0;
        }
        busy_delta / all_delta * 100.0
    };
    round_to(percent, 2)
}

/// Per-counter percentage between two snapshots, rounded to 2 decimals.
///
/// A counter that went backwards is clamped to its start value.
pub fn cpu_times_percent_between(start: &CpuSnapshot, last: &CpuSnapshot) -> CpuTimesPercent {
    let all_delta = last.total() - start.total();
    let start_values = start.values();
    let last_values = last.values();

    let mut out = [0.0; 10];
    for (i, slot) in out.iter_mut().enumerate() {
        let s = start_values[i];
        let l = last_values[i].max(s);
        *slot = if all_delta <= 0.0 {
            0.0
        } else {
            round_to((l - s) * 100.0 / all_delta, 2)
        };
    }
    CpuSnapshot::from_values(out).into()
}

fn zip_per_cpu<T>(
    start: &[CpuSnapshot],
    last: &[CpuSnapshot],
    f: impl Fn(&CpuSnapshot, &CpuSnapshot) -> T,
) -> Vec<T> {
    if start.len() != last.len() {
        warn!(
            "CPU count changed between samples ({} -> {}), comparing common cores only",
            start.len(),
            last.len()
        );
    }
    start.iter().zip(last.iter()).map(|(s, l)| f(s, l)).collect()
}

/// Last-snapshot cells for system-wide CPU percentages.
///
/// The busy-percent and per-field APIs keep separate baselines so that
/// calling one does not reset the other.
#[derive(Debug)]
pub struct CpuSampleStore {
    procfs: ProcFs,
    clk_tck: f64,
    last_total: Mutex<Option<CpuSnapshot>>,
    last_per_cpu: Mutex<Option<Vec<CpuSnapshot>>>,
    last_total_fields: Mutex<Option<CpuSnapshot>>,
    last_per_cpu_fields: Mutex<Option<Vec<CpuSnapshot>>>,
}

impl CpuSampleStore {
    pub fn new(procfs: ProcFs, clk_tck: f64) -> Self {
        Self {
            procfs,
            clk_tck,
            last_total: Mutex::new(None),
            last_per_cpu: Mutex::new(None),
            last_total_fields: Mutex::new(None),
            last_per_cpu_fields: Mutex::new(None),
        }
    }

    /// Takes a fresh snapshot: one entry for the aggregate, or one per core.
    pub fn sample_now(&self, per_cpu: bool) -> Result<Vec<CpuSnapshot>> {
        if per_cpu {
            read_per_cpu_times(&self.procfs, self.clk_tck)
        } else {
            read_cpu_times(&self.procfs, self.clk_tck).map(|s| vec![s])
        }
    }

    /// Forgets every stored baseline.
    pub fn reset(&self) {
        *lock(&self.last_total) = None;
        *lock(&self.last_per_cpu) = None;
        *lock(&self.last_total_fields) = None;
        *lock(&self.last_per_cpu_fields) = None;
    }

    /// System-wide busy percentage.
    ///
    /// With `interval > 0` samples twice, `interval` seconds apart, leaving the
    /// stored baseline alone. Otherwise compares against the previous call and
    /// stores the new snapshot; the first such call returns `0.0`.
    pub fn cpu_percent(&self, interval: f64) -> Result<f64> {
        let read = || read_cpu_times(&self.procfs, self.clk_tck);
        sample_pair(interval, &self.last_total, read, 0.0, |s, l| {
            cpu_percent_between(s, l)
        })
    }

    /// Busy percentage per logical CPU.
    pub fn per_cpu_percent(&self, interval: f64) -> Result<Vec<f64>> {
        let read = || read_per_cpu_times(&self.procfs, self.clk_tck);
        sample_list(interval, &self.last_per_cpu, read, 0.0, cpu_percent_between)
    }

    /// System-wide per-counter percentages.
    pub fn cpu_times_percent(&self, interval: f64) -> Result<CpuTimesPercent> {
        let read = || read_cpu_times(&self.procfs, self.clk_tck);
        sample_pair(
            interval,
            &self.last_total_fields,
            read,
            CpuTimesPercent::default(),
            |s, l| cpu_times_percent_between(s, l),
        )
    }

    /// Per-counter percentages per logical CPU.
    pub fn per_cpu_times_percent(&self, interval: f64) -> Result<Vec<CpuTimesPercent>> {
        let read = || read_per_cpu_times(&self.procfs, self.clk_tck);
        sample_list(
            interval,
            &self.last_per_cpu_fields,
            read,
            CpuTimesPercent::default(),
            cpu_times_percent_between,
        )
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    // A panic while holding a snapshot cell cannot leave it half-written.
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn sample_pair<T>(
    interval: f64,
    cell: &Mutex<Option<CpuSnapshot>>,
    read: impl Fn() -> Result<CpuSnapshot>,
    first: T,
    compute: impl Fn(&CpuSnapshot, &CpuSnapshot) -> T,
) -> Result<T> {
    if interval > 0.0 {
        let start = read()?;
        thread::sleep(Duration::from_secs_f64(interval));
        let last = read()?;
        return Ok(compute(&start, &last));
    }

    let last = read()?;
    let mut guard = lock(cell);
    let previous = guard.replace(last);
    match previous {
        Some(start) => Ok(compute(&start, &last)),
        None => {
            debug!("First non-blocking CPU sample, seeding baseline");
            Ok(first)
        }
    }
}

fn sample_list<T: Clone>(
    interval: f64,
    cell: &Mutex<Option<Vec<CpuSnapshot>>>,
    read: impl Fn() -> Result<Vec<CpuSnapshot>>,
    first: T,
    compute: impl Fn(&CpuSnapshot, &CpuSnapshot) -> T,
) -> Result<Vec<T>> {
    if interval > 0.0 {
        let start = read()?;
        thread::sleep(Duration::from_secs_f64(interval));
        let last = read()?;
        return Ok(zip_per_cpu(&start, &last, compute));
    }

    let last = read()?;
    let mut guard = lock(cell);
    match guard.replace(last.clone()) {
        Some(start) => Ok(zip_per_cpu(&start, &last, compute)),
        None => {
            debug!("First non-blocking per-cpu sample, seeding baseline");
            Ok(vec![first; last.len()])
        }
    }
}

//! CPU time snapshots parsed from /proc/stat.

use serde::Serialize;

use crate::error::{PsError, Result};
use crate::procfs::ProcFs;

/// Cumulative CPU times in seconds for one scope (aggregate or one core).
///
/// Fields missing on old kernels (steal < 2.6.11, guest < 2.6.24,
/// guest_nice < 2.6.33) read as `0.0`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CpuSnapshot {
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

impl CpuSnapshot {
    /// Field names in /proc/stat column order.
    pub const FIELDS: [&'static str; 10] = [
        "user",
        "nice",
        "system",
        "idle",
        "iowait",
        "irq",
        "softirq",
        "steal",
        "guest",
        "guest_nice",
    ];

    /// Values in the same order as [`CpuSnapshot::FIELDS`].
    pub fn values(&self) -> [f64; 10] {
        [
            self.user,
            self.nice,
            self.system,
            self.idle,
            self.iowait,
            self.irq,
            self.softirq,
            self.steal,
            self.guest,
            self.guest_nice,
        ]
    }

    pub fn from_values(v: [f64; 10]) -> Self {
        Self {
            user: v[0],
            nice: v[1],
            system: v[2],
            idle: v[3],
            iowait: v[4],
            irq: v[5],
            softirq: v[6],
            steal: v[7],
            guest: v[8],
            guest_nice: v[9],
        }
    }

    /// Sum of all counters.
    pub fn total(&self) -> f64 {
        self.values().iter().sum()
    }

    /// Everything that is not idle.
    pub fn busy(&self) -> f64 {
        self.total() - self.idle
    }
}

/// Parses one `cpu`/`cpuN` line into a snapshot, dividing ticks by `clk_tck`.
///
/// Returns `None` if the line carries fewer than the four counters present
/// on every kernel (user, nice, system, idle).
pub fn parse_cpu_line(line: &str, clk_tck: f64) -> Option<CpuSnapshot> {
    let mut parts = line.split_whitespace();
    let label = parts.next()?;
    if !label.starts_with("cpu") {
        return None;
    }

    let counters: Vec<f64> = parts
        .map(|p| p.parse::<f64>().unwrap_or(0.0) / clk_tck)
        .collect();
    if counters.len() < 4 {
        return None;
    }

    let mut values = [0.0; 10];
    for (slot, value) in values.iter_mut().zip(counters) {
        *slot = value;
    }
    Some(CpuSnapshot::from_values(values))
}

/// Reads the aggregate snapshot (first `cpu` line of /proc/stat).
pub fn read_cpu_times(procfs: &ProcFs, clk_tck: f64) -> Result<CpuSnapshot> {
    let content = procfs.read_string("stat")?;
    content
        .lines()
        .find(|l| l.starts_with("cpu "))
        .and_then(|l| parse_cpu_line(l, clk_tck))
        .ok_or_else(|| PsError::NotImplemented("no aggregate cpu line in /proc/stat".to_string()))
}

/// Reads one snapshot per logical CPU, in /proc/stat order.
pub fn read_per_cpu_times(procfs: &ProcFs, clk_tck: f64) -> Result<Vec<CpuSnapshot>> {
    let content = procfs.read_string("stat")?;
    let cpus: Vec<CpuSnapshot> = content
        .lines()
        .filter(|l| {
            l.strip_prefix("cpu")
                .is_some_and(|rest| rest.starts_with(|c: char| c.is_ascii_digit()))
        })
        .filter_map(|l| parse_cpu_line(l, clk_tck))
        .collect();

    if cpus.is_empty() {
        return Err(PsError::NotImplemented(
            "no per-cpu lines in /proc/stat".to_string(),
        ));
    }
    Ok(cpus)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const STAT: &str = "cpu  400 20 100 4000 40 10 10 0 0 0\n\
cpu0 200 10 50 2000 20 5 5 0 0 0\n\
cpu1 200 10 50 2000 20 5 5 0 0 0\n\
intr 12345\n\
ctxt 999\n\
btime 1700000000\n";

    #[test]
    fn test_parse_cpu_line_full() {
        let snap = parse_cpu_line("cpu  100 200 300 400 500 600 700 800 900 1000", 100.0).unwrap();
        assert_eq!(snap.user, 1.0);
        assert_eq!(snap.nice, 2.0);
        assert_eq!(snap.system, 3.0);
        assert_eq!(snap.idle, 4.0);
        assert_eq!(snap.iowait, 5.0);
        assert_eq!(snap.irq, 6.0);
        assert_eq!(snap.softirq, 7.0);
        assert_eq!(snap.steal, 8.0);
        assert_eq!(snap.guest, 9.0);
        assert_eq!(snap.guest_nice, 10.0);
        assert_eq!(snap.total(), 55.0);
        assert_eq!(snap.busy(), 51.0);
    }

    #[test]
    fn test_parse_cpu_line_old_kernel() {
        // 2.6.0 era: no steal/guest columns
        let snap = parse_cpu_line("cpu 100 0 100 800 0 0 0", 100.0).unwrap();
        assert_eq!(snap.steal, 0.0);
        assert_eq!(snap.guest, 0.0);
        assert_eq!(snap.guest_nice, 0.0);
        assert_eq!(snap.total(), 10.0);
    }

    #[test]
    fn test_parse_cpu_line_rejects_garbage() {
        assert!(parse_cpu_line("intr 1 2 3 4 5", 100.0).is_none());
        assert!(parse_cpu_line("cpu 1 2", 100.0).is_none());
        assert!(parse_cpu_line("", 100.0).is_none());
    }

    #[test]
    fn test_read_cpu_times() {
        let dir = tempdir().expect("Failed to create temp dir");
        fs::write(dir.path().join("stat"), STAT).unwrap();
        let procfs = ProcFs::new(dir.path());

        let total = read_cpu_times(&procfs, 100.0).unwrap();
        assert_eq!(total.user, 4.0);
        assert_eq!(total.idle, 40.0);

        let per_cpu = read_per_cpu_times(&procfs, 100.0).unwrap();
        assert_eq!(per_cpu.len(), 2);
        assert_eq!(per_cpu[0].user, 2.0);
        assert_eq!(per_cpu[1].idle, 20.0);
    }

    #[test]
    fn test_read_cpu_times_missing_lines() {
        let dir = tempdir().expect("Failed to create temp dir");
        fs::write(dir.path().join("stat"), "intr 1\nbtime 1\n").unwrap();
        let procfs = ProcFs::new(dir.path());

        assert!(matches!(
            read_cpu_times(&procfs, 100.0),
            Err(PsError::NotImplemented(_))
        ));
        assert!(matches!(
            read_per_cpu_times(&procfs, 100.0),
            Err(PsError::NotImplemented(_))
        ));
    }
}

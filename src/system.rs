//! System-wide readers from the /proc filesystem.
//!
//! Boot time, uptime, CPU counts and virtual/swap memory. All readers take a
//! [`ProcFs`] so they can be pointed at a fabricated tree in tests.

use std::collections::BTreeSet;

use crate::error::{PsError, Result};
use crate::procfs::ProcFs;

/// Get system clock ticks per second (usually 100, but can vary).
pub fn clock_ticks() -> f64 {
    // SAFETY: sysconf is safe to call with _SC_CLK_TCK
    // Returns -1 on error, 0 if undefined - both are handled by the > 0 check
    let tck = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    if tck > 0 {
        tck as f64
    } else {
        100.0
    }
}

/// Get the memory page size in bytes.
pub fn page_size() -> u64 {
    // SAFETY: sysconf is safe to call with _SC_PAGESIZE
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 {
        size as u64
    } else {
        4096
    }
}

/// Virtual memory statistics in bytes.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct VirtualMemory {
    pub total: u64,
    pub available: u64,
    pub percent: f64,
    pub used: u64,
    pub free: u64,
    pub active: u64,
    pub inactive: u64,
    pub buffers: u64,
    pub cached: u64,
}

/// Swap memory statistics; `sin`/`sout` are bytes swapped in/out since boot.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct SwapMemory {
    pub total: u64,
    pub used: u64,
    pub free: u64,
    pub percent: f64,
    pub sin: u64,
    pub sout: u64,
}

/// Percentage of `used` against `total`, `0.0` when total is zero.
pub fn usage_percent(used: f64, total: f64, round: Option<u32>) -> f64 {
    if total == 0.0 {
        return 0.0;
    }
    let ret = used / total * 100.0;
    match round {
        Some(digits) => round_to(ret, digits),
        None => ret,
    }
}

/// Round to a fixed number of decimal places.
pub fn round_to(value: f64, digits: u32) -> f64 {
    let factor = 10f64.powi(digits as i32);
    (value * factor).round() / factor
}

/// Reads system boot time (seconds since the epoch) from the `btime` line of /proc/stat.
pub fn boot_time(procfs: &ProcFs) -> Result<f64> {
    let content = procfs.read_string("stat")?;
    for line in content.lines() {
        if let Some(value) = line.strip_prefix("btime ") {
            return value
                .trim()
                .parse::<f64>()
                .map_err(|e| PsError::NotImplemented(format!("Failed to parse btime: {}", e)));
        }
    }
    Err(PsError::NotImplemented(
        "btime line not found in /proc/stat".to_string(),
    ))
}

/// Reads system uptime from /proc/uptime.
///
/// Format: "<uptime_seconds> <idle_seconds>"
pub fn uptime(procfs: &ProcFs) -> Result<f64> {
    let content = procfs.read_string("uptime")?;
    content
        .split_whitespace()
        .next()
        .and_then(|v| v.parse::<f64>().ok())
        .ok_or_else(|| PsError::NotImplemented("Invalid /proc/uptime format".to_string()))
}

/// Every numeric entry of the proc root, ascending.
pub fn pids(procfs: &ProcFs) -> Result<Vec<u32>> {
    Ok(procfs.pids()?)
}

/// Number of CPUs.
///
/// Logical CPUs are the `cpuN` lines of /proc/stat. Physical cores are the
/// distinct (physical id, core id) pairs of /proc/cpuinfo; `None` when
/// cpuinfo does not expose topology (some ARM kernels).
pub fn cpu_count(procfs: &ProcFs, logical: bool) -> Result<Option<usize>> {
    if logical {
        let content = procfs.read_string("stat")?;
        let count = content
            .lines()
            .filter(|l| {
                l.strip_prefix("cpu")
                    .is_some_and(|rest| rest.starts_with(|c: char| c.is_ascii_digit()))
            })
            .count();
        return Ok((count > 0).then_some(count));
    }

    let content = procfs.read_string("cpuinfo")?;
    let mut cores = BTreeSet::new();
    let mut physical_id: Option<String> = None;
    for line in content.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        match key.trim() {
            "physical id" => physical_id = Some(value.trim().to_string()),
            "core id" => {
                if let Some(pid) = &physical_id {
                    cores.insert((pid.clone(), value.trim().to_string()));
                }
            }
            _ => {}
        }
    }
    Ok((!cores.is_empty()).then_some(cores.len()))
}

fn meminfo_bytes(value: &str) -> Option<u64> {
    value.split_whitespace().next()?.parse::<u64>().ok().map(|kb| kb * 1024)
}

/// Reads virtual memory statistics from /proc/meminfo.
///
/// `available` is `MemAvailable` when the kernel provides it (>= 3.14),
/// otherwise it is estimated as free + cached + buffers.
pub fn virtual_memory(procfs: &ProcFs) -> Result<VirtualMemory> {
    let kv = procfs.read_key_values("meminfo")?;
    let get = |key: &str| kv.get(key).and_then(|v| meminfo_bytes(v));

    let (Some(total), Some(free)) = (get("MemTotal"), get("MemFree")) else {
        return Err(PsError::NotImplemented(
            "Failed to parse MemTotal/MemFree from /proc/meminfo".to_string(),
        ));
    };
    let buffers = get("Buffers").unwrap_or(0);
    let cached = get("Cached").unwrap_or(0);
    let active = get("Active").unwrap_or(0);
    let inactive = get("Inactive").unwrap_or(0);
    let available = get("MemAvailable").unwrap_or(free + cached + buffers);

    Ok(VirtualMemory {
        total,
        available,
        percent: usage_percent(
            total.saturating_sub(available) as f64,
            total as f64,
            Some(1),
        ),
        used: total.saturating_sub(free),
        free,
        active,
        inactive,
        buffers,
        cached,
    })
}

/// Reads swap statistics from /proc/meminfo and /proc/vmstat.
pub fn swap_memory(procfs: &ProcFs, page_size: u64) -> Result<SwapMemory> {
    let kv = procfs.read_key_values("meminfo")?;
    let get = |key: &str| kv.get(key).and_then(|v| meminfo_bytes(v));

    let (Some(total), Some(free)) = (get("SwapTotal"), get("SwapFree")) else {
        return Err(PsError::NotImplemented(
            "Failed to parse SwapTotal/SwapFree from /proc/meminfo".to_string(),
        ));
    };
    let used = total.saturating_sub(free);

    let mut sin = 0;
    let mut sout = 0;
    // vmstat counts pages; missing on some containers, so failures leave zeros.
    if let Ok(content) = procfs.read_string("vmstat") {
        for line in content.lines() {
            let mut parts = line.split_whitespace();
            match (parts.next(), parts.next().and_then(|v| v.parse::<u64>().ok())) {
                (Some("pswpin"), Some(v)) => sin = v * page_size,
                (Some("pswpout"), Some(v)) => sout = v * page_size,
                _ => {}
            }
        }
    }

    Ok(SwapMemory {
        total,
        used,
        free,
        percent: usage_percent(used as f64, total as f64, Some(1)),
        sin,
        sout,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const MEMINFO: &str = "MemTotal:       16000000 kB\n\
MemFree:         2000000 kB\n\
MemAvailable:    8000000 kB\n\
Buffers:          500000 kB\n\
Cached:          4000000 kB\n\
SwapCached:            0 kB\n\
Active:          6000000 kB\n\
Inactive:        3000000 kB\n\
SwapTotal:       4000000 kB\n\
SwapFree:        3000000 kB\n";

    #[test]
    fn test_usage_percent() {
        assert_eq!(usage_percent(50.0, 200.0, None), 25.0);
        assert_eq!(usage_percent(1.0, 3.0, Some(1)), 33.3);
        assert_eq!(usage_percent(10.0, 0.0, Some(1)), 0.0);
    }

    #[test]
    fn test_boot_time_and_uptime() {
        let dir = tempdir().expect("Failed to create temp dir");
        fs::write(
            dir.path().join("stat"),
            "cpu  1 2 3 4 5 6 7 0 0 0\ncpu0 1 2 3 4 5 6 7 0 0 0\nbtime 1700000000\n",
        )
        .unwrap();
        fs::write(dir.path().join("uptime"), "12345.67 54321.00\n").unwrap();

        let procfs = ProcFs::new(dir.path());
        assert_eq!(boot_time(&procfs).unwrap(), 1_700_000_000.0);
        assert!((uptime(&procfs).unwrap() - 12345.67).abs() < 1e-9);
    }

    #[test]
    fn test_boot_time_missing_line() {
        let dir = tempdir().expect("Failed to create temp dir");
        fs::write(dir.path().join("stat"), "cpu  1 2 3 4 5 6 7\n").unwrap();

        let procfs = ProcFs::new(dir.path());
        assert!(matches!(
            boot_time(&procfs),
            Err(PsError::NotImplemented(_))
        ));
    }

    #[test]
    fn test_cpu_count_logical() {
        let dir = tempdir().expect("Failed to create temp dir");
        fs::write(
            dir.path().join("stat"),
            "cpu  1 2 3 4\ncpu0 1 2 3 4\ncpu1 1 2 3 4\ncpu2 1 2 3 4\nintr 0\nbtime 1\n",
        )
        .unwrap();

        let procfs = ProcFs::new(dir.path());
        assert_eq!(cpu_count(&procfs, true).unwrap(), Some(3));
    }

    #[test]
    fn test_cpu_count_physical() {
        let dir = tempdir().expect("Failed to create temp dir");
        let cpuinfo = "processor\t: 0\nphysical id\t: 0\ncore id\t\t: 0\n\n\
processor\t: 1\nphysical id\t: 0\ncore id\t\t: 1\n\n\
processor\t: 2\nphysical id\t: 0\ncore id\t\t: 0\n\n\
processor\t: 3\nphysical id\t: 0\ncore id\t\t: 1\n";
        fs::write(dir.path().join("cpuinfo"), cpuinfo).unwrap();

        let procfs = ProcFs::new(dir.path());
        assert_eq!(cpu_count(&procfs, false).unwrap(), Some(2));
    }

    #[test]
    fn test_virtual_memory() {
        let dir = tempdir().expect("Failed to create temp dir");
        fs::write(dir.path().join("meminfo"), MEMINFO).unwrap();

        let procfs = ProcFs::new(dir.path());
        let vm = virtual_memory(&procfs).unwrap();
        assert_eq!(vm.total, 16_000_000 * 1024);
        assert_eq!(vm.available, 8_000_000 * 1024);
        assert_eq!(vm.free, 2_000_000 * 1024);
        assert_eq!(vm.used, 14_000_000 * 1024);
        assert_eq!(vm.cached, 4_000_000 * 1024);
        assert_eq!(vm.percent, 50.0);
    }

    #[test]
    fn test_virtual_memory_without_memavailable() {
        let dir = tempdir().expect("Failed to create temp dir");
        let old_kernel = MEMINFO.replace("MemAvailable:    8000000 kB\n", "");
        fs::write(dir.path().join("meminfo"), old_kernel).unwrap();

        let procfs = ProcFs::new(dir.path());
        let vm = virtual_memory(&procfs).unwrap();
        // free + cached + buffers
        assert_eq!(vm.available, 6_500_000 * 1024);
    }

    #[test]
    fn test_swap_memory() {
        let dir = tempdir().expect("Failed to create temp dir");
        fs::write(dir.path().join("meminfo"), MEMINFO).unwrap();
        fs::write(dir.path().join("vmstat"), "pgfault 10\npswpin 3\npswpout 5\n").unwrap();

        let procfs = ProcFs::new(dir.path());
        let swap = swap_memory(&procfs, 4096).unwrap();
        assert_eq!(swap.total, 4_000_000 * 1024);
        assert_eq!(swap.used, 1_000_000 * 1024);
        assert_eq!(swap.percent, 25.0);
        assert_eq!(swap.sin, 3 * 4096);
        assert_eq!(swap.sout, 5 * 4096);
    }

    #[test]
    fn test_clock_ticks_positive() {
        assert!(clock_ticks() > 0.0);
        assert!(page_size() > 0);
    }
}

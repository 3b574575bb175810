//! Explicitly owned introspection session.
//!
//! Holds the proc root together with host facts that are computed once on
//! first use and then reused: boot time, total physical memory, the terminal
//! device map and the logical CPU count. Create one per program (or per test)
//! and share it as `Arc<ProcSession>`.

use ahash::AHashMap as HashMap;
use once_cell::sync::OnceCell;
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::Result;
use crate::procfs::{ProcFs, DEFAULT_PROC_ROOT};
use crate::system;

/// Default location of device nodes for the terminal map.
pub const DEFAULT_DEV_ROOT: &str = "/dev";

#[derive(Debug)]
pub struct ProcSession {
    procfs: ProcFs,
    dev_root: PathBuf,
    clk_tck: f64,
    page_size: u64,
    boot_time: OnceCell<f64>,
    total_memory: OnceCell<u64>,
    terminal_map: OnceCell<HashMap<u64, String>>,
    cpu_count: OnceCell<usize>,
}

impl Default for ProcSession {
    fn default() -> Self {
        Self::new(DEFAULT_PROC_ROOT)
    }
}

impl ProcSession {
    /// Session over the given proc root using the host's clock ticks and page size.
    pub fn new(proc_root: impl Into<PathBuf>) -> Self {
        Self {
            procfs: ProcFs::new(proc_root),
            dev_root: PathBuf::from(DEFAULT_DEV_ROOT),
            clk_tck: system::clock_ticks(),
            page_size: system::page_size(),
            boot_time: OnceCell::new(),
            total_memory: OnceCell::new(),
            terminal_map: OnceCell::new(),
            cpu_count: OnceCell::new(),
        }
    }

    pub fn with_dev_root(mut self, dev_root: impl Into<PathBuf>) -> Self {
        self.dev_root = dev_root.into();
        self
    }

    pub fn with_clock_ticks(mut self, clk_tck: f64) -> Self {
        self.clk_tck = clk_tck;
        self
    }

    pub fn with_page_size(mut self, page_size: u64) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn procfs(&self) -> &ProcFs {
        &self.procfs
    }

    pub fn proc_root(&self) -> &Path {
        self.procfs.root()
    }

    pub fn clock_ticks(&self) -> f64 {
        self.clk_tck
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    /// Whether this session reads the real proc filesystem of this host.
    pub fn is_live(&self) -> bool {
        self.procfs.root() == Path::new(DEFAULT_PROC_ROOT)
    }

    /// Boot time in seconds since the epoch, read once.
    pub fn boot_time(&self) -> Result<f64> {
        self.boot_time
            .get_or_try_init(|| system::boot_time(&self.procfs))
            .copied()
    }

    /// Total physical memory in bytes, read once.
    pub fn total_memory(&self) -> Result<u64> {
        self.total_memory
            .get_or_try_init(|| system::virtual_memory(&self.procfs).map(|vm| vm.total))
            .copied()
    }

    /// Logical CPU count, read once; at least 1.
    pub fn cpu_count(&self) -> usize {
        *self.cpu_count.get_or_init(|| {
            match system::cpu_count(&self.procfs, true) {
                Ok(Some(n)) => n,
                Ok(None) => 1,
                Err(e) => {
                    debug!("Failed to count CPUs, assuming 1: {}", e);
                    1
                }
            }
        })
    }

    /// Maps kernel `tty_nr` device numbers to terminal paths.
    ///
    /// Built on first use from `/dev/tty*` and `/dev/pts/*`.
    pub fn terminal_map(&self) -> &HashMap<u64, String> {
        self.terminal_map
            .get_or_init(|| build_terminal_map(&self.dev_root))
    }
}

/// Converts a glibc `st_rdev` into the kernel's `tty_nr` encoding.
pub fn rdev_to_tty_nr(rdev: u64) -> u64 {
    let major = ((rdev >> 8) & 0xfff) | ((rdev >> 32) & !0xfff);
    let minor = (rdev & 0xff) | ((rdev >> 12) & !0xff);
    (minor & 0xff) | (major << 8) | ((minor & !0xff) << 12)
}

fn build_terminal_map(dev_root: &Path) -> HashMap<u64, String> {
    let mut map = HashMap::new();
    let mut candidates = Vec::new();

    if let Ok(entries) = fs::read_dir(dev_root) {
        for entry in entries.flatten() {
            if entry.file_name().to_string_lossy().starts_with("tty") {
                candidates.push(entry.path());
            }
        }
    }
    if let Ok(entries) = fs::read_dir(dev_root.join("pts")) {
        candidates.extend(entries.flatten().map(|e| e.path()));
    }

    for path in candidates {
        // Devices vanish (pts closed) between listing and stat
        let Ok(meta) = fs::metadata(&path) else {
            continue;
        };
        let rdev = meta.rdev();
        if rdev == 0 {
            continue;
        }
        map.entry(rdev_to_tty_nr(rdev))
            .or_insert_with(|| path.to_string_lossy().into_owned());
    }

    debug!("Terminal map built with {} entries", map.len());
    map
}

//! Process memory from `/proc/<pid>/statm`, `/proc/<pid>/smaps` and
//! `/proc/<pid>/smaps_rollup`.

use ahash::AHashMap as HashMap;
use serde::Serialize;

use crate::error::{PsError, Result};
use crate::process::linux::LinuxProcess;

/// RSS and VMS in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MemoryInfo {
    pub rss: u64,
    pub vms: u64,
}

/// All seven statm columns, in bytes. `lib` and `dirty` are always zero on
/// Linux 2.6 and later.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MemoryInfoEx {
    pub rss: u64,
    pub vms: u64,
    pub shared: u64,
    pub text: u64,
    pub lib: u64,
    pub data: u64,
    pub dirty: u64,
}

/// `MemoryInfo` plus the smaps-derived unique, proportional and swapped sizes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MemoryFullInfo {
    pub rss: u64,
    pub vms: u64,
    pub uss: u64,
    pub pss: u64,
    pub swap: u64,
}

/// Counters of one mapping (or of several, when grouped by path), in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MapCounters {
    pub rss: u64,
    pub size: u64,
    pub pss: u64,
    pub shared_clean: u64,
    pub shared_dirty: u64,
    pub private_clean: u64,
    pub private_dirty: u64,
    pub referenced: u64,
    pub anonymous: u64,
    pub swap: u64,
}

impl MapCounters {
    fn add(&mut self, other: &MapCounters) {
        self.rss += other.rss;
        self.size += other.size;
        self.pss += other.pss;
        self.shared_clean += other.shared_clean;
        self.shared_dirty += other.shared_dirty;
        self.private_clean += other.private_clean;
        self.private_dirty += other.private_dirty;
        self.referenced += other.referenced;
        self.anonymous += other.anonymous;
        self.swap += other.swap;
    }

    fn set(&mut self, key: &str, bytes: u64) {
        match key {
            "Rss" => self.rss = bytes,
            "Size" => self.size = bytes,
            "Pss" => self.pss = bytes,
            "Shared_Clean" => self.shared_clean = bytes,
            "Shared_Dirty" => self.shared_dirty = bytes,
            "Private_Clean" => self.private_clean = bytes,
            "Private_Dirty" => self.private_dirty = bytes,
            "Referenced" => self.referenced = bytes,
            "Anonymous" => self.anonymous = bytes,
            "Swap" => self.swap = bytes,
            _ => {}
        }
    }
}

/// One region of the address space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemoryMap {
    pub addr: String,
    pub perms: String,
    /// Mapped file, a pseudo-path like `[heap]`, or `[anon]`.
    pub path: String,
    #[serde(flatten)]
    pub counters: MapCounters,
}

/// Regions sharing a path, summed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupedMemoryMap {
    pub path: String,
    #[serde(flatten)]
    pub counters: MapCounters,
}

/// Parses kilobyte values from smaps file lines.
pub fn parse_kb_value(v: &str) -> Option<u64> {
    v.split_whitespace().next()?.parse().ok()
}

/// Parses /proc/<pid>/statm into bytes.
pub fn parse_statm(content: &str, page_size: u64) -> Option<MemoryInfoEx> {
    let pages: Vec<u64> = content
        .split_whitespace()
        .take(7)
        .map(|v| v.parse::<u64>().ok())
        .collect::<Option<_>>()?;
    if pages.len() < 7 {
        return None;
    }
    Some(MemoryInfoEx {
        vms: pages[0] * page_size,
        rss: pages[1] * page_size,
        shared: pages[2] * page_size,
        text: pages[3] * page_size,
        lib: pages[4] * page_size,
        data: pages[5] * page_size,
        dirty: pages[6] * page_size,
    })
}

/// Splits a full smaps file into regions.
///
/// Header lines start a region; `Key: N kB` lines fill it. `VmFlags` and
/// other non-numeric keys are skipped.
pub fn parse_smaps(content: &str) -> Result<Vec<MemoryMap>> {
    let mut maps = Vec::new();
    let mut current: Option<MemoryMap> = None;

    for line in content.lines() {
        let Some(first) = line.split_whitespace().next() else {
            continue;
        };

        if let Some(key) = first.strip_suffix(':') {
            let Some(region) = current.as_mut() else {
                return Err(PsError::NotImplemented(format!(
                    "smaps counter before any region header: {:?}",
                    line
                )));
            };
            let value = &line[line.find(':').map_or(0, |i| i + 1)..];
            match parse_kb_value(value) {
                Some(kb) => region.counters.set(key, kb * 1024),
                None if key == "VmFlags" || key == "THPeligible" || key == "ProtectionKey" => {}
                None => {
                    return Err(PsError::NotImplemented(format!(
                        "don't know how to interpret smaps line {:?}",
                        line
                    )))
                }
            }
        } else {
            if let Some(done) = current.take() {
                maps.push(done);
            }
            current = Some(parse_region_header(line));
        }
    }
    if let Some(done) = current {
        maps.push(done);
    }
    Ok(maps)
}

fn parse_region_header(line: &str) -> MemoryMap {
    // address perms offset dev inode [path]
    let mut parts = line.splitn(6, char::is_whitespace).filter(|p| !p.is_empty());
    let addr = parts.next().unwrap_or_default().to_string();
    let perms = parts.next().unwrap_or_default().to_string();
    let _offset = parts.next();
    let _dev = parts.next();
    let _inode = parts.next();
    let path = parts
        .next()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .unwrap_or("[anon]")
        .to_string();
    MemoryMap {
        addr,
        perms,
        path,
        counters: MapCounters::default(),
    }
}

/// Sums regions per path, keeping first-seen order.
pub fn group_maps(maps: &[MemoryMap]) -> Vec<GroupedMemoryMap> {
    let mut order: Vec<String> = Vec::new();
    let mut sums: HashMap<String, MapCounters> = HashMap::new();
    for map in maps {
        sums.entry(map.path.clone())
            .or_insert_with(|| {
                order.push(map.path.clone());
                MapCounters::default()
            })
            .add(&map.counters);
    }
    order
        .into_iter()
        .map(|path| {
            let counters = sums.remove(&path).unwrap_or_default();
            GroupedMemoryMap { path, counters }
        })
        .collect()
}

/// Sums `(pss, uss, swap)` over the counters of smaps or smaps_rollup.
pub fn parse_rollup(content: &str) -> (u64, u64, u64) {
    let mut pss = 0;
    let mut private_clean = 0;
    let mut private_dirty = 0;
    let mut swap = 0;

    for line in content.lines() {
        if let Some(kb) = line.strip_prefix("Pss:") {
            pss += parse_kb_value(kb).unwrap_or(0);
        } else if let Some(kb) = line.strip_prefix("Private_Clean:") {
            private_clean += parse_kb_value(kb).unwrap_or(0);
        } else if let Some(kb) = line.strip_prefix("Private_Dirty:") {
            private_dirty += parse_kb_value(kb).unwrap_or(0);
        } else if let Some(kb) = line.strip_prefix("Swap:") {
            swap += parse_kb_value(kb).unwrap_or(0);
        }
    }

    (pss * 1024, (private_clean + private_dirty) * 1024, swap * 1024)
}

pub fn memory_info_ex(proc: &LinuxProcess<'_>, page_size: u64) -> Result<MemoryInfoEx> {
    let content = proc.read_file("statm")?;
    parse_statm(&content, page_size).ok_or_else(|| {
        PsError::NotImplemented(format!("unexpected /proc/{}/statm format", proc.pid()))
    })
}

pub fn memory_info(proc: &LinuxProcess<'_>, page_size: u64) -> Result<MemoryInfo> {
    let ex = memory_info_ex(proc, page_size)?;
    Ok(MemoryInfo {
        rss: ex.rss,
        vms: ex.vms,
    })
}

/// Uses smaps_rollup (Linux >= 4.14) when present, otherwise sums full smaps.
pub fn memory_full_info(proc: &LinuxProcess<'_>, page_size: u64) -> Result<MemoryFullInfo> {
    let basic = memory_info(proc, page_size)?;
    let content = if proc.file_exists("smaps_rollup") {
        proc.read_file("smaps_rollup")?
    } else {
        read_smaps(proc)?
    };
    let (pss, uss, swap) = parse_rollup(&content);
    Ok(MemoryFullInfo {
        rss: basic.rss,
        vms: basic.vms,
        uss,
        pss,
        swap,
    })
}

pub fn memory_maps(proc: &LinuxProcess<'_>) -> Result<Vec<MemoryMap>> {
    parse_smaps(&read_smaps(proc)?)
}

fn read_smaps(proc: &LinuxProcess<'_>) -> Result<String> {
    match proc.read_file("smaps") {
        Err(PsError::NotImplemented(_)) => {
            Err(PsError::NotImplemented(format!(
                "couldn't find /proc/{}/smaps; kernel < 2.6.14 or CONFIG_MMU disabled",
                proc.pid()
            )))
        }
        other => other,
    }
}

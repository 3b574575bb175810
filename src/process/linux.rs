//! Raw per-process readers over `/proc/<pid>/*`.
//!
//! [`LinuxProcess`] reads one field per call and maps every I/O failure
//! through [`PidGuard`]. It keeps no state; caching and identity checks are
//! the business of `ProcessHandle`.

use ahash::AHashMap as HashMap;
use serde::Serialize;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{is_not_found, PidGuard, PsError, Result};
use crate::procfs::{parse_key_values, ProcFs};

/// Scheduler state from the `State:` line of /proc/<pid>/status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProcessStatus {
    Running,
    Sleeping,
    DiskSleep,
    Stopped,
    TracingStop,
    Zombie,
    Dead,
    WakeKill,
    Waking,
    Idle,
    Parked,
    Unknown,
}

impl ProcessStatus {
    /// Maps the one-letter codes of fs/proc/array.c.
    pub fn from_code(code: &str) -> Self {
        match code {
            "R" => ProcessStatus::Running,
            "S" => ProcessStatus::Sleeping,
            "D" => ProcessStatus::DiskSleep,
            "T" => ProcessStatus::Stopped,
            "t" => ProcessStatus::TracingStop,
            "Z" => ProcessStatus::Zombie,
            "X" | "x" => ProcessStatus::Dead,
            "K" => ProcessStatus::WakeKill,
            "W" => ProcessStatus::Waking,
            "I" => ProcessStatus::Idle,
            "P" => ProcessStatus::Parked,
            _ => ProcessStatus::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessStatus::Running => "running",
            ProcessStatus::Sleeping => "sleeping",
            ProcessStatus::DiskSleep => "disk-sleep",
            ProcessStatus::Stopped => "stopped",
            ProcessStatus::TracingStop => "tracing-stop",
            ProcessStatus::Zombie => "zombie",
            ProcessStatus::Dead => "dead",
            ProcessStatus::WakeKill => "wake-kill",
            ProcessStatus::Waking => "waking",
            ProcessStatus::Idle => "idle",
            ProcessStatus::Parked => "parked",
            ProcessStatus::Unknown => "?",
        }
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields of /proc/<pid>/stat used by this crate. Tick counts are raw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatFields {
    pub comm: String,
    pub state: String,
    pub ppid: u32,
    pub tty_nr: u64,
    pub utime: u64,
    pub stime: u64,
    pub cutime: u64,
    pub cstime: u64,
    pub nice: i32,
    pub num_threads: u64,
    pub starttime: u64,
}

/// Parses a stat line. The command name may contain spaces and parentheses,
/// so fields are split after the last `)`.
pub fn parse_stat(content: &str) -> Option<StatFields> {
    let open = content.find('(')?;
    let close = content.rfind(')')?;
    if close < open {
        return None;
    }
    let comm = content[open + 1..close].to_string();
    let rest: Vec<&str> = content[close + 1..].split_whitespace().collect();
    if rest.len() < 20 {
        return None;
    }

    let num = |i: usize| rest[i].parse::<u64>().ok();
    Some(StatFields {
        comm,
        state: rest[0].to_string(),
        ppid: rest[1].parse().ok()?,
        // tty_nr is signed in the kernel; negative means none
        tty_nr: rest[4].parse::<i64>().ok().map_or(0, |v| v.max(0) as u64),
        utime: num(11)?,
        stime: num(12)?,
        cutime: rest[13].parse::<i64>().ok()?.max(0) as u64,
        cstime: rest[14].parse::<i64>().ok()?.max(0) as u64,
        nice: rest[16].parse().ok()?,
        num_threads: num(17)?,
        starttime: num(19)?,
    })
}

/// CPU times in seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ProcessCpuTimes {
    pub user: f64,
    pub system: f64,
    pub children_user: f64,
    pub children_system: f64,
}

impl ProcessCpuTimes {
    /// `user + system`, the process's own CPU time.
    pub fn busy(&self) -> f64 {
        self.user + self.system
    }
}

/// Real, effective and saved ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Ids {
    pub real: u32,
    pub effective: u32,
    pub saved: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CtxSwitches {
    pub voluntary: u64,
    pub involuntary: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ThreadTimes {
    pub id: u32,
    pub user_time: f64,
    pub system_time: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IoCounters {
    pub read_count: u64,
    pub write_count: u64,
    pub read_bytes: u64,
    pub write_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpenFile {
    pub path: PathBuf,
    pub fd: i32,
}

/// Reader bound to one pid.
#[derive(Debug, Clone, Copy)]
pub struct LinuxProcess<'a> {
    procfs: &'a ProcFs,
    guard: PidGuard<'a>,
}

impl<'a> LinuxProcess<'a> {
    pub fn new(procfs: &'a ProcFs, pid: u32) -> Self {
        Self {
            procfs,
            guard: PidGuard::new(pid),
        }
    }

    /// Attaches a known name to the errors this reader produces.
    pub fn with_name(procfs: &'a ProcFs, pid: u32, name: Option<&'a str>) -> Self {
        Self {
            procfs,
            guard: PidGuard::with_name(pid, name),
        }
    }

    pub fn pid(&self) -> u32 {
        self.guard.pid
    }

    fn rel(&self, file: &str) -> PathBuf {
        Path::new(&self.guard.pid.to_string()).join(file)
    }

    fn read_string(&self, file: &str) -> Result<String> {
        self.call_on(file, || self.procfs.read_string(self.rel(file)))
    }

    /// Maps a failed access to `file`. A missing entry under a pid directory
    /// that still exists is a source this kernel does not provide.
    fn call_on<T, F>(&self, file: &str, f: F) -> Result<T>
    where
        F: FnOnce() -> io::Result<T>,
    {
        f().map_err(|e| {
            if is_not_found(&e) && self.dir_exists() {
                self.not_implemented("entry", file)
            } else {
                self.guard.map(e)
            }
        })
    }

    fn not_implemented(&self, what: &str, file: &str) -> PsError {
        PsError::NotImplemented(format!(
            "{} not found in /proc/{}/{}",
            what, self.guard.pid, file
        ))
    }

    fn dir_exists(&self) -> bool {
        self.procfs.pid_path(self.guard.pid).exists()
    }

    pub fn stat(&self) -> Result<StatFields> {
        let content = self.read_string("stat")?;
        parse_stat(&content).ok_or_else(|| self.not_implemented("expected fields", "stat"))
    }

    pub fn status_map(&self) -> Result<HashMap<String, String>> {
        Ok(parse_key_values(&self.read_string("status")?))
    }

    fn status_field(&self, key: &str) -> Result<String> {
        self.status_map()?
            .remove(key)
            .ok_or_else(|| self.not_implemented(key, "status"))
    }

    /// Command name as the kernel keeps it (at most 15 bytes).
    pub fn name(&self) -> Result<String> {
        Ok(self.stat()?.comm)
    }

    /// Arguments split on NUL. Kernel threads have none.
    pub fn cmdline(&self) -> Result<Vec<String>> {
        let bytes = self
            .guard
            .call(|| self.procfs.read_bytes(self.rel("cmdline")))?;
        let mut args: Vec<String> = bytes
            .split(|&b| b == 0)
            .map(|s| String::from_utf8_lossy(s).into_owned())
            .collect();
        while args.last().is_some_and(|a| a.is_empty()) {
            args.pop();
        }
        Ok(args)
    }

    /// Executable path; `""` when the link is unreadable but the process
    /// exists (kernel threads).
    pub fn exe(&self) -> Result<String> {
        match self.procfs.read_link(self.rel("exe")) {
            Ok(target) => {
                let raw = target.to_string_lossy();
                let mut exe = raw.split('\0').next().unwrap_or_default().to_string();
                if let Some(stripped) = exe.strip_suffix(" (deleted)") {
                    if !Path::new(&exe).exists() {
                        exe = stripped.to_string();
                    }
                }
                Ok(exe)
            }
            Err(e) if is_not_found(&e) => {
                if self.dir_exists() {
                    Ok(String::new())
                } else {
                    Err(self.guard.map(e))
                }
            }
            Err(e) => Err(self.guard.map(e)),
        }
    }

    pub fn cwd(&self) -> Result<PathBuf> {
        self.call_on("cwd", || self.procfs.read_link(self.rel("cwd")))
    }

    pub fn ppid(&self) -> Result<u32> {
        let value = self.status_field("PPid")?;
        value
            .parse()
            .map_err(|_| self.not_implemented("numeric PPid", "status"))
    }

    pub fn status(&self) -> Result<ProcessStatus> {
        let value = self.status_field("State")?;
        let code = value.split_whitespace().next().unwrap_or_default();
        Ok(ProcessStatus::from_code(code))
    }

    pub fn uids(&self) -> Result<Ids> {
        self.ids("Uid")
    }

    pub fn gids(&self) -> Result<Ids> {
        self.ids("Gid")
    }

    fn ids(&self, key: &str) -> Result<Ids> {
        let value = self.status_field(key)?;
        let ids: Vec<u32> = value
            .split_whitespace()
            .filter_map(|v| v.parse().ok())
            .collect();
        if ids.len() < 3 {
            return Err(self.not_implemented(key, "status"));
        }
        Ok(Ids {
            real: ids[0],
            effective: ids[1],
            saved: ids[2],
        })
    }

    pub fn num_threads(&self) -> Result<u64> {
        self.status_field("Threads")?
            .parse()
            .map_err(|_| self.not_implemented("numeric Threads", "status"))
    }

    /// Needs kernel 2.6.23 or later.
    pub fn num_ctx_switches(&self) -> Result<CtxSwitches> {
        let map = self.status_map()?;
        let get = |key: &str| map.get(key).and_then(|v| v.parse::<u64>().ok());
        match (get("voluntary_ctxt_switches"), get("nonvoluntary_ctxt_switches")) {
            (Some(voluntary), Some(involuntary)) => Ok(CtxSwitches {
                voluntary,
                involuntary,
            }),
            _ => Err(self.not_implemented("ctxt_switches fields", "status")),
        }
    }

    pub fn cpu_times(&self, clk_tck: f64) -> Result<ProcessCpuTimes> {
        let st = self.stat()?;
        Ok(ProcessCpuTimes {
            user: st.utime as f64 / clk_tck,
            system: st.stime as f64 / clk_tck,
            children_user: st.cutime as f64 / clk_tck,
            children_system: st.cstime as f64 / clk_tck,
        })
    }

    /// Seconds since the epoch.
    pub fn create_time(&self, boot_time: f64, clk_tck: f64) -> Result<f64> {
        let st = self.stat()?;
        Ok(boot_time + st.starttime as f64 / clk_tck)
    }

    pub fn nice(&self) -> Result<i32> {
        Ok(self.stat()?.nice)
    }

    pub fn tty_nr(&self) -> Result<u64> {
        Ok(self.stat()?.tty_nr)
    }

    /// Requires read access to /proc/<pid>/io (usually root or the owner).
    pub fn io_counters(&self) -> Result<IoCounters> {
        let map = parse_key_values(&self.read_string("io")?);
        let get = |key: &str| map.get(key).and_then(|v| v.parse::<u64>().ok());
        match (
            get("syscr"),
            get("syscw"),
            get("read_bytes"),
            get("write_bytes"),
        ) {
            (Some(read_count), Some(write_count), Some(read_bytes), Some(write_bytes)) => {
                Ok(IoCounters {
                    read_count,
                    write_count,
                    read_bytes,
                    write_bytes,
                })
            }
            _ => Err(self.not_implemented("all i/o counters", "io")),
        }
    }

    pub fn num_fds(&self) -> Result<usize> {
        let dir = self.procfs.pid_path(self.guard.pid).join("fd");
        self.call_on("fd", || Ok(fs::read_dir(&dir)?.count()))
    }

    /// Per-thread CPU times. A thread exiting mid-scan is skipped; the
    /// process exiting is reported.
    pub fn threads(&self, clk_tck: f64) -> Result<Vec<ThreadTimes>> {
        let mut ids: Vec<u32> = self
            .call_on("task", || self.procfs.read_dir_names(self.rel("task")))?
            .into_iter()
            .filter_map(|n| n.parse().ok())
            .collect();
        ids.sort_unstable();

        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let rel = self.rel("task").join(id.to_string()).join("stat");
            match self.procfs.read_string(&rel) {
                Ok(content) => {
                    if let Some(st) = parse_stat(&content) {
                        out.push(ThreadTimes {
                            id,
                            user_time: st.utime as f64 / clk_tck,
                            system_time: st.stime as f64 / clk_tck,
                        });
                    }
                }
                Err(e) if is_not_found(&e) => {
                    if !self.dir_exists() {
                        return Err(self.guard.map(e));
                    }
                    debug!("Thread {} of pid {} exited during scan", id, self.guard.pid);
                }
                Err(e) => return Err(self.guard.map(e)),
            }
        }
        Ok(out)
    }

    /// Regular files among the open descriptors.
    pub fn open_files(&self) -> Result<Vec<OpenFile>> {
        let targets = self.call_on("fd", || self.procfs.fd_targets(self.guard.pid))?;
        Ok(targets
            .into_iter()
            .filter(|t| t.target.is_absolute() && t.target.is_file())
            .map(|t| OpenFile {
                path: t.target,
                fd: t.fd,
            })
            .collect())
    }

    /// Reads a file of this pid, mapping errors (used by the memory readers).
    pub(crate) fn read_file(&self, file: &str) -> Result<String> {
        self.read_string(file)
    }

    pub(crate) fn file_exists(&self, file: &str) -> bool {
        self.procfs.exists(self.rel(file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;
    use tempfile::tempdir;

    pub(crate) const STAT_LINE: &str = "4321 (my (weird) proc) S 1 4321 4321 34816 4321 4194560 \
1000 0 0 0 250 50 10 5 20 -5 3 0 12345 1000000 200 18446744073709551615 1 1 0 0 0 0 0 0 0 0 0 0 17 0 0 0 0 0 0\n";

    #[test]
    fn test_parse_stat_handles_parens_in_name() {
        let st = parse_stat(STAT_LINE).unwrap();
        assert_eq!(st.comm, "my (weird) proc");
        assert_eq!(st.state, "S");
        assert_eq!(st.ppid, 1);
        assert_eq!(st.tty_nr, 34816);
        assert_eq!(st.utime, 250);
        assert_eq!(st.stime, 50);
        assert_eq!(st.cutime, 10);
        assert_eq!(st.cstime, 5);
        assert_eq!(st.nice, -5);
        assert_eq!(st.num_threads, 3);
        assert_eq!(st.starttime, 12345);
    }

    #[test]
    fn test_parse_stat_truncated() {
        assert!(parse_stat("1 (init) S 0 1").is_none());
        assert!(parse_stat("garbage").is_none());
    }

    #[test]
    fn test_status_letters() {
        assert_eq!(ProcessStatus::from_code("R"), ProcessStatus::Running);
        assert_eq!(ProcessStatus::from_code("t"), ProcessStatus::TracingStop);
        assert_eq!(ProcessStatus::from_code("x"), ProcessStatus::Dead);
        assert_eq!(ProcessStatus::from_code("?"), ProcessStatus::Unknown);
        assert_eq!(ProcessStatus::DiskSleep.to_string(), "disk-sleep");
    }

    fn fake_pid(root: &Path) {
        let dir = root.join("4321");
        fs::create_dir_all(dir.join("fd")).unwrap();
        fs::create_dir_all(dir.join("task/4321")).unwrap();
        fs::create_dir_all(dir.join("task/4322")).unwrap();
        fs::write(dir.join("stat"), STAT_LINE).unwrap();
        fs::write(dir.join("task/4321/stat"), STAT_LINE).unwrap();
        fs::write(dir.join("task/4322/stat"), STAT_LINE).unwrap();
        fs::write(
            dir.join("status"),
            "Name:\tmy (weird) proc\nState:\tS (sleeping)\nPPid:\t1\n\
             Uid:\t1000\t1001\t1002\t1003\nGid:\t100\t101\t102\t103\nThreads:\t3\n\
             voluntary_ctxt_switches:\t7\nnonvoluntary_ctxt_switches:\t2\n",
        )
        .unwrap();
        fs::write(dir.join("cmdline"), b"/usr/bin/my-proc\0--flag\0\0").unwrap();
        fs::write(
            dir.join("io"),
            "rchar: 1\nwchar: 2\nsyscr: 3\nsyscw: 4\nread_bytes: 5\nwrite_bytes: 6\n",
        )
        .unwrap();
        fs::write(root.join("regular.txt"), "x").unwrap();
        symlink(root.join("regular.txt"), dir.join("fd/3")).unwrap();
        symlink("socket:[99]", dir.join("fd/4")).unwrap();
        symlink("/", dir.join("cwd")).unwrap();
    }

    #[test]
    fn test_field_readers() {
        let dir = tempdir().expect("Failed to create temp dir");
        fake_pid(dir.path());
        let procfs = ProcFs::new(dir.path());
        let p = LinuxProcess::new(&procfs, 4321);

        assert_eq!(p.name().unwrap(), "my (weird) proc");
        assert_eq!(p.cmdline().unwrap(), vec!["/usr/bin/my-proc", "--flag"]);
        assert_eq!(p.ppid().unwrap(), 1);
        assert_eq!(p.status().unwrap(), ProcessStatus::Sleeping);
        assert_eq!(
            p.uids().unwrap(),
            Ids {
                real: 1000,
                effective: 1001,
                saved: 1002
            }
        );
        assert_eq!(p.gids().unwrap().saved, 102);
        assert_eq!(p.num_threads().unwrap(), 3);
        assert_eq!(
            p.num_ctx_switches().unwrap(),
            CtxSwitches {
                voluntary: 7,
                involuntary: 2
            }
        );
        assert_eq!(p.nice().unwrap(), -5);
        assert_eq!(p.cwd().unwrap(), PathBuf::from("/"));
        assert_eq!(p.num_fds().unwrap(), 2);

        let times = p.cpu_times(100.0).unwrap();
        assert_eq!(times.user, 2.5);
        assert_eq!(times.system, 0.5);
        assert_eq!(times.children_user, 0.1);
        assert_eq!(times.busy(), 3.0);

        assert!((p.create_time(1000.0, 100.0).unwrap() - 1123.45).abs() < 1e-9);

        let io = p.io_counters().unwrap();
        assert_eq!((io.read_count, io.write_count), (3, 4));
        assert_eq!((io.read_bytes, io.write_bytes), (5, 6));

        let threads = p.threads(100.0).unwrap();
        assert_eq!(threads.len(), 2);
        assert_eq!(threads[0].id, 4321);
        assert_eq!(threads[1].user_time, 2.5);

        let files = p.open_files().unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].fd, 3);
    }

    #[test]
    fn test_exe_missing_link_on_live_pid_is_empty() {
        let dir = tempdir().expect("Failed to create temp dir");
        fake_pid(dir.path());
        let procfs = ProcFs::new(dir.path());
        assert_eq!(LinuxProcess::new(&procfs, 4321).exe().unwrap(), "");
    }

    #[test]
    fn test_exe_strips_deleted_suffix() {
        let dir = tempdir().expect("Failed to create temp dir");
        fake_pid(dir.path());
        symlink("/usr/bin/gone (deleted)", dir.path().join("4321/exe")).unwrap();
        let procfs = ProcFs::new(dir.path());
        assert_eq!(LinuxProcess::new(&procfs, 4321).exe().unwrap(), "/usr/bin/gone");
    }

    #[test]
    fn test_missing_pid_is_no_such_process() {
        let dir = tempdir().expect("Failed to create temp dir");
        let procfs = ProcFs::new(dir.path());
        let p = LinuxProcess::with_name(&procfs, 999, Some("ghost"));
        let err = p.stat().unwrap_err();
        assert_eq!(err.to_string(), "process no longer exists (pid=999, name=ghost)");
        assert!(p.exe().unwrap_err().is_no_such_process());
        assert!(p.threads(100.0).unwrap_err().is_no_such_process());
    }

    #[test]
    fn test_missing_status_line_is_not_implemented() {
        let dir = tempdir().expect("Failed to create temp dir");
        fs::create_dir(dir.path().join("5")).unwrap();
        fs::write(dir.path().join("5/status"), "Name:\told\nPPid:\t1\n").unwrap();
        fs::write(dir.path().join("5/io"), "rchar: 1\n").unwrap();
        let procfs = ProcFs::new(dir.path());
        let p = LinuxProcess::new(&procfs, 5);
        assert!(matches!(p.num_ctx_switches(), Err(PsError::NotImplemented(_))));
        assert!(matches!(p.uids(), Err(PsError::NotImplemented(_))));
        assert!(matches!(p.io_counters(), Err(PsError::NotImplemented(_))));
    }
}

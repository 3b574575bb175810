//! A handle on one process instance.
//!
//! The identity `(pid, create_time)` is read once at construction. Later
//! calls compare a freshly derived identity against it, so a handle never
//! silently starts describing an unrelated process that recycled its pid.

use ahash::AHashMap as HashMap;
use nix::sys::signal::Signal;
use nix::unistd::{Uid, User};
use once_cell::sync::OnceCell;
use std::fmt;
use std::fs;
use std::hash::{Hash, Hasher};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::error::{PsError, Result};
use crate::net::{ConnectionEnumerator, ConnectionKind, ConnectionRecord, InodeIndex};
use crate::process::control::{self, IoClass, IoNice, Rlimit, RlimitResource};
use crate::process::identity::ProcessIdentity;
use crate::process::linux::{
    CtxSwitches, Ids, IoCounters, LinuxProcess, OpenFile, ProcessCpuTimes, ProcessStatus,
    ThreadTimes,
};
use crate::process::memory::{
    self, GroupedMemoryMap, MemoryFullInfo, MemoryInfo, MemoryInfoEx, MemoryMap,
};
use crate::process::registry::ProcessRegistry;
use crate::process::sampler::ProcessCpuSampler;
use crate::session::ProcSession;

/// Kernel-truncated command names are at most this long.
const COMM_LEN: usize = 15;

#[derive(Debug)]
pub struct ProcessHandle {
    session: Arc<ProcSession>,
    identity: ProcessIdentity,
    name: OnceCell<String>,
    exe: OnceCell<String>,
    gone: AtomicBool,
    cpu: ProcessCpuSampler,
}

impl ProcessHandle {
    /// Looks up `pid` and records its identity.
    ///
    /// Fails with `NoSuchProcess` if the pid is not in the process table and
    /// with `AccessDenied` if its stat file cannot be read.
    pub fn new(session: Arc<ProcSession>, pid: u32) -> Result<Self> {
        let boot_time = session.boot_time()?;
        let create_time =
            LinuxProcess::new(session.procfs(), pid).create_time(boot_time, session.clock_ticks())?;
        Ok(Self {
            session,
            identity: ProcessIdentity::new(pid, create_time),
            name: OnceCell::new(),
            exe: OnceCell::new(),
            gone: AtomicBool::new(false),
            cpu: ProcessCpuSampler::new(),
        })
    }

    /// Handle for the calling process.
    pub fn current(session: Arc<ProcSession>) -> Result<Self> {
        Self::new(session, std::process::id())
    }

    pub fn identity(&self) -> ProcessIdentity {
        self.identity
    }

    pub fn pid(&self) -> u32 {
        self.identity.pid
    }

    /// Creation time in seconds since the epoch, as recorded at construction.
    pub fn create_time(&self) -> f64 {
        self.identity.create_time
    }

    pub fn session(&self) -> &Arc<ProcSession> {
        &self.session
    }

    /// Reader for `/proc/<pid>`; refused once the handle is latched gone so a
    /// recycled pid is never described.
    fn raw(&self) -> Result<LinuxProcess<'_>> {
        if self.is_gone() {
            return Err(self.no_such_process());
        }
        Ok(LinuxProcess::with_name(
            self.session.procfs(),
            self.pid(),
            self.name.get().map(String::as_str),
        ))
    }

    /// Whether the handle still names a live process.
    ///
    /// Once the process is seen gone (or its pid reused) this stays `false`
    /// without asking the kernel again. Lack of permission to re-read the
    /// identity also answers `false`, but does not latch.
    pub fn is_running(&self) -> bool {
        if self.gone.load(Ordering::Acquire) {
            return false;
        }
        match ProcessHandle::new(Arc::clone(&self.session), self.pid()) {
            Ok(fresh) if fresh.identity == self.identity => true,
            Ok(_) => {
                debug!("pid {} was reused by another process", self.pid());
                self.gone.store(true, Ordering::Release);
                false
            }
            Err(PsError::NoSuchProcess { .. }) => {
                self.gone.store(true, Ordering::Release);
                false
            }
            Err(e) => {
                debug!("Cannot verify identity of pid {}: {}", self.pid(), e);
                false
            }
        }
    }

    /// True once `is_running` has observed the process gone.
    pub fn is_gone(&self) -> bool {
        self.gone.load(Ordering::Acquire)
    }

    fn no_such_process(&self) -> PsError {
        PsError::NoSuchProcess {
            pid: self.pid(),
            name: self.name.get().cloned(),
        }
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(self.no_such_process())
        }
    }

    /// Signals, priorities and limits act on the host kernel, which only
    /// matches the session when it reads the real /proc.
    fn ensure_live(&self, what: &str) -> Result<()> {
        if self.session.is_live() {
            Ok(())
        } else {
            Err(PsError::NotImplemented(format!(
                "{} needs the live /proc, session reads {}",
                what,
                self.session.proc_root().display()
            )))
        }
    }

    /// Attaches the cached name to errors coming from the syscall shim.
    fn named(&self, err: PsError) -> PsError {
        let cached = self.name.get().cloned();
        match err {
            PsError::NoSuchProcess { pid, name: None } => PsError::NoSuchProcess { pid, name: cached },
            PsError::AccessDenied { pid, name: None } => PsError::AccessDenied { pid, name: cached },
            other => other,
        }
    }

    // -------------------------------------------------------------------------
    // Fields
    // -------------------------------------------------------------------------

    pub fn ppid(&self) -> Result<u32> {
        self.raw()?.ppid()
    }

    /// Process name, cached after the first successful read.
    ///
    /// The kernel keeps at most 15 bytes; a truncated name is completed from
    /// the basename of `cmdline[0]` when that starts with it.
    pub fn name(&self) -> Result<String> {
        self.name
            .get_or_try_init(|| {
                let raw = self.raw()?;
                let mut name = raw.name()?;
                if name.len() >= COMM_LEN {
                    let cmdline = match raw.cmdline() {
                        Ok(c) => c,
                        Err(PsError::AccessDenied { .. } | PsError::NotImplemented(_)) => Vec::new(),
                        Err(e) => return Err(e),
                    };
                    if let Some(extended) = cmdline
                        .first()
                        .and_then(|arg0| Path::new(arg0).file_name())
                        .and_then(|f| f.to_str())
                    {
                        if extended.starts_with(&name) {
                            name = extended.to_string();
                        }
                    }
                }
                Ok(name)
            })
            .cloned()
    }

    /// Absolute path of the executable, cached after the first successful read.
    ///
    /// May be empty (kernel threads). When the link cannot be read,
    /// `cmdline[0]` is used if it is an existing, canonical, executable path.
    pub fn exe(&self) -> Result<String> {
        self.exe
            .get_or_try_init(|| {
                let (exe, denied) = match self.raw()?.exe() {
                    Ok(exe) => (exe, None),
                    Err(e @ PsError::AccessDenied { .. }) => (String::new(), Some(e)),
                    Err(e) => return Err(e),
                };
                if !exe.is_empty() {
                    return Ok(exe);
                }
                let cmdline = self.raw()?.cmdline()?;
                if let Some(arg0) = cmdline.first() {
                    if is_canonical_executable(Path::new(arg0)) {
                        return Ok(arg0.clone());
                    }
                }
                match denied {
                    Some(e) => Err(e),
                    None => Ok(exe),
                }
            })
            .cloned()
    }

    pub fn cmdline(&self) -> Result<Vec<String>> {
        self.raw()?.cmdline()
    }

    pub fn status(&self) -> Result<ProcessStatus> {
        self.raw()?.status()
    }

    /// Login name of the real uid, or the uid itself when it has no passwd entry.
    pub fn username(&self) -> Result<String> {
        let uid = self.uids()?.real;
        match User::from_uid(Uid::from_raw(uid)) {
            Ok(Some(user)) => Ok(user.name),
            Ok(None) => Ok(uid.to_string()),
            Err(e) => {
                debug!("passwd lookup for uid {} failed: {}", uid, e);
                Ok(uid.to_string())
            }
        }
    }

    pub fn cpu_times(&self) -> Result<ProcessCpuTimes> {
        self.raw()?.cpu_times(self.session.clock_ticks())
    }

    pub fn cwd(&self) -> Result<PathBuf> {
        self.raw()?.cwd()
    }

    pub fn nice(&self) -> Result<i32> {
        self.raw()?.nice()
    }

    pub fn uids(&self) -> Result<Ids> {
        self.raw()?.uids()
    }

    pub fn gids(&self) -> Result<Ids> {
        self.raw()?.gids()
    }

    /// Controlling terminal path, `None` when there is none.
    pub fn terminal(&self) -> Result<Option<String>> {
        let tty_nr = self.raw()?.tty_nr()?;
        if tty_nr == 0 {
            return Ok(None);
        }
        Ok(self.session.terminal_map().get(&tty_nr).cloned())
    }

    pub fn num_fds(&self) -> Result<usize> {
        self.raw()?.num_fds()
    }

    pub fn num_threads(&self) -> Result<u64> {
        self.raw()?.num_threads()
    }

    pub fn num_ctx_switches(&self) -> Result<CtxSwitches> {
        self.raw()?.num_ctx_switches()
    }

    pub fn threads(&self) -> Result<Vec<ThreadTimes>> {
        self.raw()?.threads(self.session.clock_ticks())
    }

    pub fn io_counters(&self) -> Result<IoCounters> {
        self.raw()?.io_counters()
    }

    pub fn memory_info(&self) -> Result<MemoryInfo> {
        memory::memory_info(&self.raw()?, self.session.page_size())
    }

    pub fn memory_info_ex(&self) -> Result<MemoryInfoEx> {
        memory::memory_info_ex(&self.raw()?, self.session.page_size())
    }

    pub fn memory_full_info(&self) -> Result<MemoryFullInfo> {
        memory::memory_full_info(&self.raw()?, self.session.page_size())
    }

    pub fn memory_maps(&self) -> Result<Vec<MemoryMap>> {
        memory::memory_maps(&self.raw()?)
    }

    pub fn memory_maps_grouped(&self) -> Result<Vec<GroupedMemoryMap>> {
        Ok(memory::group_maps(&self.memory_maps()?))
    }

    /// RSS as a share of total physical memory; `0.0` when the total is zero.
    pub fn memory_percent(&self) -> Result<f64> {
        let rss = self.memory_info()?.rss;
        let total = self.session.total_memory()?;
        if total == 0 {
            return Ok(0.0);
        }
        Ok(rss as f64 / total as f64 * 100.0)
    }

    pub fn open_files(&self) -> Result<Vec<OpenFile>> {
        self.raw()?.open_files()
    }

    /// Sockets held by this process. Duplicated descriptors yield one record each.
    pub fn connections(&self, kind: ConnectionKind) -> Result<Vec<ConnectionRecord>> {
        if self.is_gone() {
            return Err(self.no_such_process());
        }
        let procfs = self.session.procfs();
        let index = match InodeIndex::for_pid(procfs, self.pid()) {
            Ok(index) => index,
            Err(PsError::NoSuchProcess { .. }) if procfs.pid_path(self.pid()).exists() => {
                return Err(PsError::NotImplemented(format!(
                    "no fd table in /proc/{}",
                    self.pid()
                )));
            }
            Err(e) => return Err(self.named(e)),
        };
        if index.is_empty() {
            return Ok(Vec::new());
        }
        ConnectionEnumerator::new(procfs.clone()).enumerate_with_index(kind, &index, Some(self.pid()))
    }

    /// Utilization since the previous call (`interval <= 0`) or over a fresh
    /// blocking interval. Can exceed 100 on multi-core hosts.
    pub fn cpu_percent(&self, interval: f64) -> Result<f64> {
        self.cpu
            .percent(interval, self.session.cpu_count(), || {
                Ok(self.cpu_times()?.busy())
            })
    }

    // -------------------------------------------------------------------------
    // Relatives
    // -------------------------------------------------------------------------

    /// The parent, unless it is gone or its pid was reused by a younger process.
    pub fn parent(&self) -> Result<Option<ProcessHandle>> {
        let ppid = self.ppid()?;
        if ppid == 0 {
            return Ok(None);
        }
        match ProcessHandle::new(Arc::clone(&self.session), ppid) {
            Ok(parent) if parent.create_time() <= self.create_time() => Ok(Some(parent)),
            Ok(_) => Ok(None),
            Err(PsError::NoSuchProcess { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Children (or all descendants when `recursive`) from a registry refresh.
    ///
    /// A child older than this process holds a recycled pid and is skipped.
    pub fn children(
        &self,
        registry: &ProcessRegistry,
        recursive: bool,
    ) -> Result<Vec<Arc<ProcessHandle>>> {
        self.ensure_running()?;
        let all = registry.refresh()?;

        let mut by_parent: HashMap<u32, Vec<Arc<ProcessHandle>>> = HashMap::new();
        for p in all {
            match p.ppid() {
                Ok(ppid) => by_parent.entry(ppid).or_default().push(p),
                Err(e) if e.is_no_such_process() => continue,
                Err(e) => debug!("Skipping pid {} while listing children: {}", p.pid(), e),
            }
        }

        let mut out = Vec::new();
        let mut queue = vec![self.pid()];
        let mut seen = vec![self.pid()];
        while let Some(pid) = queue.pop() {
            let Some(kids) = by_parent.get(&pid) else {
                continue;
            };
            for child in kids {
                if self.create_time() > child.create_time() {
                    continue;
                }
                out.push(Arc::clone(child));
                if recursive && !seen.contains(&child.pid()) {
                    seen.push(child.pid());
                    queue.push(child.pid());
                }
            }
            if !recursive {
                break;
            }
        }
        out.sort_by_key(|p| p.pid());
        Ok(out)
    }

    // -------------------------------------------------------------------------
    // Control
    // -------------------------------------------------------------------------

    pub fn send_signal(&self, signal: Signal) -> Result<()> {
        self.ensure_running()?;
        self.ensure_live("send_signal")?;
        control::send_signal(self.pid(), signal).map_err(|e| self.named(e))
    }

    pub fn suspend(&self) -> Result<()> {
        self.send_signal(Signal::SIGSTOP)
    }

    pub fn resume(&self) -> Result<()> {
        self.send_signal(Signal::SIGCONT)
    }

    pub fn terminate(&self) -> Result<()> {
        self.send_signal(Signal::SIGTERM)
    }

    pub fn kill(&self) -> Result<()> {
        self.send_signal(Signal::SIGKILL)
    }

    /// See [`control::wait_pid`].
    pub fn wait(&self, timeout: Option<Duration>) -> Result<Option<i32>> {
        self.ensure_live("wait")?;
        control::wait_pid(self.pid(), timeout)
    }

    pub fn set_nice(&self, value: i32) -> Result<()> {
        self.ensure_running()?;
        self.ensure_live("set_nice")?;
        control::set_nice(self.pid(), value).map_err(|e| self.named(e))
    }

    pub fn ionice(&self) -> Result<IoNice> {
        self.ensure_live("ionice")?;
        control::get_ionice(self.pid()).map_err(|e| self.named(e))
    }

    pub fn set_ionice(&self, ioclass: IoClass, value: Option<u8>) -> Result<()> {
        self.ensure_running()?;
        self.ensure_live("set_ionice")?;
        control::set_ionice(self.pid(), ioclass, value).map_err(|e| self.named(e))
    }

    pub fn rlimit(&self, resource: RlimitResource) -> Result<Rlimit> {
        self.ensure_live("rlimit")?;
        control::get_rlimit(self.pid(), resource).map_err(|e| self.named(e))
    }

    pub fn set_rlimit(&self, resource: RlimitResource, limit: Rlimit) -> Result<()> {
        self.ensure_running()?;
        self.ensure_live("set_rlimit")?;
        control::set_rlimit(self.pid(), resource, limit).map_err(|e| self.named(e))
    }

    pub fn cpu_affinity(&self) -> Result<Vec<usize>> {
        self.ensure_live("cpu_affinity")?;
        control::get_cpu_affinity(self.pid()).map_err(|e| self.named(e))
    }

    pub fn set_cpu_affinity(&self, cpus: &[usize]) -> Result<()> {
        self.ensure_running()?;
        self.ensure_live("set_cpu_affinity")?;
        control::set_cpu_affinity(self.pid(), cpus, self.session.cpu_count())
            .map_err(|e| self.named(e))
    }
}

fn is_canonical_executable(path: &Path) -> bool {
    if !path.is_absolute() {
        return false;
    }
    let Ok(meta) = fs::metadata(path) else {
        return false;
    };
    let canonical = fs::canonicalize(path).map(|p| p == path).unwrap_or(false);
    canonical && meta.is_file() && meta.permissions().mode() & 0o111 != 0
}

impl PartialEq for ProcessHandle {
    fn eq(&self, other: &Self) -> bool {
        self.identity == other.identity
    }
}

impl Eq for ProcessHandle {}

impl Hash for ProcessHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity.hash(state);
    }
}

impl fmt::Display for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Ok(name) => write!(f, "(pid={}, name={})", self.pid(), name),
            Err(PsError::NoSuchProcess { .. }) => write!(f, "(pid={} (terminated))", self.pid()),
            Err(_) => write!(f, "(pid={})", self.pid()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn stat_line(pid: u32, comm: &str, ppid: u32, starttime: u64) -> String {
        format!(
            "{pid} ({comm}) S {ppid} {pid} {pid} 0 -1 4194560 100 0 0 0 250 50 0 0 20 0 1 0 {starttime} 1000 200\n"
        )
    }

    fn fake_proc(root: &Path, pid: u32, comm: &str, ppid: u32, starttime: u64) {
        let dir = root.join(pid.to_string());
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("stat"), stat_line(pid, comm, ppid, starttime)).unwrap();
        fs::write(
            dir.join("status"),
            format!("Name:\t{comm}\nState:\tS (sleeping)\nPPid:\t{ppid}\nUid:\t0\t0\t0\t0\n"),
        )
        .unwrap();
        fs::write(dir.join("statm"), "100 50 10 5 0 20 0\n").unwrap();
    }

    fn session(root: &Path) -> Arc<ProcSession> {
        fs::write(root.join("stat"), "cpu  1 1 1 1\ncpu0 1 1 1 1\nbtime 1000\n").unwrap();
        fs::write(root.join("meminfo"), "MemTotal: 400 kB\nMemFree: 100 kB\n").unwrap();
        Arc::new(
            ProcSession::new(root)
                .with_clock_ticks(100.0)
                .with_page_size(4096),
        )
    }

    #[test]
    fn test_identity_from_stat() {
        let dir = tempdir().expect("Failed to create temp dir");
        let s = session(dir.path());
        fake_proc(dir.path(), 10, "worker", 1, 500);

        let h = ProcessHandle::new(s, 10).unwrap();
        assert_eq!(h.pid(), 10);
        assert_eq!(h.create_time(), 1005.0);
        assert!(h.is_running());
        assert_eq!(h.to_string(), "(pid=10, name=worker)");
    }

    #[test]
    fn test_missing_pid() {
        let dir = tempdir().expect("Failed to create temp dir");
        let s = session(dir.path());
        let err = ProcessHandle::new(s, 99).unwrap_err();
        assert!(err.is_no_such_process());
    }

    #[test]
    fn test_gone_latch() {
        let dir = tempdir().expect("Failed to create temp dir");
        let s = session(dir.path());
        fake_proc(dir.path(), 10, "worker", 1, 500);
        let h = ProcessHandle::new(s, 10).unwrap();
        h.name().unwrap();

        fs::remove_dir_all(dir.path().join("10")).unwrap();
        assert!(!h.is_running());
        assert!(h.is_gone());

        // Same pid comes back: the latch holds.
        fake_proc(dir.path(), 10, "worker", 1, 500);
        assert!(!h.is_running());

        let err = h.set_nice(0).unwrap_err();
        assert_eq!(err.to_string(), "process no longer exists (pid=10, name=worker)");
    }

    #[test]
    fn test_pid_reuse_detected() {
        let dir = tempdir().expect("Failed to create temp dir");
        let s = session(dir.path());
        fake_proc(dir.path(), 10, "old", 1, 500);
        let old = ProcessHandle::new(Arc::clone(&s), 10).unwrap();

        fs::remove_dir_all(dir.path().join("10")).unwrap();
        fake_proc(dir.path(), 10, "new", 1, 900);
        let new = ProcessHandle::new(s, 10).unwrap();

        assert_ne!(old, new);
        assert!(!old.is_running());
        assert!(new.is_running());
    }

    #[test]
    fn test_name_extended_from_cmdline() {
        let dir = tempdir().expect("Failed to create temp dir");
        let s = session(dir.path());
        fake_proc(dir.path(), 11, "very-long-proce", 1, 1);
        fs::write(
            dir.path().join("11/cmdline"),
            b"/opt/bin/very-long-process-name\0--x\0",
        )
        .unwrap();
        let h = ProcessHandle::new(s, 11).unwrap();
        assert_eq!(h.name().unwrap(), "very-long-process-name");
    }

    #[test]
    fn test_memory_percent_and_terminal() {
        let dir = tempdir().expect("Failed to create temp dir");
        let s = session(dir.path());
        fake_proc(dir.path(), 12, "mem", 1, 1);
        let h = ProcessHandle::new(s, 12).unwrap();

        let info = h.memory_info().unwrap();
        assert_eq!(info.rss, 50 * 4096);
        // 200 KiB of 400 KiB
        assert_eq!(h.memory_percent().unwrap(), 50.0);
        assert_eq!(h.terminal().unwrap(), None);
    }

    #[test]
    fn test_parent_and_children() {
        let dir = tempdir().expect("Failed to create temp dir");
        let s = session(dir.path());
        fake_proc(dir.path(), 1, "init", 0, 1);
        fake_proc(dir.path(), 20, "parent", 1, 100);
        fake_proc(dir.path(), 21, "child", 20, 200);
        fake_proc(dir.path(), 22, "grandchild", 21, 300);
        // pid reused: claims parent 20 but is older than it
        fake_proc(dir.path(), 23, "impostor", 20, 50);

        let registry = ProcessRegistry::new(Arc::clone(&s));
        let parent = ProcessHandle::new(Arc::clone(&s), 20).unwrap();

        let direct: Vec<u32> = parent
            .children(&registry, false)
            .unwrap()
            .iter()
            .map(|p| p.pid())
            .collect();
        assert_eq!(direct, vec![21]);

        let all: Vec<u32> = parent
            .children(&registry, true)
            .unwrap()
            .iter()
            .map(|p| p.pid())
            .collect();
        assert_eq!(all, vec![21, 22]);

        let child = ProcessHandle::new(Arc::clone(&s), 21).unwrap();
        assert_eq!(child.parent().unwrap().unwrap().pid(), 20);

        let impostor = ProcessHandle::new(Arc::clone(&s), 23).unwrap();
        assert!(impostor.parent().unwrap().is_none());

        let init = ProcessHandle::new(s, 1).unwrap();
        assert!(init.parent().unwrap().is_none());
    }

    #[test]
    fn test_display_terminated() {
        let dir = tempdir().expect("Failed to create temp dir");
        let s = session(dir.path());
        fake_proc(dir.path(), 30, "short", 1, 1);
        let h = ProcessHandle::new(s, 30).unwrap();
        fs::remove_dir_all(dir.path().join("30")).unwrap();
        assert_eq!(h.to_string(), "(pid=30 (terminated))");
    }
}

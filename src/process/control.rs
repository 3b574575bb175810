//! Syscall shim: existence probe, signals, scheduling priority, I/O
//! priority, CPU affinity, resource limits and waiting for exit.
//!
//! Every call takes a raw pid and maps OS errors through [`PidGuard`], so
//! ESRCH becomes `NoSuchProcess` and EPERM/EACCES become `AccessDenied`.

use nix::errno::Errno;
use nix::sched::{sched_getaffinity, sched_setaffinity, CpuSet};
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use serde::Serialize;
use std::fmt;
use std::io;
use std::str::FromStr;
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::error::{PidGuard, PsError, Result};

/// Lowest (most favourable) nice value.
pub const NICE_MIN: i32 = -20;
/// Highest nice value.
pub const NICE_MAX: i32 = 19;

fn errno_to_io(e: Errno) -> io::Error {
    io::Error::from_raw_os_error(e as i32)
}

fn nix_pid(pid: u32) -> Result<Pid> {
    i32::try_from(pid)
        .map(Pid::from_raw)
        .map_err(|_| PsError::InvalidArgument(format!("pid {} out of range", pid)))
}

/// Signal-0 probe. EPERM means the process exists but belongs to someone else.
pub fn pid_exists(pid: u32) -> bool {
    if pid == 0 {
        // pid 0 is the scheduler; kill(0, 0) would probe our own group
        return true;
    }
    let Ok(target) = nix_pid(pid) else {
        return false;
    };
    match kill(target, None::<Signal>) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

pub fn send_signal(pid: u32, signal: Signal) -> Result<()> {
    let target = nix_pid(pid)?;
    PidGuard::new(pid).call(|| kill(target, signal).map_err(errno_to_io))
}

pub fn get_nice(pid: u32) -> Result<i32> {
    let guard = PidGuard::new(pid);
    // getpriority can legitimately return -1, so errno is cleared first
    Errno::clear();
    // SAFETY: getpriority only reads kernel state for the given id.
    let value = unsafe { libc::getpriority(libc::PRIO_PROCESS, pid as libc::id_t) };
    if value == -1 {
        let errno = Errno::last();
        if errno != Errno::UnknownErrno {
            return Err(guard.map(errno_to_io(errno)));
        }
    }
    Ok(value)
}

pub fn set_nice(pid: u32, value: i32) -> Result<()> {
    if !(NICE_MIN..=NICE_MAX).contains(&value) {
        return Err(PsError::InvalidArgument(format!(
            "nice expected is an integer between {} and {}, got {}",
            NICE_MIN, NICE_MAX, value
        )));
    }
    // SAFETY: setpriority takes plain integers.
    let rc = unsafe { libc::setpriority(libc::PRIO_PROCESS, pid as libc::id_t, value) };
    if rc != 0 {
        return Err(PidGuard::new(pid).map(io::Error::last_os_error()));
    }
    Ok(())
}

/// I/O scheduling class, see ioprio_set(2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IoClass {
    None,
    RealTime,
    BestEffort,
    Idle,
}

impl IoClass {
    fn code(self) -> i32 {
        match self {
            IoClass::None => 0,
            IoClass::RealTime => 1,
            IoClass::BestEffort => 2,
            IoClass::Idle => 3,
        }
    }

    fn from_code(code: i32) -> Result<Self> {
        match code {
            0 => Ok(IoClass::None),
            1 => Ok(IoClass::RealTime),
            2 => Ok(IoClass::BestEffort),
            3 => Ok(IoClass::Idle),
            other => Err(PsError::InvalidArgument(format!(
                "ioclass argument expected is an integer between 0 and 3, got {}",
                other
            ))),
        }
    }
}

impl fmt::Display for IoClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IoClass::None => "none",
            IoClass::RealTime => "rt",
            IoClass::BestEffort => "be",
            IoClass::Idle => "idle",
        };
        f.write_str(s)
    }
}

impl FromStr for IoClass {
    type Err = PsError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "none" | "0" => Ok(IoClass::None),
            "rt" | "1" => Ok(IoClass::RealTime),
            "be" | "2" => Ok(IoClass::BestEffort),
            "idle" | "3" => Ok(IoClass::Idle),
            other => Err(PsError::InvalidArgument(format!(
                "unsupported ioclass {:?}, only support none, rt, be, idle",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IoNice {
    pub ioclass: IoClass,
    pub value: u8,
}

const IOPRIO_WHO_PROCESS: libc::c_int = 1;
const IOPRIO_CLASS_SHIFT: i32 = 13;
const IOPRIO_PRIO_MASK: i32 = (1 << IOPRIO_CLASS_SHIFT) - 1;

pub fn get_ionice(pid: u32) -> Result<IoNice> {
    // SAFETY: ioprio_get takes two integers and returns an integer.
    let rc = unsafe { libc::syscall(libc::SYS_ioprio_get, IOPRIO_WHO_PROCESS, pid as libc::c_int) };
    if rc < 0 {
        return Err(PidGuard::new(pid).map(io::Error::last_os_error()));
    }
    let rc = rc as i32;
    Ok(IoNice {
        ioclass: IoClass::from_code(rc >> IOPRIO_CLASS_SHIFT)?,
        value: (rc & IOPRIO_PRIO_MASK) as u8,
    })
}

/// Resolves the value to apply for a class: `none` and `idle` take no value,
/// `rt` and `be` default to 4 and accept `0..=7`.
pub fn resolve_ionice(ioclass: IoClass, value: Option<u8>) -> Result<u8> {
    let value = match ioclass {
        IoClass::None | IoClass::Idle => {
            if value.is_some() {
                return Err(PsError::InvalidArgument(format!(
                    "can't specify value with ioclass {}",
                    ioclass
                )));
            }
            0
        }
        IoClass::RealTime | IoClass::BestEffort => value.unwrap_or(4),
    };
    if value > 7 {
        return Err(PsError::InvalidArgument(format!(
            "value argument expected is an integer between 0 and 7, got {}",
            value
        )));
    }
    Ok(value)
}

pub fn set_ionice(pid: u32, ioclass: IoClass, value: Option<u8>) -> Result<()> {
    let value = resolve_ionice(ioclass, value)?;
    let prio = (ioclass.code() << IOPRIO_CLASS_SHIFT) | i32::from(value);
    // SAFETY: ioprio_set takes three integers.
    let rc = unsafe {
        libc::syscall(
            libc::SYS_ioprio_set,
            IOPRIO_WHO_PROCESS,
            pid as libc::c_int,
            prio,
        )
    };
    if rc < 0 {
        return Err(PidGuard::new(pid).map(io::Error::last_os_error()));
    }
    Ok(())
}

/// CPUs the process may run on, ascending.
pub fn get_cpu_affinity(pid: u32) -> Result<Vec<usize>> {
    let target = nix_pid(pid)?;
    let set = PidGuard::new(pid).call(|| sched_getaffinity(target).map_err(errno_to_io))?;
    Ok((0..CpuSet::count())
        .filter(|&cpu| set.is_set(cpu).unwrap_or(false))
        .collect())
}

/// Pins the process to `cpus`; every index must be below `cpu_count`.
pub fn set_cpu_affinity(pid: u32, cpus: &[usize], cpu_count: usize) -> Result<()> {
    if cpus.is_empty() {
        return Err(PsError::InvalidArgument("empty CPU list".to_string()));
    }
    let mut set = CpuSet::new();
    for &cpu in cpus {
        if cpu >= cpu_count {
            return Err(PsError::InvalidArgument(format!(
                "invalid CPU {} (choose between 0 and {})",
                cpu,
                cpu_count.saturating_sub(1)
            )));
        }
        set.set(cpu)
            .map_err(|e| PsError::InvalidArgument(format!("invalid CPU {}: {}", cpu, e)))?;
    }
    let target = nix_pid(pid)?;
    PidGuard::new(pid).call(|| sched_setaffinity(target, &set).map_err(errno_to_io))
}

/// Resources accepted by [`get_rlimit`]/[`set_rlimit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RlimitResource {
    As,
    Core,
    Cpu,
    Data,
    Fsize,
    Locks,
    Memlock,
    Msgqueue,
    Nice,
    Nofile,
    Nproc,
    Rss,
    Rtprio,
    Rttime,
    Sigpending,
    Stack,
}

impl RlimitResource {
    fn raw(self) -> libc::__rlimit_resource_t {
        match self {
            RlimitResource::As => libc::RLIMIT_AS,
            RlimitResource::Core => libc::RLIMIT_CORE,
            RlimitResource::Cpu => libc::RLIMIT_CPU,
            RlimitResource::Data => libc::RLIMIT_DATA,
            RlimitResource::Fsize => libc::RLIMIT_FSIZE,
            RlimitResource::Locks => libc::RLIMIT_LOCKS,
            RlimitResource::Memlock => libc::RLIMIT_MEMLOCK,
            RlimitResource::Msgqueue => libc::RLIMIT_MSGQUEUE,
            RlimitResource::Nice => libc::RLIMIT_NICE,
            RlimitResource::Nofile => libc::RLIMIT_NOFILE,
            RlimitResource::Nproc => libc::RLIMIT_NPROC,
            RlimitResource::Rss => libc::RLIMIT_RSS,
            RlimitResource::Rtprio => libc::RLIMIT_RTPRIO,
            RlimitResource::Rttime => libc::RLIMIT_RTTIME,
            RlimitResource::Sigpending => libc::RLIMIT_SIGPENDING,
            RlimitResource::Stack => libc::RLIMIT_STACK,
        }
    }
}

impl FromStr for RlimitResource {
    type Err = PsError;

    fn from_str(s: &str) -> Result<Self> {
        let r = match s.to_ascii_lowercase().trim_start_matches("rlimit_") {
            "as" => RlimitResource::As,
            "core" => RlimitResource::Core,
            "cpu" => RlimitResource::Cpu,
            "data" => RlimitResource::Data,
            "fsize" => RlimitResource::Fsize,
            "locks" => RlimitResource::Locks,
            "memlock" => RlimitResource::Memlock,
            "msgqueue" => RlimitResource::Msgqueue,
            "nice" => RlimitResource::Nice,
            "nofile" => RlimitResource::Nofile,
            "nproc" => RlimitResource::Nproc,
            "rss" => RlimitResource::Rss,
            "rtprio" => RlimitResource::Rtprio,
            "rttime" => RlimitResource::Rttime,
            "sigpending" => RlimitResource::Sigpending,
            "stack" => RlimitResource::Stack,
            _ => {
                return Err(PsError::InvalidArgument(format!(
                    "unknown rlimit resource {:?}",
                    s
                )))
            }
        };
        Ok(r)
    }
}

/// Soft and hard limit; `None` is unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Rlimit {
    pub soft: Option<u64>,
    pub hard: Option<u64>,
}

fn from_rlim(v: libc::rlim_t) -> Option<u64> {
    if v == libc::RLIM_INFINITY {
        None
    } else {
        Some(v as u64)
    }
}

fn to_rlim(v: Option<u64>) -> libc::rlim_t {
    v.map_or(libc::RLIM_INFINITY, |v| v as libc::rlim_t)
}

fn reject_pid_zero(pid: u32) -> Result<()> {
    if pid == 0 {
        return Err(PsError::InvalidArgument(
            "can't use prlimit() against PID 0 process".to_string(),
        ));
    }
    Ok(())
}

pub fn get_rlimit(pid: u32, resource: RlimitResource) -> Result<Rlimit> {
    reject_pid_zero(pid)?;
    let mut old = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: `old` is a valid out-pointer; no new limit is passed.
    let rc = unsafe {
        libc::prlimit(
            pid as libc::pid_t,
            resource.raw(),
            std::ptr::null(),
            &mut old,
        )
    };
    if rc != 0 {
        return Err(PidGuard::new(pid).map(io::Error::last_os_error()));
    }
    Ok(Rlimit {
        soft: from_rlim(old.rlim_cur),
        hard: from_rlim(old.rlim_max),
    })
}

pub fn set_rlimit(pid: u32, resource: RlimitResource, limit: Rlimit) -> Result<()> {
    reject_pid_zero(pid)?;
    let new = libc::rlimit {
        rlim_cur: to_rlim(limit.soft),
        rlim_max: to_rlim(limit.hard),
    };
    // SAFETY: `new` outlives the call; the old value is not requested.
    let rc = unsafe {
        libc::prlimit(
            pid as libc::pid_t,
            resource.raw(),
            &new,
            std::ptr::null_mut(),
        )
    };
    if rc != 0 {
        return Err(PidGuard::new(pid).map(io::Error::last_os_error()));
    }
    Ok(())
}

const WAIT_MAX_DELAY: Duration = Duration::from_millis(40);

/// Waits for `pid` to exit.
///
/// A child of the caller is reaped and its exit code (or negated signal
/// number) returned. Any other process is polled with the signal-0 probe,
/// backing off up to 40ms between probes, and yields `None`. Exceeding
/// `timeout` is `PsError::Timeout`.
pub fn wait_pid(pid: u32, timeout: Option<Duration>) -> Result<Option<i32>> {
    let target = nix_pid(pid)?;
    let start = Instant::now();
    let mut delay = Duration::from_micros(100);

    loop {
        match waitpid(target, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::Exited(_, code)) => return Ok(Some(code)),
            Ok(WaitStatus::Signaled(_, signal, _)) => return Ok(Some(-(signal as i32))),
            Ok(_) => {}
            Err(Errno::ECHILD) => {
                if !pid_exists(pid) {
                    return Ok(None);
                }
            }
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(PidGuard::new(pid).map(errno_to_io(e))),
        }

        if let Some(timeout) = timeout {
            let elapsed = start.elapsed();
            if elapsed >= timeout {
                debug!("Timed out waiting for pid {}", pid);
                return Err(PsError::Timeout {
                    pid,
                    seconds: timeout.as_secs_f64(),
                });
            }
            delay = delay.min(timeout - elapsed);
        }
        thread::sleep(delay);
        delay = (delay * 2).min(WAIT_MAX_DELAY);
    }
}

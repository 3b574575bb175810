//! Exporting a chosen set of process attributes as one record.
//!
//! [`ProcessAttr`] is the closed list of exportable fields. Reading a field
//! the caller may not see leaves it empty, or copies it from a defaults
//! record, instead of failing the whole export.

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{PsError, Result};
use crate::net::{ConnectionKind, ConnectionRecord};
use crate::process::control::IoNice;
use crate::process::handle::ProcessHandle;
use crate::process::linux::{CtxSwitches, Ids, IoCounters, OpenFile, ProcessCpuTimes, ThreadTimes};
use crate::process::memory::{MemoryFullInfo, MemoryInfo, MemoryInfoEx};

macro_rules! process_attrs {
    ($($variant:ident => $name:literal),+ $(,)?) => {
        /// Fields that [`ProcessHandle::info`] can export.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
        #[serde(rename_all = "snake_case")]
        pub enum ProcessAttr {
            $($variant),+
        }

        impl ProcessAttr {
            pub const ALL: &'static [ProcessAttr] = &[$(ProcessAttr::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(ProcessAttr::$variant => $name),+
                }
            }
        }
    };
}

process_attrs! {
    Pid => "pid",
    Ppid => "ppid",
    Name => "name",
    Exe => "exe",
    Cmdline => "cmdline",
    Status => "status",
    Username => "username",
    CreateTime => "create_time",
    CpuTimes => "cpu_times",
    CpuPercent => "cpu_percent",
    MemoryInfo => "memory_info",
    MemoryInfoEx => "memory_info_ex",
    MemoryFullInfo => "memory_full_info",
    MemoryPercent => "memory_percent",
    Cwd => "cwd",
    Nice => "nice",
    Ionice => "ionice",
    CpuAffinity => "cpu_affinity",
    Uids => "uids",
    Gids => "gids",
    Terminal => "terminal",
    NumFds => "num_fds",
    NumThreads => "num_threads",
    NumCtxSwitches => "num_ctx_switches",
    Threads => "threads",
    IoCounters => "io_counters",
    OpenFiles => "open_files",
    Connections => "connections",
}

impl fmt::Display for ProcessAttr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessAttr {
    type Err = PsError;

    fn from_str(s: &str) -> Result<Self> {
        ProcessAttr::ALL
            .iter()
            .copied()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| PsError::InvalidArgument(format!("unknown process attribute {:?}", s)))
    }
}

/// Parses a comma separated attribute list such as `"pid,name,cpu_percent"`.
pub fn parse_attr_list(list: &str) -> Result<Vec<ProcessAttr>> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse)
        .collect()
}

/// Exported attributes; a field is `None` when not requested or not readable.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProcessInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ppid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exe: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cmdline: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub create_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_times: Option<ProcessCpuTimes>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_percent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_info: Option<MemoryInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_info_ex: Option<MemoryInfoEx>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_full_info: Option<MemoryFullInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_percent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nice: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ionice: Option<IoNice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_affinity: Option<Vec<usize>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uids: Option<Ids>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gids: Option<Ids>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminal: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_fds: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_threads: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_ctx_switches: Option<CtxSwitches>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threads: Option<Vec<ThreadTimes>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub io_counters: Option<IoCounters>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open_files: Option<Vec<OpenFile>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connections: Option<Vec<ConnectionRecord>>,
}

impl ProcessInfo {
    /// Copies one field from `other`.
    fn copy_field(&mut self, attr: ProcessAttr, other: &ProcessInfo) {
        match attr {
            ProcessAttr::Pid => self.pid = other.pid,
            ProcessAttr::Ppid => self.ppid = other.ppid,
            ProcessAttr::Name => self.name = other.name.clone(),
            ProcessAttr::Exe => self.exe = other.exe.clone(),
            ProcessAttr::Cmdline => self.cmdline = other.cmdline.clone(),
            ProcessAttr::Status => self.status = other.status.clone(),
            ProcessAttr::Username => self.username = other.username.clone(),
            ProcessAttr::CreateTime => self.create_time = other.create_time,
            ProcessAttr::CpuTimes => self.cpu_times = other.cpu_times,
            ProcessAttr::CpuPercent => self.cpu_percent = other.cpu_percent,
            ProcessAttr::MemoryInfo => self.memory_info = other.memory_info,
            ProcessAttr::MemoryInfoEx => self.memory_info_ex = other.memory_info_ex,
            ProcessAttr::MemoryFullInfo => self.memory_full_info = other.memory_full_info,
            ProcessAttr::MemoryPercent => self.memory_percent = other.memory_percent,
            ProcessAttr::Cwd => self.cwd = other.cwd.clone(),
            ProcessAttr::Nice => self.nice = other.nice,
            ProcessAttr::Ionice => self.ionice = other.ionice,
            ProcessAttr::CpuAffinity => self.cpu_affinity = other.cpu_affinity.clone(),
            ProcessAttr::Uids => self.uids = other.uids,
            ProcessAttr::Gids => self.gids = other.gids,
            ProcessAttr::Terminal => self.terminal = other.terminal.clone(),
            ProcessAttr::NumFds => self.num_fds = other.num_fds,
            ProcessAttr::NumThreads => self.num_threads = other.num_threads,
            ProcessAttr::NumCtxSwitches => self.num_ctx_switches = other.num_ctx_switches,
            ProcessAttr::Threads => self.threads = other.threads.clone(),
            ProcessAttr::IoCounters => self.io_counters = other.io_counters,
            ProcessAttr::OpenFiles => self.open_files = other.open_files.clone(),
            ProcessAttr::Connections => self.connections = other.connections.clone(),
        }
    }
}

impl ProcessHandle {
    /// Reads the attributes in `attrs` (all of them when `None`).
    ///
    /// - `AccessDenied` on a field leaves it `None`, or takes it from `defaults`;
    /// - `NotImplemented` fails the call only if the field was asked for
    ///   explicitly, otherwise the field is left out;
    /// - `NoSuchProcess` and other errors are returned.
    ///
    /// `cpu_percent` is read non-blocking, so the first export reports `0.0`.
    pub fn info(
        &self,
        attrs: Option<&[ProcessAttr]>,
        defaults: Option<&ProcessInfo>,
    ) -> Result<ProcessInfo> {
        let explicit = attrs.is_some();
        let attrs = attrs.unwrap_or(ProcessAttr::ALL);
        let mut info = ProcessInfo::default();

        for &attr in attrs {
            match self.read_attr(attr, &mut info) {
                Ok(()) => {}
                Err(PsError::AccessDenied { .. }) => {
                    if let Some(defaults) = defaults {
                        info.copy_field(attr, defaults);
                    }
                }
                Err(e @ PsError::NotImplemented(_)) => {
                    if explicit {
                        return Err(e);
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Ok(info)
    }

    fn read_attr(&self, attr: ProcessAttr, info: &mut ProcessInfo) -> Result<()> {
        match attr {
            ProcessAttr::Pid => info.pid = Some(self.pid()),
            ProcessAttr::Ppid => info.ppid = Some(self.ppid()?),
            ProcessAttr::Name => info.name = Some(self.name()?),
            ProcessAttr::Exe => info.exe = Some(self.exe()?),
            ProcessAttr::Cmdline => info.cmdline = Some(self.cmdline()?),
            ProcessAttr::Status => info.status = Some(self.status()?.to_string()),
            ProcessAttr::Username => info.username = Some(self.username()?),
            ProcessAttr::CreateTime => info.create_time = Some(self.create_time()),
            ProcessAttr::CpuTimes => info.cpu_times = Some(self.cpu_times()?),
            ProcessAttr::CpuPercent => info.cpu_percent = Some(self.cpu_percent(0.0)?),
            ProcessAttr::MemoryInfo => info.memory_info = Some(self.memory_info()?),
            ProcessAttr::MemoryInfoEx => info.memory_info_ex = Some(self.memory_info_ex()?),
            ProcessAttr::MemoryFullInfo => info.memory_full_info = Some(self.memory_full_info()?),
            ProcessAttr::MemoryPercent => info.memory_percent = Some(self.memory_percent()?),
            ProcessAttr::Cwd => info.cwd = Some(self.cwd()?),
            ProcessAttr::Nice => info.nice = Some(self.nice()?),
            ProcessAttr::Ionice => info.ionice = Some(self.ionice()?),
            ProcessAttr::CpuAffinity => info.cpu_affinity = Some(self.cpu_affinity()?),
            ProcessAttr::Uids => info.uids = Some(self.uids()?),
            ProcessAttr::Gids => info.gids = Some(self.gids()?),
            ProcessAttr::Terminal => info.terminal = self.terminal()?,
            ProcessAttr::NumFds => info.num_fds = Some(self.num_fds()?),
            ProcessAttr::NumThreads => info.num_threads = Some(self.num_threads()?),
            ProcessAttr::NumCtxSwitches => info.num_ctx_switches = Some(self.num_ctx_switches()?),
            ProcessAttr::Threads => info.threads = Some(self.threads()?),
            ProcessAttr::IoCounters => info.io_counters = Some(self.io_counters()?),
            ProcessAttr::OpenFiles => info.open_files = Some(self.open_files()?),
            ProcessAttr::Connections => {
                info.connections = Some(self.connections(ConnectionKind::Inet)?)
            }
        }
        Ok(())
    }
}

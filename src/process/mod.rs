//! Per-process introspection and control.
//!
//! - `identity`: `(pid, create_time)` pairs that survive pid reuse
//! - `linux`: raw readers over `/proc/<pid>/*`
//! - `memory`: statm and smaps parsing
//! - `sampler`: per-process CPU percent
//! - `control`: signals, priorities, affinity, limits and waiting
//! - `handle`: the `ProcessHandle` tying these together
//! - `registry`: cached handles for iterating the process table
//! - `info`: exporting a chosen set of attributes

pub mod control;
pub mod handle;
pub mod identity;
pub mod info;
pub mod linux;
pub mod memory;
pub mod registry;
pub mod sampler;

pub use control::{pid_exists, IoClass, IoNice, Rlimit, RlimitResource};
pub use handle::ProcessHandle;
pub use identity::ProcessIdentity;
pub use info::{parse_attr_list, ProcessAttr, ProcessInfo};
pub use linux::{
    CtxSwitches, Ids, IoCounters, OpenFile, ProcessCpuTimes, ProcessStatus, ThreadTimes,
};
pub use memory::{GroupedMemoryMap, MapCounters, MemoryFullInfo, MemoryInfo, MemoryInfoEx, MemoryMap};
pub use registry::ProcessRegistry;
pub use sampler::ProcessCpuSampler;

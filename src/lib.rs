//! Herakles Process Inspector Library
//!
//! This library exposes live Linux process, CPU, memory and socket state as
//! typed values read from the /proc filesystem. Process handles keep their
//! identity across PID reuse, socket inodes are attributed to the processes
//! holding them, and CPU utilization is computed from counter snapshots.
//!
//! # Features
//!
//! - **Process identity**: `(pid, create_time)` pairs that detect PID reuse
//! - **Process registry**: cached handles refreshed by diffing the pid set
//! - **Connections**: TCP/UDP/Unix sockets with their owning `(pid, fd)`
//! - **CPU percent**: system-wide, per-core and per-process utilization
//! - **Rooted reads**: every reader can point at a fabricated proc tree
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use herakles_proc_inspect::{ConnectionKind, ProcSession, ProcessRegistry};
//!
//! let session = Arc::new(ProcSession::new("/proc"));
//! let registry = ProcessRegistry::new(Arc::clone(&session));
//!
//! for handle in registry.refresh()? {
//!     let name = handle.name().unwrap_or_default();
//!     let cpu = handle.cpu_percent(0.0).unwrap_or(0.0);
//!     println!("{} {} {:.1}%", handle.pid(), name, cpu);
//! }
//!
//! let me = registry.get(std::process::id()).expect("own pid is listed");
//! for conn in me.connections(ConnectionKind::Tcp)? {
//!     println!("{:?} -> {:?} {}", conn.local, conn.remote, conn.status);
//! }
//! # Ok::<(), herakles_proc_inspect::PsError>(())
//! ```

pub mod cpu;
pub mod error;
pub mod net;
pub mod process;
pub mod procfs;
pub mod session;
pub mod system;

// Re-export main types for convenience
pub use cpu::{CpuSampleStore, CpuSnapshot, CpuTimesPercent};
pub use error::{PidGuard, PsError, Result};
pub use net::{
    decode_address, AddressFamily, ConnectionEnumerator, ConnectionKind, ConnectionRecord,
    ConnectionStatus, InodeIndex, SocketAddress, SocketType,
};
pub use process::{
    pid_exists, ProcessAttr, ProcessHandle, ProcessIdentity, ProcessInfo, ProcessRegistry,
    ProcessStatus,
};
pub use procfs::ProcFs;
pub use session::ProcSession;

//! Runtime requirement validation for herakles-proc-inspect.
//!
//! This module validates that the proc filesystem is readable and reports
//! which optional kernel sources are present.

use nix::unistd::geteuid;
use std::io;
use tracing::{debug, error, info, warn};

use herakles_proc_inspect::error::is_permission_denied;
use herakles_proc_inspect::ProcFs;

/// Validate the proc filesystem behind `procfs`.
pub fn validate_requirements(procfs: &ProcFs) -> Result<(), ValidationError> {
    info!("🔍 Validating runtime requirements...");

    check_user_privileges();
    check_proc_mounted(procfs)?;
    check_proc_access(procfs)?;

    info!("✅ All runtime requirements validated");
    Ok(())
}

/// Check if running with sufficient privileges
fn check_user_privileges() {
    if !geteuid().is_root() {
        warn!("⚠️  Not running as root - fields of other users' processes may be denied");
    } else {
        info!("✅ Running as root (uid=0)");
    }
}

/// The proc root must list processes and carry /proc/stat.
fn check_proc_mounted(procfs: &ProcFs) -> Result<(), ValidationError> {
    let root = procfs.root().display().to_string();
    match procfs.pids() {
        Ok(pids) if !pids.is_empty() => {
            debug!("{} lists {} processes", root, pids.len());
        }
        Ok(_) => return Err(ValidationError::ProcNotMounted(root)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            error!("❌ {} not found - proc filesystem not mounted", root);
            return Err(ValidationError::ProcNotMounted(root));
        }
        Err(e) => return Err(ValidationError::ProcUnreadable(e.to_string())),
    }

    if !procfs.exists("stat") {
        return Err(ValidationError::MissingSource(format!("{}/stat", root)));
    }
    Ok(())
}

/// Check whether the fd table of pid 1 can be read.
fn check_proc_access(procfs: &ProcFs) -> Result<(), ValidationError> {
    match procfs.fd_targets(1) {
        Ok(_) => {
            info!("✅ /proc access: can read descriptors of all processes");
            Ok(())
        }
        Err(e) if is_permission_denied(&e) => {
            warn!("⚠️  Cannot read descriptors of pid 1 - sockets of other users stay unowned");
            warn!("   Solution: run as root or grant cap_dac_read_search,cap_sys_ptrace");
            Ok(())
        }
        Err(e) => {
            warn!("⚠️  Could not test /proc access: {}", e);
            Ok(())
        }
    }
}

/// Optional per-kernel sources, with whether each one is present.
pub fn optional_sources(procfs: &ProcFs) -> Vec<(&'static str, bool)> {
    let self_pid = std::process::id();
    let pid_source = |name: &str| procfs.exists(procfs.pid_path(self_pid).join(name));
    vec![
        ("smaps_rollup", pid_source("smaps_rollup")),
        ("smaps", pid_source("smaps")),
        ("io", pid_source("io")),
        ("net/tcp", procfs.exists("net/tcp")),
        ("net/tcp6", procfs.exists("net/tcp6")),
        ("net/udp", procfs.exists("net/udp")),
        ("net/udp6", procfs.exists("net/udp6")),
        ("net/unix", procfs.exists("net/unix")),
    ]
}

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("proc filesystem not mounted at {0}")]
    ProcNotMounted(String),

    #[error("proc filesystem not readable: {0}")]
    ProcUnreadable(String),

    #[error("required kernel source missing: {0}")]
    MissingSource(String),
}

//! Socket inode → owning `(pid, fd)` index.

use ahash::AHashMap as HashMap;
use std::io;
use tracing::debug;

use crate::error::{is_not_found, is_permission_denied, PidGuard, Result};
use crate::procfs::ProcFs;

/// One open descriptor referring to a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SocketOwner {
    pub pid: u32,
    pub fd: i32,
}

/// Inode → owners, rebuilt on every query.
///
/// An inode shared between processes (inherited or passed descriptors) keeps
/// every owner, in pid-scan order.
#[derive(Debug, Clone, Default)]
pub struct InodeIndex {
    owners: HashMap<u64, Vec<SocketOwner>>,
}

/// Extracts the inode from a `socket:[12345]` readlink target.
pub fn parse_socket_inode(target: &str) -> Option<u64> {
    target
        .strip_prefix("socket:[")?
        .strip_suffix(']')?
        .parse()
        .ok()
}

impl InodeIndex {
    /// Scans every pid. Processes that vanish or deny access are skipped.
    pub fn build(procfs: &ProcFs) -> Result<Self> {
        let mut index = Self::default();
        let mut skipped = 0usize;

        for pid in procfs.pids()? {
            match scan_pid(procfs, pid) {
                Ok(owners) => index.merge(owners),
                Err(e) if is_not_found(&e) || is_permission_denied(&e) => {
                    skipped += 1;
                }
                Err(e) => {
                    debug!("Skipping fds of pid {}: {}", pid, e);
                    skipped += 1;
                }
            }
        }

        debug!(
            "Inode index built: {} socket inodes, {} pids skipped",
            index.owners.len(),
            skipped
        );
        Ok(index)
    }

    /// Scans a single pid; failures are mapped and returned.
    pub fn for_pid(procfs: &ProcFs, pid: u32) -> Result<Self> {
        let owners = PidGuard::new(pid).call(|| scan_pid(procfs, pid))?;
        let mut index = Self::default();
        index.merge(owners);
        Ok(index)
    }

    /// Scans a single pid, yielding an empty index when it cannot be read.
    pub fn for_pid_lossy(procfs: &ProcFs, pid: u32) -> Self {
        match Self::for_pid(procfs, pid) {
            Ok(index) => index,
            Err(e) => {
                debug!("Cannot index sockets of pid {}: {}", pid, e);
                Self::default()
            }
        }
    }

    fn merge(&mut self, owners: Vec<(u64, SocketOwner)>) {
        for (inode, owner) in owners {
            self.owners.entry(inode).or_default().push(owner);
        }
    }

    pub fn owners(&self, inode: u64) -> Option<&[SocketOwner]> {
        self.owners.get(&inode).map(Vec::as_slice)
    }

    pub fn contains(&self, inode: u64) -> bool {
        self.owners.contains_key(&inode)
    }

    /// Number of distinct socket inodes.
    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}

fn scan_pid(procfs: &ProcFs, pid: u32) -> io::Result<Vec<(u64, SocketOwner)>> {
    Ok(procfs
        .fd_targets(pid)?
        .into_iter()
        .filter_map(|t| {
            let inode = parse_socket_inode(t.target.to_str()?)?;
            Some((inode, SocketOwner { pid, fd: t.fd }))
        })
        .collect())
}

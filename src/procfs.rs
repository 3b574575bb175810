//! Thin reader over the proc filesystem.
//!
//! `ProcFs` knows where the proc root is mounted and how to tokenize the
//! pseudo-files below it. It performs no interpretation; all failures are
//! returned as `std::io::Error` so callers can tell "not found" from
//! "permission denied". Every file is opened, read fully and closed within
//! one call.

use ahash::AHashMap as HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Default mount point of the proc filesystem.
pub const DEFAULT_PROC_ROOT: &str = "/proc";

/// A readlink target of one open file descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FdTarget {
    pub fd: i32,
    pub target: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ProcFs {
    root: PathBuf,
}

impl Default for ProcFs {
    fn default() -> Self {
        Self::new(DEFAULT_PROC_ROOT)
    }
}

impl ProcFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path of a file below the proc root, e.g. `path("net/tcp")`.
    pub fn path(&self, rel: impl AsRef<Path>) -> PathBuf {
        self.root.join(rel)
    }

    /// Directory of a single process.
    pub fn pid_path(&self, pid: u32) -> PathBuf {
        self.root.join(pid.to_string())
    }

    pub fn exists(&self, rel: impl AsRef<Path>) -> bool {
        self.path(rel).exists()
    }

    pub fn read_string(&self, rel: impl AsRef<Path>) -> io::Result<String> {
        fs::read_to_string(self.path(rel))
    }

    pub fn read_bytes(&self, rel: impl AsRef<Path>) -> io::Result<Vec<u8>> {
        fs::read(self.path(rel))
    }

    /// Reads a file and returns its lines.
    pub fn read_lines(&self, rel: impl AsRef<Path>) -> io::Result<Vec<String>> {
        let content = self.read_string(rel)?;
        Ok(content.lines().map(str::to_string).collect())
    }

    /// Reads a file and splits every line into whitespace-delimited fields.
    pub fn read_fields(&self, rel: impl AsRef<Path>) -> io::Result<Vec<Vec<String>>> {
        let content = self.read_string(rel)?;
        Ok(content
            .lines()
            .map(|l| l.split_whitespace().map(str::to_string).collect())
            .collect())
    }

    /// Reads a `Key:   value` style file (status, meminfo, io).
    ///
    /// The value is the trimmed remainder after the first colon.
    pub fn read_key_values(&self, rel: impl AsRef<Path>) -> io::Result<HashMap<String, String>> {
        let content = self.read_string(rel)?;
        Ok(parse_key_values(&content))
    }

    pub fn read_link(&self, rel: impl AsRef<Path>) -> io::Result<PathBuf> {
        fs::read_link(self.path(rel))
    }

    /// Lists numeric entries of the proc root.
    pub fn pids(&self) -> io::Result<Vec<u32>> {
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.root)?.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if name.is_empty() || !name.chars().all(|c| c.is_ascii_digit()) {
                continue;
            }
            if let Ok(pid) = name.parse::<u32>() {
                out.push(pid);
            }
        }
        out.sort_unstable();
        Ok(out)
    }

    /// Lists entry names of a directory below the proc root.
    pub fn read_dir_names(&self, rel: impl AsRef<Path>) -> io::Result<Vec<String>> {
        let mut names: Vec<String> = fs::read_dir(self.path(rel))?
            .flatten()
            .filter_map(|e| e.file_name().to_str().map(str::to_string))
            .collect();
        names.sort();
        Ok(names)
    }

    /// Resolves every `/proc/<pid>/fd/*` symlink.
    ///
    /// Failing to list the directory is returned to the caller. A descriptor
    /// closed between listing and readlink is skipped.
    pub fn fd_targets(&self, pid: u32) -> io::Result<Vec<FdTarget>> {
        let dir = self.pid_path(pid).join("fd");
        let mut out = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(fd) = name.to_str().and_then(|s| s.parse::<i32>().ok()) else {
                continue;
            };
            match fs::read_link(entry.path()) {
                Ok(target) => out.push(FdTarget { fd, target }),
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            }
        }
        out.sort_by_key(|t| t.fd);
        Ok(out)
    }
}

/// Splits `Key: value` lines into a map; lines without a colon are ignored.
pub fn parse_key_values(content: &str) -> HashMap<String, String> {
    content
        .lines()
        .filter_map(|line| {
            let (key, value) = line.split_once(':')?;
            Some((key.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

//! Error taxonomy for process introspection.
//!
//! Every per-process accessor funnels low-level `std::io::Error`s through
//! [`PidGuard`], which maps "not found" conditions to [`PsError::NoSuchProcess`]
//! and permission failures to [`PsError::AccessDenied`]. Anything else is kept
//! as an I/O error.

use std::io;

/// Result alias used throughout the crate.
pub type Result<T, E = PsError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum PsError {
    /// The pid no longer names a live process.
    #[error("process no longer exists {}", describe_pid(.pid, .name))]
    NoSuchProcess { pid: u32, name: Option<String> },

    /// The caller may not read the requested field.
    #[error("access is denied {}", describe(.pid, .name))]
    AccessDenied {
        pid: Option<u32>,
        name: Option<String>,
    },

    /// The kernel source for a field is absent or in an unsupported format.
    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("timeout after {seconds}s waiting for pid {pid}")]
    Timeout { pid: u32, seconds: f64 },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

fn describe_pid(pid: &u32, name: &Option<String>) -> String {
    describe(&Some(*pid), name)
}

fn describe(pid: &Option<u32>, name: &Option<String>) -> String {
    match (pid, name) {
        (Some(pid), Some(name)) => format!("(pid={}, name={})", pid, name),
        (Some(pid), None) => format!("(pid={})", pid),
        _ => String::new(),
    }
}

impl PsError {
    pub fn no_such_process(pid: u32) -> Self {
        PsError::NoSuchProcess { pid, name: None }
    }

    pub fn access_denied(pid: u32) -> Self {
        PsError::AccessDenied {
            pid: Some(pid),
            name: None,
        }
    }

    pub fn is_no_such_process(&self) -> bool {
        matches!(self, PsError::NoSuchProcess { .. })
    }

    pub fn is_access_denied(&self) -> bool {
        matches!(self, PsError::AccessDenied { .. })
    }
}

/// Returns true for errors meaning "the file (or the process behind it) is gone".
pub fn is_not_found(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::NotFound || err.raw_os_error() == Some(libc::ESRCH)
}

/// Returns true for permission failures (EACCES and EPERM).
pub fn is_permission_denied(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::PermissionDenied || err.raw_os_error() == Some(libc::EPERM)
}

/// Adapter applied at the boundary of every per-pid accessor.
#[derive(Debug, Clone, Copy)]
pub struct PidGuard<'a> {
    pub pid: u32,
    pub name: Option<&'a str>,
}

impl<'a> PidGuard<'a> {
    pub fn new(pid: u32) -> Self {
        Self { pid, name: None }
    }

    pub fn with_name(pid: u32, name: Option<&'a str>) -> Self {
        Self { pid, name }
    }

    /// Translate an OS-level error into the taxonomy.
    pub fn map(&self, err: io::Error) -> PsError {
        if is_not_found(&err) {
            PsError::NoSuchProcess {
                pid: self.pid,
                name: self.name.map(str::to_string),
            }
        } else if is_permission_denied(&err) {
            PsError::AccessDenied {
                pid: Some(self.pid),
                name: self.name.map(str::to_string),
            }
        } else {
            PsError::Io(err)
        }
    }

    /// Run an OS-facing call and map its failure.
    pub fn call<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> io::Result<T>,
    {
        f().map_err(|e| self.map(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_such_process_message() {
        let err = PsError::NoSuchProcess {
            pid: 3000,
            name: Some("nginx".into()),
        };
        assert_eq!(
            err.to_string(),
            "process no longer exists (pid=3000, name=nginx)"
        );
        assert_eq!(
            PsError::no_such_process(3000).to_string(),
            "process no longer exists (pid=3000)"
        );
    }

    #[test]
    fn test_access_denied_message() {
        let err = PsError::AccessDenied {
            pid: Some(3000),
            name: Some("nginx".into()),
        };
        assert_eq!(err.to_string(), "access is denied (pid=3000, name=nginx)");

        let err = PsError::AccessDenied {
            pid: None,
            name: None,
        };
        assert_eq!(err.to_string(), "access is denied ");
    }

    #[test]
    fn test_guard_maps_not_found() {
        let guard = PidGuard::with_name(42, Some("sshd"));
        let err = guard.map(io::Error::from(io::ErrorKind::NotFound));
        match err {
            PsError::NoSuchProcess { pid, name } => {
                assert_eq!(pid, 42);
                assert_eq!(name.as_deref(), Some("sshd"));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let err = guard.map(io::Error::from_raw_os_error(libc::ESRCH));
        assert!(err.is_no_such_process());
    }

    #[test]
    fn test_guard_maps_permission() {
        let guard = PidGuard::new(1);
        assert!(guard
            .map(io::Error::from(io::ErrorKind::PermissionDenied))
            .is_access_denied());
        assert!(guard
            .map(io::Error::from_raw_os_error(libc::EPERM))
            .is_access_denied());
    }

    #[test]
    fn test_guard_keeps_other_errors() {
        let guard = PidGuard::new(1);
        let err = guard.map(io::Error::other("boom"));
        assert!(matches!(err, PsError::Io(_)));
    }

    #[test]
    fn test_guard_call() {
        let guard = PidGuard::new(7);
        let ok: Result<u32> = guard.call(|| Ok(5));
        assert_eq!(ok.unwrap(), 5);

        let err: Result<u32> = guard.call(|| Err(io::Error::from(io::ErrorKind::NotFound)));
        assert!(err.unwrap_err().is_no_such_process());
    }
}

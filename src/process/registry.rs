//! Cache of live process handles, refreshed by diffing pid sets.
//!
//! Repeated refreshes hand back the same `Arc<ProcessHandle>` for a process
//! as long as its identity holds, so callers can keep per-handle state (like
//! the CPU sampler) across polling intervals.

use ahash::AHashMap as HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::error::{PsError, Result};
use crate::process::handle::ProcessHandle;
use crate::session::ProcSession;

#[derive(Debug)]
pub struct ProcessRegistry {
    session: Arc<ProcSession>,
    entries: Mutex<HashMap<u32, Arc<ProcessHandle>>>,
}

impl ProcessRegistry {
    pub fn new(session: Arc<ProcSession>) -> Self {
        Self {
            session,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn session(&self) -> &Arc<ProcSession> {
        &self.session
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u32, Arc<ProcessHandle>>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Brings the cache in line with the current process table and returns
    /// every live handle, sorted by pid.
    ///
    /// - pids no longer listed are dropped;
    /// - a cached handle that still passes `is_running` is kept as is;
    /// - otherwise a fresh handle is built. A pid that vanished meanwhile is
    ///   skipped; one whose identity cannot be read is evicted.
    pub fn refresh(&self) -> Result<Vec<Arc<ProcessHandle>>> {
        let current = self.session.procfs().pids()?;
        let mut entries = self.lock();

        let before = entries.len();
        // pids() is sorted
        entries.retain(|pid, _| current.binary_search(pid).is_ok());
        let dropped = before - entries.len();

        let mut created = 0usize;
        for &pid in &current {
            if let Some(cached) = entries.get(&pid) {
                if cached.is_running() {
                    continue;
                }
            }
            match ProcessHandle::new(Arc::clone(&self.session), pid) {
                Ok(handle) => {
                    entries.insert(pid, Arc::new(handle));
                    created += 1;
                }
                Err(PsError::NoSuchProcess { .. }) => {
                    entries.remove(&pid);
                }
                Err(PsError::AccessDenied { .. }) => {
                    debug!("Cannot verify identity of pid {}, evicting", pid);
                    entries.remove(&pid);
                }
                Err(e) => {
                    warn!("Failed to inspect pid {}: {}", pid, e);
                    entries.remove(&pid);
                }
            }
        }

        debug!(
            "Registry refreshed: {} live, {} new, {} dropped",
            entries.len(),
            created,
            dropped
        );

        let mut handles: Vec<Arc<ProcessHandle>> = entries.values().cloned().collect();
        handles.sort_by_key(|h| h.pid());
        Ok(handles)
    }

    /// Cached handle for `pid`, without touching the kernel.
    pub fn get(&self, pid: u32) -> Option<Arc<ProcessHandle>> {
        self.lock().get(&pid).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Forgets every cached handle.
    pub fn clear(&self) {
        self.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;
    use tempfile::tempdir;

    fn fake_proc(root: &Path, pid: u32, starttime: u64) {
        let dir = root.join(pid.to_string());
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("stat"),
            format!("{pid} (p{pid}) S 1 1 1 0 -1 0 0 0 0 0 1 1 0 0 20 0 1 0 {starttime} 1 1\n"),
        )
        .unwrap();
    }

    fn setup(root: &Path) -> ProcessRegistry {
        fs::write(root.join("stat"), "cpu  1 1 1 1\nbtime 100\n").unwrap();
        let session = ProcSession::new(root).with_clock_ticks(100.0);
        ProcessRegistry::new(Arc::new(session))
    }

    #[test]
    fn test_refresh_reuses_handles() {
        let dir = tempdir().expect("Failed to create temp dir");
        fake_proc(dir.path(), 5, 10);
        fake_proc(dir.path(), 3, 10);
        let registry = setup(dir.path());

        let first = registry.refresh().unwrap();
        assert_eq!(first.iter().map(|h| h.pid()).collect::<Vec<_>>(), vec![3, 5]);

        let second = registry.refresh().unwrap();
        assert!(Arc::ptr_eq(&first[0], &second[0]));
        assert!(Arc::ptr_eq(&first[1], &second[1]));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_refresh_drops_exited_and_replaces_reused() {
        let dir = tempdir().expect("Failed to create temp dir");
        fake_proc(dir.path(), 5, 10);
        fake_proc(dir.path(), 6, 10);
        let registry = setup(dir.path());
        let first = registry.refresh().unwrap();
        let old_six = Arc::clone(&first[1]);

        fs::remove_dir_all(dir.path().join("5")).unwrap();
        fs::remove_dir_all(dir.path().join("6")).unwrap();
        fake_proc(dir.path(), 6, 99);

        let second = registry.refresh().unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].pid(), 6);
        assert!(!Arc::ptr_eq(&old_six, &second[0]));
        assert_ne!(*old_six, *second[0]);
        assert!(registry.get(5).is_none());
        assert!(!first[0].is_running());
        assert!(!first[0].is_running());
    }

    #[test]
    fn test_clear() {
        let dir = tempdir().expect("Failed to create temp dir");
        fake_proc(dir.path(), 7, 1);
        let registry = setup(dir.path());
        registry.refresh().unwrap();
        assert!(!registry.is_empty());
        registry.clear();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_missing_proc_root() {
        let registry = ProcessRegistry::new(Arc::new(ProcSession::new("/nonexistent/proc")));
        assert!(matches!(registry.refresh(), Err(PsError::Io(_))));
    }
}

//! Process identity across PID reuse.

use serde::Serialize;
use std::fmt;
use std::hash::{Hash, Hasher};

/// `(pid, create_time)`: names one process instance.
///
/// A pid alone can be recycled by the kernel; the creation time tells two
/// holders of the same pid apart. Equality is exact, including the float.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ProcessIdentity {
    pub pid: u32,
    pub create_time: f64,
}

impl ProcessIdentity {
    pub fn new(pid: u32, create_time: f64) -> Self {
        Self { pid, create_time }
    }
}

impl PartialEq for ProcessIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.pid == other.pid && self.create_time.to_bits() == other.create_time.to_bits()
    }
}

impl Eq for ProcessIdentity {}

impl Hash for ProcessIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.pid.hash(state);
        self.create_time.to_bits().hash(state);
    }
}

impl fmt::Display for ProcessIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{:.2}", self.pid, self.create_time)
    }
}

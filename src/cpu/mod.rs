//! System-wide CPU times and utilization.
//!
//! - `times`: snapshot parsing from /proc/stat
//! - `percent`: busy and per-field percentages, plus the non-blocking sample store

pub mod percent;
pub mod times;

pub use percent::{cpu_percent_between, cpu_times_percent_between, CpuSampleStore, CpuTimesPercent};
pub use times::{parse_cpu_line, read_cpu_times, read_per_cpu_times, CpuSnapshot};

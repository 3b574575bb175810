//! Per-process CPU utilization.
//!
//! Compares the process's own `user + system` time with wall-clock time
//! scaled by the core count, so a process saturating two cores reports
//! about 200%.

use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};
use tracing::trace;

use crate::error::Result;
use crate::system::round_to;

#[derive(Debug, Clone, Copy)]
struct Sample {
    at: Instant,
    busy: f64,
}

/// Last `(wall time, process busy seconds)` pair of one handle.
#[derive(Debug, Default)]
pub struct ProcessCpuSampler {
    last: Mutex<Option<Sample>>,
}

/// Percent from two samples; `0.0` when no time elapsed or time went backwards.
pub fn process_percent(busy_delta: f64, wall_elapsed: f64, num_cpus: usize) -> f64 {
    let num_cpus = num_cpus.max(1) as f64;
    let delta_time = wall_elapsed * num_cpus;
    if delta_time <= 0.0 || !delta_time.is_finite() {
        return 0.0;
    }
    let percent = (busy_delta / delta_time) * 100.0 * num_cpus;
    round_to(percent.max(0.0), 1)
}

impl ProcessCpuSampler {
    pub fn new() -> Self {
        Self::default()
    }

    /// With `interval > 0` samples twice around a sleep, leaving the stored
    /// sample alone. Otherwise measures since the previous call and stores
    /// the new sample; the first such call returns `0.0`.
    ///
    /// `read_busy` returns the process's `user + system` seconds.
    pub fn percent<F>(&self, interval: f64, num_cpus: usize, read_busy: F) -> Result<f64>
    where
        F: Fn() -> Result<f64>,
    {
        if interval > 0.0 {
            let t1 = Instant::now();
            let b1 = read_busy()?;
            thread::sleep(Duration::from_secs_f64(interval));
            let t2 = Instant::now();
            let b2 = read_busy()?;
            return Ok(process_percent(
                b2 - b1,
                t2.duration_since(t1).as_secs_f64(),
                num_cpus,
            ));
        }

        let busy = read_busy()?;
        Ok(self.sample_at(Instant::now(), busy, num_cpus))
    }

    /// Non-blocking step with an explicit clock.
    pub(crate) fn sample_at(&self, now: Instant, busy: f64, num_cpus: usize) -> f64 {
        let mut last = self
            .last
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let previous = last.replace(Sample { at: now, busy });
        match previous {
            None => {
                trace!("First process CPU sample");
                0.0
            }
            Some(prev) => {
                let elapsed = now.saturating_duration_since(prev.at).as_secs_f64();
                process_percent(busy - prev.busy, elapsed, num_cpus)
            }
        }
    }

    /// Drops the stored sample; the next non-blocking call returns `0.0` again.
    pub fn reset(&self) {
        *self
            .last
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
    }
}

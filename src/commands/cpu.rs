//! Cpu command implementation.
//!
//! Samples system-wide or per-core CPU utilization.

use serde::Serialize;

use herakles_proc_inspect::cpu::{cpu_percent_between, cpu_times_percent_between};
use herakles_proc_inspect::{CpuSampleStore, CpuSnapshot, CpuTimesPercent};

use crate::commands::{emit, format_table, open_session};
use crate::config::Config;

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum CpuReport {
    Busy(Vec<f64>),
    Times(Vec<CpuTimesPercent>),
}

/// Prints CPU utilization over `interval` seconds; `0` averages since boot.
pub fn command_cpu(
    interval: Option<f64>,
    per_cpu: bool,
    times: bool,
    config: &Config,
) -> anyhow::Result<()> {
    let interval = interval.unwrap_or_else(|| config.cpu_interval());
    if !interval.is_finite() || interval < 0.0 {
        anyhow::bail!("interval must be a non-negative number of seconds");
    }

    let session = open_session(config);
    let store = CpuSampleStore::new(session.procfs().clone(), session.clock_ticks());

    let report = if interval > 0.0 {
        match (per_cpu, times) {
            (false, false) => CpuReport::Busy(vec![store.cpu_percent(interval)?]),
            (true, false) => CpuReport::Busy(store.per_cpu_percent(interval)?),
            (false, true) => CpuReport::Times(vec![store.cpu_times_percent(interval)?]),
            (true, true) => CpuReport::Times(store.per_cpu_times_percent(interval)?),
        }
    } else {
        since_boot(&store.sample_now(per_cpu)?, times)
    };

    emit(&report, config.output(), |report| render_report(report, per_cpu))
}

fn since_boot(snapshots: &[CpuSnapshot], times: bool) -> CpuReport {
    let zero = CpuSnapshot::default();
    if times {
        CpuReport::Times(
            snapshots
                .iter()
                .map(|s| cpu_times_percent_between(&zero, s))
                .collect(),
        )
    } else {
        CpuReport::Busy(
            snapshots
                .iter()
                .map(|s| cpu_percent_between(&zero, s))
                .collect(),
        )
    }
}

fn render_report(report: &CpuReport, per_cpu: bool) -> String {
    let label = |i: usize| {
        if per_cpu {
            format!("cpu{}", i)
        } else {
            "cpu".to_string()
        }
    };

    match report {
        CpuReport::Busy(values) => {
            let header = vec!["CPU".to_string(), "BUSY%".to_string()];
            let rows: Vec<Vec<String>> = values
                .iter()
                .enumerate()
                .map(|(i, v)| vec![label(i), format!("{:.1}", v)])
                .collect();
            format_table(&header, &rows)
        }
        CpuReport::Times(values) => {
            let header: Vec<String> = [
                "CPU", "USER", "NICE", "SYSTEM", "IDLE", "IOWAIT", "IRQ", "SOFTIRQ", "STEAL",
                "GUEST", "GUEST_NICE",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect();
            let rows: Vec<Vec<String>> = values
                .iter()
                .enumerate()
                .map(|(i, t)| {
                    let mut row = vec![label(i)];
                    row.extend(
                        [
                            t.user,
                            t.nice,
                            t.system,
                            t.idle,
                            t.iowait,
                            t.irq,
                            t.softirq,
                            t.steal,
                            t.guest,
                            t.guest_nice,
                        ]
                        .iter()
                        .map(|v| format!("{:.1}", v)),
                    );
                    row
                })
                .collect();
            format_table(&header, &rows)
        }
    }
}

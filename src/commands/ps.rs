//! Ps command implementation.
//!
//! Lists running processes with a chosen set of attributes.

use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

use herakles_proc_inspect::process::parse_attr_list;
use herakles_proc_inspect::{ProcessAttr, ProcessInfo, ProcessRegistry};

use crate::commands::{cell, emit, format_table, format_timestamp, open_session};
use crate::config::{Config, DEFAULT_PS_ATTRS};

/// Lists processes, optionally sampling CPU usage over `interval` seconds first.
pub fn command_ps(
    attrs: Option<String>,
    interval: Option<f64>,
    limit: Option<usize>,
    config: &Config,
) -> anyhow::Result<()> {
    let attr_list = match attrs {
        Some(list) => parse_attr_list(&list)?,
        None => match &config.ps_attrs {
            Some(list) => parse_attr_list(&list.join(","))?,
            None => parse_attr_list(&DEFAULT_PS_ATTRS.join(","))?,
        },
    };
    let interval = interval.unwrap_or_else(|| config.ps_interval());
    let limit = limit.or(config.max_processes).unwrap_or(usize::MAX);

    let session = open_session(config);
    let registry = ProcessRegistry::new(Arc::clone(&session));
    let mut handles = registry.refresh()?;

    if interval > 0.0 && attr_list.contains(&ProcessAttr::CpuPercent) {
        // prime every sampler, then measure over the interval
        for handle in &handles {
            let _ = handle.cpu_percent(0.0);
        }
        thread::sleep(Duration::from_secs_f64(interval));
        handles = registry.refresh()?;
    }

    let mut rows: Vec<ProcessInfo> = Vec::new();
    for handle in handles.iter().take(limit) {
        match handle.info(Some(&attr_list), None) {
            Ok(info) => rows.push(info),
            Err(e) if e.is_no_such_process() => {
                debug!("Process {} exited while listing", handle.pid());
            }
            Err(e) => warn!("Skipping {}: {}", handle, e),
        }
    }
    debug!("Listed {} of {} processes", rows.len(), handles.len());

    emit(&rows, config.output(), |rows| render_rows(&attr_list, rows))
}

fn render_rows(attrs: &[ProcessAttr], rows: &[ProcessInfo]) -> String {
    let header: Vec<String> = attrs.iter().map(|a| a.as_str().to_uppercase()).collect();
    let body: Vec<Vec<String>> = rows
        .iter()
        .map(|info| {
            let value = serde_json::to_value(info).unwrap_or_default();
            attrs
                .iter()
                .map(|attr| match (attr, info.create_time) {
                    (ProcessAttr::CreateTime, Some(t)) => format_timestamp(t),
                    _ => cell(value.get(attr.as_str())),
                })
                .collect()
        })
        .collect();
    format_table(&header, &body)
}

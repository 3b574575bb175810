//! CLI command implementations for herakles-proc-inspect.
//!
//! This module provides implementations for all CLI subcommands:
//! - `ps`: Process listing
//! - `inspect`: Single process details
//! - `connections`: Socket listing with owners
//! - `cpu`: System CPU utilization
//! - `memory`: Virtual memory, swap and uptime
//! - `check`: System validation
//! - `config`: Configuration file generation

pub mod check;
pub mod config;
pub mod connections;
pub mod cpu;
pub mod inspect;
pub mod memory;
pub mod ps;

use chrono::{Local, TimeZone};
use serde::Serialize;
use std::sync::Arc;

use herakles_proc_inspect::ProcSession;

use crate::cli::OutputFormat;
use crate::config::Config;

// Re-export command functions
pub use check::command_check;
pub use config::command_config;
pub use connections::command_connections;
pub use cpu::command_cpu;
pub use inspect::command_inspect;
pub use memory::command_memory;
pub use ps::command_ps;

/// Session over the configured proc and dev roots.
pub fn open_session(config: &Config) -> Arc<ProcSession> {
    Arc::new(ProcSession::new(config.proc_root()).with_dev_root(config.dev_root()))
}

/// Prints `value` as JSON or YAML, or calls `text` for plain output.
pub fn emit<T, F>(value: &T, format: OutputFormat, text: F) -> anyhow::Result<()>
where
    T: Serialize + ?Sized,
    F: FnOnce(&T) -> String,
{
    let rendered = match format {
        OutputFormat::Json => serde_json::to_string_pretty(value)?,
        OutputFormat::Yaml => serde_yaml::to_string(value)?,
        OutputFormat::Text => text(value),
    };
    println!("{}", rendered.trim_end());
    Ok(())
}

/// Plain rendering of a JSON scalar or list for table cells.
pub fn cell(value: Option<&serde_json::Value>) -> String {
    use serde_json::Value;
    match value {
        None | Some(Value::Null) => "-".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) if n.is_f64() => format!("{:.1}", n.as_f64().unwrap_or_default()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| cell(Some(v)))
            .collect::<Vec<_>>()
            .join(" "),
        Some(other) => other.to_string(),
    }
}

/// Local wall-clock rendering of seconds since the epoch.
pub fn format_timestamp(secs: f64) -> String {
    let whole = secs.trunc() as i64;
    let nanos = (secs.fract() * 1e9) as u32;
    match Local.timestamp_opt(whole, nanos).single() {
        Some(t) => t.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => format!("{:.2}", secs),
    }
}

/// Lays out rows as left-aligned columns separated by two spaces.
pub fn format_table(header: &[String], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = header.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (i, c) in row.iter().enumerate() {
            if let Some(w) = widths.get_mut(i) {
                *w = (*w).max(c.chars().count());
            }
        }
    }

    let line = |cells: &[String]| {
        cells
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let width = widths.get(i).copied().unwrap_or(0);
                format!("{:<width$}", c, width = width)
            })
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };

    let mut out = line(header);
    for row in rows {
        out.push('\n');
        out.push_str(&line(row));
    }
    out
}

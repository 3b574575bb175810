//! Inspect command implementation.
//!
//! Shows the attributes of a single process, with its parent and children.

use serde::Serialize;
use std::sync::Arc;

use herakles_proc_inspect::process::parse_attr_list;
use herakles_proc_inspect::{ProcessHandle, ProcessInfo, ProcessRegistry};

use crate::commands::{cell, emit, format_timestamp, open_session};
use crate::config::Config;

#[derive(Debug, Serialize)]
struct ProcessSummary {
    pid: u32,
    name: Option<String>,
}

impl ProcessSummary {
    fn of(handle: &ProcessHandle) -> Self {
        Self {
            pid: handle.pid(),
            name: handle.name().ok(),
        }
    }
}

#[derive(Debug, Serialize)]
struct InspectReport {
    #[serde(flatten)]
    info: ProcessInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent: Option<ProcessSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    children: Option<Vec<ProcessSummary>>,
}

/// Prints the attributes of `pid` (this process when `None`).
pub fn command_inspect(
    pid: Option<u32>,
    attrs: Option<String>,
    children: bool,
    recursive: bool,
    config: &Config,
) -> anyhow::Result<()> {
    let session = open_session(config);
    let handle = match pid {
        Some(pid) => ProcessHandle::new(Arc::clone(&session), pid)?,
        None => ProcessHandle::current(Arc::clone(&session))?,
    };

    let attr_list = attrs.as_deref().map(parse_attr_list).transpose()?;
    let info = handle.info(attr_list.as_deref(), None)?;

    let parent = handle.parent()?.map(|p| ProcessSummary::of(&p));
    let children = if children {
        let registry = ProcessRegistry::new(Arc::clone(&session));
        let kids = handle.children(&registry, recursive)?;
        Some(kids.iter().map(|k| ProcessSummary::of(k)).collect())
    } else {
        None
    };

    let report = InspectReport {
        info,
        parent,
        children,
    };
    emit(&report, config.output(), render_report)
}

fn render_report(report: &InspectReport) -> String {
    let mut out = Vec::new();
    if let Some(serde_json::Value::Object(fields)) = serde_json::to_value(&report.info).ok() {
        let width = fields.keys().map(|k| k.len()).max().unwrap_or(0);
        for (key, value) in &fields {
            let text = match (key.as_str(), report.info.create_time) {
                ("create_time", Some(t)) => format_timestamp(t),
                (_, _) => match value {
                    serde_json::Value::Object(_) => value.to_string(),
                    serde_json::Value::Array(items) if items.iter().any(|v| v.is_object()) => {
                        format!("{} entries", items.len())
                    }
                    _ => cell(Some(value)),
                },
            };
            out.push(format!("{:<width$}  {}", key, text, width = width));
        }
    }

    if let Some(parent) = &report.parent {
        out.push(format!(
            "parent: {} ({})",
            parent.pid,
            parent.name.as_deref().unwrap_or("?")
        ));
    }
    if let Some(children) = &report.children {
        out.push(format!("children: {}", children.len()));
        for child in children {
            out.push(format!(
                "  {} ({})",
                child.pid,
                child.name.as_deref().unwrap_or("?")
            ));
        }
    }
    out.join("\n")
}

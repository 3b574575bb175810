//! Memory command implementation.
//!
//! Shows virtual memory, swap and host uptime.

use serde::Serialize;

use herakles_proc_inspect::system::{self, SwapMemory, VirtualMemory};

use crate::commands::{emit, format_timestamp, open_session};
use crate::config::Config;

#[derive(Debug, Serialize)]
struct MemoryReport {
    virtual_memory: VirtualMemory,
    swap_memory: SwapMemory,
    boot_time: f64,
    uptime: f64,
}

/// Prints host memory and uptime figures.
pub fn command_memory(config: &Config) -> anyhow::Result<()> {
    let session = open_session(config);
    let procfs = session.procfs();

    let report = MemoryReport {
        virtual_memory: system::virtual_memory(procfs)?,
        swap_memory: system::swap_memory(procfs, session.page_size())?,
        boot_time: session.boot_time()?,
        uptime: system::uptime(procfs)?,
    };

    emit(&report, config.output(), render_report)
}

fn mib(bytes: u64) -> String {
    format!("{:.1} MiB", bytes as f64 / 1024.0 / 1024.0)
}

fn render_report(r: &MemoryReport) -> String {
    let vm = &r.virtual_memory;
    let sw = &r.swap_memory;
    [
        format!("mem total      {}", mib(vm.total)),
        format!("mem available  {}", mib(vm.available)),
        format!("mem used       {} ({:.1}%)", mib(vm.used), vm.percent),
        format!("mem free       {}", mib(vm.free)),
        format!("mem buffers    {}", mib(vm.buffers)),
        format!("mem cached     {}", mib(vm.cached)),
        format!("swap total     {}", mib(sw.total)),
        format!("swap used      {} ({:.1}%)", mib(sw.used), sw.percent),
        format!("swap in/out    {} / {}", mib(sw.sin), mib(sw.sout)),
        format!("booted         {}", format_timestamp(r.boot_time)),
        format!("uptime         {:.0}s", r.uptime),
    ]
    .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mib() {
        assert_eq!(mib(0), "0.0 MiB");
        assert_eq!(mib(3 * 1024 * 1024 / 2), "1.5 MiB");
    }
}

//! CLI arguments and subcommands for herakles-proc-inspect.
//!
//! This module defines the command-line interface structure using the clap library,
//! including all flags, options, and subcommands.

use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Log level options for CLI parsing
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Configuration format options for output
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ConfigFormat {
    Yaml,
    Json,
    Toml,
}

/// Output format for command results
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Text,
    Json,
    Yaml,
}

/// Main CLI arguments structure
#[derive(Parser, Debug)]
#[command(
    name = "herakles-proc-inspect",
    about = "Inspect Linux processes, sockets and CPU utilization from /proc",
    long_about = "Inspect Linux processes, sockets and CPU utilization from /proc.\n\n\
                  Lists processes with identity checks that survive PID reuse, attributes \
                  TCP/UDP/Unix sockets to the processes holding them, and samples system \
                  and per-process CPU utilization.",
    version,
    propagate_version = true
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Log level (overrides config)
    #[arg(long, value_enum)]
    pub log_level: Option<LogLevel>,

    /// Config file (YAML/JSON/TOML)
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Disable all config file loading
    #[arg(long)]
    pub no_config: bool,

    /// Root of the proc filesystem to read
    #[arg(long)]
    pub proc_root: Option<PathBuf>,

    /// Output format for command results
    #[arg(short = 'o', long, value_enum)]
    pub output: Option<OutputFormat>,

    /// Print effective merged config and exit
    #[arg(long)]
    pub show_config: bool,

    /// Output format for --show-config
    #[arg(long, value_enum, default_value = "yaml")]
    pub config_format: ConfigFormat,

    /// Validate config and exit (return code 1 on error)
    #[arg(long)]
    pub check_config: bool,
}

/// Subcommands for additional functionality
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List running processes
    Ps {
        /// Attributes to show (comma-separated, e.g. pid,name,cpu_percent)
        #[arg(short = 'a', long)]
        attrs: Option<String>,

        /// Seconds to sample CPU usage before printing (0 = no sampling)
        #[arg(short = 'i', long)]
        interval: Option<f64>,

        /// Show at most N processes
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },

    /// Show every attribute of one process
    Inspect {
        /// Process id (default: this process)
        pid: Option<u32>,

        /// Attributes to show (comma-separated, default: all)
        #[arg(short = 'a', long)]
        attrs: Option<String>,

        /// Also list child processes
        #[arg(long)]
        children: bool,

        /// Include grandchildren and below
        #[arg(long, requires = "children")]
        recursive: bool,
    },

    /// List sockets with their owning processes
    Connections {
        /// Socket kind: all, tcp, tcp4, tcp6, udp, udp4, udp6, unix, inet, inet4, inet6
        #[arg(short = 'k', long)]
        kind: Option<String>,

        /// Only sockets held by this process
        #[arg(short = 'p', long)]
        pid: Option<u32>,
    },

    /// Show CPU utilization
    Cpu {
        /// Sampling interval in seconds
        #[arg(short = 'i', long)]
        interval: Option<f64>,

        /// Report every logical CPU separately
        #[arg(long)]
        per_cpu: bool,

        /// Break utilization down by time field (user, system, idle, ...)
        #[arg(long)]
        times: bool,
    },

    /// Show virtual memory, swap and uptime
    Memory,

    /// Validate configuration and system requirements
    Check {
        /// Check the proc filesystem
        #[arg(long)]
        proc: bool,

        /// Check socket tables
        #[arg(long)]
        net: bool,

        /// Check all system requirements
        #[arg(long)]
        all: bool,
    },

    /// Generate configuration files
    Config {
        /// Output file path ("-" for stdout)
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,

        /// Output format
        #[arg(long, value_enum, default_value = "yaml")]
        format: ConfigFormat,

        /// Include comments and examples
        #[arg(long)]
        commented: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_ps() {
        let args = Args::parse_from([
            "herakles-proc-inspect",
            "--output",
            "json",
            "ps",
            "--attrs",
            "pid,name",
            "-n",
            "5",
        ]);
        assert_eq!(args.output, Some(OutputFormat::Json));
        match args.command {
            Some(Commands::Ps { attrs, limit, interval }) => {
                assert_eq!(attrs.as_deref(), Some("pid,name"));
                assert_eq!(limit, Some(5));
                assert_eq!(interval, None);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_recursive_requires_children() {
        let res = Args::try_parse_from(["herakles-proc-inspect", "inspect", "1", "--recursive"]);
        assert!(res.is_err());
    }
}

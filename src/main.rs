//! herakles-proc-inspect - version 0.1.0
//!
//! Command-line frontend over the process introspection library.
//! This is the main entry point that resolves configuration, initializes
//! logging and dispatches subcommands.

mod cli;
mod commands;
mod config;
mod startup_checks;

use anyhow::Context;
use clap::Parser;
use tracing::{debug, Level};

use cli::{Args, Commands, LogLevel};
use commands::{
    command_check, command_config, command_connections, command_cpu, command_inspect,
    command_memory, command_ps,
};
use config::{resolve_config, show_config, validate_effective_config, Config};

/// Initializes tracing logging subsystem with configured log level.
fn setup_logging(config: &Config) {
    let log_level = match config.log_level() {
        LogLevel::Off => return,
        LogLevel::Error => Level::ERROR,
        LogLevel::Warn => Level::WARN,
        LogLevel::Info => Level::INFO,
        LogLevel::Debug => Level::DEBUG,
        LogLevel::Trace => Level::TRACE,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return;
    }

    debug!("Logging initialized with level: {:?}", config.log_level());
}

/// Main application entry point.
fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = resolve_config(&args).context("Failed to load configuration")?;

    // Early exits for show/check modes
    if args.check_config {
        if let Err(e) = validate_effective_config(&config) {
            eprintln!("❌ Configuration invalid: {:#}", e);
            std::process::exit(1);
        }
        println!("✅ Configuration is valid");
        return Ok(());
    }

    if args.show_config {
        return show_config(&config, args.config_format);
    }

    setup_logging(&config);

    let Some(command) = args.command else {
        // Without a subcommand, list processes like `ps`
        validate_effective_config(&config).context("Configuration invalid")?;
        return command_ps(None, None, None, &config);
    };

    // Config generation and checks run even with an invalid config
    match command {
        Commands::Config {
            output,
            format,
            commented,
        } => command_config(output, format, commented),

        Commands::Check { proc, net, all } => command_check(proc, net, all, &config),

        command => {
            validate_effective_config(&config).context("Configuration invalid")?;
            match command {
                Commands::Ps {
                    attrs,
                    interval,
                    limit,
                } => command_ps(attrs, interval, limit, &config),

                Commands::Inspect {
                    pid,
                    attrs,
                    children,
                    recursive,
                } => command_inspect(pid, attrs, children, recursive, &config),

                Commands::Connections { kind, pid } => command_connections(kind, pid, &config),

                Commands::Cpu {
                    interval,
                    per_cpu,
                    times,
                } => command_cpu(interval, per_cpu, times, &config),

                Commands::Memory => command_memory(&config),

                Commands::Config { .. } | Commands::Check { .. } => {
                    unreachable!("handled above")
                }
            }
        }
    }
}

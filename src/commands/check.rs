//! Check command implementation.
//!
//! Validates system requirements and configuration.

use std::sync::Arc;

use herakles_proc_inspect::{ConnectionEnumerator, ConnectionKind, ProcessHandle};

use crate::commands::open_session;
use crate::config::{validate_effective_config, Config};
use crate::startup_checks::{optional_sources, validate_requirements};

/// Validates system requirements and configuration.
pub fn command_check(proc: bool, net: bool, all: bool, config: &Config) -> anyhow::Result<()> {
    println!("🔍 Herakles Process Inspector - System Check");
    println!("============================================");
    println!(
        "   Version {} (git {}, built {})",
        env!("CARGO_PKG_VERSION"),
        option_env!("VERGEN_GIT_SHA").unwrap_or("unknown"),
        option_env!("VERGEN_BUILD_TIMESTAMP").unwrap_or("unknown"),
    );

    let session = open_session(config);
    let procfs = session.procfs();
    let mut all_ok = true;

    // Check /proc filesystem
    if proc || all || !net {
        println!("\n📁 Checking {}...", procfs.root().display());
        match validate_requirements(procfs) {
            Ok(()) => println!("   ✅ proc filesystem readable"),
            Err(e) => {
                println!("   ❌ {}", e);
                all_ok = false;
            }
        }

        match ProcessHandle::current(Arc::clone(&session)) {
            Ok(me) => println!("   ✅ Own process readable: {}", me),
            Err(e) => {
                println!("   ❌ Cannot read own process: {}", e);
                all_ok = false;
            }
        }

        for (source, present) in optional_sources(procfs) {
            let mark = if present { "✅" } else { "⚠️ " };
            println!("   {} {}", mark, source);
        }
    }

    // Check socket tables
    if net || all {
        println!("\n🔌 Checking socket tables...");
        let enumerator = ConnectionEnumerator::new(procfs.clone());
        match enumerator.enumerate(ConnectionKind::All, Some(std::process::id())) {
            Ok(records) => println!("   ✅ Socket tables readable ({} own sockets)", records.len()),
            Err(e) => {
                println!("   ❌ Socket enumeration failed: {}", e);
                all_ok = false;
            }
        }
    }

    // Check configuration
    println!("\n⚙️  Checking configuration...");
    match validate_effective_config(config) {
        Ok(_) => {
            println!("   ✅ Configuration is valid");
        }
        Err(e) => {
            println!("   ❌ Configuration invalid: {:#}", e);
            all_ok = false;
        }
    }

    println!("\n📋 Summary:");
    if all_ok {
        println!("   ✅ All checks passed - system is ready");
        Ok(())
    } else {
        println!("   ❌ Some checks failed - please review warnings");
        std::process::exit(1);
    }
}

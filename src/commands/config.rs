//! Config command implementation.
//!
//! Generates configuration files in various formats.

use std::fs;
use std::path::PathBuf;

use crate::cli::ConfigFormat;
use crate::config::{render_config, Config};

/// Generates configuration files.
pub fn command_config(
    output: Option<PathBuf>,
    format: ConfigFormat,
    commented: bool,
) -> anyhow::Result<()> {
    let config = Config::default();
    let output = match output {
        Some(path) => path,
        None => PathBuf::from(match format {
            ConfigFormat::Yaml => "herakles-proc-inspect.yaml",
            ConfigFormat::Json => "herakles-proc-inspect.json",
            ConfigFormat::Toml => "herakles-proc-inspect.toml",
        }),
    };

    let mut content = render_config(&config, format)?;
    if commented && matches!(format, ConfigFormat::Yaml) {
        content = add_config_comments(content);
    }

    if output.to_string_lossy() == "-" {
        print!("{}", content);
    } else {
        fs::write(&output, content)?;
        println!("✅ Configuration written to: {}", output.display());
    }

    Ok(())
}

/// Adds comments to YAML configuration.
fn add_config_comments(yaml: String) -> String {
    let comments = r#"# Herakles Process Inspector Configuration
# ========================================
#
# Sources
# -------
# proc_root: "/proc"           # Root of the proc filesystem (e.g. /host/proc in a container)
# dev_root: "/dev"             # Device directory used to name terminals
#
# Logging
# -------
# log_level: "warn"            # off, error, warn, info, debug, trace
#
# Output
# ------
# output: "text"               # text, json, yaml
#
# Process Listing (ps)
# --------------------
# ps_attrs: [pid, ppid, username, status, cpu_percent, memory_percent, name]
# ps_interval: 0.1             # Seconds to sample CPU before printing (0 = no sampling)
# max_processes: null          # Show at most N processes
#
# CPU Sampling (cpu)
# ------------------
# cpu_interval: 1.0            # Sampling interval in seconds (0 = average since boot)
#
# Sockets (connections)
# ---------------------
# connection_kind: "inet"      # all, tcp, tcp4, tcp6, udp, udp4, udp6, unix, inet, inet4, inet6
"#;

    format!("{comments}\n{yaml}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_writes_commented_yaml() {
        let dir = tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("out.yaml");
        command_config(Some(path.clone()), ConfigFormat::Yaml, true).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("# Herakles Process Inspector Configuration"));
        let parsed: Config = serde_yaml::from_str(&content).unwrap();
        assert_eq!(parsed, Config::default());
    }

    #[test]
    fn test_writes_toml() {
        let dir = tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("out.toml");
        command_config(Some(path.clone()), ConfigFormat::Toml, false).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let parsed: Config = toml::from_str(&content).unwrap();
        assert_eq!(parsed.proc_root, Config::default().proc_root);
    }
}

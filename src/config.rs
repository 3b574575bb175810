//! Configuration management for herakles-proc-inspect.
//!
//! This module handles loading, merging, and validating configuration from files
//! and CLI arguments. It supports YAML, JSON, and TOML formats.

use anyhow::{bail, Context};
use herakles_proc_inspect::process::parse_attr_list;
use herakles_proc_inspect::ConnectionKind;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::cli::{Args, ConfigFormat, LogLevel, OutputFormat};

// Default configuration constants
pub const DEFAULT_PROC_ROOT: &str = "/proc";
pub const DEFAULT_DEV_ROOT: &str = "/dev";
pub const DEFAULT_PS_INTERVAL: f64 = 0.1;
pub const DEFAULT_CPU_INTERVAL: f64 = 1.0;
pub const DEFAULT_PS_ATTRS: &[&str] = &[
    "pid",
    "ppid",
    "username",
    "status",
    "cpu_percent",
    "memory_percent",
    "name",
];

/// Search order when no `--config` is given.
const CONFIG_SEARCH_PATHS: &[&str] = &[
    "/etc/herakles/proc-inspect.yaml",
    "/etc/herakles/proc-inspect.yml",
    "/etc/herakles/proc-inspect.json",
    "/etc/herakles/proc-inspect.toml",
    "./herakles-proc-inspect.yaml",
    "./herakles-proc-inspect.yml",
    "./herakles-proc-inspect.json",
    "./herakles-proc-inspect.toml",
];

/// Effective configuration; every field falls back to its default when unset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // Sources
    #[serde(alias = "proc-root")]
    pub proc_root: Option<PathBuf>,
    #[serde(alias = "dev-root")]
    pub dev_root: Option<PathBuf>,

    // Logging
    #[serde(alias = "log-level")]
    pub log_level: Option<LogLevel>,

    // Output
    pub output: Option<OutputFormat>,

    // Process listing
    #[serde(alias = "ps-attrs")]
    pub ps_attrs: Option<Vec<String>>,
    #[serde(alias = "ps-interval")]
    pub ps_interval: Option<f64>,
    #[serde(alias = "max-processes")]
    pub max_processes: Option<usize>,

    // CPU sampling
    #[serde(alias = "cpu-interval")]
    pub cpu_interval: Option<f64>,

    // Sockets
    #[serde(alias = "connection-kind")]
    pub connection_kind: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            proc_root: Some(PathBuf::from(DEFAULT_PROC_ROOT)),
            dev_root: Some(PathBuf::from(DEFAULT_DEV_ROOT)),
            log_level: Some(LogLevel::Warn),
            output: Some(OutputFormat::Text),
            ps_attrs: Some(DEFAULT_PS_ATTRS.iter().map(|s| s.to_string()).collect()),
            ps_interval: Some(DEFAULT_PS_INTERVAL),
            max_processes: None,
            cpu_interval: Some(DEFAULT_CPU_INTERVAL),
            connection_kind: Some(ConnectionKind::Inet.as_str().to_string()),
        }
    }
}

impl Config {
    pub fn proc_root(&self) -> &Path {
        self.proc_root
            .as_deref()
            .unwrap_or_else(|| Path::new(DEFAULT_PROC_ROOT))
    }

    pub fn dev_root(&self) -> &Path {
        self.dev_root
            .as_deref()
            .unwrap_or_else(|| Path::new(DEFAULT_DEV_ROOT))
    }

    pub fn log_level(&self) -> LogLevel {
        self.log_level.unwrap_or(LogLevel::Warn)
    }

    pub fn output(&self) -> OutputFormat {
        self.output.unwrap_or(OutputFormat::Text)
    }

    pub fn ps_interval(&self) -> f64 {
        self.ps_interval.unwrap_or(DEFAULT_PS_INTERVAL)
    }

    pub fn cpu_interval(&self) -> f64 {
        self.cpu_interval.unwrap_or(DEFAULT_CPU_INTERVAL)
    }

    pub fn connection_kind(&self) -> anyhow::Result<ConnectionKind> {
        let kind = self
            .connection_kind
            .as_deref()
            .unwrap_or(ConnectionKind::Inet.as_str());
        Ok(kind.parse()?)
    }
}

fn check_interval(name: &str, value: Option<f64>) -> anyhow::Result<()> {
    if let Some(v) = value {
        if !v.is_finite() || v < 0.0 {
            bail!("{} must be a non-negative number of seconds, got {}", name, v);
        }
    }
    Ok(())
}

/// Validate effective config (used by --check-config and at startup)
pub fn validate_effective_config(cfg: &Config) -> anyhow::Result<()> {
    if let Some(root) = &cfg.proc_root {
        if root.as_os_str().is_empty() {
            bail!("proc_root must not be empty");
        }
    }

    check_interval("ps_interval", cfg.ps_interval)?;
    check_interval("cpu_interval", cfg.cpu_interval)?;

    if let Some(attrs) = &cfg.ps_attrs {
        if attrs.is_empty() {
            bail!("ps_attrs must name at least one attribute");
        }
        parse_attr_list(&attrs.join(",")).context("Invalid ps_attrs")?;
    }

    if cfg.max_processes == Some(0) {
        bail!("max_processes must be greater than 0 when set");
    }

    cfg.connection_kind().context("Invalid connection_kind")?;

    Ok(())
}

/// Resolves configuration from CLI args, config file, and defaults.
/// This enforces precedence: CLI (if provided) > config file > default.
pub fn resolve_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = if args.no_config {
        Config::default()
    } else {
        load_config(args.config.as_deref())?
    };

    if let Some(root) = &args.proc_root {
        config.proc_root = Some(root.clone());
    }
    if let Some(level) = args.log_level {
        config.log_level = Some(level);
    }
    if let Some(output) = args.output {
        config.output = Some(output);
    }

    Ok(config)
}

/// Loads the file at `path`, or the first existing default location.
/// Missing files yield the defaults; fields absent from a file keep theirs.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => match CONFIG_SEARCH_PATHS
            .iter()
            .map(Path::new)
            .find(|p| p.exists())
        {
            Some(p) => p.to_path_buf(),
            None => return Ok(Config::default()),
        },
    };

    if !path.exists() {
        return Ok(Config::default());
    }

    let content = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;

    let config = parse_config(&path, &content)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    info!("Loaded configuration from: {}", path.display());
    Ok(config)
}

/// Parses `content` by the extension of `path` (YAML when unknown).
fn parse_config(path: &Path, content: &str) -> anyhow::Result<Config> {
    let config = match path.extension().and_then(|s| s.to_str()) {
        Some("json") => serde_json::from_str(content)?,
        Some("toml") => toml::from_str(content)?,
        _ => serde_yaml::from_str(content)?,
    };
    Ok(config)
}

/// Renders `config` in the requested format.
pub fn render_config(config: &Config, format: ConfigFormat) -> anyhow::Result<String> {
    let output = match format {
        ConfigFormat::Json => serde_json::to_string_pretty(config)?,
        ConfigFormat::Toml => toml::to_string_pretty(config)?,
        ConfigFormat::Yaml => serde_yaml::to_string(config)?,
    };
    Ok(output)
}

/// Shows configuration in requested format
pub fn show_config(config: &Config, format: ConfigFormat) -> anyhow::Result<()> {
    println!("{}", render_config(config, format)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(validate_effective_config(&config).is_ok());
        assert_eq!(config.proc_root(), Path::new("/proc"));
        assert_eq!(config.connection_kind().unwrap(), ConnectionKind::Inet);
    }

    #[test]
    fn test_load_yaml_keeps_unset_defaults() {
        let dir = tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("inspect.yaml");
        fs::write(&path, "proc_root: /host/proc\ncpu_interval: 0.5\n").unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.proc_root(), Path::new("/host/proc"));
        assert_eq!(config.cpu_interval(), 0.5);
        assert_eq!(config.output(), OutputFormat::Text);
        assert!(config.ps_attrs.is_some());
    }

    #[test]
    fn test_load_json_and_toml() {
        let dir = tempdir().expect("Failed to create temp dir");

        let json = dir.path().join("inspect.json");
        fs::write(&json, r#"{"output": "json", "connection_kind": "tcp"}"#).unwrap();
        let config = load_config(Some(&json)).unwrap();
        assert_eq!(config.output(), OutputFormat::Json);
        assert_eq!(config.connection_kind().unwrap(), ConnectionKind::Tcp);

        let toml_path = dir.path().join("inspect.toml");
        fs::write(&toml_path, "log_level = \"debug\"\nmax_processes = 10\n").unwrap();
        let config = load_config(Some(&toml_path)).unwrap();
        assert_eq!(config.log_level(), LogLevel::Debug);
        assert_eq!(config.max_processes, Some(10));
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempdir().expect("Failed to create temp dir");
        let config = load_config(Some(&dir.path().join("absent.yaml"))).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_malformed_file_is_error() {
        let dir = tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("broken.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(load_config(Some(&path)).is_err());
    }

    #[test]
    fn test_validation_failures() {
        let mut config = Config::default();
        config.cpu_interval = Some(-1.0);
        assert!(validate_effective_config(&config).is_err());

        let mut config = Config::default();
        config.ps_attrs = Some(vec!["pid".into(), "environ".into()]);
        assert!(validate_effective_config(&config).is_err());

        let mut config = Config::default();
        config.connection_kind = Some("sctp".into());
        assert!(validate_effective_config(&config).is_err());

        let mut config = Config::default();
        config.max_processes = Some(0);
        assert!(validate_effective_config(&config).is_err());
    }

    #[test]
    fn test_render_config_formats() {
        let config = Config::default();
        for format in [ConfigFormat::Yaml, ConfigFormat::Json, ConfigFormat::Toml] {
            let text = render_config(&config, format).unwrap();
            assert!(text.contains("proc_root"));
        }
    }
}

//! Daemon configuration
//!
//! Layered as: built-in defaults, then the TOML file, then `QUIETDISK_*`
//! environment variables, then command-line flags.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use config::{Config, ConfigBuilder, Environment, File, FileFormat};
use quietdisk_lib::monitor::{DiscoveryConfig, IdlePolicy};
use quietdisk_lib::power::BackendKind;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/quietdisk/quietdisk.toml";
const ENV_PREFIX: &str = "QUIETDISK";

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl LogFormat {
    fn as_str(&self) -> &'static str {
        match self {
            LogFormat::Text => "text",
            LogFormat::Json => "json",
        }
    }
}

/// Command-line flags; every flag overrides the file and environment
#[derive(Parser, Debug, Default)]
#[command(name = "quietdiskd", version, about = "Puts idle drives into standby")]
pub struct Cli {
    /// Configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Seconds of inactivity before a device is put into standby
    #[arg(short, long, value_name = "SECONDS")]
    pub idle: Option<u64>,

    /// Seconds before a device may be put into standby again
    #[arg(short, long, value_name = "SECONDS")]
    pub grace: Option<u64>,

    /// Minimum I/O operations per poll counted as activity
    #[arg(short, long, alias = "treshold", value_name = "IOPS")]
    pub threshold: Option<u64>,

    /// Track rotational drives only
    #[arg(long)]
    pub hdd_only: bool,

    /// Track every block device, picking up new ones as they appear
    #[arg(short, long)]
    pub all: bool,

    /// Log state machine decisions
    #[arg(short, long)]
    pub verbose: bool,

    /// Power control backend (ata or hdparm)
    #[arg(short, long)]
    pub backend: Option<BackendKind>,

    /// Serve /healthz, /readyz and /metrics on this port
    #[arg(long)]
    pub metrics_port: Option<u16>,

    #[arg(long, value_enum)]
    pub log_format: Option<LogFormat>,

    /// Device nodes to track
    pub devices: Vec<PathBuf>,
}

/// Resolved daemon configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub idle_period_secs: u64,
    pub grace_period_secs: u64,
    pub threshold: u64,
    pub hdd_only: bool,
    pub verbose: bool,
    pub all_devices: bool,
    pub devices: Vec<PathBuf>,
    pub backend: BackendKind,
    pub diskstats_path: PathBuf,
    pub sysfs_root: PathBuf,
    pub dev_root: PathBuf,
    pub metrics_port: Option<u16>,
    pub log_format: LogFormat,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        let policy = IdlePolicy::default();
        let discovery = DiscoveryConfig::default();
        Self {
            idle_period_secs: policy.idle_period.as_secs(),
            grace_period_secs: policy.grace_period.as_secs(),
            threshold: policy.threshold,
            hdd_only: false,
            verbose: false,
            all_devices: false,
            devices: Vec::new(),
            backend: BackendKind::default(),
            diskstats_path: PathBuf::from("/proc/diskstats"),
            sysfs_root: discovery.sysfs_root,
            dev_root: discovery.dev_root,
            metrics_port: None,
            log_format: LogFormat::default(),
        }
    }
}

impl DaemonConfig {
    /// Load from the file named on the command line, the process
    /// environment and the flags themselves
    pub fn load(cli: &Cli) -> Result<Self> {
        let builder = Config::builder()
            .add_source(File::new(&cli.config.to_string_lossy(), FileFormat::Toml).required(false));
        Self::finish(builder, cli, None)
    }

    /// Load from TOML text and explicit environment variables
    pub fn load_with(toml: &str, env: HashMap<String, String>, cli: &Cli) -> Result<Self> {
        let builder = Config::builder().add_source(File::from_str(toml, FileFormat::Toml));
        Self::finish(builder, cli, Some(env))
    }

    /// Parse and validate TOML text alone
    pub fn load_from_str(toml: &str) -> Result<Self> {
        Self::load_with(toml, HashMap::new(), &Cli::default())
    }

    fn finish(
        builder: ConfigBuilder<config::builder::DefaultState>,
        cli: &Cli,
        env: Option<HashMap<String, String>>,
    ) -> Result<Self> {
        let environment = Environment::with_prefix(ENV_PREFIX)
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("devices")
            .source(env);

        let devices: Vec<String> = cli
            .devices
            .iter()
            .map(|p| p.display().to_string())
            .collect();

        let config = builder
            .add_source(environment)
            .set_override_option("idle_period_secs", cli.idle)?
            .set_override_option("grace_period_secs", cli.grace)?
            .set_override_option("threshold", cli.threshold)?
            .set_override_option("hdd_only", cli.hdd_only.then_some(true))?
            .set_override_option("all_devices", cli.all.then_some(true))?
            .set_override_option("verbose", cli.verbose.then_some(true))?
            .set_override_option("backend", cli.backend.map(|b| b.to_string()))?
            .set_override_option("metrics_port", cli.metrics_port.map(u64::from))?
            .set_override_option("log_format", cli.log_format.map(|f| f.as_str()))?
            .set_override_option("devices", (!devices.is_empty()).then_some(devices))?
            .build()
            .context("Failed to read configuration")?;

        let config: DaemonConfig = config
            .try_deserialize()
            .context("Invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.idle_period_secs > 0,
            "idle_period_secs must be greater than 0"
        );
        anyhow::ensure!(self.threshold > 0, "threshold must be greater than 0");
        anyhow::ensure!(
            self.all_devices || !self.devices.is_empty(),
            "no device is defined, list devices or enable all_devices"
        );
        Ok(())
    }

    pub fn policy(&self) -> IdlePolicy {
        IdlePolicy {
            idle_period: Duration::from_secs(self.idle_period_secs),
            grace_period: Duration::from_secs(self.grace_period_secs),
            threshold: self.threshold,
        }
    }

    pub fn discovery(&self) -> DiscoveryConfig {
        DiscoveryConfig {
            sysfs_root: self.sysfs_root.clone(),
            dev_root: self.dev_root.clone(),
            hdd_only: self.hdd_only,
        }
    }
}

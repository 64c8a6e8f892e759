//! Tests for layered daemon configuration

use clap::Parser;
use quietdisk_lib::power::BackendKind;
use quietdiskd::config::{Cli, DaemonConfig, LogFormat};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

const VALID_CONFIG: &str = r#"
idle_period_secs = 900
grace_period_secs = 1200
threshold = 4
devices = ["/dev/sda", "/dev/sdb"]
backend = "hdparm"
metrics_port = 9464
log_format = "json"
"#;

fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[test]
fn test_load_valid_config() {
    let config = DaemonConfig::load_from_str(VALID_CONFIG).unwrap();

    assert_eq!(config.idle_period_secs, 900);
    assert_eq!(config.grace_period_secs, 1200);
    assert_eq!(config.threshold, 4);
    assert_eq!(
        config.devices,
        vec![PathBuf::from("/dev/sda"), PathBuf::from("/dev/sdb")]
    );
    assert_eq!(config.backend, BackendKind::Hdparm);
    assert_eq!(config.metrics_port, Some(9464));
    assert_eq!(config.log_format, LogFormat::Json);

    let policy = config.policy();
    assert_eq!(policy.idle_period, Duration::from_secs(900));
    assert_eq!(policy.grace_period, Duration::from_secs(1200));
}

#[test]
fn test_defaults_fill_missing_fields() {
    let config = DaemonConfig::load_from_str(r#"devices = ["/dev/sdc"]"#).unwrap();

    assert_eq!(config.idle_period_secs, 300);
    assert_eq!(config.grace_period_secs, 600);
    assert_eq!(config.threshold, 1);
    assert_eq!(config.backend, BackendKind::Ata);
    assert_eq!(config.diskstats_path, PathBuf::from("/proc/diskstats"));
    assert_eq!(config.metrics_port, None);
    assert_eq!(config.log_format, LogFormat::Text);

    let discovery = config.discovery();
    assert_eq!(discovery.sysfs_root, PathBuf::from("/sys"));
    assert_eq!(discovery.dev_root, PathBuf::from("/dev"));
    assert!(!discovery.hdd_only);
}

#[test]
fn test_reject_zero_idle_period() {
    let toml = VALID_CONFIG.replace("idle_period_secs = 900", "idle_period_secs = 0");
    let err = DaemonConfig::load_from_str(&toml).unwrap_err();
    assert!(err.to_string().contains("idle_period_secs"));
}

#[test]
fn test_reject_zero_threshold() {
    let toml = VALID_CONFIG.replace("threshold = 4", "threshold = 0");
    let err = DaemonConfig::load_from_str(&toml).unwrap_err();
    assert!(err.to_string().contains("threshold"));
}

#[test]
fn test_reject_missing_devices() {
    let toml = VALID_CONFIG.replace(r#"devices = ["/dev/sda", "/dev/sdb"]"#, "");
    let err = DaemonConfig::load_from_str(&toml).unwrap_err();
    assert!(err.to_string().contains("no device is defined"));
}

#[test]
fn test_all_devices_needs_no_device_list() {
    let config = DaemonConfig::load_from_str("all_devices = true").unwrap();
    assert!(config.all_devices);
    assert!(config.devices.is_empty());
}

#[test]
fn test_reject_unknown_backend() {
    let toml = VALID_CONFIG.replace(r#"backend = "hdparm""#, r#"backend = "smartctl""#);
    assert!(DaemonConfig::load_from_str(&toml).is_err());
}

#[test]
fn test_environment_overrides_file() {
    let vars = env(&[
        ("QUIETDISK_IDLE_PERIOD_SECS", "120"),
        ("QUIETDISK_HDD_ONLY", "true"),
        ("QUIETDISK_DEVICES", "/dev/sdx,/dev/sdy"),
    ]);
    let config = DaemonConfig::load_with(VALID_CONFIG, vars, &Cli::default()).unwrap();

    assert_eq!(config.idle_period_secs, 120);
    assert!(config.hdd_only);
    assert_eq!(
        config.devices,
        vec![PathBuf::from("/dev/sdx"), PathBuf::from("/dev/sdy")]
    );
    assert_eq!(config.threshold, 4);
}

#[test]
fn test_flags_override_environment() {
    let cli = Cli::parse_from([
        "quietdiskd",
        "--idle",
        "60",
        "--treshold",
        "10",
        "--backend",
        "ata",
        "--all",
        "-v",
        "/dev/sdz",
    ]);
    let vars = env(&[("QUIETDISK_IDLE_PERIOD_SECS", "120")]);
    let config = DaemonConfig::load_with(VALID_CONFIG, vars, &cli).unwrap();

    assert_eq!(config.idle_period_secs, 60);
    assert_eq!(config.threshold, 10);
    assert_eq!(config.backend, BackendKind::Ata);
    assert!(config.all_devices);
    assert!(config.verbose);
    assert_eq!(config.devices, vec![PathBuf::from("/dev/sdz")]);
    assert_eq!(config.grace_period_secs, 1200);
}

#[test]
fn test_missing_config_file_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let cli = Cli::parse_from([
        "quietdiskd",
        "--config",
        dir.path().join("absent.toml").to_str().unwrap(),
        "/dev/sda",
    ]);
    let config = DaemonConfig::load(&cli).unwrap();
    assert_eq!(config.devices, vec![PathBuf::from("/dev/sda")]);
}

#[test]
fn test_config_file_is_read() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("quietdisk.toml");
    std::fs::write(&path, VALID_CONFIG).unwrap();

    let cli = Cli::parse_from(["quietdiskd", "--config", path.to_str().unwrap()]);
    let config = DaemonConfig::load(&cli).unwrap();
    assert_eq!(config.threshold, 4);
    assert_eq!(config.devices.len(), 2);
}

//! Block device discovery
//!
//! Resolves the configured device set, either from explicit paths or by
//! listing whole-disk devices under `<sysfs>/block`.

use super::device::{is_partition, is_rotational};
use super::{Device, DeviceError, DeviceSet};
use crate::models::DiscoveredDevice;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

/// Where to look for devices and which ones to accept
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryConfig {
    pub sysfs_root: PathBuf,
    pub dev_root: PathBuf,
    /// Accept rotational media only
    pub hdd_only: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            sysfs_root: PathBuf::from("/sys"),
            dev_root: PathBuf::from("/dev"),
            hdd_only: false,
        }
    }
}

/// List device nodes for every entry of `<sysfs>/block`, sorted
pub async fn list_block_devices(config: &DiscoveryConfig) -> Result<Vec<PathBuf>> {
    let block_dir = config.sysfs_root.join("block");
    let mut entries = fs::read_dir(&block_dir)
        .await
        .with_context(|| format!("Could not read from '{}'", block_dir.display()))?;

    let mut devices = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        devices.push(config.dev_root.join(entry.file_name()));
    }
    devices.sort();

    Ok(devices)
}

/// Create a trackable device, applying the partition and HDD-only filters
pub fn create_device(path: &Path, config: &DiscoveryConfig) -> Result<Device, DeviceError> {
    let device = Device::new(path, &config.sysfs_root)?;
    if config.hdd_only && !device.rotational {
        return Err(DeviceError::NotRotational(device.path().to_path_buf()));
    }
    Ok(device)
}

/// Build the initial tracked set
///
/// Rejected devices are logged and skipped. An empty result is an error.
pub async fn resolve_devices(
    config: &DiscoveryConfig,
    explicit: &[PathBuf],
    all_devices: bool,
) -> Result<DeviceSet> {
    let mut candidates = explicit.to_vec();
    if all_devices {
        candidates.extend(list_block_devices(config).await?);
    }

    let mut devices = DeviceSet::new();
    for path in candidates {
        match create_device(&path, config) {
            Ok(device) => {
                debug!(device = %device.path().display(), "Tracking device");
                devices.insert(device);
            }
            Err(e @ DeviceError::NotRotational(_)) if all_devices => {
                debug!(error = %e, "Skipping device");
            }
            Err(e) => warn!(error = %e, "Skipping device"),
        }
    }

    anyhow::ensure!(!devices.is_empty(), "no device is available");
    info!(count = devices.len(), "Resolved devices");
    Ok(devices)
}

/// Describe every discovered device for listing
pub async fn describe_devices(config: &DiscoveryConfig) -> Result<Vec<DiscoveredDevice>> {
    let mut described = Vec::new();

    for path in list_block_devices(config).await? {
        let kernel_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let partition = is_partition(&config.sysfs_root, &kernel_name);
        let rotational = is_rotational(&config.sysfs_root, &kernel_name);

        if config.hdd_only && (partition || !rotational) {
            continue;
        }

        described.push(DiscoveredDevice {
            path: path.display().to_string(),
            kernel_name,
            rotational,
            partition,
        });
    }

    Ok(described)
}

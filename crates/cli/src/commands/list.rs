//! `qd list`

use anyhow::Result;
use quietdisk_lib::monitor::{describe_devices, DiscoveryConfig};

use crate::output::{print_items, print_warning, DeviceRow, OutputFormat};

/// Print every discovered device
pub async fn list_devices(discovery: &DiscoveryConfig, format: OutputFormat) -> Result<bool> {
    let devices = describe_devices(discovery).await?;

    if devices.is_empty() {
        print_warning("No device to be listed");
        return Ok(false);
    }

    let rows = devices.iter().map(DeviceRow::from).collect();
    print_items(&devices, rows, format)?;
    Ok(true)
}

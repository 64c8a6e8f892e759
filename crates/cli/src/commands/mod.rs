//! Subcommand implementations
//!
//! Each command returns `Ok(false)` when it ran but some device failed, so
//! the binary can exit non-zero after printing every result.

pub mod check;
pub mod list;
pub mod sleep;

use crate::output::{print_error, print_warning};
use crate::TargetArgs;
use quietdisk_lib::monitor::{resolve_devices, DiscoveryConfig};
use quietdisk_lib::power::PowerError;
use std::path::PathBuf;

/// Resolve the device paths a `check` or `sleep` run targets
///
/// Returns `None` after printing an error when nothing resolves.
pub async fn resolve_targets(
    discovery: &DiscoveryConfig,
    args: &TargetArgs,
) -> Option<Vec<PathBuf>> {
    if args.devices.is_empty() && !args.all {
        print_error("no device is defined, list devices or pass --all");
        return None;
    }

    match resolve_devices(discovery, &args.devices, args.all).await {
        Ok(devices) => Some(devices.iter().map(|d| d.path().to_path_buf()).collect()),
        Err(e) => {
            print_error(&format!("{:#}", e));
            None
        }
    }
}

/// Point at the usual fix when a device node could not be opened
pub fn hint_permission(error: &PowerError) {
    if error.is_permission_denied() {
        print_warning("opening device nodes needs root, or try --backend hdparm");
    }
}

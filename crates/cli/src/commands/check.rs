//! `qd check`

use anyhow::Result;
use quietdisk_lib::monitor::DiscoveryConfig;
use quietdisk_lib::power::create_backend;
use quietdisk_lib::PowerReport;

use super::{hint_permission, resolve_targets};
use crate::output::{print_items, OutputFormat, PowerRow};
use crate::TargetArgs;

/// Query and print the power mode of every target
pub async fn check_devices(
    discovery: &DiscoveryConfig,
    args: &TargetArgs,
    format: OutputFormat,
) -> Result<bool> {
    let Some(targets) = resolve_targets(discovery, args).await else {
        return Ok(false);
    };
    let power = create_backend(args.backend);

    let mut reports = Vec::with_capacity(targets.len());
    for path in &targets {
        let name = path.display().to_string();
        let report = match power.query_power_mode(path).await {
            Ok(mode) => PowerReport::ok(name, Some(mode)),
            Err(e) => {
                hint_permission(&e);
                PowerReport::failed(name, e)
            }
        };
        reports.push(report);
    }

    let rows = reports
        .iter()
        .map(|r| PowerRow::from_report(r, "unknown"))
        .collect();
    print_items(&reports, rows, format)?;

    Ok(reports.iter().all(PowerReport::is_ok))
}

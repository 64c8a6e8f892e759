//! `qd sleep`

use anyhow::Result;
use quietdisk_lib::monitor::DiscoveryConfig;
use quietdisk_lib::power::create_backend;
use quietdisk_lib::PowerReport;

use super::{hint_permission, resolve_targets};
use crate::output::{print_items, print_success, OutputFormat, PowerRow};
use crate::TargetArgs;

/// Send the sleep command to every target
pub async fn sleep_devices(
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
        match power.request_sleep(path).await {
            Ok(()) => reports.push(PowerReport::ok(name, None)),
            Err(e) => {
                hint_permission(&e);
                reports.push(PowerReport::failed(name, e));
            }
        }
    }

    let rows = reports
        .iter()
        .map(|r| PowerRow::from_report(r, "asleep"))
        .collect();
    print_items(&reports, rows, format)?;

    let all_ok = reports.iter().all(PowerReport::is_ok);
    if all_ok && matches!(format, OutputFormat::Table) {
        print_success(&format!("{} device(s) put to sleep", reports.len()));
    }
    Ok(all_ok)
}

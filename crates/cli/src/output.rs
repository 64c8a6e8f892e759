//! Output formatting utilities

use clap::ValueEnum;
use colored::Colorize;
use quietdisk_lib::power::PowerMode;
use quietdisk_lib::{DiscoveredDevice, PowerReport};
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Row for the device listing
#[derive(Tabled)]
pub struct DeviceRow {
    #[tabled(rename = "Device")]
    device: String,
    #[tabled(rename = "Kernel name")]
    kernel_name: String,
    #[tabled(rename = "Rotational")]
    rotational: String,
    #[tabled(rename = "Partition")]
    partition: String,
}

impl From<&DiscoveredDevice> for DeviceRow {
    fn from(device: &DiscoveredDevice) -> Self {
        Self {
            device: device.path.clone(),
            kernel_name: device.kernel_name.clone(),
            rotational: yes_no(device.rotational),
            partition: yes_no(device.partition),
        }
    }
}

/// Row for check and sleep results
#[derive(Tabled)]
pub struct PowerRow {
    #[tabled(rename = "Device")]
    device: String,
    #[tabled(rename = "State")]
    state: String,
}

impl PowerRow {
    pub fn from_report(report: &PowerReport, done: &str) -> Self {
        let state = match (&report.error, report.mode) {
            (Some(error), _) => error.red().to_string(),
            (None, Some(mode)) => color_mode(mode),
            (None, None) => done.green().to_string(),
        };
        Self {
            device: report.path.clone(),
            state,
        }
    }
}

fn yes_no(value: bool) -> String {
    let text = if value { "yes" } else { "no" };
    text.to_string()
}

/// Color a power mode: standby green, spinning yellow
pub fn color_mode(mode: PowerMode) -> String {
    match mode {
        PowerMode::Standby | PowerMode::NvcacheSpindown => mode.to_string().green().to_string(),
        PowerMode::Unknown => mode.to_string().red().to_string(),
        _ => mode.to_string().yellow().to_string(),
    }
}

/// Print rows as a table, or the serializable items as JSON
pub fn print_items<T: Serialize, R: Tabled>(
    items: &[T],
    rows: Vec<R>,
    format: OutputFormat,
) -> anyhow::Result<()> {
    match format {
        OutputFormat::Table => {
            let table = Table::new(rows).with(Style::rounded()).to_string();
            println!("{}", table);
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(items)?);
        }
    }
    Ok(())
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    eprintln!("{} {}", "⚠".yellow().bold(), message);
}

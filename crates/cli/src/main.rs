//! quietdisk one-shot CLI
//!
//! Lists candidate block devices, reports their ATA power mode, or puts
//! them to sleep right away without starting the daemon.

mod commands;
mod output;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use commands::{check, list, sleep};
use quietdisk_lib::monitor::DiscoveryConfig;
use quietdisk_lib::power::BackendKind;
use std::path::PathBuf;
use std::process::ExitCode;

/// quietdisk CLI
#[derive(Parser)]
#[command(name = "qd")]
#[command(author, version, about = "Drive standby control for quietdisk", long_about = None)]
pub struct Cli {
    /// Output format
    #[arg(long, short, global = true, default_value = "table")]
    pub format: output::OutputFormat,

    /// Root of the sysfs mount
    #[arg(long, global = true, env = "QUIETDISK_SYSFS_ROOT", default_value = "/sys")]
    pub sysfs_root: PathBuf,

    /// Directory holding device nodes
    #[arg(long, global = true, env = "QUIETDISK_DEV_ROOT", default_value = "/dev")]
    pub dev_root: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List every block device found under sysfs
    List {
        /// Show rotational whole disks only
        #[arg(long, env = "QUIETDISK_HDD_ONLY")]
        hdd_only: bool,
    },

    /// Print the power mode of each device
    Check(TargetArgs),

    /// Put each device to sleep now
    Sleep(TargetArgs),
}

/// Device selection shared by `check` and `sleep`
#[derive(Args, Debug)]
pub struct TargetArgs {
    /// Device nodes, e.g. /dev/sdb
    pub devices: Vec<PathBuf>,

    /// Include every discovered block device
    #[arg(long, short)]
    pub all: bool,

    /// Skip devices that are not rotational
    #[arg(long, env = "QUIETDISK_HDD_ONLY")]
    pub hdd_only: bool,

    /// Power control backend (ata or hdparm)
    #[arg(long, short, env = "QUIETDISK_BACKEND", default_value = "ata")]
    pub backend: BackendKind,
}

impl Cli {
    fn discovery(&self, hdd_only: bool) -> DiscoveryConfig {
        DiscoveryConfig {
            sysfs_root: self.sysfs_root.clone(),
            dev_root: self.dev_root.clone(),
            hdd_only,
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let succeeded = match &cli.command {
        Commands::List { hdd_only } => {
            list::list_devices(&cli.discovery(*hdd_only), cli.format).await?
        }
        Commands::Check(args) => {
            check::check_devices(&cli.discovery(args.hdd_only), args, cli.format).await?
        }
        Commands::Sleep(args) => {
            sleep::sleep_devices(&cli.discovery(args.hdd_only), args, cli.format).await?
        }
    };

    Ok(if succeeded {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

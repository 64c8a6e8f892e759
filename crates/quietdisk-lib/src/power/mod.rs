//! Drive power-state control
//!
//! Two hardware operations are exposed through [`PowerControl`]: querying the
//! current ATA power mode and putting the drive to sleep immediately.
//!
//! - [`AtaPowerControl`] issues the ATA commands itself (SG_IO passthrough
//!   with a legacy HDIO_DRIVE_CMD fallback)
//! - [`HdparmPowerControl`] shells out to a pre-installed `hdparm`

mod ata;
mod hdparm;
mod sgio;

pub use ata::{AtaPowerControl, AtaTransport, CHECK_POWER_MODE, SLEEP_NOW};
pub use hdparm::{parse_drive_state, HdparmPowerControl};
pub use sgio::{build_ata16_cdb, decode_sense, SgIoTransport};

pub use async_trait::async_trait;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

/// ATA power mode as reported by CHECK POWER MODE
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerMode {
    Standby,
    NvcacheSpindown,
    NvcacheSpinup,
    Idle,
    Active,
    Unknown,
}

impl PowerMode {
    /// Decode the sector count register returned by CHECK POWER MODE
    pub fn from_status(status: u8) -> Self {
        match status {
            0x00 => PowerMode::Standby,
            0x40 => PowerMode::NvcacheSpindown,
            0x41 => PowerMode::NvcacheSpinup,
            0x80 => PowerMode::Idle,
            0xff => PowerMode::Active,
            _ => PowerMode::Unknown,
        }
    }

    pub fn is_standby(&self) -> bool {
        matches!(self, PowerMode::Standby)
    }

    /// Name in the form printed by hdparm
    pub fn as_str(&self) -> &'static str {
        match self {
            PowerMode::Standby => "standby",
            PowerMode::NvcacheSpindown => "NVcache_spindown",
            PowerMode::NvcacheSpinup => "NVcache_spinup",
            PowerMode::Idle => "idle",
            PowerMode::Active => "active/idle",
            PowerMode::Unknown => "unknown",
        }
    }
}

impl fmt::Display for PowerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised while talking to a drive
#[derive(Debug, Error)]
pub enum PowerError {
    #[error("cannot open '{}': {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("ioctl {request} failed on '{}': {}", .path.display(), describe_errno(.errno))]
    Ioctl {
        request: &'static str,
        path: PathBuf,
        errno: i32,
    },

    #[error("'{}' returned unexpected sense data: 0x{marker:02x}", .path.display())]
    UnexpectedSense { path: PathBuf, marker: u8 },

    #[error("{0}")]
    Backend(String),

    #[error("power control task failed: {0}")]
    Task(String),
}

fn describe_errno(errno: &i32) -> String {
    io::Error::from_raw_os_error(*errno).to_string()
}

impl PowerError {
    /// True when the device node could not be opened for lack of privilege
    pub fn is_permission_denied(&self) -> bool {
        match self {
            PowerError::Open { source, .. } => source.kind() == io::ErrorKind::PermissionDenied,
            _ => false,
        }
    }

    /// Failures that an alternate opcode cannot fix
    pub fn is_terminal(&self) -> bool {
        matches!(self, PowerError::Open { .. })
    }
}

/// Trait for drive power-state backends
#[async_trait]
pub trait PowerControl: Send + Sync {
    /// Query the current power mode of the drive behind `path`
    async fn query_power_mode(&self, path: &Path) -> Result<PowerMode, PowerError>;

    /// Put the drive behind `path` to sleep
    async fn request_sleep(&self, path: &Path) -> Result<(), PowerError>;
}

/// Selects the power control backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Direct ATA passthrough ioctls
    #[default]
    Ata,
    /// External `hdparm` process
    Hdparm,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ata" => Ok(BackendKind::Ata),
            "hdparm" => Ok(BackendKind::Hdparm),
            other => Err(format!("unknown backend '{}', expected 'ata' or 'hdparm'", other)),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Ata => f.write_str("ata"),
            BackendKind::Hdparm => f.write_str("hdparm"),
        }
    }
}

/// Create the power control backend selected by `kind`
pub fn create_backend(kind: BackendKind) -> Arc<dyn PowerControl> {
    match kind {
        BackendKind::Ata => {
            tracing::info!("Using ATA passthrough power control");
            Arc::new(AtaPowerControl::new(SgIoTransport::default()))
        }
        BackendKind::Hdparm => {
            tracing::info!("Using hdparm power control");
            Arc::new(HdparmPowerControl::new())
        }
    }
}

//! Core data models shared by the daemon and the CLI

use crate::power::PowerMode;
use serde::{Deserialize, Serialize};

/// One row of the kernel per-device I/O statistics table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleRow {
    pub major: u32,
    pub minor: u32,
    pub kernel_name: String,
    pub reads_completed: u64,
    pub writes_completed: u64,
}

/// Block device found by directory discovery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredDevice {
    pub path: String,
    pub kernel_name: String,
    pub rotational: bool,
    pub partition: bool,
}

/// Result of a one-shot power operation against a device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PowerReport {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<PowerMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PowerReport {
    pub fn ok(path: impl Into<String>, mode: Option<PowerMode>) -> Self {
        Self {
            path: path.into(),
            mode,
            error: None,
        }
    }

    pub fn failed(path: impl Into<String>, error: impl ToString) -> Self {
        Self {
            path: path.into(),
            mode: None,
            error: Some(error.to_string()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

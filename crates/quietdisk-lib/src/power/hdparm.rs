//! Power control through an external `hdparm` process

use super::{async_trait, PowerControl, PowerError, PowerMode};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

const DRIVE_STATE_MARKER: &str = "drive state is: ";

/// Parse the power mode out of `hdparm -C` output
///
/// Returns `None` when the output carries no drive state line at all.
pub fn parse_drive_state(output: &str) -> Option<PowerMode> {
    let start = output.find(DRIVE_STATE_MARKER)? + DRIVE_STATE_MARKER.len();
    let state = output[start..].split_whitespace().next().unwrap_or_default();

    Some(match state {
        "standby" => PowerMode::Standby,
        "NVcache_spindown" => PowerMode::NvcacheSpindown,
        "NVcache_spinup" => PowerMode::NvcacheSpinup,
        "idle" => PowerMode::Idle,
        "active/idle" => PowerMode::Active,
        _ => PowerMode::Unknown,
    })
}

/// Runs `hdparm`, escalating through `sudo` or `doas` when not root
#[derive(Debug, Clone)]
pub struct HdparmPowerControl {
    hdparm: Option<PathBuf>,
    escalation: Option<PathBuf>,
    needs_escalation: bool,
}

impl Default for HdparmPowerControl {
    fn default() -> Self {
        Self::new()
    }
}

impl HdparmPowerControl {
    /// Locate the programs on `PATH`
    pub fn new() -> Self {
        // SAFETY: geteuid has no preconditions and cannot fail.
        let needs_escalation = unsafe { libc::geteuid() } != 0;
        let escalation = if needs_escalation {
            find_program("sudo").or_else(|| find_program("doas"))
        } else {
            None
        };

        Self {
            hdparm: find_program("hdparm"),
            escalation,
            needs_escalation,
        }
    }

    /// Use explicit program paths; `escalation` of `None` runs hdparm directly
    pub fn with_programs(hdparm: PathBuf, escalation: Option<PathBuf>) -> Self {
        Self {
            hdparm: Some(hdparm),
            needs_escalation: escalation.is_some(),
            escalation,
        }
    }

    fn command(&self, flag: &str, device: &Path) -> Result<Command, PowerError> {
        let hdparm = self
            .hdparm
            .as_ref()
            .ok_or_else(|| PowerError::Backend("hdparm is not installed".to_string()))?;

        let mut cmd = match (self.needs_escalation, &self.escalation) {
            (false, _) => Command::new(hdparm),
            (true, Some(helper)) => {
                let mut cmd = Command::new(helper);
                cmd.arg(hdparm);
                cmd
            }
            (true, None) => {
                return Err(PowerError::Backend(
                    "neither sudo nor doas is available".to_string(),
                ))
            }
        };

        cmd.arg(flag)
            .arg(device)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        Ok(cmd)
    }

    async fn run(&self, flag: &str, device: &Path) -> Result<String, PowerError> {
        let mut cmd = self.command(flag, device)?;
        debug!(device = %device.display(), flag, "Running hdparm");

        let output = cmd
            .output()
            .await
            .map_err(|e| PowerError::Backend(format!("failed to run hdparm: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PowerError::Backend(format!(
                "hdparm {} {} failed ({}): {}",
                flag,
                device.display(),
                output.status,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl PowerControl for HdparmPowerControl {
    async fn query_power_mode(&self, path: &Path) -> Result<PowerMode, PowerError> {
        let output = self.run("-C", path).await?;
        parse_drive_state(&output).ok_or_else(|| {
            PowerError::Backend(format!("could not get drive state of '{}'", path.display()))
        })
    }

    async fn request_sleep(&self, path: &Path) -> Result<(), PowerError> {
        self.run("-Y", path).await.map(|_| ())
    }
}

fn find_program(name: &str) -> Option<PathBuf> {
    which::which(name).ok()
}

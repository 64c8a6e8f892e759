//! ATA power commands with opcode fallback
//!
//! Each logical operation is an ordered list of opcodes. Different
//! controllers accept different subsets of the command set, so the
//! alternate opcode is tried when the primary one is rejected or its answer
//! is ambiguous. Failing to open the device node stops the chain at once.

use super::{async_trait, PowerControl, PowerError, PowerMode};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// CHECK POWER MODE, then its alternate encoding
pub const CHECK_POWER_MODE: [u8; 2] = [0xe5, 0x98];

/// SLEEP, then its alternate encoding
pub const SLEEP_NOW: [u8; 2] = [0xe6, 0x99];

/// Issues a single non-data ATA command and returns its result byte
pub trait AtaTransport: Send + Sync {
    fn issue(&self, path: &Path, opcode: u8) -> Result<u8, PowerError>;
}

/// Power control that drives the hardware through an [`AtaTransport`]
pub struct AtaPowerControl<T> {
    transport: Arc<T>,
}

impl<T> Clone for AtaPowerControl<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
        }
    }
}

impl<T: AtaTransport> AtaPowerControl<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport: Arc::new(transport),
        }
    }

    /// Blocking CHECK POWER MODE with fallback to the alternate opcode
    pub fn check_power_mode(&self, path: &Path) -> Result<PowerMode, PowerError> {
        let mut outcome = Ok(PowerMode::Unknown);

        for opcode in CHECK_POWER_MODE {
            match self.transport.issue(path, opcode) {
                Ok(status) => {
                    let mode = PowerMode::from_status(status);
                    if mode != PowerMode::Unknown {
                        return Ok(mode);
                    }
                    debug!(
                        device = %path.display(),
                        opcode = %format!("0x{:02x}", opcode),
                        status = %format!("0x{:02x}", status),
                        "Ambiguous power mode"
                    );
                    outcome = Ok(mode);
                }
                Err(e) if e.is_terminal() => return Err(e),
                Err(e) => {
                    debug!(
                        device = %path.display(),
                        opcode = %format!("0x{:02x}", opcode),
                        error = %e,
                        "Check power mode rejected"
                    );
                    outcome = Err(e);
                }
            }
        }

        outcome
    }

    /// Blocking SLEEP with fallback to the alternate opcode
    pub fn sleep_now(&self, path: &Path) -> Result<(), PowerError> {
        let mut outcome = Ok(());

        for opcode in SLEEP_NOW {
            match self.transport.issue(path, opcode) {
                Ok(_) => return Ok(()),
                Err(e) if e.is_terminal() => return Err(e),
                Err(e) => {
                    debug!(
                        device = %path.display(),
                        opcode = %format!("0x{:02x}", opcode),
                        error = %e,
                        "Sleep command rejected"
                    );
                    outcome = Err(e);
                }
            }
        }

        outcome
    }
}

#[async_trait]
impl<T: AtaTransport + 'static> PowerControl for AtaPowerControl<T> {
    async fn query_power_mode(&self, path: &Path) -> Result<PowerMode, PowerError> {
        let this = self.clone();
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || this.check_power_mode(&path))
            .await
            .map_err(|e| PowerError::Task(e.to_string()))?
    }

    async fn request_sleep(&self, path: &Path) -> Result<(), PowerError> {
        let this = self.clone();
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || this.sleep_now(&path))
            .await
            .map_err(|e| PowerError::Task(e.to_string()))?
    }
}

//! SG_IO ATA passthrough transport
//!
//! Wraps a non-data ATA command in an ATA PASS-THROUGH (16) CDB and sends it
//! with the SG_IO ioctl. Drivers that do not speak SG_IO get the older
//! HDIO_DRIVE_CMD ioctl instead.

use super::{AtaTransport, PowerError};
use std::fs::OpenOptions;
use std::os::unix::io::AsRawFd;
use std::path::Path;
use tracing::debug;

const SG_IO: u32 = 0x2285;
const HDIO_DRIVE_CMD: u32 = 0x031f;

const SG_INTERFACE_ID: libc::c_int = b'S' as libc::c_int;
const SG_DXFER_NONE: libc::c_int = -1;

const ATA_16: u8 = 0x85;
const ATA_PROTOCOL_NON_DATA: u8 = 3 << 1;
const ATA_CHECK_CONDITION: u8 = 0x20;
const ATA_USING_LBA: u8 = 0x40;

/// Descriptor-format sense data response code
const SENSE_DESCRIPTOR_FORMAT: u8 = 0x72;
/// Sector count register inside the ATA status return descriptor
const SENSE_RESULT_OFFSET: usize = 13;

const SENSE_LEN: usize = 32;
const DEFAULT_TIMEOUT_MS: u32 = 5000;

/// Linux `struct sg_io_hdr`
#[repr(C)]
struct SgIoHdr {
    interface_id: libc::c_int,
    dxfer_direction: libc::c_int,
    cmd_len: libc::c_uchar,
    mx_sb_len: libc::c_uchar,
    iovec_count: libc::c_ushort,
    dxfer_len: libc::c_uint,
    dxferp: *mut libc::c_void,
    cmdp: *mut libc::c_uchar,
    sbp: *mut libc::c_uchar,
    timeout: libc::c_uint,
    flags: libc::c_uint,
    pack_id: libc::c_int,
    usr_ptr: *mut libc::c_void,
    status: libc::c_uchar,
    masked_status: libc::c_uchar,
    msg_status: libc::c_uchar,
    sb_len_wr: libc::c_uchar,
    host_status: libc::c_ushort,
    driver_status: libc::c_ushort,
    resid: libc::c_int,
    duration: libc::c_uint,
    info: libc::c_uint,
}

/// Build an ATA PASS-THROUGH (16) CDB for a non-data command
pub fn build_ata16_cdb(opcode: u8) -> [u8; 16] {
    let mut cdb = [0u8; 16];
    cdb[0] = ATA_16;
    cdb[1] = ATA_PROTOCOL_NON_DATA;
    cdb[2] = ATA_CHECK_CONDITION;
    cdb[13] = ATA_USING_LBA;
    cdb[14] = opcode;
    cdb
}

/// Extract the ATA result byte from sense data
///
/// Returns the leading response code when the buffer is not in descriptor
/// format.
pub fn decode_sense(sense: &[u8]) -> Result<u8, u8> {
    match sense.first() {
        Some(&SENSE_DESCRIPTOR_FORMAT) if sense.len() > SENSE_RESULT_OFFSET => {
            Ok(sense[SENSE_RESULT_OFFSET])
        }
        Some(&marker) => Err(marker),
        None => Err(0),
    }
}

/// Transport issuing commands through SG_IO, falling back to HDIO_DRIVE_CMD
#[derive(Debug, Clone)]
pub struct SgIoTransport {
    timeout_ms: u32,
}

impl Default for SgIoTransport {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

impl SgIoTransport {
    fn sg_io(&self, fd: libc::c_int, opcode: u8) -> Result<[u8; SENSE_LEN], i32> {
        let mut cdb = build_ata16_cdb(opcode);
        let mut sense = [0u8; SENSE_LEN];

        let mut hdr = SgIoHdr {
            interface_id: SG_INTERFACE_ID,
            dxfer_direction: SG_DXFER_NONE,
            cmd_len: cdb.len() as libc::c_uchar,
            mx_sb_len: sense.len() as libc::c_uchar,
            iovec_count: 0,
            dxfer_len: 0,
            dxferp: std::ptr::null_mut(),
            cmdp: cdb.as_mut_ptr(),
            sbp: sense.as_mut_ptr(),
            timeout: self.timeout_ms,
            flags: 0,
            pack_id: 0,
            usr_ptr: std::ptr::null_mut(),
            status: 0,
            masked_status: 0,
            msg_status: 0,
            sb_len_wr: 0,
            host_status: 0,
            driver_status: 0,
            resid: 0,
            duration: 0,
            info: 0,
        };

        // SAFETY: hdr points at live cdb/sense buffers for the whole call and
        // no data phase is requested.
        let rc = unsafe { libc::ioctl(fd, SG_IO as _, &mut hdr as *mut SgIoHdr) };
        if rc < 0 {
            return Err(last_errno());
        }
        Ok(sense)
    }

    fn hdio_drive_cmd(&self, fd: libc::c_int, opcode: u8) -> Result<u8, i32> {
        // command, sector number, feature, sector count
        let mut args = [opcode, 0u8, 0u8, 0u8];

        // SAFETY: HDIO_DRIVE_CMD reads and writes exactly four bytes when no
        // data sectors are requested.
        let rc = unsafe { libc::ioctl(fd, HDIO_DRIVE_CMD as _, args.as_mut_ptr()) };
        if rc < 0 {
            return Err(last_errno());
        }
        Ok(args[2])
    }
}

impl AtaTransport for SgIoTransport {
    fn issue(&self, path: &Path, opcode: u8) -> Result<u8, PowerError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|source| PowerError::Open {
                path: path.to_path_buf(),
                source,
            })?;
        let fd = file.as_raw_fd();

        match self.sg_io(fd, opcode) {
            Ok(sense) => decode_sense(&sense).map_err(|marker| PowerError::UnexpectedSense {
                path: path.to_path_buf(),
                marker,
            }),
            Err(errno) if matches!(errno, libc::EINVAL | libc::ENODEV | libc::EBADE) => {
                debug!(
                    device = %path.display(),
                    errno,
                    "SG_IO unsupported, using HDIO_DRIVE_CMD"
                );
                self.hdio_drive_cmd(fd, opcode)
                    .map_err(|errno| PowerError::Ioctl {
                        request: "HDIO_DRIVE_CMD",
                        path: path.to_path_buf(),
                        errno,
                    })
            }
            Err(errno) => Err(PowerError::Ioctl {
                request: "SG_IO",
                path: path.to_path_buf(),
                errno,
            }),
        }
    }
}

fn last_errno() -> i32 {
    std::io::Error::last_os_error()
        .raw_os_error()
        .unwrap_or(libc::EIO)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cdb_layout() {
        let cdb = build_ata16_cdb(0xe5);
        assert_eq!(cdb[0], 0x85);
        assert_eq!(cdb[1], 0x06);
        assert_eq!(cdb[2], 0x20);
        assert_eq!(cdb[13], 0x40);
        assert_eq!(cdb[14], 0xe5);
        assert!(cdb[3..13].iter().all(|b| *b == 0));
        assert_eq!(cdb[15], 0);
    }

    #[test]
    fn test_decode_descriptor_sense() {
        let mut sense = [0u8; SENSE_LEN];
        sense[0] = 0x72;
        sense[13] = 0xff;
        assert_eq!(decode_sense(&sense), Ok(0xff));
    }

    #[test]
    fn test_decode_fixed_format_sense_is_rejected() {
        let mut sense = [0u8; SENSE_LEN];
        sense[0] = 0x70;
        assert_eq!(decode_sense(&sense), Err(0x70));
        assert_eq!(decode_sense(&[]), Err(0));
        assert_eq!(decode_sense(&[0x72, 0, 0]), Err(0x72));
    }

    #[test]
    fn test_sg_io_hdr_size_matches_kernel() {
        #[cfg(target_pointer_width = "64")]
        assert_eq!(std::mem::size_of::<SgIoHdr>(), 88);
        #[cfg(target_pointer_width = "32")]
        assert_eq!(std::mem::size_of::<SgIoHdr>(), 64);
    }

    #[test]
    fn test_missing_node_is_open_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let missing = dir.path().join("sdz");
        let err = SgIoTransport::default().issue(&missing, 0xe5).unwrap_err();

        assert!(matches!(err, PowerError::Open { .. }));
        assert!(err.is_terminal());
    }
}

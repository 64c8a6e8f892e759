//! Tracked block devices
//!
//! A [`Device`] is keyed by its device node path. The kernel major/minor
//! pair is a derived attribute, re-resolved every poll tick so hot-swapped
//! drives that come back under new numbers are still matched.

use std::collections::btree_map::{self, BTreeMap};
use std::fs;
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Reasons a device cannot be tracked
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("device '{}' is a partition, it cannot be tracked", .0.display())]
    Partition(PathBuf),

    #[error("device '{}' is not rotational", .0.display())]
    NotRotational(PathBuf),

    #[error("device '{}' is not available", .0.display())]
    Unavailable(PathBuf),
}

/// One tracked block device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    path: PathBuf,
    /// Short name used by the kernel statistics table
    pub kernel_name: String,
    pub major: u32,
    pub minor: u32,
    pub read_count: u64,
    pub write_count: u64,
    pub last_activity_at: i64,
    /// Time of the last successful sleep command, 0 if never slept
    pub last_sleep_at: i64,
    /// Time of the last power mode verification, 0 if never verified
    pub last_verified_at: i64,
    pub present: bool,
    pub asleep: bool,
    pub rotational: bool,
}

impl Device {
    /// Create a device for `path`, rejecting partitions
    pub fn new(path: impl AsRef<Path>, sysfs_root: &Path) -> Result<Self, DeviceError> {
        let path = normalize_path(path.as_ref());
        let kernel_name = kernel_name_for(&path);

        if is_partition(sysfs_root, &kernel_name) {
            return Err(DeviceError::Partition(path));
        }
        let rotational = is_rotational(sysfs_root, &kernel_name);

        Ok(Self::with_identity(path, kernel_name, rotational))
    }

    fn with_identity(path: PathBuf, kernel_name: String, rotational: bool) -> Self {
        Self {
            path,
            kernel_name,
            major: 0,
            minor: 0,
            read_count: 0,
            write_count: 0,
            last_activity_at: 0,
            last_sleep_at: 0,
            last_verified_at: 0,
            present: false,
            asleep: false,
            rotational,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-resolve kernel name and major/minor from the device node
    ///
    /// A missing node, one that is not a block special file, or a link that
    /// now points at a partition resets the device so no stale counters
    /// survive a hot-unplug.
    pub fn refresh_identity(&mut self, sysfs_root: &Path) -> Result<(), DeviceError> {
        let kernel_name = kernel_name_for(&self.path);
        if is_partition(sysfs_root, &kernel_name) {
            self.reset();
            return Err(DeviceError::Partition(self.path.clone()));
        }

        match fs::metadata(&self.path) {
            Ok(meta) if meta.file_type().is_block_device() => {
                self.kernel_name = kernel_name;
                self.bind(meta.rdev());
                Ok(())
            }
            _ => {
                self.reset();
                Err(DeviceError::Unavailable(self.path.clone()))
            }
        }
    }

    /// Mark present under the kernel identifier `rdev`
    pub(crate) fn bind(&mut self, rdev: u64) {
        let (major, minor) = decode_rdev(rdev);
        self.present = true;
        self.major = major;
        self.minor = minor;
    }

    /// Clear everything except the path
    pub fn reset(&mut self) {
        self.present = false;
        self.major = 0;
        self.minor = 0;
        self.read_count = 0;
        self.write_count = 0;
        self.last_activity_at = 0;
        self.last_sleep_at = 0;
        self.last_verified_at = 0;
        self.asleep = false;
    }
}

/// Split a Linux `dev_t` into major and minor numbers
pub fn decode_rdev(rdev: u64) -> (u32, u32) {
    let major = ((rdev >> 8) & 0xfff) | ((rdev >> 32) & !0xfff);
    let minor = (rdev & 0xff) | ((rdev >> 12) & !0xff);
    (major as u32, minor as u32)
}

/// True if sysfs carries a partition marker for `kernel_name`
pub fn is_partition(sysfs_root: &Path, kernel_name: &str) -> bool {
    sysfs_root
        .join("class/block")
        .join(kernel_name)
        .join("partition")
        .exists()
}

/// True if sysfs reports a rotational medium for `kernel_name`
pub fn is_rotational(sysfs_root: &Path, kernel_name: &str) -> bool {
    fs::read_to_string(
        sysfs_root
            .join("block")
            .join(kernel_name)
            .join("queue/rotational"),
    )
    .map(|s| s.trim() == "1")
    .unwrap_or(false)
}

fn normalize_path(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    let trimmed = raw.trim_end_matches('/');
    if trimmed.is_empty() {
        PathBuf::from("/")
    } else {
        PathBuf::from(trimmed)
    }
}

/// Kernel name of the node, following symlinks such as `/dev/disk/by-id/*`
fn kernel_name_for(path: &Path) -> String {
    let resolved = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    resolved
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Tracked devices keyed by path
#[derive(Debug, Default, Clone)]
pub struct DeviceSet {
    devices: BTreeMap<PathBuf, Device>,
}

impl DeviceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a device unless its path is already tracked
    pub fn insert(&mut self, device: Device) -> bool {
        match self.devices.entry(device.path.clone()) {
            btree_map::Entry::Vacant(slot) => {
                slot.insert(device);
                true
            }
            btree_map::Entry::Occupied(_) => false,
        }
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.devices.contains_key(path)
    }

    pub fn get(&self, path: &Path) -> Option<&Device> {
        self.devices.get(path)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Device> {
        self.devices.values()
    }

    /// Keep only devices for which `keep` returns true
    pub fn retain(&mut self, mut keep: impl FnMut(&mut Device) -> bool) {
        self.devices.retain(|_, device| keep(device));
    }

    /// Find the present device bound to `major:minor`
    pub fn find_by_kernel_id_mut(&mut self, major: u32, minor: u32) -> Option<&mut Device> {
        self.devices
            .values_mut()
            .find(|d| d.present && d.major == major && d.minor == minor)
    }
}

impl FromIterator<Device> for DeviceSet {
    fn from_iter<I: IntoIterator<Item = Device>>(iter: I) -> Self {
        let mut set = DeviceSet::new();
        for device in iter {
            set.insert(device);
        }
        set
    }
}

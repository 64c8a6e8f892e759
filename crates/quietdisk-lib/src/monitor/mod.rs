//! Drive activity monitoring
//!
//! This module tracks block devices, samples their cumulative I/O counters
//! from the kernel and decides when an idle drive should be put to sleep.
//! Hot-swapped devices are re-bound to their path every poll tick.

mod device;
mod discovery;
mod r#loop;
mod sampler;
mod state;


pub use device::{decode_rdev, is_partition, is_rotational, Device, DeviceError, DeviceSet};
pub use discovery::{
    create_device, describe_devices, list_block_devices, resolve_devices, DiscoveryConfig,
};
pub use r#loop::{PollConfig, PollLoop, PollLoopBuilder, TickSummary};
pub use sampler::{parse_diskstats, DiskstatsSampler, ParsedStats};
pub use state::{IdlePolicy, Transition};

//! Poll loop
//!
//! Drives the sampler and the state machine on a fixed interval and owns
//! the tracked device set. One tick runs at a time and hardware commands
//! are awaited one after another.

use super::discovery::{create_device, list_block_devices, DiscoveryConfig};
use super::sampler::{DiskstatsSampler, ParsedStats};
use super::state::{IdlePolicy, Transition};
use super::DeviceSet;
use crate::health::{components, HealthRegistry};
use crate::observability::{DaemonMetrics, StructuredLogger};
use crate::power::PowerControl;
use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Consecutive failed samples before the sampler is reported unhealthy
const SAMPLER_UNHEALTHY_AFTER: u32 = 3;

/// Configuration for the poll loop
#[derive(Debug, Clone)]
pub struct PollConfig {
    pub policy: IdlePolicy,
    /// Add newly discovered devices and drop vanished ones every tick
    pub all_devices: bool,
    pub discovery: DiscoveryConfig,
    pub diskstats_path: PathBuf,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            policy: IdlePolicy::default(),
            all_devices: false,
            discovery: DiscoveryConfig::default(),
            diskstats_path: PathBuf::from("/proc/diskstats"),
        }
    }
}

/// What happened during one tick
#[derive(Debug, Default)]
pub struct TickSummary {
    pub tracked: usize,
    pub matched: usize,
    pub malformed: usize,
    pub transitions: Vec<(PathBuf, Transition)>,
}

impl TickSummary {
    pub fn count(&self, pred: impl Fn(&Transition) -> bool) -> usize {
        self.transitions.iter().filter(|(_, t)| pred(t)).count()
    }
}

/// Periodic sampler and state machine driver
pub struct PollLoop {
    power: Arc<dyn PowerControl>,
    sampler: DiskstatsSampler,
    devices: DeviceSet,
    config: PollConfig,
    metrics: DaemonMetrics,
    health: HealthRegistry,
    logger: StructuredLogger,
    sampler_failures: u32,
}

impl PollLoop {
    pub fn new(
        power: Arc<dyn PowerControl>,
        devices: DeviceSet,
        config: PollConfig,
        health: HealthRegistry,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            power,
            sampler: DiskstatsSampler::new(&config.diskstats_path),
            devices,
            config,
            metrics: DaemonMetrics::new(),
            health,
            logger,
            sampler_failures: 0,
        }
    }

    pub fn devices(&self) -> &DeviceSet {
        &self.devices
    }

    /// Run until a shutdown signal arrives
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        let period = self.config.policy.poll_interval();
        info!(interval_secs = period.as_secs(), "Starting poll loop");

        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let now = chrono::Utc::now().timestamp();
                    let summary = self.tick(now).await;
                    debug!(
                        tracked = summary.tracked,
                        matched = summary.matched,
                        transitions = summary.transitions.len(),
                        "Poll cycle complete"
                    );
                }
                _ = shutdown.recv() => {
                    info!("Shutting down poll loop");
                    break;
                }
            }
        }
    }

    /// Refresh the device set, sample counters and step every matched device
    pub async fn tick(&mut self, now: i64) -> TickSummary {
        let start = Instant::now();
        debug!("Updating devices");

        if let Err(e) = self.refresh_devices().await {
            warn!(error = %e, "Device refresh failed");
        }

        let mut summary = TickSummary {
            tracked: self.devices.len(),
            ..Default::default()
        };
        self.metrics.set_devices_tracked(summary.tracked as i64);

        match self.sampler.sample().await {
            Ok(stats) => {
                self.sampler_failures = 0;
                self.health.set_healthy(components::SAMPLER).await;
                summary.malformed = stats.malformed;
                self.metrics.add_malformed_rows(stats.malformed as u64);
                self.apply_sample(&stats, now, &mut summary).await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to sample I/O counters");
                self.sampler_failures += 1;
                if self.sampler_failures >= SAMPLER_UNHEALTHY_AFTER {
                    self.health
                        .set_unhealthy(components::SAMPLER, e.to_string())
                        .await;
                } else {
                    self.health
                        .set_degraded(components::SAMPLER, e.to_string())
                        .await;
                }
            }
        }

        self.record(&summary).await;
        self.metrics
            .observe_poll_duration(start.elapsed().as_secs_f64());
        summary
    }

    /// Pick up new devices and re-resolve kernel identifiers
    ///
    /// In all-devices mode vanished devices and links that turned into
    /// partitions are dropped, otherwise they stay tracked but not present.
    /// Identities are refreshed even when discovery itself fails.
    pub async fn refresh_devices(&mut self) -> Result<()> {
        if self.config.all_devices {
            match list_block_devices(&self.config.discovery).await {
                Ok(paths) => self.add_new_devices(paths),
                Err(e) => warn!(error = %format!("{:#}", e), "Device discovery failed"),
            }
        }

        anyhow::ensure!(!self.devices.is_empty(), "no device is available");

        let all_devices = self.config.all_devices;
        let sysfs_root = self.config.discovery.sysfs_root.clone();
        self.devices.retain(|device| {
            let was_present = device.present;
            match device.refresh_identity(&sysfs_root) {
                Ok(()) => {
                    if !was_present {
                        debug!(
                            device = %device.path().display(),
                            major = device.major,
                            minor = device.minor,
                            "Device is available"
                        );
                    }
                    true
                }
                Err(e) => {
                    if was_present {
                        warn!(error = %e, "Device disappeared");
                    }
                    !all_devices
                }
            }
        });

        Ok(())
    }

    fn add_new_devices(&mut self, paths: Vec<PathBuf>) {
        for path in paths {
            if self.devices.contains(&path) {
                continue;
            }
            match create_device(&path, &self.config.discovery) {
                Ok(device) => {
                    info!(device = %path.display(), "Tracking new device");
                    self.devices.insert(device);
                }
                Err(e) => debug!(error = %e, "Skipping device"),
            }
        }
    }

    /// Correlate sampled rows with tracked devices and step each match
    pub async fn apply_sample(&mut self, stats: &ParsedStats, now: i64, summary: &mut TickSummary) {
        for row in &stats.rows {
            let Some(device) = self.devices.find_by_kernel_id_mut(row.major, row.minor) else {
                continue;
            };
            summary.matched += 1;
            device.kernel_name.clone_from(&row.kernel_name);

            let transitions = self
                .config
                .policy
                .step(
                    device,
                    row.reads_completed,
                    row.writes_completed,
                    now,
                    self.power.as_ref(),
                )
                .await;

            let path = device.path().to_path_buf();
            summary
                .transitions
                .extend(transitions.into_iter().map(|t| (path.clone(), t)));
        }
    }

    pub(crate) async fn record(&self, summary: &TickSummary) {
        let mut hardware_ok = false;
        let mut hardware_failed = None;

        for (path, transition) in &summary.transitions {
            let device = path.display().to_string();
            match transition {
                Transition::SleepIssued => {
                    self.metrics.inc_sleep_commands();
                    self.logger.log_sleep_issued(&device);
                    hardware_ok = true;
                }
                Transition::SleepFailed(error) => {
                    self.metrics.inc_sleep_failures();
                    warn!(device = %device, error = %error, "Failed to put device to sleep");
                    hardware_failed = Some(error.clone());
                }
                Transition::WokeUnexpectedly(mode) => {
                    self.metrics.inc_unexpected_wakeups();
                    self.logger.log_unexpected_wake(&device, *mode);
                    hardware_ok = true;
                }
                Transition::VerifyFailed(error) => {
                    self.metrics.inc_power_query_errors();
                    warn!(device = %device, error = %error, "Failed to query power mode");
                    hardware_failed = Some(error.clone());
                }
                Transition::StandbyConfirmed => hardware_ok = true,
                Transition::ActivityDetected
                | Transition::CountersRebased
                | Transition::TooSoon => {}
            }
        }

        if let Some(error) = hardware_failed {
            self.health
                .set_degraded(components::POWER_CONTROL, error)
                .await;
        } else if hardware_ok {
            self.health.set_healthy(components::POWER_CONTROL).await;
        }
    }
}

/// Builder for the poll loop
pub struct PollLoopBuilder {
    power: Option<Arc<dyn PowerControl>>,
    devices: DeviceSet,
    config: PollConfig,
    health: Option<HealthRegistry>,
    logger: Option<StructuredLogger>,
}

impl PollLoopBuilder {
    pub fn new() -> Self {
        Self {
            power: None,
            devices: DeviceSet::new(),
            config: PollConfig::default(),
            health: None,
            logger: None,
        }
    }

    /// Set the power control backend
    pub fn power(mut self, power: Arc<dyn PowerControl>) -> Self {
        self.power = Some(power);
        self
    }

    /// Set the initial device set
    pub fn devices(mut self, devices: DeviceSet) -> Self {
        self.devices = devices;
        self
    }

    pub fn policy(mut self, policy: IdlePolicy) -> Self {
        self.config.policy = policy;
        self
    }

    pub fn all_devices(mut self, all_devices: bool) -> Self {
        self.config.all_devices = all_devices;
        self
    }

    pub fn discovery(mut self, discovery: DiscoveryConfig) -> Self {
        self.config.discovery = discovery;
        self
    }

    pub fn diskstats_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.diskstats_path = path.into();
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Build the poll loop
    pub fn build(self) -> Result<PollLoop> {
        let power = self
            .power
            .ok_or_else(|| anyhow::anyhow!("Power control backend is required"))?;
        anyhow::ensure!(
            self.config.all_devices || !self.devices.is_empty(),
            "At least one device is required unless all devices are tracked"
        );

        Ok(PollLoop::new(
            power,
            self.devices,
            self.config,
            self.health.unwrap_or_default(),
            self.logger.unwrap_or_default(),
        ))
    }
}

impl Default for PollLoopBuilder {
    fn default() -> Self {
        Self::new()
    }
}

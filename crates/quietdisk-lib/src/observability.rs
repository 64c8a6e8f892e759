//! Observability for the standby daemon
//!
//! Provides:
//! - Prometheus metrics (poll latency, tracked devices, sleep/wake counters)
//! - Structured event logging with tracing

use crate::power::PowerMode;
use prometheus::{
    register_histogram, register_int_counter, register_int_gauge, Encoder, Histogram,
    IntCounter, IntGauge, TextEncoder,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Poll durations are dominated by hardware commands with a 5s timeout
const POLL_BUCKETS: &[f64] = &[0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0];

static GLOBAL_METRICS: OnceLock<DaemonMetricsInner> = OnceLock::new();

struct DaemonMetricsInner {
    devices_tracked: IntGauge,
    poll_duration_seconds: Histogram,
    sleep_commands: IntCounter,
    sleep_failures: IntCounter,
    unexpected_wakeups: IntCounter,
    power_query_errors: IntCounter,
    malformed_rows: IntCounter,
}

impl DaemonMetricsInner {
    fn new() -> Self {
        Self {
            devices_tracked: register_int_gauge!(
                "quietdisk_devices_tracked",
                "Number of block devices currently tracked"
            )
            .expect("Failed to register devices_tracked"),

            poll_duration_seconds: register_histogram!(
                "quietdisk_poll_duration_seconds",
                "Time spent in one poll cycle",
                POLL_BUCKETS.to_vec()
            )
            .expect("Failed to register poll_duration_seconds"),

            sleep_commands: register_int_counter!(
                "quietdisk_sleep_commands_total",
                "Sleep commands accepted by a drive"
            )
            .expect("Failed to register sleep_commands_total"),

            sleep_failures: register_int_counter!(
                "quietdisk_sleep_failures_total",
                "Sleep commands that failed"
            )
            .expect("Failed to register sleep_failures_total"),

            unexpected_wakeups: register_int_counter!(
                "quietdisk_unexpected_wakeups_total",
                "Drives found awake while believed asleep"
            )
            .expect("Failed to register unexpected_wakeups_total"),

            power_query_errors: register_int_counter!(
                "quietdisk_power_query_errors_total",
                "Power mode queries that failed"
            )
            .expect("Failed to register power_query_errors_total"),

            malformed_rows: register_int_counter!(
                "quietdisk_malformed_rows_total",
                "Statistics table rows skipped as malformed"
            )
            .expect("Failed to register malformed_rows_total"),
        }
    }
}

/// Handle to the process-wide Prometheus metrics
///
/// Clones share the same underlying metrics.
#[derive(Clone)]
pub struct DaemonMetrics {
    _private: (),
}

impl Default for DaemonMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl DaemonMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(DaemonMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &DaemonMetricsInner {
        GLOBAL_METRICS.get_or_init(DaemonMetricsInner::new)
    }

    pub fn set_devices_tracked(&self, count: i64) {
        self.inner().devices_tracked.set(count);
    }

    pub fn observe_poll_duration(&self, duration_secs: f64) {
        self.inner().poll_duration_seconds.observe(duration_secs);
    }

    pub fn inc_sleep_commands(&self) {
        self.inner().sleep_commands.inc();
    }

    pub fn inc_sleep_failures(&self) {
        self.inner().sleep_failures.inc();
    }

    pub fn inc_unexpected_wakeups(&self) {
        self.inner().unexpected_wakeups.inc();
    }

    pub fn inc_power_query_errors(&self) {
        self.inner().power_query_errors.inc();
    }

    pub fn add_malformed_rows(&self, rows: u64) {
        self.inner().malformed_rows.inc_by(rows);
    }

    /// Render every registered metric in the text exposition format
    pub fn render(&self) -> Result<Vec<u8>, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&prometheus::gather(), &mut buffer)?;
        Ok(buffer)
    }
}

/// Structured logger for daemon events
#[derive(Clone)]
pub struct StructuredLogger {
    host: String,
}

impl Default for StructuredLogger {
    fn default() -> Self {
        Self::new("localhost")
    }
}

impl StructuredLogger {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }

    /// Logger tagged with this machine's hostname, `localhost` if unknown
    pub fn for_local_host() -> Self {
        hostname::get()
            .ok()
            .and_then(|name| name.into_string().ok())
            .filter(|name| !name.is_empty())
            .map(Self::new)
            .unwrap_or_default()
    }

    pub fn log_startup(&self, version: &str, backend: &str, devices: usize) {
        info!(
            event = "daemon_started",
            host = %self.host,
            version = %version,
            backend = %backend,
            devices = devices,
            "quietdisk started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "daemon_shutdown",
            host = %self.host,
            reason = %reason,
            "quietdisk shutting down"
        );
    }

    pub fn log_sleep_issued(&self, device: &str) {
        info!(
            event = "sleep_issued",
            host = %self.host,
            device = %device,
            "Put device to sleep"
        );
    }

    pub fn log_unexpected_wake(&self, device: &str, mode: PowerMode) {
        warn!(
            event = "unexpected_wake",
            host = %self.host,
            device = %device,
            power_mode = %mode,
            "Device is awake, but should be asleep"
        );
    }
}

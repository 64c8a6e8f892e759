//! Idle/sleep state machine
//!
//! Evaluated once per device per poll tick. Rules run in order:
//!
//! 1. Activity: a counter delta at or above the threshold marks the device
//!    active and ends the tick for that device.
//! 2. Verification: a device believed asleep is queried at most once per
//!    idle period; anything other than standby clears `asleep`.
//! 3. Sleep: an awake device idle for the idle period is put to sleep,
//!    at most once per grace period measured from the previous sleep.

use super::Device;
use crate::power::{PowerControl, PowerMode};
use std::time::Duration;
use tracing::debug;

const MAX_POLL_INTERVAL_SECS: u64 = 60;

/// Timing and threshold knobs for idle detection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdlePolicy {
    /// Inactivity required before a device may sleep (default: 300 seconds)
    pub idle_period: Duration,
    /// Minimum spacing between sleep commands (default: 600 seconds)
    pub grace_period: Duration,
    /// Minimum counter delta counted as activity (default: 1)
    pub threshold: u64,
}

impl Default for IdlePolicy {
    fn default() -> Self {
        Self {
            idle_period: Duration::from_secs(300),
            grace_period: Duration::from_secs(600),
            threshold: 1,
        }
    }
}

/// Outcome recorded while stepping one device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    ActivityDetected,
    /// A counter went backwards; the regressed counter was re-baselined
    CountersRebased,
    StandbyConfirmed,
    WokeUnexpectedly(PowerMode),
    VerifyFailed(String),
    SleepIssued,
    SleepFailed(String),
    /// Idle long enough but still inside the grace period
    TooSoon,
}

impl IdlePolicy {
    /// Seconds between poll ticks: `min(60, idle period)`, at least one
    pub fn poll_interval(&self) -> Duration {
        let secs = self.idle_period.as_secs().min(MAX_POLL_INTERVAL_SECS).max(1);
        Duration::from_secs(secs)
    }

    fn idle_secs(&self) -> i64 {
        self.idle_period.as_secs() as i64
    }

    fn grace_secs(&self) -> i64 {
        self.grace_period.as_secs() as i64
    }

    /// Apply one sample of cumulative counters taken at `now`
    pub async fn step(
        &self,
        device: &mut Device,
        reads: u64,
        writes: u64,
        now: i64,
        power: &dyn PowerControl,
    ) -> Vec<Transition> {
        let mut transitions = Vec::new();

        if !device.present {
            return transitions;
        }

        let dr = reads.checked_sub(device.read_count);
        let dw = writes.checked_sub(device.write_count);
        let active = dr.map_or(false, |d| d >= self.threshold)
            || dw.map_or(false, |d| d >= self.threshold);

        if active {
            device.read_count = reads;
            device.write_count = writes;
            device.last_activity_at = now;
            device.asleep = false;
            debug!(device = %device.path().display(), "I/O counters changed");
            transitions.push(Transition::ActivityDetected);
            return transitions;
        }

        if dr.is_none() || dw.is_none() {
            debug!(
                device = %device.path().display(),
                old_reads = device.read_count,
                old_writes = device.write_count,
                reads,
                writes,
                "I/O counters went backwards, re-baselining"
            );
            if dr.is_none() {
                device.read_count = reads;
            }
            if dw.is_none() {
                device.write_count = writes;
            }
            transitions.push(Transition::CountersRebased);
        }

        if device.asleep {
            let reference = device.last_sleep_at.max(device.last_verified_at);
            if now - reference >= self.idle_secs() {
                device.last_verified_at = now;
                match power.query_power_mode(device.path()).await {
                    Ok(mode) if mode.is_standby() => {
                        transitions.push(Transition::StandbyConfirmed);
                    }
                    Ok(mode) => {
                        device.asleep = false;
                        transitions.push(Transition::WokeUnexpectedly(mode));
                    }
                    Err(e) => {
                        transitions.push(Transition::VerifyFailed(e.to_string()));
                    }
                }
            }
        }

        if !device.asleep && now - device.last_activity_at >= self.idle_secs() {
            let grace_elapsed =
                device.last_sleep_at == 0 || now - device.last_sleep_at >= self.grace_secs();

            if grace_elapsed {
                match power.request_sleep(device.path()).await {
                    Ok(()) => {
                        device.last_sleep_at = now;
                        device.asleep = true;
                        transitions.push(Transition::SleepIssued);
                    }
                    Err(e) => transitions.push(Transition::SleepFailed(e.to_string())),
                }
            } else {
                debug!(
                    device = %device.path().display(),
                    "It is too soon to put device to sleep"
                );
                transitions.push(Transition::TooSoon);
            }
        }

        transitions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::power::{async_trait, PowerError};
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;

    /// Records every hardware call and answers from fixed settings
    struct MockPower {
        mode: Mutex<Result<PowerMode, ()>>,
        sleep_ok: Mutex<bool>,
        queries: Mutex<usize>,
        sleeps: Mutex<usize>,
    }

    impl MockPower {
        fn new() -> Self {
            Self {
                mode: Mutex::new(Ok(PowerMode::Standby)),
                sleep_ok: Mutex::new(true),
                queries: Mutex::new(0),
                sleeps: Mutex::new(0),
            }
        }

        fn set_mode(&self, mode: Result<PowerMode, ()>) {
            *self.mode.lock().unwrap() = mode;
        }

        fn queries(&self) -> usize {
            *self.queries.lock().unwrap()
        }

        fn sleeps(&self) -> usize {
            *self.sleeps.lock().unwrap()
        }
    }

    #[async_trait]
    impl PowerControl for MockPower {
        async fn query_power_mode(&self, path: &Path) -> Result<PowerMode, PowerError> {
            *self.queries.lock().unwrap() += 1;
            let mode = *self.mode.lock().unwrap();
            mode.map_err(|_| PowerError::Ioctl {
                request: "SG_IO",
                path: path.to_path_buf(),
                errno: libc::EIO,
            })
        }

        async fn request_sleep(&self, path: &Path) -> Result<(), PowerError> {
            *self.sleeps.lock().unwrap() += 1;
            if *self.sleep_ok.lock().unwrap() {
                Ok(())
            } else {
                Err(PowerError::Backend(format!("{} refused", path.display())))
            }
        }
    }

    fn device() -> Device {
        let sysfs = PathBuf::from("/nonexistent-sysfs");
        let mut device = Device::new("/dev/quietdisk-test-sdx", &sysfs).unwrap();
        device.bind(0x0810);
        device
    }

    const T0: i64 = 1_000_000;

    /// Device that became active at `T0 - 300` with counters (100, 50)
    async fn idle_device(policy: &IdlePolicy, power: &MockPower) -> Device {
        let mut dev = device();
        let t = policy.step(&mut dev, 100, 50, T0 - 300, power).await;
        assert_eq!(t, vec![Transition::ActivityDetected]);
        dev
    }

    #[test]
    fn test_poll_interval() {
        assert_eq!(IdlePolicy::default().poll_interval(), Duration::from_secs(60));

        let policy = IdlePolicy {
            idle_period: Duration::from_secs(20),
            ..Default::default()
        };
        assert_eq!(policy.poll_interval(), Duration::from_secs(20));

        let policy = IdlePolicy {
            idle_period: Duration::ZERO,
            ..Default::default()
        };
        assert_eq!(policy.poll_interval(), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_activity_short_circuits() {
        let policy = IdlePolicy::default();
        let power = MockPower::new();
        let mut dev = idle_device(&policy, &power).await;
        dev.asleep = true;
        dev.last_sleep_at = T0 - 1000;

        let t = policy.step(&mut dev, 100, 51, T0, &power).await;

        assert_eq!(t, vec![Transition::ActivityDetected]);
        assert!(!dev.asleep);
        assert_eq!(dev.last_activity_at, T0);
        assert_eq!((dev.read_count, dev.write_count), (100, 51));
        assert_eq!(power.queries(), 0);
        assert_eq!(power.sleeps(), 0);
    }

    #[tokio::test]
    async fn test_below_threshold_is_not_activity() {
        let policy = IdlePolicy {
            threshold: 5,
            ..Default::default()
        };
        let power = MockPower::new();
        let mut dev = idle_device(&policy, &power).await;

        let t = policy.step(&mut dev, 104, 54, T0 - 200, &power).await;
        assert!(t.is_empty());
        assert_eq!(dev.last_activity_at, T0 - 300);
        // sub-threshold increments accumulate against the stored baseline
        assert_eq!((dev.read_count, dev.write_count), (100, 50));

        let t = policy.step(&mut dev, 105, 54, T0 - 100, &power).await;
        assert_eq!(t, vec![Transition::ActivityDetected]);
    }

    #[tokio::test]
    async fn test_idle_device_is_put_to_sleep_once() {
        let policy = IdlePolicy::default();
        let power = MockPower::new();
        let mut dev = idle_device(&policy, &power).await;

        let t = policy.step(&mut dev, 100, 50, T0 - 1, &power).await;
        assert!(t.is_empty());

        let t = policy.step(&mut dev, 100, 50, T0, &power).await;
        assert_eq!(t, vec![Transition::SleepIssued]);
        assert!(dev.asleep);
        assert_eq!(dev.last_sleep_at, T0);

        let t = policy.step(&mut dev, 100, 50, T0 + 60, &power).await;
        assert!(t.is_empty());
        assert_eq!(power.sleeps(), 1);
    }

    #[tokio::test]
    async fn test_failed_sleep_leaves_state_and_retries() {
        let policy = IdlePolicy::default();
        let power = MockPower::new();
        *power.sleep_ok.lock().unwrap() = false;
        let mut dev = idle_device(&policy, &power).await;

        let t = policy.step(&mut dev, 100, 50, T0, &power).await;
        assert!(matches!(t.as_slice(), [Transition::SleepFailed(_)]));
        assert!(!dev.asleep);
        assert_eq!(dev.last_sleep_at, 0);

        *power.sleep_ok.lock().unwrap() = true;
        let t = policy.step(&mut dev, 100, 50, T0 + 60, &power).await;
        assert_eq!(t, vec![Transition::SleepIssued]);
        assert_eq!(dev.last_sleep_at, T0 + 60);
    }

    #[tokio::test]
    async fn test_verification_is_rate_limited() {
        let policy = IdlePolicy::default();
        let power = MockPower::new();
        let mut dev = idle_device(&policy, &power).await;
        policy.step(&mut dev, 100, 50, T0, &power).await;

        for offset in [60, 120, 240, 299] {
            policy.step(&mut dev, 100, 50, T0 + offset, &power).await;
        }
        assert_eq!(power.queries(), 0);

        let t = policy.step(&mut dev, 100, 50, T0 + 300, &power).await;
        assert_eq!(t, vec![Transition::StandbyConfirmed]);
        assert!(dev.asleep);
        assert_eq!(dev.last_verified_at, T0 + 300);

        policy.step(&mut dev, 100, 50, T0 + 360, &power).await;
        assert_eq!(power.queries(), 1);

        policy.step(&mut dev, 100, 50, T0 + 600, &power).await;
        assert_eq!(power.queries(), 2);
    }

    #[tokio::test]
    async fn test_failed_verification_keeps_asleep() {
        let policy = IdlePolicy::default();
        let power = MockPower::new();
        let mut dev = idle_device(&policy, &power).await;
        policy.step(&mut dev, 100, 50, T0, &power).await;

        power.set_mode(Err(()));
        let t = policy.step(&mut dev, 100, 50, T0 + 300, &power).await;

        assert!(matches!(t.as_slice(), [Transition::VerifyFailed(_)]));
        assert!(dev.asleep);
        assert_eq!(power.sleeps(), 1);
    }

    #[tokio::test]
    async fn test_unexpected_wake_respects_grace_period() {
        let policy = IdlePolicy::default();
        let power = MockPower::new();
        let mut dev = idle_device(&policy, &power).await;
        policy.step(&mut dev, 100, 50, T0, &power).await;

        power.set_mode(Ok(PowerMode::Active));
        let t = policy.step(&mut dev, 100, 50, T0 + 300, &power).await;
        assert_eq!(
            t,
            vec![
                Transition::WokeUnexpectedly(PowerMode::Active),
                Transition::TooSoon
            ]
        );
        assert!(!dev.asleep);

        let t = policy.step(&mut dev, 100, 50, T0 + 600, &power).await;
        assert_eq!(t, vec![Transition::SleepIssued]);
        assert_eq!(power.sleeps(), 2);
    }

    #[tokio::test]
    async fn test_wake_then_idle_scenario() {
        let policy = IdlePolicy::default();
        let power = MockPower::new();
        let mut dev = idle_device(&policy, &power).await;

        // idle for the idle period: first sleep at t0
        let t = policy.step(&mut dev, 100, 50, T0, &power).await;
        assert_eq!(t, vec![Transition::SleepIssued]);

        // t0+300: hardware confirms standby
        let t = policy.step(&mut dev, 100, 50, T0 + 300, &power).await;
        assert_eq!(t, vec![Transition::StandbyConfirmed]);
        assert!(dev.asleep);

        // t0+450: one more read
        let t = policy.step(&mut dev, 101, 50, T0 + 450, &power).await;
        assert_eq!(t, vec![Transition::ActivityDetected]);
        assert!(!dev.asleep);
        assert_eq!(dev.last_activity_at, T0 + 450);

        let t = policy.step(&mut dev, 101, 50, T0 + 700, &power).await;
        assert!(t.is_empty());

        // idle again and the grace period since t0 has elapsed
        let t = policy.step(&mut dev, 101, 50, T0 + 750, &power).await;
        assert_eq!(t, vec![Transition::SleepIssued]);
        assert_eq!(dev.last_sleep_at, T0 + 750);
        assert_eq!(power.sleeps(), 2);
    }

    #[tokio::test]
    async fn test_grace_period_defers_resleep() {
        let policy = IdlePolicy::default();
        let power = MockPower::new();
        let mut dev = idle_device(&policy, &power).await;
        policy.step(&mut dev, 100, 50, T0, &power).await;

        policy.step(&mut dev, 100, 51, T0 + 100, &power).await;

        let t = policy.step(&mut dev, 100, 51, T0 + 400, &power).await;
        assert_eq!(t, vec![Transition::TooSoon]);
        let t = policy.step(&mut dev, 100, 51, T0 + 599, &power).await;
        assert_eq!(t, vec![Transition::TooSoon]);

        let t = policy.step(&mut dev, 100, 51, T0 + 600, &power).await;
        assert_eq!(t, vec![Transition::SleepIssued]);
        assert_eq!(power.sleeps(), 2);
    }

    #[tokio::test]
    async fn test_counter_regression_is_not_activity() {
        let policy = IdlePolicy::default();
        let power = MockPower::new();
        let mut dev = idle_device(&policy, &power).await;

        let t = policy.step(&mut dev, 3, 0, T0 - 200, &power).await;
        assert_eq!(t, vec![Transition::CountersRebased]);
        assert_eq!(dev.last_activity_at, T0 - 300);
        assert_eq!((dev.read_count, dev.write_count), (3, 0));

        // the new baseline makes later increases visible again
        let t = policy.step(&mut dev, 4, 0, T0 - 100, &power).await;
        assert_eq!(t, vec![Transition::ActivityDetected]);
    }

    #[tokio::test]
    async fn test_regression_keeps_pending_increments_on_other_counter() {
        let policy = IdlePolicy {
            threshold: 5,
            ..Default::default()
        };
        let power = MockPower::new();
        let mut dev = idle_device(&policy, &power).await;

        let t = policy.step(&mut dev, 103, 10, T0 - 200, &power).await;
        assert_eq!(t, vec![Transition::CountersRebased]);
        assert_eq!((dev.read_count, dev.write_count), (100, 10));

        // 3 + 3 reads since the last activity reach the threshold
        let t = policy.step(&mut dev, 106, 10, T0 - 100, &power).await;
        assert_eq!(t, vec![Transition::ActivityDetected]);
    }

    #[tokio::test]
    async fn test_regression_on_one_counter_with_activity_on_other() {
        let policy = IdlePolicy::default();
        let power = MockPower::new();
        let mut dev = idle_device(&policy, &power).await;

        let t = policy.step(&mut dev, 0, 60, T0, &power).await;
        assert_eq!(t, vec![Transition::ActivityDetected]);
        assert_eq!((dev.read_count, dev.write_count), (0, 60));
    }

    #[tokio::test]
    async fn test_absent_device_is_skipped() {
        let policy = IdlePolicy::default();
        let power = MockPower::new();
        let mut dev = idle_device(&policy, &power).await;
        dev.present = false;

        let t = policy.step(&mut dev, 100, 50, T0 + 10_000, &power).await;
        assert!(t.is_empty());
        assert_eq!(power.sleeps(), 0);
    }
}

//! Health-check cadence and restart triggers.
//!
//! The controller owns the clocks and counters; this module only decides what
//! they mean.

use std::fmt;
use std::time::Duration;

/// Why the controller asked its owner for a restart.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RestartReason {
    SendActionFailed,
    ReadObservationFailed,
    /// Log or activity monitor could not be recreated after a reset.
    MonitorStartFailed,
    /// The foreground activity missed the expected one this many polls in a row.
    ActivityMismatch { failures: u32 },
    /// The session outlived `periodic_restart_time_min`.
    PeriodicRestart { elapsed: Duration },
}

impl fmt::Display for RestartReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestartReason::SendActionFailed => f.write_str("send action failed"),
            RestartReason::ReadObservationFailed => f.write_str("read observation failed"),
            RestartReason::MonitorStartFailed => f.write_str("monitor start failed"),
            RestartReason::ActivityMismatch { failures } => {
                write!(f, "foreground activity mismatch ({failures} consecutive polls)")
            }
            RestartReason::PeriodicRestart { elapsed } => {
                write!(f, "periodic restart after {}s", elapsed.as_secs())
            }
        }
    }
}

/// Step cadence for health checks plus the optional periodic restart interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HealthPolicy {
    check_frequency: u64,
    max_failed_current_activity: u32,
    periodic_restart: Option<Duration>,
}

impl HealthPolicy {
    /// `periodic_restart_time_min <= 0` disables periodic restarts; values too
    /// large for a `Duration` saturate.
    pub fn new(
        dumpsys_check_frequency: u32,
        max_failed_current_activity: u32,
        periodic_restart_time_min: f64,
    ) -> Self {
        let periodic_restart = if periodic_restart_time_min > 0.0 {
            Some(
                Duration::try_from_secs_f64(periodic_restart_time_min * 60.0)
                    .unwrap_or(Duration::MAX),
            )
        } else {
            None
        };
        Self {
            check_frequency: u64::from(dumpsys_check_frequency.max(1)),
            max_failed_current_activity,
            periodic_restart,
        }
    }

    /// True on every `dumpsys_check_frequency`-th step (steps count from 1).
    pub fn is_check_step(&self, step: u64) -> bool {
        step > 0 && step % self.check_frequency == 0
    }

    /// Decide whether the sampled activity failure count warrants a restart.
    pub fn activity_verdict(&self, failures: u32) -> Option<RestartReason> {
        (failures >= self.max_failed_current_activity)
            .then_some(RestartReason::ActivityMismatch { failures })
    }

    /// Decide whether a session of length `elapsed` is due for a periodic restart.
    pub fn periodic_verdict(&self, elapsed: Duration) -> Option<RestartReason> {
        let limit = self.periodic_restart?;
        (elapsed > limit).then_some(RestartReason::PeriodicRestart { elapsed })
    }

    pub fn periodic_restart(&self) -> Option<Duration> {
        self.periodic_restart
    }
}

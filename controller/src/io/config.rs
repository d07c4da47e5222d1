//! Controller configuration stored as TOML.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use toml::Table;

use crate::core::health::HealthPolicy;
use crate::core::settings::merge_settings;

/// Controller configuration (TOML).
///
/// Missing fields take the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ControllerConfig {
    /// Retries allowed for connection creation and for setup within one restart.
    pub max_bad_states: u32,

    /// Steps between samples of the foreground-activity monitor.
    pub dumpsys_check_frequency: u32,

    /// Consecutive activity mismatches that force a restart.
    pub max_failed_current_activity: u32,

    /// Seconds without a fresh observation before `check_timeout` reports true.
    pub step_timeout_sec: f64,

    /// Frame rate used to pace `get_current_observation(wait_for_next_frame=true)`.
    pub expected_fps: f64,

    /// Session length after which a restart is requested. `0` disables.
    pub periodic_restart_time_min: f64,

    pub adb: AdbConfig,

    pub monitors: MonitorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AdbConfig {
    /// `adb` executable.
    pub path: PathBuf,
    /// Device serial passed as `-s`; `None` lets adb pick the only device.
    pub serial: Option<String>,
    /// Per-command wall-clock limit in seconds.
    pub command_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MonitorConfig {
    /// Delay between foreground-activity polls.
    pub activity_poll_interval_ms: u64,
    /// Upper bound on waiting for a monitor thread to exit.
    pub join_timeout_ms: u64,
}

impl Default for AdbConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("adb"),
            serial: None,
            command_timeout_secs: 60,
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            activity_poll_interval_ms: 1_000,
            join_timeout_ms: 5_000,
        }
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            max_bad_states: 3,
            dumpsys_check_frequency: 150,
            max_failed_current_activity: 10,
            step_timeout_sec: 10.0,
            expected_fps: 5.0,
            periodic_restart_time_min: 0.0,
            adb: AdbConfig::default(),
            monitors: MonitorConfig::default(),
        }
    }
}

impl ControllerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_bad_states == 0 {
            return Err(anyhow!("max_bad_states must be > 0"));
        }
        if self.dumpsys_check_frequency == 0 {
            return Err(anyhow!("dumpsys_check_frequency must be > 0"));
        }
        if self.max_failed_current_activity == 0 {
            return Err(anyhow!("max_failed_current_activity must be > 0"));
        }
        if !(self.step_timeout_sec.is_finite() && self.step_timeout_sec > 0.0) {
            return Err(anyhow!("step_timeout_sec must be > 0"));
        }
        if !(self.expected_fps.is_finite() && self.expected_fps > 0.0) {
            return Err(anyhow!("expected_fps must be > 0"));
        }
        if !(self.periodic_restart_time_min.is_finite() && self.periodic_restart_time_min >= 0.0) {
            return Err(anyhow!("periodic_restart_time_min must be >= 0"));
        }
        seconds_to_duration("step_timeout_sec", self.step_timeout_sec)?;
        seconds_to_duration("1 / expected_fps", 1.0 / self.expected_fps)?;
        seconds_to_duration(
            "periodic_restart_time_min * 60",
            self.periodic_restart_time_min * 60.0,
        )?;
        if self.adb.command_timeout_secs == 0 {
            return Err(anyhow!("adb.command_timeout_secs must be > 0"));
        }
        if self.monitors.activity_poll_interval_ms == 0 {
            return Err(anyhow!("monitors.activity_poll_interval_ms must be > 0"));
        }
        Ok(())
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.step_timeout_sec)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.expected_fps)
    }

    pub fn health_policy(&self) -> HealthPolicy {
        HealthPolicy::new(
            self.dumpsys_check_frequency,
            self.max_failed_current_activity,
            self.periodic_restart_time_min,
        )
    }
}

/// Convert a seconds value from config into a `Duration`, rejecting values it
/// cannot represent.
pub(crate) fn seconds_to_duration(field: &str, seconds: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(seconds)
        .map_err(|err| anyhow!("{field} = {seconds} is not a usable duration: {err}"))
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `ControllerConfig::default()`.
pub fn load_config(path: &Path) -> Result<ControllerConfig> {
    load_config_with_settings(path, &BTreeMap::new())
}

/// Load config from a TOML file with dotted `key = value` overrides applied on top.
pub fn load_config_with_settings(
    path: &Path,
    settings: &BTreeMap<String, String>,
) -> Result<ControllerConfig> {
    let base = if path.exists() {
        let contents =
            fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        toml::from_str::<Table>(&contents).with_context(|| format!("parse {}", path.display()))?
    } else {
        Table::new()
    };
    let merged = merge_settings(base, settings).context("apply config settings")?;
    let cfg: ControllerConfig = toml::Value::Table(merged)
        .try_into()
        .with_context(|| format!("decode {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &ControllerConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

//! Device connection: the management channel used to issue commands to the device.
//!
//! [`DeviceTransport`] is the seam the controller, setup runner and monitors talk
//! through. [`AdbController`] implements it on top of the `adb` binary.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, instrument, warn};

use crate::errors::ConnectionError;
use crate::io::config::AdbConfig;
use crate::io::log_watcher::LogStream;
use crate::io::process::{LineStream, run_command_with_timeout, spawn_line_stream};

const OUTPUT_LIMIT_BYTES: usize = 1_000_000;

/// Commands the controller and its helpers need from a device connection.
///
/// Implementations are shared with monitor threads, hence `Send + Sync`.
pub trait DeviceTransport: Send + Sync {
    /// Run one management command and return its stdout.
    fn execute(&self, args: &[&str]) -> Result<String>;

    /// Start streaming the device log, filtered by logcat filter specs.
    fn stream_logcat(&self, filters: &[String]) -> Result<LogStream>;

    /// Component name of the activity currently in the foreground.
    fn current_activity(&self) -> Result<String> {
        let dump = self
            .execute(&["shell", "dumpsys", "activity", "activities"])
            .context("dumpsys activity")?;
        parse_resumed_activity(&dump)
            .ok_or_else(|| ConnectionError("no resumed activity in dumpsys output".to_string()))
            .map_err(Into::into)
    }
}

/// Extract the resumed activity component from `dumpsys activity activities` output.
///
/// Accepts both `mResumedActivity: ActivityRecord{... pkg/.Act t1}` and the newer
/// `topResumedActivity=ActivityRecord{...}` forms.
pub fn parse_resumed_activity(dump: &str) -> Option<String> {
    dump.lines()
        .map(str::trim)
        .filter(|line| {
            line.starts_with("mResumedActivity") || line.starts_with("topResumedActivity")
        })
        .find_map(|line| {
            line.split_whitespace()
                .find(|token| token.contains('/'))
                .map(|token| token.trim_end_matches('}').to_string())
        })
}

/// [`DeviceTransport`] backed by the `adb` command-line tool.
#[derive(Debug, Clone)]
pub struct AdbController {
    adb_path: PathBuf,
    serial: Option<String>,
    command_timeout: Duration,
}

impl AdbController {
    pub fn new(config: &AdbConfig) -> Self {
        Self {
            adb_path: config.path.clone(),
            serial: config.serial.clone(),
            command_timeout: Duration::from_secs(config.command_timeout_secs),
        }
    }

    /// Build a controller and check that the device answers.
    #[instrument(skip_all, fields(serial = ?config.serial))]
    pub fn connect(config: &AdbConfig) -> Result<Self> {
        let adb = Self::new(config);
        let state = adb.execute(&["get-state"])?;
        if state.trim() != "device" {
            return Err(ConnectionError(format!("device state is {:?}", state.trim())).into());
        }
        debug!("device connected");
        Ok(adb)
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.adb_path);
        if let Some(serial) = &self.serial {
            cmd.arg("-s").arg(serial);
        }
        cmd.args(args);
        cmd
    }
}

impl DeviceTransport for AdbController {
    #[instrument(skip_all, fields(command = %args.join(" ")))]
    fn execute(&self, args: &[&str]) -> Result<String> {
        let output = run_command_with_timeout(
            self.command(args),
            self.command_timeout,
            OUTPUT_LIMIT_BYTES,
        )
        .map_err(|err| ConnectionError(format!("{err:#}")))?;
        if output.timed_out {
            return Err(ConnectionError(format!(
                "adb {} timed out after {:?}",
                args.join(" "),
                self.command_timeout
            ))
            .into());
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "adb command failed");
            return Err(ConnectionError(format!(
                "adb {} exited with {:?}: {}",
                args.join(" "),
                output.status.code(),
                output.stderr_lossy().trim()
            ))
            .into());
        }
        Ok(output.stdout_lossy())
    }

    fn stream_logcat(&self, filters: &[String]) -> Result<LogStream> {
        let mut args = vec!["logcat", "-v", "threadtime"];
        args.extend(filters.iter().map(String::as_str));
        let LineStream { lines, mut child } = spawn_line_stream(self.command(&args))
            .map_err(|err| ConnectionError(format!("{err:#}")))?;
        Ok(LogStream::new(lines).with_closer(move || {
            if let Err(err) = child.kill() {
                debug!(err = %err, "logcat already exited");
            }
            let _ = child.wait();
        }))
    }
}

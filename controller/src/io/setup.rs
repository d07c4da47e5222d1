//! Scripted setup-step execution against a device connection.

use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::errors::SetupError;
use crate::io::adb::DeviceTransport;
use crate::io::config::seconds_to_duration;
use crate::io::task::{AdbCall, SetupStep, SuccessCondition};

/// Runs a list of setup steps. Failures should carry [`SetupError`].
pub trait SetupRunner {
    fn interpret(&mut self, transport: &dyn DeviceTransport, steps: &[SetupStep]) -> Result<()>;
}

/// Production [`SetupRunner`]: turns each [`AdbCall`] into device commands and
/// checks success conditions by polling the foreground activity.
#[derive(Debug, Clone)]
pub struct SetupStepInterpreter {
    poll_interval: Duration,
}

impl Default for SetupStepInterpreter {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
        }
    }
}

impl SetupStepInterpreter {
    pub fn new(poll_interval: Duration) -> Self {
        Self { poll_interval }
    }

    fn run_step(&self, transport: &dyn DeviceTransport, step: &SetupStep) -> Result<()> {
        let attempts = 1 + step
            .success_condition
            .as_ref()
            .map_or(0, |condition| condition.num_retries);
        for attempt in 1..=attempts {
            issue(transport, &step.adb_call)?;
            let Some(condition) = &step.success_condition else {
                return Ok(());
            };
            if self.wait_for_activity(transport, condition)? {
                return Ok(());
            }
            warn!(
                attempt,
                attempts,
                activity = %condition.wait_for_activity,
                "success condition not met"
            );
        }
        Err(SetupError(format!("{:?} never reached its success condition", step.adb_call)).into())
    }

    fn wait_for_activity(
        &self,
        transport: &dyn DeviceTransport,
        condition: &SuccessCondition,
    ) -> Result<bool> {
        let deadline = seconds_to_duration("success_condition.timeout_sec", condition.timeout_sec)
            .ok()
            .and_then(|timeout| Instant::now().checked_add(timeout))
            .ok_or_else(|| {
                SetupError(format!(
                    "success_condition.timeout_sec = {} is out of range",
                    condition.timeout_sec
                ))
            })?;
        loop {
            match transport.current_activity() {
                Ok(activity) if activity == condition.wait_for_activity => return Ok(true),
                Ok(activity) => debug!(%activity, "waiting for activity"),
                Err(err) => debug!(err = %format!("{err:#}"), "activity query failed"),
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            thread::sleep(self.poll_interval.min(deadline - now));
        }
    }
}

impl SetupRunner for SetupStepInterpreter {
    #[instrument(skip_all, fields(steps = steps.len()))]
    fn interpret(&mut self, transport: &dyn DeviceTransport, steps: &[SetupStep]) -> Result<()> {
        for (index, step) in steps.iter().enumerate() {
            debug!(index, call = ?step.adb_call, "running setup step");
            self.run_step(transport, step)
                .with_context(|| format!("setup step {index}"))?;
        }
        info!("setup steps complete");
        Ok(())
    }
}

fn issue(transport: &dyn DeviceTransport, call: &AdbCall) -> Result<()> {
    let run = |args: &[&str]| -> Result<()> {
        transport
            .execute(args)
            .map(|_| ())
            .map_err(|err| SetupError(format!("{err:#}")).into())
    };
    match call {
        AdbCall::Raw { args } => {
            let args: Vec<&str> = args.iter().map(String::as_str).collect();
            run(&args)
        }
        AdbCall::StartActivity { component, args } => {
            let mut full = vec!["shell", "am", "start", "-W", "-n", component.as_str()];
            full.extend(args.iter().map(String::as_str));
            run(&full)
        }
        AdbCall::ForceStop { package } => run(&["shell", "am", "force-stop", package.as_str()]),
        AdbCall::InstallApk { path } => {
            if !path.exists() {
                return Err(SetupError(format!("apk not found: {}", path.display())).into());
            }
            let path = path.to_string_lossy();
            run(&["install", "-r", "-t", "-g", &*path])
        }
        AdbCall::Rotate { orientation } => {
            let rotation = orientation.user_rotation().to_string();
            run(&["shell", "settings", "put", "system", "accelerometer_rotation", "0"])?;
            run(&["shell", "settings", "put", "system", "user_rotation", rotation.as_str()])
        }
        AdbCall::PressButton { button } => run(&["shell", "input", "keyevent", button.keycode()]),
        AdbCall::Sleep { seconds } => {
            let pause = seconds_to_duration("sleep seconds", *seconds)
                .map_err(|err| SetupError(format!("{err:#}")))?;
            thread::sleep(pause);
            Ok(())
        }
    }
}

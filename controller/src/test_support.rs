//! Test-only fakes for the simulator, device connection and setup runner.
//!
//! Each fake records what the controller asked of it and fails on demand, so
//! lifecycle tests can script failure sequences without a device.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, mpsc};
use std::time::Duration;

use anyhow::Result;
use tempfile::TempDir;

use crate::core::log_rules::{LogEffect, LogRuleSpec};
use crate::core::types::{Action, Image, Observation, Orientation};
use crate::errors::{ConnectionError, ReadObservationError, SendActionError, SetupError};
use crate::io::adb::DeviceTransport;
use crate::io::config::{ControllerConfig, MonitorConfig};
use crate::io::log_watcher::LogStream;
use crate::io::setup::SetupRunner;
use crate::io::simulator::Simulator;
use crate::io::task::{SetupStep, Task};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory device connection.
///
/// Records every command, reports a settable foreground activity, and hands out
/// log streams that tests feed with [`FakeTransport::emit_log`].
#[derive(Debug, Default)]
pub struct FakeTransport {
    commands: Mutex<Vec<String>>,
    activity: Mutex<String>,
    fail_commands: AtomicBool,
    fail_activity: AtomicBool,
    fail_logcat: AtomicBool,
    log_sender: Mutex<Option<mpsc::Sender<String>>>,
    logcat_streams: AtomicU32,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_activity(&self, activity: &str) {
        *lock(&self.activity) = activity.to_string();
    }

    pub fn fail_commands(&self, fail: bool) {
        self.fail_commands.store(fail, Ordering::SeqCst);
    }

    pub fn fail_activity_queries(&self, fail: bool) {
        self.fail_activity.store(fail, Ordering::SeqCst);
    }

    pub fn fail_logcat(&self, fail: bool) {
        self.fail_logcat.store(fail, Ordering::SeqCst);
    }

    /// Commands issued so far, each joined with spaces.
    pub fn commands(&self) -> Vec<String> {
        lock(&self.commands).clone()
    }

    /// Push a line into the most recently opened log stream.
    ///
    /// Returns `false` if no stream is open or its watcher has gone away.
    pub fn emit_log(&self, line: &str) -> bool {
        lock(&self.log_sender)
            .as_ref()
            .is_some_and(|tx| tx.send(line.to_string()).is_ok())
    }

    pub fn logcat_streams(&self) -> u32 {
        self.logcat_streams.load(Ordering::SeqCst)
    }
}

impl DeviceTransport for FakeTransport {
    fn execute(&self, args: &[&str]) -> Result<String> {
        if self.fail_commands.load(Ordering::SeqCst) {
            return Err(ConnectionError(format!("scripted failure: {}", args.join(" "))).into());
        }
        lock(&self.commands).push(args.join(" "));
        Ok(String::new())
    }

    fn stream_logcat(&self, _filters: &[String]) -> Result<LogStream> {
        if self.fail_logcat.load(Ordering::SeqCst) {
            return Err(ConnectionError("scripted logcat failure".to_string()).into());
        }
        let (tx, rx) = mpsc::channel();
        *lock(&self.log_sender) = Some(tx);
        self.logcat_streams.fetch_add(1, Ordering::SeqCst);
        Ok(LogStream::new(rx))
    }

    fn current_activity(&self) -> Result<String> {
        if self.fail_activity.load(Ordering::SeqCst) {
            return Err(ConnectionError("scripted dumpsys failure".to_string()).into());
        }
        Ok(lock(&self.activity).clone())
    }
}

/// Scripted [`Simulator`].
///
/// Connection creation fails `fail_connections` times before succeeding
/// (`u32::MAX` keeps failing). Send and observation results are popped from
/// queues and default to success.
#[derive(Debug)]
pub struct ScriptedSimulator {
    pub transport: Arc<FakeTransport>,
    pub fail_connections: u32,
    pub send_results: VecDeque<std::result::Result<bool, String>>,
    pub observation_results: VecDeque<std::result::Result<Observation, String>>,
    pub create_calls: u32,
    pub sent: Vec<Action>,
    pub observation_calls: u32,
}

impl Default for ScriptedSimulator {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedSimulator {
    pub fn new() -> Self {
        Self {
            transport: Arc::new(FakeTransport::new()),
            fail_connections: 0,
            send_results: VecDeque::new(),
            observation_results: VecDeque::new(),
            create_calls: 0,
            sent: Vec::new(),
            observation_calls: 0,
        }
    }
}

impl Simulator for ScriptedSimulator {
    fn create_adb_controller(&mut self) -> Result<Arc<dyn DeviceTransport>> {
        self.create_calls += 1;
        if self.fail_connections > 0 {
            if self.fail_connections != u32::MAX {
                self.fail_connections -= 1;
            }
            return Err(ConnectionError("scripted connection failure".to_string()).into());
        }
        Ok(self.transport.clone())
    }

    fn send_action(&mut self, action: &Action) -> Result<bool> {
        self.sent.push(*action);
        match self.send_results.pop_front() {
            None => Ok(true),
            Some(Ok(accepted)) => Ok(accepted),
            Some(Err(reason)) => Err(SendActionError(reason).into()),
        }
    }

    fn get_observation(&mut self, _wait_for_next_frame: bool) -> Result<Observation> {
        self.observation_calls += 1;
        match self.observation_results.pop_front() {
            None => Ok(sample_observation(Orientation::Portrait0)),
            Some(Ok(observation)) => Ok(observation),
            Some(Err(reason)) => Err(ReadObservationError(reason).into()),
        }
    }
}

/// Scripted [`SetupRunner`] that fails its next `fail_next` calls
/// (`u32::MAX` keeps failing).
#[derive(Debug, Default)]
pub struct ScriptedSetupRunner {
    pub fail_next: u32,
    pub calls: u32,
    /// Number of steps passed to each call.
    pub step_counts: Vec<usize>,
}

impl SetupRunner for ScriptedSetupRunner {
    fn interpret(&mut self, _transport: &dyn DeviceTransport, steps: &[SetupStep]) -> Result<()> {
        self.calls += 1;
        self.step_counts.push(steps.len());
        if self.fail_next > 0 {
            if self.fail_next != u32::MAX {
                self.fail_next -= 1;
            }
            return Err(SetupError("scripted setup failure".to_string()).into());
        }
        Ok(())
    }
}

/// 3x2 frame with two channels holding `0..12`.
pub fn sample_observation(orientation: Orientation) -> Observation {
    Observation {
        pixels: Image {
            height: 3,
            width: 2,
            channels: 2,
            data: (0..12).collect(),
        },
        orientation,
        timestamp_us: 0,
    }
}

/// Config with the timing knobs shrunk so lifecycle tests run fast.
pub fn fast_config() -> ControllerConfig {
    ControllerConfig {
        max_bad_states: 3,
        dumpsys_check_frequency: 100,
        max_failed_current_activity: 3,
        step_timeout_sec: 2.0,
        expected_fps: 60.0,
        periodic_restart_time_min: 0.0,
        monitors: MonitorConfig {
            activity_poll_interval_ms: 5,
            join_timeout_ms: 1_000,
        },
        ..ControllerConfig::default()
    }
}

/// Task with one setup step, one reset step and reward/extra/episode-end rules.
pub fn sample_task() -> Task {
    let raw = |args: &[&str]| SetupStep {
        adb_call: crate::io::task::AdbCall::Raw {
            args: args.iter().map(|a| (*a).to_string()).collect(),
        },
        success_condition: None,
    };
    let rule = |pattern: &str, effect| LogRuleSpec {
        pattern: pattern.to_string(),
        effect,
    };
    Task {
        id: "sample".to_string(),
        description: "sample task".to_string(),
        setup_steps: vec![raw(&["shell", "echo", "setup"])],
        reset_steps: vec![raw(&["shell", "echo", "reset"]), raw(&["shell", "echo", "again"])],
        expected_activity: Some("com.example.catch/.MainActivity".to_string()),
        log_filters: vec!["CatchGame:V".to_string()],
        log_rules: vec![
            rule(r"reward: ([-0-9.]+)", LogEffect::Reward),
            rule(r"episode end", LogEffect::EpisodeEnd),
            rule(r"extra: (\w+) (\S+)", LogEffect::Extra),
        ],
    }
}

/// Temporary directory holding files written by a test.
pub struct TempFiles {
    dir: TempDir,
}

impl TempFiles {
    pub fn new() -> Result<Self> {
        Ok(Self {
            dir: tempfile::tempdir()?,
        })
    }

    pub fn write(&self, name: &str, contents: &str) -> Result<PathBuf> {
        let path = self.dir.path().join(name);
        std::fs::write(&path, contents)?;
        Ok(path)
    }
}

/// Poll `done` until it holds, panicking after five seconds.
pub fn wait_until(mut done: impl FnMut() -> bool) {
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while !done() {
        assert!(
            std::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        std::thread::sleep(Duration::from_millis(5));
    }
}

//! Controller: lifecycle, retries and health policy around a simulator.
//!
//! The controller sits between the agent loop and the device. It forwards
//! actions, reads back observations/rewards, and owns the connection lifecycle:
//!
//! - `restart` (re)creates the device connection, runs setup and starts the
//!   background monitors, retrying each stage up to `max_bad_states` times.
//! - Transient failures during a step never surface as errors; they set the
//!   sticky `should_restart` flag, which the owner of the loop polls.
//! - Exhausting a retry budget is fatal: the controller moves to
//!   [`ControllerState::Fatal`] and must be discarded.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{debug, error, info, instrument, warn};

use crate::core::health::{HealthPolicy, RestartReason};
use crate::core::log_rules::LogRules;
use crate::core::retry::{RetryCounter, RetryDecision};
use crate::core::transform::orient_pixels;
use crate::core::types::{Action, ActionType, ControllerState, Extras, Observation};
use crate::errors::{InvalidStateError, RestartStage, TooManyRestartsError};
use crate::io::activity_monitor::ActivityMonitor;
use crate::io::adb::DeviceTransport;
use crate::io::config::ControllerConfig;
use crate::io::log_watcher::LogWatcher;
use crate::io::setup::SetupRunner;
use crate::io::simulator::Simulator;
use crate::io::task::Task;

/// Which script a setup pass runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SetupPhase {
    /// `task.setup_steps`, after a fresh connection.
    Restart,
    /// `task.episode_steps()`, at the start of an episode.
    Reset,
}

pub struct Controller<S: Simulator, R: SetupRunner> {
    simulator: S,
    setup_runner: R,
    task: Task,
    rules: LogRules,
    config: ControllerConfig,
    policy: HealthPolicy,
    state: ControllerState,
    transport: Option<Arc<dyn DeviceTransport>>,
    log_watcher: Option<LogWatcher>,
    activity_monitor: Option<ActivityMonitor>,
    connection_retries: RetryCounter,
    setup_retries: RetryCounter,
    should_restart: bool,
    restart_reason: Option<RestartReason>,
    latest_observation_local_time: Instant,
    session_started: Instant,
    step_count: u64,
}

impl<S: Simulator, R: SetupRunner> Controller<S, R> {
    /// Build an uninitialized controller. Call [`Controller::restart`] before use.
    pub fn new(simulator: S, setup_runner: R, task: Task, config: ControllerConfig) -> Result<Self> {
        config.validate()?;
        let rules = LogRules::compile(&task.log_rules)
            .with_context(|| format!("compile log rules for task {}", task.id))?;
        if rules.is_empty() {
            warn!(task_id = %task.id, "task has no log rules, rewards will stay at 0");
        }
        let now = Instant::now();
        Ok(Self {
            simulator,
            setup_runner,
            rules,
            policy: config.health_policy(),
            connection_retries: RetryCounter::new(config.max_bad_states),
            setup_retries: RetryCounter::new(config.max_bad_states),
            task,
            config,
            state: ControllerState::Uninitialized,
            transport: None,
            log_watcher: None,
            activity_monitor: None,
            should_restart: false,
            restart_reason: None,
            latest_observation_local_time: now,
            session_started: now,
            step_count: 0,
        })
    }

    /// Build a controller and bring it to [`ControllerState::Ready`].
    pub fn start(simulator: S, setup_runner: R, task: Task, config: ControllerConfig) -> Result<Self> {
        let mut controller = Self::new(simulator, setup_runner, task, config)?;
        controller.restart()?;
        Ok(controller)
    }

    /// Tear everything down and bring the device back to a ready state.
    ///
    /// Connection creation and setup each get `max_bad_states` retries, counted
    /// from zero on every call. Running out returns [`TooManyRestartsError`] and
    /// leaves the controller in [`ControllerState::Fatal`].
    #[instrument(skip_all, fields(task_id = %self.task.id))]
    pub fn restart(&mut self) -> Result<()> {
        self.ensure_not_fatal("restart")?;
        info!(reason = ?self.restart_reason, "restarting controller");
        self.stop_monitors();
        self.transport = None;
        self.connection_retries.reset();
        self.setup_retries.reset();

        let transport = loop {
            let transport = match self.simulator.create_adb_controller() {
                Ok(transport) => transport,
                Err(err) => {
                    warn!(err = %format!("{err:#}"), "device connection failed");
                    self.record_connection_failure()?;
                    continue;
                }
            };
            self.run_setup(transport.as_ref(), SetupPhase::Restart)?;
            match self.start_monitors(&transport) {
                Ok(()) => break transport,
                Err(err) => {
                    warn!(err = %format!("{err:#}"), "monitors failed to start");
                    self.stop_monitors();
                    self.record_connection_failure()?;
                }
            }
        };

        let now = Instant::now();
        self.transport = Some(transport);
        self.state = ControllerState::Ready;
        self.should_restart = false;
        self.restart_reason = None;
        self.session_started = now;
        self.latest_observation_local_time = now;
        self.step_count = 0;
        info!(
            connection_failures = self.connection_retries.failures(),
            setup_failures = self.setup_retries.failures(),
            periodic_restart = ?self.policy.periodic_restart(),
            "controller ready"
        );
        Ok(())
    }

    /// Start a new episode on the existing connection.
    ///
    /// Re-runs setup with the same bounded retry policy as `restart` and recreates
    /// the monitors. Only valid in [`ControllerState::Ready`].
    #[instrument(skip_all, fields(task_id = %self.task.id))]
    pub fn reset(&mut self) -> Result<()> {
        if self.state != ControllerState::Ready {
            return Err(InvalidStateError {
                operation: "reset",
                state: self.state,
            }
            .into());
        }
        let Some(transport) = self.transport.clone() else {
            return Err(InvalidStateError {
                operation: "reset",
                state: self.state,
            }
            .into());
        };
        self.stop_monitors();
        self.setup_retries.reset();
        self.run_setup(transport.as_ref(), SetupPhase::Reset)?;
        if let Err(err) = self.start_monitors(&transport) {
            warn!(err = %format!("{err:#}"), "monitors failed to start after reset");
            self.stop_monitors();
            self.request_restart(RestartReason::MonitorStartFailed);
        }
        self.latest_observation_local_time = Instant::now();
        debug!("episode reset");
        Ok(())
    }

    /// Forward an action to the simulator.
    ///
    /// `Repeat` sends nothing so the previous action keeps its effect. Send
    /// failures set `should_restart` instead of returning an error. Every call
    /// counts as one step for the health cadence.
    pub fn execute_action(&mut self, action: &Action) {
        self.step_count += 1;
        if action.action_type != ActionType::Repeat {
            self.send(action);
        }
        self.check_health();
    }

    fn send(&mut self, action: &Action) {
        if self.state != ControllerState::Ready {
            warn!(state = %self.state, "dropping action, controller not ready");
            return;
        }
        match self.simulator.send_action(action) {
            Ok(true) => {}
            Ok(false) => {
                warn!(action = ?action.action_type, "simulator rejected action");
                self.request_restart(RestartReason::SendActionFailed);
            }
            Err(err) => {
                warn!(err = %format!("{err:#}"), "failed to send action");
                self.request_restart(RestartReason::SendActionFailed);
            }
        }
    }

    /// Latest frame, rotated to match the device orientation.
    ///
    /// With `wait_for_next_frame`, first sleeps out the rest of one frame interval
    /// (`1 / expected_fps`) since the previous observation. A read failure, or a
    /// frame whose buffer does not match its shape, sets `should_restart` and
    /// returns `None`.
    pub fn get_current_observation(&mut self, wait_for_next_frame: bool) -> Option<Observation> {
        if wait_for_next_frame {
            let since = self.latest_observation_local_time.elapsed();
            if let Some(remaining) = self.config.frame_interval().checked_sub(since) {
                thread::sleep(remaining);
            }
        }
        let frame = self
            .simulator
            .get_observation(wait_for_next_frame)
            .and_then(|observation| {
                observation
                    .pixels
                    .validate()
                    .context("malformed frame from simulator")?;
                Ok(observation)
            });
        match frame {
            Ok(observation) => {
                self.latest_observation_local_time = Instant::now();
                let pixels = orient_pixels(&observation.pixels, observation.orientation);
                Some(Observation {
                    pixels,
                    ..observation
                })
            }
            Err(err) => {
                warn!(err = %format!("{err:#}"), "failed to read observation");
                self.request_restart(RestartReason::ReadObservationFailed);
                None
            }
        }
    }

    /// Reward logged since the last call, `0.0` if none.
    pub fn get_current_reward(&self) -> f64 {
        self.log_watcher
            .as_ref()
            .and_then(LogWatcher::get_and_reset_reward)
            .unwrap_or(0.0)
    }

    /// Extras logged since the last call, empty if none.
    pub fn get_current_extras(&self) -> Extras {
        self.log_watcher
            .as_ref()
            .map(LogWatcher::get_and_reset_extras)
            .unwrap_or_default()
    }

    /// Whether the log reported an episode end since the last call.
    pub fn check_episode_end(&self) -> bool {
        self.log_watcher
            .as_ref()
            .is_some_and(LogWatcher::get_and_reset_episode_end)
    }

    /// True once no observation has been read for longer than `step_timeout_sec`.
    pub fn check_timeout(&self) -> bool {
        self.latest_observation_local_time.elapsed() > self.config.step_timeout()
    }

    /// Stop the monitors and drop the device connection.
    pub fn close(&mut self) {
        self.stop_monitors();
        self.transport = None;
        if self.state == ControllerState::Ready {
            self.state = ControllerState::Uninitialized;
        }
        debug!("controller closed");
    }

    pub fn should_restart(&self) -> bool {
        self.should_restart
    }

    /// First reason recorded since the last successful restart.
    pub fn restart_reason(&self) -> Option<RestartReason> {
        self.restart_reason
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn step_count(&self) -> u64 {
        self.step_count
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn simulator(&self) -> &S {
        &self.simulator
    }

    pub fn simulator_mut(&mut self) -> &mut S {
        &mut self.simulator
    }

    pub fn setup_runner(&self) -> &R {
        &self.setup_runner
    }

    pub fn setup_runner_mut(&mut self) -> &mut R {
        &mut self.setup_runner
    }

    fn ensure_not_fatal(&self, operation: &'static str) -> Result<()> {
        if self.state == ControllerState::Fatal {
            return Err(InvalidStateError {
                operation,
                state: self.state,
            }
            .into());
        }
        Ok(())
    }

    /// Run setup until it succeeds or the setup budget is spent.
    fn run_setup(&mut self, transport: &dyn DeviceTransport, phase: SetupPhase) -> Result<()> {
        loop {
            let steps = match phase {
                SetupPhase::Restart => self.task.setup_steps.as_slice(),
                SetupPhase::Reset => self.task.episode_steps(),
            };
            match self.setup_runner.interpret(transport, steps) {
                Ok(()) => return Ok(()),
                Err(err) => {
                    warn!(?phase, err = %format!("{err:#}"), "setup failed");
                    if self.setup_retries.record_failure() == RetryDecision::Fatal {
                        return Err(self.enter_fatal(RestartStage::Setup, self.setup_retries));
                    }
                }
            }
        }
    }

    fn record_connection_failure(&mut self) -> Result<()> {
        match self.connection_retries.record_failure() {
            RetryDecision::Continue => Ok(()),
            RetryDecision::Fatal => {
                Err(self.enter_fatal(RestartStage::Connection, self.connection_retries))
            }
        }
    }

    fn enter_fatal(&mut self, stage: RestartStage, counter: RetryCounter) -> anyhow::Error {
        self.stop_monitors();
        self.transport = None;
        self.state = ControllerState::Fatal;
        let err = TooManyRestartsError {
            stage,
            attempts: counter.failures(),
            max_bad_states: counter.cap(),
        };
        error!(%err, "restart budget exhausted");
        err.into()
    }

    fn start_monitors(&mut self, transport: &Arc<dyn DeviceTransport>) -> Result<()> {
        let join_timeout = Duration::from_millis(self.config.monitors.join_timeout_ms);
        let stream = transport
            .stream_logcat(&self.task.log_filters)
            .context("open device log")?;
        self.log_watcher = Some(LogWatcher::spawn(stream, self.rules.clone(), join_timeout)?);
        if let Some(expected) = &self.task.expected_activity {
            self.activity_monitor = Some(ActivityMonitor::spawn(
                Arc::clone(transport),
                expected.clone(),
                Duration::from_millis(self.config.monitors.activity_poll_interval_ms),
                join_timeout,
            )?);
        }
        Ok(())
    }

    fn stop_monitors(&mut self) {
        if let Some(mut watcher) = self.log_watcher.take()
            && !watcher.stop()
        {
            warn!("log watcher left running after stop timeout");
        }
        if let Some(mut monitor) = self.activity_monitor.take()
            && !monitor.stop()
        {
            warn!("activity monitor left running after stop timeout");
        }
    }

    fn check_health(&mut self) {
        if self.policy.is_check_step(self.step_count)
            && let Some(failures) = self.activity_monitor.as_ref().map(ActivityMonitor::failure_count)
        {
            debug!(step = self.step_count, failures, "activity health check");
            if let Some(reason) = self.policy.activity_verdict(failures) {
                let foreground = self
                    .activity_monitor
                    .as_ref()
                    .and_then(ActivityMonitor::last_activity);
                warn!(
                    expected = ?self.task.expected_activity,
                    ?foreground,
                    failures,
                    "foreground activity drifted"
                );
                self.request_restart(reason);
            }
        }
        if let Some(reason) = self.policy.periodic_verdict(self.session_started.elapsed()) {
            self.request_restart(reason);
        }
    }

    fn request_restart(&mut self, reason: RestartReason) {
        if !self.should_restart {
            warn!(%reason, "restart requested");
            self.restart_reason = Some(reason);
        }
        self.should_restart = true;
    }
}

impl<S: Simulator, R: SetupRunner> Drop for Controller<S, R> {
    fn drop(&mut self) {
        self.stop_monitors();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Orientation;
    use crate::test_support::{
        ScriptedSetupRunner, ScriptedSimulator, fast_config, sample_observation, sample_task,
        wait_until,
    };
    type TestController = Controller<ScriptedSimulator, ScriptedSetupRunner>;

    fn started() -> TestController {
        Controller::start(
            ScriptedSimulator::new(),
            ScriptedSetupRunner::default(),
            sample_task(),
            fast_config(),
        )
        .expect("start")
    }

    fn too_many_restarts(err: &anyhow::Error) -> &TooManyRestartsError {
        err.downcast_ref::<TooManyRestartsError>()
            .expect("expected TooManyRestartsError")
    }

    #[test]
    fn new_is_uninitialized_and_restart_makes_ready() {
        let mut controller = Controller::new(
            ScriptedSimulator::new(),
            ScriptedSetupRunner::default(),
            sample_task(),
            fast_config(),
        )
        .expect("new");
        assert_eq!(controller.state(), ControllerState::Uninitialized);
        assert_eq!(controller.simulator().create_calls, 0);

        controller.restart().expect("restart");
        assert_eq!(controller.state(), ControllerState::Ready);
        assert!(controller.log_watcher.is_some());
        assert!(controller.activity_monitor.is_some());
        assert_eq!(controller.setup_runner().step_counts, vec![1]);
    }

    #[test]
    fn new_rejects_config_with_unrepresentable_timeouts() {
        let mut config = fast_config();
        config.step_timeout_sec = 1e20;
        let result = Controller::new(
            ScriptedSimulator::new(),
            ScriptedSetupRunner::default(),
            sample_task(),
            config,
        );
        assert!(result.is_err());

        let mut config = fast_config();
        config.periodic_restart_time_min = 1e18;
        let result = Controller::new(
            ScriptedSimulator::new(),
            ScriptedSetupRunner::default(),
            sample_task(),
            config,
        );
        assert!(result.is_err());
    }

    #[test]
    fn restart_from_ready_rebuilds_connection_and_clears_flag() {
        let mut controller = started();
        controller.request_restart(RestartReason::SendActionFailed);
        controller.restart().expect("restart");
        assert_eq!(controller.state(), ControllerState::Ready);
        assert_eq!(controller.simulator().create_calls, 2);
        assert_eq!(controller.simulator().transport.logcat_streams(), 2);
        assert!(!controller.should_restart());
        assert_eq!(controller.restart_reason(), None);
    }

    #[test]
    fn connection_failures_exhaust_after_max_bad_states_retries() {
        let mut controller = started();
        let before = controller.simulator().create_calls;
        controller.simulator_mut().fail_connections = u32::MAX;

        let err = controller.restart().unwrap_err();
        let fatal = too_many_restarts(&err);
        assert_eq!(fatal.stage, RestartStage::Connection);
        assert_eq!(fatal.attempts, 4);
        assert_eq!(controller.simulator().create_calls - before, 4);
        assert_eq!(controller.state(), ControllerState::Fatal);
        assert!(controller.log_watcher.is_none());
    }

    #[test]
    fn setup_failures_retry_without_reconnecting() {
        let mut controller = started();
        let creates_before = controller.simulator().create_calls;
        let calls_before = controller.setup_runner().calls;
        controller.setup_runner_mut().fail_next = u32::MAX;

        let err = controller.restart().unwrap_err();
        assert_eq!(too_many_restarts(&err).stage, RestartStage::Setup);
        assert_eq!(controller.setup_runner().calls - calls_before, 4);
        assert_eq!(controller.simulator().create_calls - creates_before, 1);
        assert_eq!(controller.state(), ControllerState::Fatal);
    }

    #[test]
    fn transient_failures_within_budget_recover() {
        let mut simulator = ScriptedSimulator::new();
        simulator.fail_connections = 3;
        let runner = ScriptedSetupRunner {
            fail_next: 3,
            ..ScriptedSetupRunner::default()
        };
        let controller =
            Controller::start(simulator, runner, sample_task(), fast_config()).expect("start");
        assert_eq!(controller.state(), ControllerState::Ready);
        assert_eq!(controller.simulator().create_calls, 4);
        assert_eq!(controller.setup_runner().calls, 4);
    }

    #[test]
    fn retry_counters_reset_between_restarts() {
        let mut controller = started();
        controller.simulator_mut().fail_connections = 2;
        controller.restart().expect("first restart");
        controller.simulator_mut().fail_connections = 2;
        controller.restart().expect("second restart");
        assert_eq!(controller.state(), ControllerState::Ready);
    }

    #[test]
    fn logcat_failure_counts_against_connection_budget() {
        let mut controller = started();
        controller.simulator().transport.fail_logcat(true);
        let err = controller.restart().unwrap_err();
        assert_eq!(too_many_restarts(&err).stage, RestartStage::Connection);
    }

    #[test]
    fn fatal_controller_rejects_restart_and_reset() {
        let mut controller = started();
        controller.simulator_mut().fail_connections = u32::MAX;
        controller.restart().unwrap_err();

        let err = controller.restart().unwrap_err();
        assert!(err.downcast_ref::<InvalidStateError>().is_some());
        let err = controller.reset().unwrap_err();
        assert!(err.downcast_ref::<InvalidStateError>().is_some());
    }

    #[test]
    fn reset_requires_ready() {
        let mut controller = Controller::new(
            ScriptedSimulator::new(),
            ScriptedSetupRunner::default(),
            sample_task(),
            fast_config(),
        )
        .expect("new");
        let err = controller.reset().unwrap_err();
        assert!(err.to_string().contains("reset is not valid"));
    }

    #[test]
    fn reset_reruns_episode_steps_and_recreates_monitors() {
        let mut controller = started();
        controller.reset().expect("reset");
        assert_eq!(controller.simulator().create_calls, 1);
        assert_eq!(controller.setup_runner().step_counts, vec![1, 2]);
        assert_eq!(controller.simulator().transport.logcat_streams(), 2);
        assert!(controller.log_watcher.is_some());
        assert!(controller.activity_monitor.is_some());
    }

    #[test]
    fn reset_setup_exhaustion_is_fatal() {
        let mut controller = started();
        controller.setup_runner_mut().fail_next = u32::MAX;
        let err = controller.reset().unwrap_err();
        assert_eq!(too_many_restarts(&err).attempts, 4);
        assert_eq!(controller.state(), ControllerState::Fatal);
    }

    #[test]
    fn reward_defaults_to_zero_and_reads_accumulated_value() {
        let controller = started();
        assert_eq!(controller.get_current_reward(), 0.0);

        let transport = Arc::clone(&controller.simulator().transport);
        assert!(transport.emit_log("I/CatchGame: reward: 1.0"));
        let mut reward = 0.0;
        wait_until(|| {
            reward += controller.get_current_reward();
            reward != 0.0
        });
        assert_eq!(reward, 1.0);
        assert_eq!(controller.get_current_reward(), 0.0);
    }

    #[test]
    fn task_without_log_rules_still_runs() {
        let task = Task {
            log_rules: Vec::new(),
            ..sample_task()
        };
        let controller = Controller::start(
            ScriptedSimulator::new(),
            ScriptedSetupRunner::default(),
            task,
            fast_config(),
        )
        .expect("start");
        assert!(controller.rules.is_empty());
        assert!(controller.simulator().transport.emit_log("reward: 5"));
        thread::sleep(Duration::from_millis(20));
        assert_eq!(controller.get_current_reward(), 0.0);
    }

    #[test]
    fn extras_default_to_empty() {
        let controller = started();
        assert!(controller.get_current_extras().is_empty());
        assert!(!controller.check_episode_end());
    }

    #[test]
    fn accessors_default_without_monitors() {
        let controller = Controller::new(
            ScriptedSimulator::new(),
            ScriptedSetupRunner::default(),
            sample_task(),
            fast_config(),
        )
        .expect("new");
        assert_eq!(controller.get_current_reward(), 0.0);
        assert!(controller.get_current_extras().is_empty());
        assert!(!controller.check_episode_end());
    }

    #[test]
    fn observation_is_oriented() {
        let mut controller = started();
        controller
            .simulator_mut()
            .observation_results
            .push_back(Ok(sample_observation(Orientation::Landscape90)));
        let observation = controller
            .get_current_observation(false)
            .expect("observation");
        assert_eq!(observation.pixels.shape(), (2, 3, 2));
        assert_eq!(
            observation.pixels.data,
            vec![8, 9, 4, 5, 0, 1, 10, 11, 6, 7, 2, 3]
        );
    }

    #[test]
    fn observation_error_sets_flag_and_returns_none() {
        let mut controller = started();
        controller
            .simulator_mut()
            .observation_results
            .push_back(Err("screen capture died".to_string()));
        assert!(controller.get_current_observation(false).is_none());
        assert!(controller.should_restart());
        assert_eq!(
            controller.restart_reason(),
            Some(RestartReason::ReadObservationFailed)
        );
    }

    #[test]
    fn malformed_frame_is_treated_as_read_failure() {
        let mut controller = started();
        let mut observation = sample_observation(Orientation::Landscape90);
        observation.pixels.data.truncate(5);
        controller
            .simulator_mut()
            .observation_results
            .push_back(Ok(observation));
        assert!(controller.get_current_observation(false).is_none());
        assert!(controller.should_restart());
        assert_eq!(
            controller.restart_reason(),
            Some(RestartReason::ReadObservationFailed)
        );
    }

    #[test]
    fn wait_for_next_frame_paces_to_expected_fps() {
        let mut config = fast_config();
        config.expected_fps = 10.0;
        let mut controller = Controller::start(
            ScriptedSimulator::new(),
            ScriptedSetupRunner::default(),
            sample_task(),
            config,
        )
        .expect("start");
        controller.get_current_observation(false).expect("first");
        let started = Instant::now();
        controller.get_current_observation(true).expect("second");
        assert!(started.elapsed() >= Duration::from_millis(80));
    }

    #[test]
    fn repeat_is_not_sent_and_touch_is_sent_once() {
        let mut controller = started();
        controller.execute_action(&Action::repeat());
        assert!(controller.simulator().sent.is_empty());

        let touch = Action::touch(0.25, 0.75);
        controller.execute_action(&touch);
        assert_eq!(controller.simulator().sent, vec![touch]);
        assert_eq!(controller.step_count(), 2);
    }

    #[test]
    fn send_error_sets_flag_without_failing() {
        let mut controller = started();
        controller
            .simulator_mut()
            .send_results
            .push_back(Err("input pipe closed".to_string()));
        controller.execute_action(&Action::touch(0.5, 0.5));
        assert!(controller.should_restart());
        assert_eq!(
            controller.restart_reason(),
            Some(RestartReason::SendActionFailed)
        );
    }

    #[test]
    fn rejected_send_sets_flag() {
        let mut controller = started();
        controller.simulator_mut().send_results.push_back(Ok(false));
        controller.execute_action(&Action::lift());
        assert!(controller.should_restart());
    }

    #[test]
    fn should_restart_is_sticky_until_restart() {
        let mut controller = started();
        controller
            .simulator_mut()
            .send_results
            .push_back(Err("boom".to_string()));
        controller.execute_action(&Action::touch(0.5, 0.5));
        controller.execute_action(&Action::touch(0.5, 0.5));
        assert!(controller.should_restart());
        controller.reset().expect("reset");
        assert!(controller.should_restart());
        controller.restart().expect("restart");
        assert!(!controller.should_restart());
    }

    #[test]
    fn check_timeout_false_right_after_observation() {
        let mut controller = started();
        controller.latest_observation_local_time = Instant::now();
        assert!(!controller.check_timeout());
    }

    #[test]
    fn check_timeout_true_after_step_timeout() {
        let mut controller = started();
        let stale = Instant::now()
            .checked_sub(Duration::from_secs(3))
            .expect("clock supports 3s lookback");
        controller.latest_observation_local_time = stale;
        assert!(controller.check_timeout());
    }

    #[test]
    fn activity_mismatch_triggers_restart_on_check_step() {
        let mut config = fast_config();
        config.dumpsys_check_frequency = 2;
        let simulator = ScriptedSimulator::new();
        simulator.transport.set_activity("com.android.launcher3/.Launcher");
        let mut controller =
            Controller::start(simulator, ScriptedSetupRunner::default(), sample_task(), config)
                .expect("start");
        wait_until(|| {
            controller
                .activity_monitor
                .as_ref()
                .is_some_and(|m| m.failure_count() >= 3)
        });

        controller.execute_action(&Action::repeat());
        assert!(!controller.should_restart(), "step 1 is not a check step");
        controller.execute_action(&Action::repeat());
        assert!(controller.should_restart());
        assert!(matches!(
            controller.restart_reason(),
            Some(RestartReason::ActivityMismatch { .. })
        ));
    }

    #[test]
    fn matching_activity_keeps_running() {
        let mut config = fast_config();
        config.dumpsys_check_frequency = 1;
        let simulator = ScriptedSimulator::new();
        simulator.transport.set_activity("com.example.catch/.MainActivity");
        let mut controller =
            Controller::start(simulator, ScriptedSetupRunner::default(), sample_task(), config)
                .expect("start");
        thread::sleep(Duration::from_millis(30));
        for _ in 0..5 {
            controller.execute_action(&Action::repeat());
        }
        assert!(!controller.should_restart());
    }

    #[test]
    fn periodic_restart_fires_after_session_length() {
        let mut config = fast_config();
        config.periodic_restart_time_min = 0.001;
        let mut controller = Controller::start(
            ScriptedSimulator::new(),
            ScriptedSetupRunner::default(),
            sample_task(),
            config,
        )
        .expect("start");
        controller.execute_action(&Action::repeat());
        assert!(!controller.should_restart());
        thread::sleep(Duration::from_millis(80));
        controller.execute_action(&Action::repeat());
        assert!(matches!(
            controller.restart_reason(),
            Some(RestartReason::PeriodicRestart { .. })
        ));
    }

    #[test]
    fn close_stops_monitors() {
        let mut controller = started();
        controller.close();
        assert_eq!(controller.state(), ControllerState::Uninitialized);
        assert!(controller.log_watcher.is_none());
        assert!(controller.activity_monitor.is_none());
        assert!(!controller.simulator().transport.emit_log("reward: 1"));
    }
}

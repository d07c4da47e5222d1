//! Task definition loaded from TOML: setup scripts, log rules, expected screen.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use toml::Table;
use tracing::debug;

use crate::core::env_vars::expand_vars;
use crate::core::log_rules::{LogRuleSpec, LogRules};
use crate::core::types::Orientation;
use crate::io::config::seconds_to_duration;

/// Everything the controller needs to know about the task being played.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Task {
    pub id: String,
    pub description: String,
    /// Run once per `restart`, right after the device connection comes up.
    pub setup_steps: Vec<SetupStep>,
    /// Run at the start of every episode. Falls back to `setup_steps` when empty.
    pub reset_steps: Vec<SetupStep>,
    /// Foreground activity the device should stay on while the task runs.
    pub expected_activity: Option<String>,
    /// Logcat filter specs, e.g. `"GameLog:V"`.
    pub log_filters: Vec<String>,
    pub log_rules: Vec<LogRuleSpec>,
}

impl Task {
    /// Steps that start a fresh episode.
    pub fn episode_steps(&self) -> &[SetupStep] {
        if self.reset_steps.is_empty() {
            &self.setup_steps
        } else {
            &self.reset_steps
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(anyhow!("task id must be non-empty"));
        }
        LogRules::compile(&self.log_rules)?;
        for step in self.setup_steps.iter().chain(&self.reset_steps) {
            step.validate()?;
        }
        Ok(())
    }
}

/// One scripted device command plus an optional check that it worked.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SetupStep {
    pub adb_call: AdbCall,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success_condition: Option<SuccessCondition>,
}

impl SetupStep {
    fn validate(&self) -> Result<()> {
        if let AdbCall::Raw { args } = &self.adb_call
            && args.is_empty()
        {
            return Err(anyhow!("raw adb call needs at least one argument"));
        }
        if let AdbCall::Sleep { seconds } = self.adb_call {
            if !(seconds.is_finite() && seconds >= 0.0) {
                return Err(anyhow!("sleep seconds must be >= 0"));
            }
            seconds_to_duration("sleep seconds", seconds)?;
        }
        if let Some(condition) = &self.success_condition {
            if !(condition.timeout_sec.is_finite() && condition.timeout_sec > 0.0) {
                return Err(anyhow!("success_condition.timeout_sec must be > 0"));
            }
            seconds_to_duration("success_condition.timeout_sec", condition.timeout_sec)?;
        }
        Ok(())
    }
}

/// Device command issued by a setup step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AdbCall {
    /// Arguments passed to `adb` verbatim.
    Raw { args: Vec<String> },
    StartActivity {
        component: String,
        #[serde(default)]
        args: Vec<String>,
    },
    ForceStop { package: String },
    InstallApk { path: PathBuf },
    Rotate { orientation: Orientation },
    PressButton { button: Button },
    Sleep { seconds: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Button {
    Home,
    Back,
    Enter,
}

impl Button {
    pub fn keycode(self) -> &'static str {
        match self {
            Button::Home => "KEYCODE_HOME",
            Button::Back => "KEYCODE_BACK",
            Button::Enter => "KEYCODE_ENTER",
        }
    }
}

/// Wait for an activity to reach the foreground after a step's call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SuccessCondition {
    pub wait_for_activity: String,
    #[serde(default = "default_condition_timeout")]
    pub timeout_sec: f64,
    /// Times the call is re-issued when the activity never shows up.
    #[serde(default)]
    pub num_retries: u32,
}

fn default_condition_timeout() -> f64 {
    10.0
}

/// Load a task file, expanding `$VAR` references from the process environment.
pub fn load_task(path: &Path) -> Result<Task> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let task = parse_task(&contents, |name| std::env::var(name).ok())
        .with_context(|| format!("parse {}", path.display()))?;
    debug!(
        task_id = %task.id,
        setup_steps = task.setup_steps.len(),
        log_rules = task.log_rules.len(),
        "task loaded"
    );
    Ok(task)
}

/// Parse and validate task TOML, expanding variables through `lookup`.
pub fn parse_task(contents: &str, lookup: impl Fn(&str) -> Option<String>) -> Result<Task> {
    let mut table: Table = toml::from_str(contents).context("parse task toml")?;
    expand_vars(&mut table, &lookup);
    let task: Task = toml::Value::Table(table)
        .try_into()
        .context("decode task")?;
    task.validate()?;
    Ok(task)
}

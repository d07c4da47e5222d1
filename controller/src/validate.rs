//! `controller validate`: load a config and task the way a controller would and
//! summarize what they resolve to.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Serialize;

use crate::io::config::{ControllerConfig, load_config_with_settings};
use crate::io::task::load_task;

/// What a validated config/task pair resolves to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidateOutcome {
    pub task_id: String,
    pub setup_steps: usize,
    pub reset_steps: usize,
    pub log_rules: usize,
    pub expected_activity: Option<String>,
    pub config: ControllerConfig,
}

/// Load and validate both documents, applying `settings` to the config.
pub fn validate_inputs(
    config_path: &Path,
    task_path: &Path,
    settings: &BTreeMap<String, String>,
) -> Result<ValidateOutcome> {
    let config = load_config_with_settings(config_path, settings)
        .with_context(|| format!("load config {}", config_path.display()))?;
    let task = load_task(task_path)?;
    Ok(ValidateOutcome {
        task_id: task.id.clone(),
        setup_steps: task.setup_steps.len(),
        reset_steps: task.reset_steps.len(),
        log_rules: task.log_rules.len(),
        expected_activity: task.expected_activity.clone(),
        config,
    })
}

/// Parse `key=value` overrides. Later duplicates win.
pub fn parse_settings(pairs: &[String]) -> Result<BTreeMap<String, String>> {
    let mut settings = BTreeMap::new();
    for pair in pairs {
        let Some((key, value)) = pair.split_once('=') else {
            bail!("expected key=value, got '{pair}'");
        };
        let key = key.trim();
        if key.is_empty() {
            bail!("empty key in '{pair}'");
        }
        settings.insert(key.to_string(), value.trim().to_string());
    }
    Ok(settings)
}

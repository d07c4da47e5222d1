//! `controller replay-log`: run a captured device log through a task's rules.
//!
//! Useful for checking reward patterns offline against a saved logcat dump.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::warn;

use crate::core::log_rules::{LogAccumulator, LogEvent, LogRules};
use crate::core::types::Extras;
use crate::io::task::load_task;

/// Totals after replaying a log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplaySummary {
    pub lines: usize,
    pub matched_lines: usize,
    pub malformed: usize,
    pub reward: f64,
    pub extras: Extras,
    pub episode_end: bool,
}

/// Feed every line from `reader` through `rules`.
pub fn replay_lines(rules: &LogRules, reader: impl BufRead) -> Result<ReplaySummary> {
    let mut acc = LogAccumulator::default();
    let (mut lines, mut matched_lines, mut malformed) = (0, 0, 0);
    for line in reader.lines() {
        let line = line.with_context(|| format!("read log line {}", lines + 1))?;
        lines += 1;
        let events = rules.events(&line);
        if !events.is_empty() {
            matched_lines += 1;
        }
        for event in events {
            if let LogEvent::Malformed { pattern, reason } = &event {
                warn!(line = lines, %pattern, %reason, "unusable log match");
                malformed += 1;
            }
            acc.apply(event);
        }
    }
    Ok(ReplaySummary {
        lines,
        matched_lines,
        malformed,
        reward: acc.take_reward().unwrap_or(0.0),
        extras: acc.take_extras(),
        episode_end: acc.take_episode_end(),
    })
}

/// Load the task at `task_path` and replay `log_path` through its rules.
pub fn replay_log(task_path: &Path, log_path: &Path) -> Result<ReplaySummary> {
    let task = load_task(task_path)?;
    let rules = LogRules::compile(&task.log_rules)?;
    if rules.is_empty() {
        warn!(task_id = %task.id, "task has no log rules, nothing will match");
    }
    let file = File::open(log_path).with_context(|| format!("open {}", log_path.display()))?;
    replay_lines(&rules, BufReader::new(file))
        .with_context(|| format!("replay {}", log_path.display()))
}

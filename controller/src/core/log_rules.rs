//! Declarative log matching: each rule pairs a regex with the effect a matching
//! line has on the episode accumulators.
//!
//! Rules are compiled once per task. Evaluation is pure; the log watcher feeds
//! lines in and applies the resulting events to a [`LogAccumulator`].

use anyhow::{Context, Result};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::types::Extras;

/// What a matching line does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogEffect {
    /// Group 1 is a reward delta.
    Reward,
    /// Group 1 is an absolute score; the change since the last score is the reward.
    Score,
    /// The episode is over.
    EpisodeEnd,
    /// Groups `name`/`value` (or 1/2) append one extra.
    Extra,
    /// Group 1 is a JSON object whose entries append extras.
    JsonExtra,
}

/// One rule as written in a task file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRuleSpec {
    pub pattern: String,
    pub effect: LogEffect,
}

/// Outcome of one rule matching one line.
#[derive(Debug, Clone, PartialEq)]
pub enum LogEvent {
    Reward(f64),
    Score(f64),
    EpisodeEnd,
    Extra { name: String, value: Value },
    /// The pattern matched but its captures could not be interpreted.
    Malformed { pattern: String, reason: String },
}

#[derive(Debug, Clone)]
struct CompiledRule {
    regex: Regex,
    effect: LogEffect,
}

/// Compiled, ordered rule set.
#[derive(Debug, Clone, Default)]
pub struct LogRules {
    rules: Vec<CompiledRule>,
}

impl LogRules {
    pub fn compile(specs: &[LogRuleSpec]) -> Result<Self> {
        let rules = specs
            .iter()
            .map(|spec| {
                let regex = Regex::new(&spec.pattern)
                    .with_context(|| format!("compile log rule pattern {:?}", spec.pattern))?;
                Ok(CompiledRule {
                    regex,
                    effect: spec.effect,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Evaluate every rule against `line`, in rule order.
    pub fn events(&self, line: &str) -> Vec<LogEvent> {
        let mut events = Vec::new();
        for rule in &self.rules {
            if let Some(caps) = rule.regex.captures(line) {
                interpret(rule, &caps, &mut events);
            }
        }
        events
    }
}

fn interpret(rule: &CompiledRule, caps: &Captures<'_>, events: &mut Vec<LogEvent>) {
    let malformed = |reason: String| LogEvent::Malformed {
        pattern: rule.regex.as_str().to_string(),
        reason,
    };
    match rule.effect {
        LogEffect::EpisodeEnd => events.push(LogEvent::EpisodeEnd),
        LogEffect::Reward | LogEffect::Score => {
            let Some(raw) = caps.get(1) else {
                events.push(malformed("missing capture group 1".to_string()));
                return;
            };
            match raw.as_str().trim().parse::<f64>() {
                Ok(value) if rule.effect == LogEffect::Reward => events.push(LogEvent::Reward(value)),
                Ok(value) => events.push(LogEvent::Score(value)),
                Err(err) => events.push(malformed(format!("{:?}: {err}", raw.as_str()))),
            }
        }
        LogEffect::Extra => {
            let name = caps.name("name").or_else(|| caps.get(1));
            let value = caps.name("value").or_else(|| caps.get(2));
            match (name, value) {
                (Some(name), Some(value)) => events.push(LogEvent::Extra {
                    name: name.as_str().to_string(),
                    value: parse_extra_value(value.as_str()),
                }),
                _ => events.push(malformed("extra needs a name and a value".to_string())),
            }
        }
        LogEffect::JsonExtra => {
            let Some(raw) = caps.get(1) else {
                events.push(malformed("missing capture group 1".to_string()));
                return;
            };
            match serde_json::from_str::<Value>(raw.as_str()) {
                Ok(Value::Object(map)) => {
                    for (name, value) in map {
                        events.push(LogEvent::Extra { name, value });
                    }
                }
                Ok(other) => events.push(malformed(format!("expected JSON object, got {other}"))),
                Err(err) => events.push(malformed(format!("invalid JSON: {err}"))),
            }
        }
    }
}

/// JSON when the text parses as JSON, otherwise the raw string.
fn parse_extra_value(raw: &str) -> Value {
    let trimmed = raw.trim();
    serde_json::from_str(trimmed).unwrap_or_else(|_| Value::String(trimmed.to_string()))
}

/// Per-episode accumulators with read-and-clear accessors.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogAccumulator {
    reward: Option<f64>,
    extras: Extras,
    episode_end: bool,
    last_score: f64,
}

impl LogAccumulator {
    pub fn apply(&mut self, event: LogEvent) {
        match event {
            LogEvent::Reward(delta) => self.add_reward(delta),
            LogEvent::Score(score) => {
                let delta = score - self.last_score;
                self.last_score = score;
                self.add_reward(delta);
            }
            LogEvent::EpisodeEnd => self.episode_end = true,
            LogEvent::Extra { name, value } => self.extras.entry(name).or_default().push(value),
            LogEvent::Malformed { .. } => {}
        }
    }

    fn add_reward(&mut self, delta: f64) {
        *self.reward.get_or_insert(0.0) += delta;
    }

    /// Pending reward, or `None` when nothing was reported since the last read.
    pub fn take_reward(&mut self) -> Option<f64> {
        self.reward.take()
    }

    pub fn take_extras(&mut self) -> Extras {
        std::mem::take(&mut self.extras)
    }

    pub fn take_episode_end(&mut self) -> bool {
        std::mem::take(&mut self.episode_end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rule(pattern: &str, effect: LogEffect) -> LogRuleSpec {
        LogRuleSpec {
            pattern: pattern.to_string(),
            effect,
        }
    }

    fn rules() -> LogRules {
        LogRules::compile(&[
            rule(r"^[Rr]eward: ([-+]?[0-9.]+)$", LogEffect::Reward),
            rule(r"^score: ([-+]?[0-9.]+)$", LogEffect::Score),
            rule(r"^episode end$", LogEffect::EpisodeEnd),
            rule(r"^extra: (?P<name>\w+) (?P<value>.*)$", LogEffect::Extra),
            rule(r"^json_extra: (.*)$", LogEffect::JsonExtra),
        ])
        .expect("compile")
    }

    fn feed(acc: &mut LogAccumulator, rules: &LogRules, lines: &[&str]) {
        for line in lines {
            for event in rules.events(line) {
                acc.apply(event);
            }
        }
    }

    #[test]
    fn compile_reports_bad_pattern() {
        let err = LogRules::compile(&[rule("(", LogEffect::Reward)]).unwrap_err();
        assert!(format!("{err:#}").contains("compile log rule pattern"));
    }

    #[test]
    fn rewards_sum_until_read() {
        let rules = rules();
        let mut acc = LogAccumulator::default();
        feed(&mut acc, &rules, &["Reward: 1.5", "reward: -0.5", "noise"]);
        assert_eq!(acc.take_reward(), Some(1.0));
        assert_eq!(acc.take_reward(), None);
    }

    #[test]
    fn zero_reward_is_distinct_from_absent() {
        let rules = rules();
        let mut acc = LogAccumulator::default();
        feed(&mut acc, &rules, &["reward: 0"]);
        assert_eq!(acc.take_reward(), Some(0.0));
    }

    #[test]
    fn score_contributes_deltas() {
        let rules = rules();
        let mut acc = LogAccumulator::default();
        feed(&mut acc, &rules, &["score: 10", "score: 25"]);
        assert_eq!(acc.take_reward(), Some(25.0));
        feed(&mut acc, &rules, &["score: 30"]);
        assert_eq!(acc.take_reward(), Some(5.0));
    }

    #[test]
    fn extras_append_per_key() {
        let rules = rules();
        let mut acc = LogAccumulator::default();
        feed(
            &mut acc,
            &rules,
            &[
                "extra: level 3",
                "extra: level [1, 2]",
                "extra: name hello world",
                r#"json_extra: {"lives": 2, "level": 4}"#,
            ],
        );
        let extras = acc.take_extras();
        assert_eq!(extras["level"], vec![json!(3), json!([1, 2]), json!(4)]);
        assert_eq!(extras["name"], vec![json!("hello world")]);
        assert_eq!(extras["lives"], vec![json!(2)]);
        assert!(acc.take_extras().is_empty());
    }

    #[test]
    fn episode_end_is_read_and_clear() {
        let rules = rules();
        let mut acc = LogAccumulator::default();
        feed(&mut acc, &rules, &["episode end"]);
        assert!(acc.take_episode_end());
        assert!(!acc.take_episode_end());
    }

    #[test]
    fn unparsable_capture_is_reported_not_applied() {
        let rules = LogRules::compile(&[rule(r"^reward: (\S+)$", LogEffect::Reward)]).expect("compile");
        let events = rules.events("reward: lots");
        assert!(matches!(events.as_slice(), [LogEvent::Malformed { .. }]));
    }

    #[test]
    fn json_extra_requires_object() {
        let rules = rules();
        let events = rules.events("json_extra: [1, 2]");
        assert!(matches!(events.as_slice(), [LogEvent::Malformed { .. }]));
    }
}

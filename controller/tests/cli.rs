//! CLI tests for `controller validate` and `controller replay-log`.
//!
//! Spawns the controller binary and checks exit codes and JSON output.

use std::process::Command;

use controller::exit_codes;
use controller::test_support::TempFiles;
use serde_json::Value;

const TASK: &str = r#"
id = "catch"
log_filters = ["CatchGame:V"]

[[setup_steps]]
adb_call = { type = "rotate", orientation = "landscape90" }

[[log_rules]]
pattern = "reward: ([-0-9.]+)"
effect = "reward"

[[log_rules]]
pattern = "score=(\\d+)"
effect = "score"

[[log_rules]]
pattern = "game over"
effect = "episode_end"
"#;

fn controller_cmd() -> Command {
    Command::new(env!("CARGO_BIN_EXE_controller"))
}

#[test]
fn replay_log_prints_summary() {
    let files = TempFiles::new().expect("tempdir");
    let task = files.write("task.toml", TASK).expect("task");
    let log = files
        .write(
            "logcat.txt",
            "I/CatchGame: reward: 0.5\nI/CatchGame: score=10\nI/CatchGame: score=15\nI/CatchGame: game over\n",
        )
        .expect("log");

    let output = controller_cmd()
        .arg("replay-log")
        .arg("--task")
        .arg(&task)
        .arg(&log)
        .output()
        .expect("controller replay-log");

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let summary: Value = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(summary["lines"], 4);
    assert_eq!(summary["reward"], 15.5);
    assert_eq!(summary["episode_end"], true);
}

#[test]
fn validate_applies_overrides() {
    let files = TempFiles::new().expect("tempdir");
    let task = files.write("task.toml", TASK).expect("task");
    let missing_config = files.write("unused.txt", "").expect("placeholder");
    let config = missing_config.with_file_name("config.toml");

    let output = controller_cmd()
        .arg("validate")
        .arg("--config")
        .arg(&config)
        .arg("--task")
        .arg(&task)
        .args(["--set", "max_bad_states=7", "--set", "adb.serial=emulator-5554"])
        .output()
        .expect("controller validate");

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let outcome: Value = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(outcome["task_id"], "catch");
    assert_eq!(outcome["config"]["max_bad_states"], 7);
    assert_eq!(outcome["config"]["adb"]["serial"], "emulator-5554");
}

#[test]
fn invalid_task_exits_with_invalid_code() {
    let files = TempFiles::new().expect("tempdir");
    let task = files
        .write(
            "task.toml",
            "id = \"broken\"\n[[log_rules]]\npattern = \"(\"\neffect = \"reward\"\n",
        )
        .expect("task");
    let log = files.write("logcat.txt", "").expect("log");

    let status = controller_cmd()
        .arg("replay-log")
        .arg("--task")
        .arg(&task)
        .arg(&log)
        .status()
        .expect("controller replay-log");

    assert_eq!(status.code(), Some(exit_codes::INVALID));
}

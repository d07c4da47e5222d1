//! Remote device controller for learning environments.
//!
//! Drives a simulator or emulator over a device bridge: forwards actions, reads
//! observations, turns device log lines into rewards, and keeps the connection
//! healthy with bounded restarts.
//!
//! - **[`core`]**: Pure logic (coordinate transforms, log rules, retry and
//!   health policy, settings overlays). No I/O.
//! - **[`io`]**: Device commands, background monitors, config and task files.
//! - **[`controller`]**: The lifecycle state machine tying them together.
//!
//! [`validate`] and [`replay`] back the CLI commands.

pub mod controller;
pub mod core;
pub mod errors;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod replay;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod validate;

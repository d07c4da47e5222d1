//! Deterministic, pure logic shared by the controller.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data and return deterministic outputs suitable for tests.

pub mod env_vars;
pub mod health;
pub mod log_rules;
pub mod retry;
pub mod settings;
pub mod transform;
pub mod types;

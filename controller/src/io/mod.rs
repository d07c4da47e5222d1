pub mod activity_monitor;
pub mod adb;
pub mod config;
pub mod log_watcher;
pub mod monitor;
pub mod process;
pub mod setup;
pub mod simulator;
pub mod task;

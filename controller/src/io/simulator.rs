//! The simulator owns the emulated device process and the action/observation path.

use std::sync::Arc;

use anyhow::Result;

use crate::core::types::{Action, Observation};
use crate::io::adb::DeviceTransport;

/// Contract the controller consumes from a simulator backend.
pub trait Simulator {
    /// Create a fresh device connection. Failures should carry
    /// [`ConnectionError`](crate::errors::ConnectionError).
    fn create_adb_controller(&mut self) -> Result<Arc<dyn DeviceTransport>>;

    /// Deliver an action to the device. `Ok(false)` means the device refused it.
    fn send_action(&mut self, action: &Action) -> Result<bool>;

    /// Latest frame, optionally waiting for one newer than the previous read.
    fn get_observation(&mut self, wait_for_next_frame: bool) -> Result<Observation>;
}

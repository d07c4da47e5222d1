//! Error taxonomy for the controller and its collaborators.
//!
//! Collaborator traits return `anyhow::Result`; these types are attached so the
//! controller (and its callers) can tell failure kinds apart with
//! `downcast_ref`. Only [`TooManyRestartsError`] and [`InvalidStateError`] ever
//! leave the controller.

use std::fmt;

use thiserror::Error;

use crate::core::types::ControllerState;

/// Creating the device connection (or running a command on it) failed.
#[derive(Debug, Error)]
#[error("device connection failed: {0}")]
pub struct ConnectionError(pub String);

/// A setup step failed.
#[derive(Debug, Error)]
#[error("setup step failed: {0}")]
pub struct SetupError(pub String);

/// The simulator could not produce an observation.
#[derive(Debug, Error)]
#[error("failed to read observation: {0}")]
pub struct ReadObservationError(pub String);

/// The simulator rejected or failed to deliver an action.
#[derive(Debug, Error)]
#[error("failed to send action: {0}")]
pub struct SendActionError(pub String);

/// Which part of `restart` ran out of retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartStage {
    Connection,
    Setup,
}

impl fmt::Display for RestartStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestartStage::Connection => f.write_str("device connection"),
            RestartStage::Setup => f.write_str("setup"),
        }
    }
}

/// Fatal: the retry budget was exhausted. The controller is unusable afterwards.
#[derive(Debug, Error)]
#[error("too many restarts: {stage} failed {attempts} times (max_bad_states={max_bad_states})")]
pub struct TooManyRestartsError {
    pub stage: RestartStage,
    pub attempts: u32,
    pub max_bad_states: u32,
}

/// An operation was called in a state that does not allow it.
#[derive(Debug, Error)]
#[error("{operation} is not valid while the controller is {state}")]
pub struct InvalidStateError {
    pub operation: &'static str,
    pub state: ControllerState,
}

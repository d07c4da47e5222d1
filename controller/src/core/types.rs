//! Shared types exchanged between the agent, the controller and the simulator.
//!
//! These types carry no behavior beyond small accessors. They must stay free of
//! device or process state so that core logic remains deterministic.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of action submitted by the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// Finger down (or still down) at `touch_position`.
    Touch,
    /// Finger lifted.
    Lift,
    /// Keep whatever the previous action is doing; nothing is sent.
    Repeat,
}

/// Agent action. `touch_position` is normalized to `[0, 1] x [0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub action_type: ActionType,
    pub touch_position: [f64; 2],
}

impl Action {
    pub fn touch(x: f64, y: f64) -> Self {
        Self {
            action_type: ActionType::Touch,
            touch_position: [x, y],
        }
    }

    pub fn lift() -> Self {
        Self {
            action_type: ActionType::Lift,
            touch_position: [0.0, 0.0],
        }
    }

    pub fn repeat() -> Self {
        Self {
            action_type: ActionType::Repeat,
            touch_position: [0.0, 0.0],
        }
    }
}

/// Device screen rotation, clockwise from natural portrait.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Orientation {
    #[default]
    Portrait0,
    Landscape90,
    Portrait180,
    Landscape270,
}

impl Orientation {
    /// Value accepted by `settings put system user_rotation`.
    pub fn user_rotation(self) -> u8 {
        match self {
            Orientation::Portrait0 => 0,
            Orientation::Landscape90 => 1,
            Orientation::Portrait180 => 2,
            Orientation::Landscape270 => 3,
        }
    }
}

/// Row-major `height x width x channels` pixel buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image<T> {
    pub height: usize,
    pub width: usize,
    pub channels: usize,
    pub data: Vec<T>,
}

impl<T> Image<T> {
    /// Wrap `data`, checking that its length matches the declared shape.
    pub fn new(height: usize, width: usize, channels: usize, data: Vec<T>) -> anyhow::Result<Self> {
        let image = Self {
            height,
            width,
            channels,
            data,
        };
        image.validate()?;
        Ok(image)
    }

    /// Check that the buffer length matches `height * width * channels`.
    ///
    /// Fields are public, so frames built by hand (or by a simulator) must pass
    /// this before pixel indexing.
    pub fn validate(&self) -> anyhow::Result<()> {
        let (height, width, channels) = self.shape();
        let expected = height
            .checked_mul(width)
            .and_then(|n| n.checked_mul(channels));
        if expected != Some(self.data.len()) {
            anyhow::bail!(
                "pixel buffer has {} elements, shape {height}x{width}x{channels} needs {}",
                self.data.len(),
                expected.map_or_else(|| "more than usize::MAX".to_string(), |n| n.to_string())
            );
        }
        Ok(())
    }

    pub fn shape(&self) -> (usize, usize, usize) {
        (self.height, self.width, self.channels)
    }

    /// Channel values of the pixel at `(row, col)`.
    pub fn pixel(&self, row: usize, col: usize) -> &[T] {
        let start = (row * self.width + col) * self.channels;
        &self.data[start..start + self.channels]
    }
}

/// A frame read back from the simulator.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub pixels: Image<u8>,
    /// Rotation the device reported when the frame was captured.
    pub orientation: Orientation,
    /// Simulator-side capture timestamp in microseconds.
    pub timestamp_us: u64,
}

/// Free-form values reported through the device log, grouped by key.
pub type Extras = BTreeMap<String, Vec<Value>>;

/// Controller lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Uninitialized,
    Ready,
    /// Terminal: the restart budget was exhausted.
    Fatal,
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ControllerState::Uninitialized => "uninitialized",
            ControllerState::Ready => "ready",
            ControllerState::Fatal => "fatal",
        };
        f.write_str(label)
    }
}

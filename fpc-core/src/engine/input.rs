//! Synthetic key events
//!
//! The sensor reports touches to the host's input layer as key presses on an
//! otherwise unused key code. The host side (and the ESD recovery path) can
//! also inject home-key presses through the control surface.

use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::constants::keys::{KEY_F2, KEY_FINGERPRINT, KEY_HOME, KEY_POWER};
use crate::error::{FpcError, Result};

/// Keys the input device advertises
pub const SUPPORTED_KEYS: [u16; 4] = [KEY_POWER, KEY_F2, KEY_HOME, KEY_FINGERPRINT];

/// A single key transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyEvent {
    pub code: u16,
    pub pressed: bool,
}

/// Channel into the host input layer.
///
/// `emit` queues a transition, `flush` makes everything queued visible
/// (an input sync). Both are called from the interrupt path.
#[cfg_attr(test, mockall::automock)]
pub trait EventSink: Send + Sync {
    fn emit(&self, code: u16, pressed: bool);
    fn flush(&self);
}

/// What the sink is registered as
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputDeviceSpec {
    pub name: String,
    pub keys: Vec<u16>,
}

impl InputDeviceSpec {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            keys: SUPPORTED_KEYS.to_vec(),
        }
    }
}

/// Registers an input device and returns its sink (platform collaborator)
pub trait InputRegistrar: Send + Sync {
    fn register(&self, spec: &InputDeviceSpec) -> Result<Arc<dyn EventSink>>;
}

/// Press and release `code`, each followed by a sync
pub fn pulse(sink: &dyn EventSink, code: u16) {
    sink.emit(code, true);
    sink.flush();
    sink.emit(code, false);
    sink.flush();
}

/// Values accepted by the simulated home key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HomeKeyCommand {
    /// HOME pressed
    Down,
    /// HOME released
    Up,
    /// F2 tapped, signalling an authentication timeout
    Timeout,
}

impl HomeKeyCommand {
    pub fn as_str(self) -> &'static str {
        match self {
            HomeKeyCommand::Down => "down",
            HomeKeyCommand::Up => "up",
            HomeKeyCommand::Timeout => "timeout",
        }
    }

    /// Deliver the key sequence for this command
    pub fn deliver(self, sink: &dyn EventSink) {
        match self {
            HomeKeyCommand::Down => {
                sink.emit(KEY_HOME, true);
                sink.flush();
            }
            HomeKeyCommand::Up => {
                sink.emit(KEY_HOME, false);
                sink.flush();
            }
            HomeKeyCommand::Timeout => pulse(sink, KEY_F2),
        }
    }
}

impl FromStr for HomeKeyCommand {
    type Err = FpcError;

    /// Attribute writes usually arrive with a trailing newline (`echo down`).
    /// Matching is exact after that, so `"down please"` is rejected rather
    /// than taken as a prefix match.
    fn from_str(s: &str) -> Result<Self> {
        match s.trim_end_matches(['\n', '\r']) {
            "down" => Ok(HomeKeyCommand::Down),
            "up" => Ok(HomeKeyCommand::Up),
            "timeout" => Ok(HomeKeyCommand::Timeout),
            other => Err(FpcError::invalid_argument(format!(
                "unrecognized home key value {:?}",
                other
            ))),
        }
    }
}

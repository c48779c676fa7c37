//! Control line access
//!
//! A control line is one electrical signal between the SoC and the sensor
//! (interrupt, reset, identification straps). Lines are resolved once at
//! attach through a [`LineProvider`] and afterwards only queried or driven.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Electrical level of a line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Level {
    Low,
    High,
}

impl Level {
    pub fn is_high(self) -> bool {
        self == Level::High
    }

    /// Numeric form used by the control surface (`0` / `1`)
    pub fn as_u8(self) -> u8 {
        match self {
            Level::Low => 0,
            Level::High => 1,
        }
    }
}

impl From<bool> for Level {
    fn from(high: bool) -> Self {
        if high {
            Level::High
        } else {
            Level::Low
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

/// Direction a line is claimed with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    /// Output with its initial level
    Output(Level),
}

/// An acquired control line.
///
/// Implementations must be cheap to query: [`ControlLine::level`] is called
/// from the interrupt path and from host attribute reads.
pub trait ControlLine: Send + Sync {
    /// Label the line was acquired under
    fn label(&self) -> &str;

    /// Current level. `None` means the hardware could not be read right now.
    fn level(&self) -> Option<Level>;

    /// Drive an output line
    fn set_level(&self, level: Level) -> Result<()>;
}

/// Shared handle to an acquired line
pub type LineHandle = Arc<dyn ControlLine>;

/// Resolves named lines to handles (platform collaborator)
pub trait LineProvider: Send + Sync {
    fn acquire(&self, label: &str, direction: Direction) -> Result<LineHandle>;
}

/// Read the current level of a line.
///
/// A transiently unreadable line reports `Low`, matching what a failed
/// GPIO value read reports to user space.
pub fn read_line(line: &dyn ControlLine) -> Level {
    line.level().unwrap_or(Level::Low)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::sim::SimLine;

    #[test]
    fn test_level_conversions() {
        assert_eq!(Level::from(true), Level::High);
        assert_eq!(Level::from(false).as_u8(), 0);
        assert_eq!(Level::High.to_string(), "1");
    }

    #[test]
    fn test_read_line_reports_current_level() {
        let line = SimLine::new("fpc,irq-gpio", Level::Low);
        assert_eq!(read_line(&line), Level::Low);
        line.drive(Level::High);
        assert_eq!(read_line(&line), Level::High);
    }

    #[test]
    fn test_read_line_unreadable_is_low() {
        let line = SimLine::new("fpc,irq-gpio", Level::High);
        line.set_faulty(true);
        assert_eq!(read_line(&line), Level::Low);
    }
}

//! Sensor identification
//!
//! Three strap lines (ID0..ID2) encode which sensor generation and which
//! module vendor is fitted:
//!
//! | ID0 | ID1 | ID2 | sensor  | vendor   |
//! |-----|-----|-----|---------|----------|
//! |  1  |  1  |  1  | fpc1245 | O-film   |
//! |  1  |  0  |  0  | fpc1245 | Primax   |
//! |  0  |  0  |  1  | fpc1245 | truly    |
//! |  1  |  1  |  0  | fpc1263 | O-film   |
//! |  0  |  0  |  0  | fpc1263 | Primax   |
//! |  0  |  1  |  1  | fpc1263 | truly    |
//! |  0  |  1  |  0  | fpc1263 | f/p      |
//! |  1  |  0  |  1  | fpc1263 | Goodix   |

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::identity::{COMPONENT_NA, COMPONENT_UNKNOWN_MODEL, COMPONENT_UNKNOWN_VENDOR};

/// Sensor generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SensorModel {
    Fpc1245,
    Fpc1263,
    Unknown,
}

impl SensorModel {
    pub fn tag(self) -> &'static str {
        match self {
            SensorModel::Fpc1245 => "fpc1245",
            SensorModel::Fpc1263 => "fpc1263",
            SensorModel::Unknown => COMPONENT_UNKNOWN_MODEL,
        }
    }

    /// Version number reported through `sensor_version`.
    /// Anything that is not positively an fpc1245 reports 2.
    pub fn version(self) -> u8 {
        match self {
            SensorModel::Fpc1245 => 1,
            SensorModel::Fpc1263 | SensorModel::Unknown => 2,
        }
    }
}

/// Module vendor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SensorVendor {
    OFilm,
    Primax,
    Truly,
    Fingerchip,
    Goodix,
    Unknown,
}

impl SensorVendor {
    pub fn tag(self) -> &'static str {
        match self {
            SensorVendor::OFilm => "FPC(OF)",
            SensorVendor::Primax => "FPC(Primax)",
            SensorVendor::Truly => "FPC(truly)",
            SensorVendor::Fingerchip => "FPC(f/p)",
            SensorVendor::Goodix => "FPC(Goodix)",
            SensorVendor::Unknown => COMPONENT_UNKNOWN_VENDOR,
        }
    }
}

/// Resolved sensor identity. Fixed once the device is attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorIdentity {
    pub model: SensorModel,
    pub vendor: SensorVendor,
}

impl SensorIdentity {
    pub const UNKNOWN: SensorIdentity = SensorIdentity {
        model: SensorModel::Unknown,
        vendor: SensorVendor::Unknown,
    };

    pub fn is_known(&self) -> bool {
        self.model != SensorModel::Unknown
    }

    pub fn version(&self) -> u8 {
        self.model.version()
    }

    pub fn component_info(&self) -> ComponentInfo {
        ComponentInfo {
            model: self.model.tag().to_string(),
            vendor: self.vendor.tag().to_string(),
        }
    }
}

impl fmt::Display for SensorIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.model.tag(), self.vendor.tag())
    }
}

/// Component info published to the rest of the system. Starts as the
/// resolved identity and can be blanked to `N/A` by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentInfo {
    pub model: String,
    pub vendor: String,
}

impl ComponentInfo {
    pub fn not_available() -> Self {
        Self {
            model: COMPONENT_NA.to_string(),
            vendor: COMPONENT_NA.to_string(),
        }
    }
}

impl fmt::Display for ComponentInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.model, self.vendor)
    }
}

/// Map the three strap levels to an identity.
pub fn resolve(id0: bool, id1: bool, id2: bool) -> SensorIdentity {
    use SensorModel::*;
    use SensorVendor::*;

    let (model, vendor) = match (id0, id1, id2) {
        (true, true, true) => (Fpc1245, OFilm),
        (true, false, false) => (Fpc1245, Primax),
        (false, false, true) => (Fpc1245, Truly),
        (true, true, false) => (Fpc1263, OFilm),
        (false, false, false) => (Fpc1263, Primax),
        (false, true, true) => (Fpc1263, Truly),
        (false, true, false) => (Fpc1263, Fingerchip),
        (true, false, true) => (Fpc1263, Goodix),
    };
    SensorIdentity { model, vendor }
}

/// Resolve from possibly-missing strap readings. Any unreadable strap
/// yields the unknown identity.
pub fn resolve_pattern(id0: Option<bool>, id1: Option<bool>, id2: Option<bool>) -> SensorIdentity {
    match (id0, id1, id2) {
        (Some(a), Some(b), Some(c)) => resolve(a, b, c),
        _ => SensorIdentity::UNKNOWN,
    }
}

//! Control surface
//!
//! The host-facing attribute interface. Values are rendered the way sysfs
//! attributes are: a decimal integer followed by a newline, or a short
//! string for the identity.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use fpc_protocol::{validate_attribute_value, Attribute, DeviceStatus};

use crate::device::Device;
use crate::engine::input::HomeKeyCommand;
use crate::error::{FpcError, Result};
use crate::hw::identity::ComponentInfo;

fn render_int(value: i64) -> String {
    format!("{}\n", value)
}

/// Boolean parameter syntax: `1`/`y`/`Y` and `0`/`n`/`N`
fn parse_flag(value: &str) -> Result<bool> {
    match value.trim_end().chars().next() {
        Some('1' | 'y' | 'Y') => Ok(true),
        Some('0' | 'n' | 'N') => Ok(false),
        _ => Err(FpcError::invalid_argument(format!(
            "expected 0 or 1, got {:?}",
            value.trim_end()
        ))),
    }
}

/// Attribute access to an attached [`Device`]
#[derive(Clone)]
pub struct ControlSurface {
    device: Arc<Device>,
}

impl ControlSurface {
    pub fn new(device: Arc<Device>) -> Self {
        Self { device }
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    pub fn read(&self, attr: Attribute) -> Result<String> {
        let value = match attr {
            Attribute::Irq => render_int(self.device.irq_level().as_u8() as i64),
            Attribute::ScreenState => render_int(self.device.is_display_on() as i64),
            Attribute::SensorVersion => render_int(self.device.identity().version() as i64),
            Attribute::SensorIdentity => format!("{}\n", self.device.identity()),
            Attribute::ComponentInfo => format!("{}\n", self.device.component_info()),
            Attribute::IgnoreHomeForEsd => render_int(self.device.ignore_home_for_esd() as i64),
            Attribute::ReportHome | Attribute::UpdateInfo => {
                return Err(FpcError::PermissionDenied(format!("{} is write-only", attr)))
            }
        };
        Ok(value)
    }

    /// Write `value`. Returns the number of bytes consumed.
    pub fn write(&self, attr: Attribute, value: &str) -> Result<usize> {
        validate_attribute_value(value).map_err(FpcError::InvalidArgument)?;

        match attr {
            Attribute::Irq => {
                // Acknowledgement only
                debug!(value = value.trim_end(), "irq acknowledged");
            }
            Attribute::ReportHome => {
                if self.device.ignore_home_for_esd() {
                    return Err(FpcError::invalid_argument(
                        "home key ignored during ESD recovery",
                    ));
                }
                let command: HomeKeyCommand = value.parse()?;
                command.deliver(self.device.events().sink().as_ref());
                debug!(command = command.as_str(), "home key reported");
            }
            Attribute::UpdateInfo => {
                if value.starts_with('n') {
                    self.device.set_component_info(ComponentInfo::not_available());
                    info!("Component info cleared");
                }
            }
            Attribute::IgnoreHomeForEsd => {
                let ignore = parse_flag(value)?;
                self.device.set_ignore_home_for_esd(ignore);
                info!(ignore, "ESD home key guard updated");
            }
            Attribute::ScreenState
            | Attribute::SensorVersion
            | Attribute::SensorIdentity
            | Attribute::ComponentInfo => {
                return Err(FpcError::PermissionDenied(format!("{} is read-only", attr)))
            }
        }
        Ok(value.len())
    }

    /// Current generation of a pollable attribute
    pub fn generation(&self, attr: Attribute) -> Result<u64> {
        Self::check_pollable(attr)?;
        Ok(self.device.notifier().generation(attr))
    }

    /// Block until `attr` is published after `seen`. Returns the new
    /// generation and the value read right after waking.
    pub fn wait(&self, attr: Attribute, seen: u64, timeout: Duration) -> Result<(u64, String)> {
        Self::check_pollable(attr)?;
        let generation = self
            .device
            .notifier()
            .wait_past(attr, seen, timeout)
            .ok_or_else(|| FpcError::Timeout(format!("no change on {}", attr)))?;
        Ok((generation, self.read(attr)?))
    }

    pub fn status(&self) -> DeviceStatus {
        self.device.status()
    }

    fn check_pollable(attr: Attribute) -> Result<()> {
        if attr.is_pollable() {
            Ok(())
        } else {
            Err(FpcError::NotSupported(format!("{} does not notify", attr)))
        }
    }
}

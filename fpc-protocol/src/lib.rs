use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Global request ID counter for correlation
static REQUEST_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Maximum message size for IPC (8KB)
pub const MAX_MESSAGE_SIZE: usize = 8 * 1024;

/// Longest value accepted by an attribute write
pub const MAX_ATTRIBUTE_VALUE_LEN: usize = 64;

/// Upper bound for a single WaitAttribute call
pub const MAX_WAIT_TIMEOUT_MS: u32 = 30_000;

/// Generate a unique request ID for correlation
pub fn generate_request_id() -> u64 {
    REQUEST_ID_COUNTER.fetch_add(1, Ordering::SeqCst)
}

/// Control surface attributes exposed by the device.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Attribute {
    /// Interrupt line level; writes are acknowledgements
    Irq,
    /// Simulated home key (`down`, `up`, `timeout`)
    ReportHome,
    /// Component info override (`n` resets it)
    UpdateInfo,
    /// Display-active flag
    ScreenState,
    /// Sensor generation (1 or 2)
    SensorVersion,
    /// Model and vendor tags resolved at attach
    SensorIdentity,
    /// Published component info; `N/A N/A` after an `update_info` reset
    ComponentInfo,
    /// Home key rejection during ESD recovery (`0`/`1`, root-only write)
    IgnoreHomeForEsd,
}

impl Attribute {
    pub const ALL: [Attribute; 8] = [
        Attribute::Irq,
        Attribute::ReportHome,
        Attribute::UpdateInfo,
        Attribute::ScreenState,
        Attribute::SensorVersion,
        Attribute::SensorIdentity,
        Attribute::ComponentInfo,
        Attribute::IgnoreHomeForEsd,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Attribute::Irq => "irq",
            Attribute::ReportHome => "report_home",
            Attribute::UpdateInfo => "update_info",
            Attribute::ScreenState => "screen_state",
            Attribute::SensorVersion => "sensor_version",
            Attribute::SensorIdentity => "sensor_identity",
            Attribute::ComponentInfo => "component_info",
            Attribute::IgnoreHomeForEsd => "ignore_home_for_esd",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|a| a.name() == name)
    }

    pub fn is_readable(self) -> bool {
        !matches!(self, Attribute::ReportHome | Attribute::UpdateInfo)
    }

    pub fn is_writable(self) -> bool {
        matches!(
            self,
            Attribute::Irq
                | Attribute::ReportHome
                | Attribute::UpdateInfo
                | Attribute::IgnoreHomeForEsd
        )
    }

    /// Writes restricted to uid 0
    pub fn requires_root(self) -> bool {
        matches!(self, Attribute::IgnoreHomeForEsd)
    }

    /// Only attributes that are ever published can be waited on
    pub fn is_pollable(self) -> bool {
        matches!(self, Attribute::Irq | Attribute::ScreenState)
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// Unique request ID for correlation and debugging
    pub id: u64,
    /// The actual request
    #[serde(flatten)]
    pub request: Request,
}

impl RequestEnvelope {
    pub fn with_id(request: Request, id: u64) -> Self {
        Self { id, request }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd", content = "data")]
pub enum Request {
    Ping,
    Version,
    /// Snapshot of every readable attribute plus wake-lease state
    Status,
    ReadAttribute { attribute: Attribute },
    WriteAttribute { attribute: Attribute, value: String },
    /// Block until `attribute` is published past `after_generation`
    WaitAttribute {
        attribute: Attribute,
        after_generation: u64,
        timeout_ms: u32,
    },
}

impl Request {
    /// Validate request parameters before sending to daemon
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Request::Ping | Request::Version | Request::Status => Ok(()),

            Request::ReadAttribute { attribute } => {
                if !attribute.is_readable() {
                    return Err(format!("Attribute {} is write-only", attribute));
                }
                Ok(())
            }

            Request::WriteAttribute { attribute, value } => {
                if !attribute.is_writable() {
                    return Err(format!("Attribute {} is read-only", attribute));
                }
                validate_attribute_value(value)
            }

            Request::WaitAttribute {
                attribute,
                after_generation: _,
                timeout_ms,
            } => {
                if !attribute.is_pollable() {
                    return Err(format!("Attribute {} does not notify", attribute));
                }
                validate_wait_timeout(*timeout_ms)
            }
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Request::Ping => "Ping",
            Request::Version => "Version",
            Request::Status => "Status",
            Request::ReadAttribute { .. } => "ReadAttribute",
            Request::WriteAttribute { .. } => "WriteAttribute",
            Request::WaitAttribute { .. } => "WaitAttribute",
        }
    }

    /// Whether the request changes device state (audit-logged by the daemon)
    pub fn is_write(&self) -> bool {
        matches!(self, Request::WriteAttribute { .. })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// Request ID this response corresponds to
    pub id: u64,
    /// The actual response
    #[serde(flatten)]
    pub response: Response,
}

impl ResponseEnvelope {
    pub fn new(id: u64, response: Response) -> Self {
        Self { id, response }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum Response {
    #[serde(rename = "ok")]
    Ok(ResponseData),
    #[serde(rename = "error")]
    Error {
        message: String,
        /// errno-style code, e.g. 22 for an invalid argument
        #[serde(default)]
        code: i32,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub written: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<DeviceStatus>,
}

impl ResponseData {
    pub fn none() -> Self { Self::default() }
    pub fn string(v: String) -> Self { Self { value: Some(v), ..Self::default() } }
    pub fn written(n: usize) -> Self { Self { written: Some(n), ..Self::default() } }
    pub fn notified(generation: u64, value: String) -> Self {
        Self { generation: Some(generation), value: Some(value), ..Self::default() }
    }
    pub fn device_status(s: DeviceStatus) -> Self { Self { status: Some(s), ..Self::default() } }
}

/// Snapshot returned by `Status`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub irq_level: u8,
    pub display_on: bool,
    pub sensor_version: u8,
    pub sensor_identity: String,
    #[serde(default)]
    pub component_info: String,
    #[serde(default)]
    pub ignore_home_for_esd: bool,
    pub wake_lease_held: bool,
    pub interrupts: u64,
    pub irq_generation: u64,
    pub screen_state_generation: u64,
}

impl Response {
    pub fn ok() -> Self {
        Response::Ok(ResponseData::none())
    }

    pub fn ok_string(s: impl Into<String>) -> Self {
        Response::Ok(ResponseData::string(s.into()))
    }

    pub fn ok_written(n: usize) -> Self {
        Response::Ok(ResponseData::written(n))
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Response::Error { message: msg.into(), code: 5 }
    }

    pub fn error_with_code(msg: impl Into<String>, code: i32) -> Self {
        Response::Error { message: msg.into(), code }
    }
}

pub fn validate_attribute_value(value: &str) -> Result<(), String> {
    if value.len() > MAX_ATTRIBUTE_VALUE_LEN {
        return Err(format!(
            "Value too long: {} > {} bytes",
            value.len(),
            MAX_ATTRIBUTE_VALUE_LEN
        ));
    }

    if value.contains('\0') {
        return Err("Value contains null byte".into());
    }

    Ok(())
}

pub fn validate_wait_timeout(timeout_ms: u32) -> Result<(), String> {
    if timeout_ms == 0 {
        return Err("Timeout must be at least 1ms".into());
    }
    if timeout_ms > MAX_WAIT_TIMEOUT_MS {
        return Err(format!(
            "Timeout too long (maximum {}ms)",
            MAX_WAIT_TIMEOUT_MS
        ));
    }
    Ok(())
}

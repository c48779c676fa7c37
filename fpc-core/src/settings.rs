//! Device configuration
//!
//! Persistent configuration stored as JSON in /etc/fpc/fpc1020.json.
//! Every field has a default, so a missing file or a partial file is fine.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info};

use crate::constants::{input, lines, paths, sched, timing};
use crate::engine::priority::PriorityPolicy;
use crate::error::{FpcError, Result};

/// Environment variable overriding the config file location
pub const CONFIG_ENV: &str = "FPC_CONFIG";

/// Upper bound for the wake lease hold time
pub const MAX_TTW_HOLD_MS: u64 = 60_000;

/// Kernel GPIO numbers of the sensor's control lines
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineConfig {
    /// Interrupt line (required)
    #[serde(default)]
    pub irq: Option<u32>,

    /// Reset line; no reset sequence is run without one
    #[serde(default)]
    pub reset: Option<u32>,

    /// Identification straps
    #[serde(default)]
    pub id0: Option<u32>,
    #[serde(default)]
    pub id1: Option<u32>,
    #[serde(default)]
    pub id2: Option<u32>,
}

impl LineConfig {
    /// Label to GPIO number map for the configured lines
    pub fn numbers(&self) -> HashMap<String, u32> {
        [
            (lines::IRQ, self.irq),
            (lines::RESET, self.reset),
            (lines::ID0, self.id0),
            (lines::ID1, self.id1),
            (lines::ID2, self.id2),
        ]
        .into_iter()
        .filter_map(|(label, n)| n.map(|n| (label.to_string(), n)))
        .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(default)]
    pub lines: LineConfig,

    /// Name the input device registers under
    #[serde(default = "default_input_device_name")]
    pub input_device_name: String,

    /// Wake lease hold time per interrupt
    #[serde(default = "default_ttw_hold_ms")]
    pub ttw_hold_ms: u64,

    /// Process whose priority follows the display
    #[serde(default = "default_dependent_process")]
    pub dependent_process: String,

    #[serde(default = "default_nice_display_off")]
    pub nice_display_off: i32,

    #[serde(default = "default_nice_display_on")]
    pub nice_display_on: i32,

    /// Reject home key injection (used while recovering from ESD events)
    #[serde(default)]
    pub ignore_home_for_esd: bool,

    /// Display state assumed before the first notification
    #[serde(default = "default_true")]
    pub initial_display_on: bool,

    /// File holding the panel's FB_BLANK level
    #[serde(default = "default_display_state_path")]
    pub display_state_path: PathBuf,

    #[serde(default = "default_display_poll_ms")]
    pub display_poll_ms: u64,

    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,

    /// Mirror wake lease arms to /sys/power/wake_lock
    #[serde(default = "default_true")]
    pub kernel_wake_lock: bool,
}

fn default_input_device_name() -> String { input::DEVICE_NAME.to_string() }
fn default_ttw_hold_ms() -> u64 { timing::TTW_HOLD_TIME_MS }
fn default_dependent_process() -> String { sched::DEPENDENT_PROCESS.to_string() }
fn default_nice_display_off() -> i32 { sched::MIN_NICE }
fn default_nice_display_on() -> i32 { sched::DEFAULT_NICE }
fn default_true() -> bool { true }
fn default_display_state_path() -> PathBuf { PathBuf::from(paths::DISPLAY_STATE) }
fn default_display_poll_ms() -> u64 { timing::DISPLAY_POLL_MS }
fn default_socket_path() -> PathBuf { PathBuf::from(paths::SOCKET_PATH) }

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            lines: LineConfig::default(),
            input_device_name: default_input_device_name(),
            ttw_hold_ms: default_ttw_hold_ms(),
            dependent_process: default_dependent_process(),
            nice_display_off: default_nice_display_off(),
            nice_display_on: default_nice_display_on(),
            ignore_home_for_esd: false,
            initial_display_on: true,
            display_state_path: default_display_state_path(),
            display_poll_ms: default_display_poll_ms(),
            socket_path: default_socket_path(),
            kernel_wake_lock: true,
        }
    }
}

impl DeviceConfig {
    pub fn ttw_hold(&self) -> Duration {
        Duration::from_millis(self.ttw_hold_ms)
    }

    pub fn display_poll_interval(&self) -> Duration {
        Duration::from_millis(self.display_poll_ms)
    }

    pub fn priority_policy(&self) -> PriorityPolicy {
        PriorityPolicy {
            process: self.dependent_process.clone(),
            nice_display_off: self.nice_display_off,
            nice_display_on: self.nice_display_on,
        }
    }

    /// Check ranges and required fields
    pub fn validate(&self) -> Result<()> {
        if self.lines.irq.is_none() {
            return Err(FpcError::invalid_config("lines.irq", "interrupt line is required"));
        }
        if !(1..=MAX_TTW_HOLD_MS).contains(&self.ttw_hold_ms) {
            return Err(FpcError::invalid_config(
                "ttw_hold_ms",
                format!("must be within 1..={}", MAX_TTW_HOLD_MS),
            ));
        }
        for (field, nice) in [
            ("nice_display_off", self.nice_display_off),
            ("nice_display_on", self.nice_display_on),
        ] {
            if !(sched::MIN_NICE..=sched::MAX_NICE).contains(&nice) {
                return Err(FpcError::invalid_config(
                    field,
                    format!("{} outside {}..={}", nice, sched::MIN_NICE, sched::MAX_NICE),
                ));
            }
        }
        if self.dependent_process.is_empty() {
            return Err(FpcError::invalid_config("dependent_process", "must not be empty"));
        }
        if self.dependent_process.len() >= sched::TASK_COMM_LEN {
            return Err(FpcError::invalid_config(
                "dependent_process",
                format!("longer than {} bytes never matches comm", sched::TASK_COMM_LEN - 1),
            ));
        }
        if self.input_device_name.is_empty() || self.input_device_name.len() >= 80 {
            return Err(FpcError::invalid_config("input_device_name", "must be 1..80 bytes"));
        }
        if self.display_poll_ms == 0 {
            return Err(FpcError::invalid_config("display_poll_ms", "must be positive"));
        }
        Ok(())
    }
}

/// Config path from `FPC_CONFIG` or the default location
pub fn config_path() -> PathBuf {
    std::env::var_os(CONFIG_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(paths::config_file)
}

/// Load config from `path`. A missing file yields defaults.
pub fn load_config(path: &Path) -> Result<DeviceConfig> {
    if !path.exists() {
        debug!(path = %path.display(), "No config file, using defaults");
        return Ok(DeviceConfig::default());
    }

    let content = fs::read_to_string(path).map_err(|e| FpcError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    let config: DeviceConfig = serde_json::from_str(&content)
        .map_err(|e| FpcError::config(format!("Failed to parse {}: {}", path.display(), e)))?;

    info!(path = %path.display(), "Loaded device configuration");
    Ok(config)
}

/// Write config atomically: temp file then rename
pub fn save_config(path: &Path, config: &DeviceConfig) -> Result<()> {
    use std::io::Write;

    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(|e| {
            FpcError::config(format!("Failed to create config directory: {}", e))
        })?;
    }

    let json = serde_json::to_string_pretty(config)?;
    let temp_path = path.with_extension("json.tmp");

    let write = |p: &Path| -> std::io::Result<()> {
        let mut file = fs::File::create(p)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()
    };
    write(&temp_path).map_err(|e| FpcError::FileWrite {
        path: temp_path.clone(),
        source: e,
    })?;

    fs::rename(&temp_path, path).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        FpcError::FileWrite {
            path: path.to_path_buf(),
            source: e,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn valid() -> DeviceConfig {
        let mut config = DeviceConfig::default();
        config.lines.irq = Some(55);
        config
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let tmp = TempDir::new().unwrap();
        let config = load_config(&tmp.path().join("none.json")).unwrap();
        assert_eq!(config.ttw_hold_ms, 1000);
        assert_eq!(config.dependent_process, "fingerprintd");
        assert_eq!(config.nice_display_off, -20);
        assert_eq!(config.nice_display_on, 0);
        assert!(config.initial_display_on);
        assert!(config.kernel_wake_lock);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("fpc1020.json");
        fs::write(&path, r#"{"lines":{"irq":12,"id0":20},"ignore_home_for_esd":true}"#).unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.lines.irq, Some(12));
        assert_eq!(config.lines.id0, Some(20));
        assert_eq!(config.lines.reset, None);
        assert!(config.ignore_home_for_esd);
        assert_eq!(config.input_device_name, "fpc1020");
        config.validate().unwrap();
    }

    #[test]
    fn test_malformed_file_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("fpc1020.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(load_config(&path), Err(FpcError::Config(_))));
    }

    #[test]
    fn test_validate_ranges() {
        assert!(DeviceConfig::default().validate().is_err());
        valid().validate().unwrap();

        let mut c = valid();
        c.ttw_hold_ms = 0;
        assert!(c.validate().is_err());

        let mut c = valid();
        c.nice_display_off = -21;
        assert!(matches!(
            c.validate(),
            Err(FpcError::InvalidConfig { ref field, .. }) if field == "nice_display_off"
        ));

        let mut c = valid();
        c.dependent_process = "x".repeat(16);
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_line_numbers_only_configured() {
        let mut lines = LineConfig::default();
        lines.irq = Some(1);
        lines.id2 = Some(4);
        let numbers = lines.numbers();
        assert_eq!(numbers.len(), 2);
        assert_eq!(numbers.get("fpc,irq-gpio"), Some(&1));
        assert_eq!(numbers.get("fpc,gpio_id2"), Some(&4));
    }

    #[test]
    fn test_save_then_load() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("sub").join("fpc1020.json");
        let mut config = valid();
        config.ttw_hold_ms = 1500;
        save_config(&path, &config).unwrap();

        let loaded = load_config(&path).unwrap();
        assert_eq!(loaded.ttw_hold_ms, 1500);
        assert_eq!(loaded.lines, config.lines);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_policy_from_config() {
        let policy = valid().priority_policy();
        assert_eq!(policy.nice_for(false), -20);
        assert_eq!(policy.nice_for(true), 0);
    }
}

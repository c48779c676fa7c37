//! Constants and configuration defaults for fpc
//!
//! Centralizes timing values, key codes, line labels and paths. Other modules
//! refer to these instead of repeating magic numbers.

use std::time::Duration;

/// System paths
pub mod paths {
    /// Configuration directory
    pub const CONFIG_DIR: &str = "/etc/fpc";

    /// Device configuration file
    pub const CONFIG_FILE: &str = "fpc1020.json";

    /// Default daemon socket
    pub const SOCKET_PATH: &str = "/run/fpcd.sock";

    /// Default PID file
    pub const PID_FILE: &str = "/run/fpcd.pid";

    /// sysfs GPIO class directory
    pub const GPIO_BASE: &str = "/sys/class/gpio";

    /// Kernel wake lock control files (Android-style wakelocks)
    pub const WAKE_LOCK: &str = "/sys/power/wake_lock";
    pub const WAKE_UNLOCK: &str = "/sys/power/wake_unlock";

    /// uinput character device
    pub const UINPUT: &str = "/dev/uinput";

    /// Process table
    pub const PROC: &str = "/proc";

    /// Default display power source (values follow FB_BLANK_*)
    pub const DISPLAY_STATE: &str = "/sys/class/backlight/panel0-backlight/bl_power";

    /// Full path of the default config file
    pub fn config_file() -> std::path::PathBuf {
        std::path::Path::new(CONFIG_DIR).join(CONFIG_FILE)
    }
}

/// Line labels as named in the platform description
pub mod lines {
    pub const IRQ: &str = "fpc,irq-gpio";
    pub const RESET: &str = "fpc,reset-gpio";
    pub const ID0: &str = "fpc,gpio_id0";
    pub const ID1: &str = "fpc,gpio_id1";
    pub const ID2: &str = "fpc,gpio_id2";
}

/// Timing constants
pub mod timing {
    use super::Duration;

    /// Touch-to-wake hold time of the wake lease
    pub const TTW_HOLD_TIME_MS: u64 = 1000;
    pub const TTW_HOLD_TIME: Duration = Duration::from_millis(TTW_HOLD_TIME_MS);

    /// Reset pulse timings
    pub const RESET_LOW_US: u64 = 1000;
    pub const RESET_HIGH1_US: u64 = 100;
    pub const RESET_HIGH2_US: u64 = 1250;

    /// How often blocking watchers re-check their stop flag
    pub const WATCH_SLICE: Duration = Duration::from_millis(200);

    /// Default display source poll interval
    pub const DISPLAY_POLL_MS: u64 = 200;
}

/// Linux input key codes used by the sensor
pub mod keys {
    pub const KEY_HOME: u16 = 102;
    pub const KEY_POWER: u16 = 116;
    pub const KEY_F2: u16 = 60;
    /// Unused key value to avoid interfering with active keys
    pub const KEY_FINGERPRINT: u16 = 0x2ee;
}

/// Process scheduling
pub mod sched {
    /// Name of the user-space daemon that talks to the sensor
    pub const DEPENDENT_PROCESS: &str = "fingerprintd";

    /// Linux niceness range
    pub const MIN_NICE: i32 = -20;
    pub const MAX_NICE: i32 = 19;
    pub const DEFAULT_NICE: i32 = 0;

    /// Kernel limit on `comm` length (including NUL)
    pub const TASK_COMM_LEN: usize = 16;
}

/// Identification defaults
pub mod identity {
    pub const COMPONENT_UNKNOWN_MODEL: &str = "fpc";
    pub const COMPONENT_UNKNOWN_VENDOR: &str = "FPC";
    pub const COMPONENT_NA: &str = "N/A";
}

/// Input device
pub mod input {
    pub const DEVICE_NAME: &str = "fpc1020";
}

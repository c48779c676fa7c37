//! Kernel wake lock backend
//!
//! Uses the `/sys/power/wake_lock` interface: writing `"<name> <timeout_ns>"`
//! creates or re-arms a wake source that expires on its own.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use tracing::debug;

use crate::constants::paths;
use crate::engine::wake::{warn_platform_arm_failed, WakeLease};

/// Name of the wake source shown in `/sys/kernel/debug/wakeup_sources`
pub const WAKE_LOCK_NAME: &str = "fpc_ttw_wl";

pub struct KernelWakeLock {
    name: String,
    lock_path: PathBuf,
    unlock_path: PathBuf,
}

impl KernelWakeLock {
    pub fn new() -> Self {
        Self::with_paths(paths::WAKE_LOCK, paths::WAKE_UNLOCK)
    }

    pub fn with_paths(lock_path: impl Into<PathBuf>, unlock_path: impl Into<PathBuf>) -> Self {
        Self {
            name: WAKE_LOCK_NAME.to_string(),
            lock_path: lock_path.into(),
            unlock_path: unlock_path.into(),
        }
    }

    /// Whether the kernel exposes the interface at all
    pub fn is_available(&self) -> bool {
        self.lock_path.exists()
    }

    /// Drop the lock immediately instead of waiting for expiry
    pub fn release(&self) {
        match fs::write(&self.unlock_path, &self.name) {
            Ok(()) => debug!(name = %self.name, "Wake lock released"),
            Err(e) => debug!(name = %self.name, error = %e, "Wake lock release failed"),
        }
    }
}

impl Default for KernelWakeLock {
    fn default() -> Self {
        Self::new()
    }
}

impl WakeLease for KernelWakeLock {
    fn arm(&self, hold: Duration) {
        let request = format!("{} {}", self.name, hold.as_nanos());
        if let Err(e) = fs::write(&self.lock_path, request) {
            warn_platform_arm_failed(&e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_arm_writes_timeout_in_nanoseconds() {
        let tmp = TempDir::new().unwrap();
        let lock = tmp.path().join("wake_lock");
        let unlock = tmp.path().join("wake_unlock");
        let wl = KernelWakeLock::with_paths(&lock, &unlock);

        wl.arm(Duration::from_millis(1000));
        assert_eq!(fs::read_to_string(&lock).unwrap(), "fpc_ttw_wl 1000000000");

        wl.release();
        assert_eq!(fs::read_to_string(&unlock).unwrap(), "fpc_ttw_wl");
    }

    #[test]
    fn test_arm_failure_is_silent() {
        let wl = KernelWakeLock::with_paths("/nonexistent/wake_lock", "/nonexistent/wake_unlock");
        assert!(!wl.is_available());
        wl.arm(Duration::from_millis(1000));
        wl.release();
    }
}

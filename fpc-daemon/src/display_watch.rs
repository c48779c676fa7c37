//! Display power watcher
//!
//! Polls the panel's `bl_power` file and turns level changes into display
//! events on the in-process bus, early phase first, then post.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use fpc_core::{BlankState, DisplayBus, DisplayEvent};

/// Read the current blank level; `None` if unreadable or out of range
pub fn read_blank_state(path: &Path) -> Option<BlankState> {
    let content = std::fs::read_to_string(path).ok()?;
    content.trim().parse::<i32>().ok().and_then(BlankState::from_raw)
}

pub struct DisplayWatch {
    path: PathBuf,
    interval: Duration,
    bus: Arc<DisplayBus>,
    last: Option<BlankState>,
    read_failed: bool,
}

impl DisplayWatch {
    pub fn new(path: PathBuf, interval: Duration, bus: Arc<DisplayBus>) -> Self {
        Self {
            path,
            interval,
            bus,
            last: None,
            read_failed: false,
        }
    }

    /// One poll. Returns the state published, if any.
    pub fn poll(&mut self) -> Option<BlankState> {
        let state = match read_blank_state(&self.path) {
            Some(s) => {
                self.read_failed = false;
                s
            }
            None => {
                if !self.read_failed {
                    warn!(path = %self.path.display(), "Display state unreadable");
                    self.read_failed = true;
                }
                return None;
            }
        };

        if self.last == Some(state) {
            return None;
        }
        debug!(blank = %state, "Display blank level changed");
        self.last = Some(state);
        self.bus.publish(DisplayEvent::early(state));
        self.bus.publish(DisplayEvent::post(state));
        Some(state)
    }

    /// Poll until `shutdown` is set
    pub async fn run(mut self, shutdown: Arc<AtomicBool>) {
        info!(
            path = %self.path.display(),
            interval_ms = self.interval.as_millis() as u64,
            "Display watcher started"
        );
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        while !shutdown.load(Ordering::SeqCst) {
            ticker.tick().await;
            self.poll();
        }
        info!("Display watcher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fpc_core::{ActiveState, PowerStateCoordinator, TaskQueue};
    use tempfile::TempDir;

    #[test]
    fn test_read_blank_state() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("bl_power");
        std::fs::write(&path, "4\n").unwrap();
        assert_eq!(read_blank_state(&path), Some(BlankState::Powerdown));
        std::fs::write(&path, "9\n").unwrap();
        assert_eq!(read_blank_state(&path), None);
        assert_eq!(read_blank_state(&tmp.path().join("missing")), None);
    }

    #[test]
    fn test_publishes_only_changes() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("bl_power");
        std::fs::write(&path, "0").unwrap();

        let bus = Arc::new(DisplayBus::new());
        let state = Arc::new(ActiveState::new(false));
        let (queue, _rx) = TaskQueue::channel();
        let coordinator = Arc::new(PowerStateCoordinator::new(state.clone(), queue.clone()));
        let _sub = fpc_core::DisplaySubscription::subscribe(bus.clone(), coordinator).unwrap();

        let mut watch = DisplayWatch::new(path.clone(), Duration::from_millis(10), bus);
        assert_eq!(watch.poll(), Some(BlankState::Unblank));
        assert!(state.is_display_on());
        assert_eq!(watch.poll(), None);

        std::fs::write(&path, "4").unwrap();
        assert_eq!(watch.poll(), Some(BlankState::Powerdown));
        assert!(!state.is_display_on());
        assert_eq!(queue.scheduled(), 1);
    }
}

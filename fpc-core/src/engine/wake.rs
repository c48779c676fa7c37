//! Touch-to-wake lease
//!
//! Every sensor interrupt holds off system suspend for a fixed time so the
//! user-space matcher gets a chance to run. The lease is re-armed, never
//! stacked: a burst of interrupts keeps one lease alive until the last arm
//! plus the hold time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{trace, warn};

/// Monotonic time source
pub trait Clock: Send + Sync {
    /// Time elapsed since the clock's origin
    fn now(&self) -> Duration;
}

/// Clock backed by [`Instant`]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Clock that only moves when told to
#[derive(Default)]
pub struct ManualClock {
    nanos: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        self.nanos.fetch_add(by.as_nanos() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::SeqCst))
    }
}

/// Suspend blocker that expires on its own (platform collaborator)
pub trait WakeLease: Send + Sync {
    fn arm(&self, hold: Duration);
}

/// Wake lease with local expiry bookkeeping.
///
/// The deadline lives in one atomic so arming is lock-free and safe from the
/// interrupt path. A platform lease (e.g. the kernel wake lock) can be
/// attached and receives every arm as well.
pub struct TimedWakeLease {
    clock: Arc<dyn Clock>,
    /// Deadline in clock nanoseconds, 0 = never armed
    deadline: AtomicU64,
    arms: AtomicU64,
    platform: Option<Arc<dyn WakeLease>>,
}

impl TimedWakeLease {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            deadline: AtomicU64::new(0),
            arms: AtomicU64::new(0),
            platform: None,
        }
    }

    pub fn with_platform(mut self, platform: Arc<dyn WakeLease>) -> Self {
        self.platform = Some(platform);
        self
    }

    /// Whether the lease currently blocks suspend
    pub fn is_held(&self) -> bool {
        let deadline = self.deadline.load(Ordering::SeqCst);
        deadline != 0 && (self.clock.now().as_nanos() as u64) < deadline
    }

    /// Clock time at which the lease lapses, if it was ever armed
    pub fn expires_at(&self) -> Option<Duration> {
        match self.deadline.load(Ordering::SeqCst) {
            0 => None,
            d => Some(Duration::from_nanos(d)),
        }
    }

    /// Time left before expiry
    pub fn remaining(&self) -> Duration {
        let now = self.clock.now();
        self.expires_at()
            .map(|at| at.saturating_sub(now))
            .unwrap_or(Duration::ZERO)
    }

    /// Total number of arms since creation
    pub fn arm_count(&self) -> u64 {
        self.arms.load(Ordering::SeqCst)
    }
}

impl WakeLease for TimedWakeLease {
    fn arm(&self, hold: Duration) {
        let now = self.clock.now();
        let deadline = (now + hold).as_nanos() as u64;
        // Extend only: an arm racing with a later one must not shorten it
        self.deadline.fetch_max(deadline.max(1), Ordering::SeqCst);
        self.arms.fetch_add(1, Ordering::SeqCst);
        trace!(hold_ms = hold.as_millis() as u64, "wake lease armed");

        if let Some(platform) = &self.platform {
            platform.arm(hold);
        }
    }
}

/// Lease that does nothing; used when the platform has no suspend control
pub struct NoopWakeLease;

impl WakeLease for NoopWakeLease {
    fn arm(&self, _hold: Duration) {}
}

/// Log once per failure kind rather than once per interrupt
pub(crate) fn warn_platform_arm_failed(err: &std::io::Error) {
    use std::sync::atomic::AtomicBool;
    static WARNED: AtomicBool = AtomicBool::new(false);
    if !WARNED.swap(true, Ordering::Relaxed) {
        warn!(error = %err, "Platform wake lock could not be armed");
    }
}

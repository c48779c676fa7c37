//! Interrupt handling
//!
//! Runs once per sensor interrupt in a context that must not block: every
//! step below is an atomic update or a short critical section.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::trace;

use fpc_protocol::Attribute;

use crate::constants::keys::KEY_FINGERPRINT;
use crate::engine::input::{pulse, EventSink};
use crate::engine::notify::AttributeNotifier;
use crate::engine::state::ActiveState;
use crate::engine::wake::WakeLease;

pub struct EventNotifier {
    lease: Arc<dyn WakeLease>,
    hold: Duration,
    notifier: Arc<AttributeNotifier>,
    state: Arc<ActiveState>,
    sink: Arc<dyn EventSink>,
    interrupts: AtomicU64,
    pulses: AtomicU64,
}

impl EventNotifier {
    pub fn new(
        lease: Arc<dyn WakeLease>,
        hold: Duration,
        notifier: Arc<AttributeNotifier>,
        state: Arc<ActiveState>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            lease,
            hold,
            notifier,
            state,
            sink,
            interrupts: AtomicU64::new(0),
            pulses: AtomicU64::new(0),
        }
    }

    /// Arm the wake lease, wake `irq` pollers and, with the display off,
    /// report a fingerprint key tap.
    ///
    /// The lease and the notification always happen. The key pulse is
    /// skipped while the display is on so touching the sensor during normal
    /// use does not look like a wake gesture.
    pub fn handle_interrupt(&self) {
        self.lease.arm(self.hold);
        self.notifier.publish(Attribute::Irq);

        let display_on = self.state.is_display_on();
        if !display_on {
            pulse(self.sink.as_ref(), KEY_FINGERPRINT);
            self.pulses.fetch_add(1, Ordering::Relaxed);
        }

        let n = self.interrupts.fetch_add(1, Ordering::Relaxed) + 1;
        trace!(interrupt = n, display_on, "sensor interrupt");
    }

    pub fn interrupts(&self) -> u64 {
        self.interrupts.load(Ordering::Relaxed)
    }

    /// Key pulses emitted so far
    pub fn pulses(&self) -> u64 {
        self.pulses.load(Ordering::Relaxed)
    }

    pub fn sink(&self) -> &Arc<dyn EventSink> {
        &self.sink
    }
}

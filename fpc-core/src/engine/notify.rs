//! Attribute change notification
//!
//! Observers poll an attribute: they remember the generation they last saw
//! and block until it moves. Notifications carry no payload; the observer
//! re-reads the attribute itself. Publishing bumps a counter and wakes
//! waiters under a short critical section, so it is usable from the
//! interrupt path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::trace;

use fpc_protocol::Attribute;

struct Slot {
    generation: AtomicU64,
    lock: Mutex<()>,
    cond: Condvar,
}

impl Slot {
    fn new() -> Self {
        Self {
            generation: AtomicU64::new(0),
            lock: Mutex::new(()),
            cond: Condvar::new(),
        }
    }
}

/// Per-attribute publish/wait channel
pub struct AttributeNotifier {
    slots: HashMap<Attribute, Slot>,
}

impl AttributeNotifier {
    pub fn new() -> Self {
        let slots = Attribute::ALL
            .iter()
            .map(|attr| (*attr, Slot::new()))
            .collect();
        Self { slots }
    }

    fn slot(&self, attr: Attribute) -> &Slot {
        // Every attribute gets a slot in new()
        &self.slots[&attr]
    }

    /// Wake everyone polling `attr`
    pub fn publish(&self, attr: Attribute) {
        let slot = self.slot(attr);
        let _guard = slot.lock.lock();
        let generation = slot.generation.fetch_add(1, Ordering::SeqCst) + 1;
        slot.cond.notify_all();
        trace!(attribute = %attr, generation, "attribute published");
    }

    /// Number of publishes so far
    pub fn generation(&self, attr: Attribute) -> u64 {
        self.slot(attr).generation.load(Ordering::SeqCst)
    }

    /// Block until `attr` is published past `seen` or `timeout` elapses.
    /// Returns the new generation, or `None` on timeout.
    pub fn wait_past(&self, attr: Attribute, seen: u64, timeout: Duration) -> Option<u64> {
        let slot = self.slot(attr);
        let deadline = Instant::now() + timeout;
        let mut guard = slot.lock.lock();
        loop {
            let current = slot.generation.load(Ordering::SeqCst);
            if current > seen {
                return Some(current);
            }
            if slot.cond.wait_until(&mut guard, deadline).timed_out() {
                let current = slot.generation.load(Ordering::SeqCst);
                return (current > seen).then_some(current);
            }
        }
    }
}

impl Default for AttributeNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_publish_increments_only_that_attribute() {
        let n = AttributeNotifier::new();
        n.publish(Attribute::Irq);
        n.publish(Attribute::Irq);
        assert_eq!(n.generation(Attribute::Irq), 2);
        assert_eq!(n.generation(Attribute::ScreenState), 0);
    }

    #[test]
    fn test_wait_returns_immediately_when_already_past() {
        let n = AttributeNotifier::new();
        n.publish(Attribute::ScreenState);
        assert_eq!(
            n.wait_past(Attribute::ScreenState, 0, Duration::from_millis(1)),
            Some(1)
        );
    }

    #[test]
    fn test_wait_times_out() {
        let n = AttributeNotifier::new();
        assert_eq!(n.wait_past(Attribute::Irq, 0, Duration::from_millis(20)), None);
    }

    #[test]
    fn test_waiter_woken_by_publisher() {
        let n = Arc::new(AttributeNotifier::new());
        let waiter = {
            let n = n.clone();
            thread::spawn(move || n.wait_past(Attribute::Irq, 0, Duration::from_secs(5)))
        };
        thread::sleep(Duration::from_millis(20));
        n.publish(Attribute::Irq);
        assert_eq!(waiter.join().unwrap(), Some(1));
    }
}

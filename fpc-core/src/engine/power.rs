//! Display power-state tracking
//!
//! A display publisher delivers blank/unblank notifications asynchronously.
//! The coordinator turns the two "fully on" / "fully off" edges into writes
//! of the shared active flag and hands the priority change to deferred work.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, error, info, trace};

use crate::engine::priority::TaskQueue;
use crate::engine::state::ActiveState;
use crate::error::Result;

/// When a notification is sent relative to the actual blank
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlankPhase {
    /// Before the panel changes state
    Early,
    /// After the panel changed state
    Post,
}

/// Framebuffer blank level, numbered like the kernel's FB_BLANK_* values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlankState {
    Unblank = 0,
    Normal = 1,
    VsyncSuspend = 2,
    HsyncSuspend = 3,
    Powerdown = 4,
}

impl BlankState {
    pub fn from_raw(value: i32) -> Option<Self> {
        match value {
            0 => Some(BlankState::Unblank),
            1 => Some(BlankState::Normal),
            2 => Some(BlankState::VsyncSuspend),
            3 => Some(BlankState::HsyncSuspend),
            4 => Some(BlankState::Powerdown),
            _ => None,
        }
    }

    /// The display flag this level implies, if it implies one at all
    pub fn display_on(self) -> Option<bool> {
        match self {
            BlankState::Unblank => Some(true),
            BlankState::Powerdown => Some(false),
            _ => None,
        }
    }
}

impl fmt::Display for BlankState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BlankState::Unblank => "unblank",
            BlankState::Normal => "normal",
            BlankState::VsyncSuspend => "vsync_suspend",
            BlankState::HsyncSuspend => "hsync_suspend",
            BlankState::Powerdown => "powerdown",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayEvent {
    pub phase: BlankPhase,
    pub blank: BlankState,
}

impl DisplayEvent {
    pub fn early(blank: BlankState) -> Self {
        Self {
            phase: BlankPhase::Early,
            blank,
        }
    }

    pub fn post(blank: BlankState) -> Self {
        Self {
            phase: BlankPhase::Post,
            blank,
        }
    }
}

/// Receives display notifications. Called from the publisher's context and
/// must not block.
pub trait DisplayListener: Send + Sync {
    fn on_display_event(&self, event: DisplayEvent);
}

/// Opaque handle returned by [`DisplayPublisher::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Source of display notifications (platform collaborator)
pub trait DisplayPublisher: Send + Sync {
    fn subscribe(&self, listener: Arc<dyn DisplayListener>) -> Result<SubscriptionId>;
    fn unsubscribe(&self, id: SubscriptionId);
}

/// In-process publisher: whoever observes the panel calls `publish`.
#[derive(Default)]
pub struct DisplayBus {
    next_id: AtomicU64,
    listeners: RwLock<Vec<(SubscriptionId, Arc<dyn DisplayListener>)>>,
}

impl DisplayBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `event` to every current subscriber
    pub fn publish(&self, event: DisplayEvent) {
        // Snapshot so a listener may (un)subscribe without deadlocking
        let listeners: Vec<_> = self.listeners.read().iter().map(|(_, l)| l.clone()).collect();
        trace!(?event, subscribers = listeners.len(), "display event");
        for listener in listeners {
            listener.on_display_event(event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.listeners.read().len()
    }
}

impl DisplayPublisher for DisplayBus {
    fn subscribe(&self, listener: Arc<dyn DisplayListener>) -> Result<SubscriptionId> {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.listeners.write().push((id, listener));
        Ok(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.listeners.write().retain(|(sid, _)| *sid != id);
    }
}

/// Keeps a listener subscribed until dropped
pub struct DisplaySubscription {
    publisher: Arc<dyn DisplayPublisher>,
    id: SubscriptionId,
}

impl DisplaySubscription {
    pub fn subscribe(
        publisher: Arc<dyn DisplayPublisher>,
        listener: Arc<dyn DisplayListener>,
    ) -> Result<Self> {
        let id = publisher.subscribe(listener)?;
        debug!(id = id.0, "Subscribed to display notifications");
        Ok(Self { publisher, id })
    }
}

impl Drop for DisplaySubscription {
    fn drop(&mut self) {
        self.publisher.unsubscribe(self.id);
        debug!(id = self.id.0, "Unsubscribed from display notifications");
    }
}

/// Sole writer of the active flag
pub struct PowerStateCoordinator {
    state: Arc<ActiveState>,
    queue: Arc<TaskQueue>,
}

impl PowerStateCoordinator {
    pub fn new(state: Arc<ActiveState>, queue: Arc<TaskQueue>) -> Self {
        Self { state, queue }
    }

    /// Apply one notification. Returns the new flag when it actually changed.
    pub fn handle(&self, event: DisplayEvent) -> Option<bool> {
        if event.phase != BlankPhase::Early {
            return None;
        }
        let display_on = event.blank.display_on()?;

        let previous = self.state.set_display_on(display_on);
        if previous == display_on {
            return None;
        }

        info!(display_on, blank = %event.blank, "Display state changed");
        if !self.queue.schedule() {
            debug!("Priority update already pending");
        }
        Some(display_on)
    }
}

impl DisplayListener for PowerStateCoordinator {
    fn on_display_event(&self, event: DisplayEvent) {
        self.handle(event);
    }
}

/// Log and swallow a failed subscription; the flag keeps its initial value
pub(crate) fn subscribe_best_effort(
    publisher: Arc<dyn DisplayPublisher>,
    listener: Arc<dyn DisplayListener>,
) -> Option<DisplaySubscription> {
    match DisplaySubscription::subscribe(publisher, listener) {
        Ok(sub) => Some(sub),
        Err(e) => {
            error!(error = %e, "Display notifications unavailable, display state will not track the panel");
            None
        }
    }
}

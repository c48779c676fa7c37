//! Event and state coordination
//!
//! Two asynchronous trigger sources share one device: sensor interrupts
//! ([`events`]) and display power changes ([`power`]). The display path is
//! the only writer of [`state::ActiveState`]; priority changes are deferred
//! to [`priority`].

pub mod events;
pub mod input;
pub mod notify;
pub mod power;
pub mod priority;
pub mod state;
pub mod wake;

pub use events::EventNotifier;
pub use input::{EventSink, HomeKeyCommand, InputDeviceSpec, InputRegistrar, KeyEvent};
pub use notify::AttributeNotifier;
pub use power::{
    BlankPhase, BlankState, DisplayBus, DisplayEvent, DisplayListener, DisplayPublisher,
    DisplaySubscription, PowerStateCoordinator, SubscriptionId,
};
pub use priority::{
    PriorityControl, PriorityPolicy, PriorityScheduler, PriorityWorker, TaskQueue, TaskReceiver,
};
pub use state::ActiveState;
pub use wake::{Clock, ManualClock, NoopWakeLease, SystemClock, TimedWakeLease, WakeLease};

//! fpc Core Library
//!
//! Control-plane engine for FPC fingerprint sensors on Linux.
//!
//! # Features
//!
//! - **Control lines**: interrupt, reset and identification straps
//! - **Touch-to-wake**: every interrupt holds off suspend and, with the
//!   display dark, reports a fingerprint key tap
//! - **Display tracking**: blank/unblank notifications drive the priority of
//!   the fingerprint daemon through a coalesced deferred task
//! - **Control surface**: sysfs-style attributes with change notification
//!
//! # Module Structure
//!
//! - `hw/` - Line, interrupt and platform backends (sysfs, uinput, procfs)
//! - `engine/` - Event and state coordination
//! - `device` - Attach/detach of one sensor
//! - `control` - Host-facing attributes
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use fpc_core::{AttachOptions, Collaborators, ControlSurface, Device, ProcfsPriority,
//!     SysfsGpio, UinputRegistrar};
//! use fpc_protocol::Attribute;
//!
//! let config = fpc_core::load_config(&fpc_core::config_path()).unwrap();
//! let gpio = SysfsGpio::new(config.lines.numbers());
//! let irq = gpio.edge_interrupt("fpc,irq-gpio").unwrap();
//! let collab = Collaborators::new(
//!     Arc::new(gpio),
//!     Arc::new(irq),
//!     Arc::new(UinputRegistrar::new()),
//!     Arc::new(ProcfsPriority::new()),
//! );
//! let device = Device::attach(collab, AttachOptions::from(&config)).unwrap();
//! let surface = ControlSurface::new(Arc::new(device));
//! println!("{}", surface.read(Attribute::SensorIdentity).unwrap());
//! ```

// Grouped modules
pub mod engine;
pub mod hw;

// Standalone modules
pub mod constants;
pub mod control;
pub mod device;
pub mod error;
pub mod settings;

// Re-export error types
pub use error::{FpcError, Result};

pub use control::ControlSurface;
pub use device::{AttachOptions, Collaborators, DeferredWork, Device};
pub use settings::{config_path, load_config, save_config, DeviceConfig, LineConfig};

// Re-export engine types
pub use engine::{
    ActiveState, AttributeNotifier, BlankPhase, BlankState, Clock, DisplayBus, DisplayEvent,
    DisplayListener, DisplayPublisher, DisplaySubscription, EventNotifier, EventSink,
    HomeKeyCommand, InputDeviceSpec, InputRegistrar, KeyEvent, ManualClock, NoopWakeLease,
    PowerStateCoordinator, PriorityControl, PriorityPolicy, PriorityScheduler, PriorityWorker,
    SubscriptionId, SystemClock, TaskQueue, TaskReceiver, TimedWakeLease, WakeLease,
};

// Re-export hardware types
pub use hw::{
    read_line, resolve, resolve_pattern, ComponentInfo, ControlLine, Direction,
    GpioEdgeInterrupt, InterruptRegistration, InterruptSource, IrqHandler, KernelWakeLock,
    Level, LineHandle, LineProvider, ProcfsPriority, RecordingSink, SensorIdentity, SensorModel,
    SensorVendor, SimInput, SimInterrupt, SimLine, SimLineProvider, SysfsGpio, SysfsLine,
    UinputRegistrar, UinputSink,
};

// Re-export the protocol's attribute names
pub use fpc_protocol::Attribute;

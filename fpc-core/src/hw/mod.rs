//! Hardware interaction modules
//!
//! Collaborator interfaces (lines, interrupts) and their implementations:
//! sysfs GPIO, uinput, kernel wake lock and procfs for real devices, and
//! in-process stand-ins in [`sim`].

pub mod gpio;
pub mod identity;
pub mod irq;
pub mod line;
pub mod process;
pub mod sim;
pub mod uinput;
pub mod wakelock;

pub use gpio::{GpioEdgeInterrupt, SysfsGpio, SysfsLine};
pub use identity::{resolve, resolve_pattern, ComponentInfo, SensorIdentity, SensorModel, SensorVendor};
pub use irq::{InterruptRegistration, InterruptSource, IrqHandler};
pub use line::{read_line, ControlLine, Direction, Level, LineHandle, LineProvider};
pub use process::ProcfsPriority;
pub use sim::{RecordingSink, SimInput, SimInterrupt, SimLine, SimLineProvider};
pub use uinput::{UinputRegistrar, UinputSink};
pub use wakelock::KernelWakeLock;

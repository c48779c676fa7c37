//! Device context
//!
//! One [`Device`] exists per attached sensor. Attach resolves every line,
//! registers the input device and the interrupt, and subscribes to display
//! notifications; any required step failing aborts attach and releases what
//! was already taken. Detach (or drop) undoes it in reverse.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use fpc_protocol::{Attribute, DeviceStatus};

use crate::constants::{input, lines, timing};
use crate::engine::events::EventNotifier;
use crate::engine::input::{InputDeviceSpec, InputRegistrar};
use crate::engine::notify::AttributeNotifier;
use crate::engine::power::{subscribe_best_effort, DisplayPublisher, DisplaySubscription, PowerStateCoordinator};
use crate::engine::priority::{PriorityControl, PriorityPolicy, PriorityScheduler, PriorityWorker, TaskQueue, TaskReceiver};
use crate::engine::state::ActiveState;
use crate::engine::wake::{Clock, SystemClock, TimedWakeLease, WakeLease};
use crate::error::Result;
use crate::hw::identity::{resolve_pattern, ComponentInfo, SensorIdentity};
use crate::hw::irq::{InterruptRegistration, InterruptSource};
use crate::hw::line::{read_line, Direction, Level, LineHandle, LineProvider};
use crate::settings::DeviceConfig;

/// Where the priority task runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferredWork {
    /// A dedicated worker thread
    Worker,
    /// Only when [`Device::run_deferred`] is called
    Manual,
}

/// Platform pieces the device is built from
pub struct Collaborators {
    pub lines: Arc<dyn LineProvider>,
    pub interrupt: Arc<dyn InterruptSource>,
    pub input: Arc<dyn InputRegistrar>,
    pub priority: Arc<dyn PriorityControl>,
    /// `None` leaves the display flag at its initial value
    pub display: Option<Arc<dyn DisplayPublisher>>,
    /// Platform suspend blocker mirrored by the lease
    pub wake_lock: Option<Arc<dyn WakeLease>>,
    pub clock: Arc<dyn Clock>,
}

impl Collaborators {
    pub fn new(
        lines: Arc<dyn LineProvider>,
        interrupt: Arc<dyn InterruptSource>,
        input: Arc<dyn InputRegistrar>,
        priority: Arc<dyn PriorityControl>,
    ) -> Self {
        Self {
            lines,
            interrupt,
            input,
            priority,
            display: None,
            wake_lock: None,
            clock: Arc::new(SystemClock::new()),
        }
    }

    pub fn with_display(mut self, display: Arc<dyn DisplayPublisher>) -> Self {
        self.display = Some(display);
        self
    }

    pub fn with_wake_lock(mut self, wake_lock: Arc<dyn WakeLease>) -> Self {
        self.wake_lock = Some(wake_lock);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

/// Behavior knobs, normally taken from [`DeviceConfig`]
#[derive(Debug, Clone)]
pub struct AttachOptions {
    pub input_device_name: String,
    pub ttw_hold: Duration,
    pub policy: PriorityPolicy,
    pub initial_display_on: bool,
    pub ignore_home_for_esd: bool,
    pub deferred: DeferredWork,
}

impl Default for AttachOptions {
    fn default() -> Self {
        Self {
            input_device_name: input::DEVICE_NAME.to_string(),
            ttw_hold: timing::TTW_HOLD_TIME,
            policy: PriorityPolicy::default(),
            initial_display_on: true,
            ignore_home_for_esd: false,
            deferred: DeferredWork::Worker,
        }
    }
}

impl From<&DeviceConfig> for AttachOptions {
    fn from(config: &DeviceConfig) -> Self {
        Self {
            input_device_name: config.input_device_name.clone(),
            ttw_hold: config.ttw_hold(),
            policy: config.priority_policy(),
            initial_display_on: config.initial_display_on,
            ignore_home_for_esd: config.ignore_home_for_esd,
            deferred: DeferredWork::Worker,
        }
    }
}

pub struct Device {
    irq_line: LineHandle,
    identity: SensorIdentity,
    component: RwLock<ComponentInfo>,
    state: Arc<ActiveState>,
    lease: Arc<TimedWakeLease>,
    notifier: Arc<AttributeNotifier>,
    events: Arc<EventNotifier>,
    scheduler: Arc<PriorityScheduler>,
    queue: Arc<TaskQueue>,
    ignore_home_for_esd: AtomicBool,

    // Released in this order by detach()
    display_subscription: Mutex<Option<DisplaySubscription>>,
    interrupt: Mutex<Option<InterruptRegistration>>,
    worker: Mutex<Option<PriorityWorker>>,
    manual: Mutex<Option<TaskReceiver>>,
}

/// Hold a reset line through the power-on reset pulse
fn hw_reset(line: &LineHandle) -> Result<()> {
    line.set_level(Level::High)?;
    thread::sleep(Duration::from_micros(timing::RESET_HIGH1_US));
    line.set_level(Level::Low)?;
    thread::sleep(Duration::from_micros(timing::RESET_LOW_US));
    line.set_level(Level::High)?;
    thread::sleep(Duration::from_micros(timing::RESET_HIGH2_US));
    Ok(())
}

/// Read the straps. Any unavailable strap makes the identity unknown.
fn read_identity(provider: &dyn LineProvider) -> SensorIdentity {
    let strap = |label: &str| match provider.acquire(label, Direction::Input) {
        Ok(line) => Some(read_line(line.as_ref()).is_high()),
        Err(e) => {
            debug!(line = %label, error = %e, "Identification line unavailable");
            None
        }
    };
    resolve_pattern(strap(lines::ID0), strap(lines::ID1), strap(lines::ID2))
}

impl Device {
    pub fn attach(collab: Collaborators, options: AttachOptions) -> Result<Self> {
        let irq_line = collab.lines.acquire(lines::IRQ, Direction::Input)?;

        let identity = read_identity(collab.lines.as_ref());
        if identity.is_known() {
            info!(identity = %identity, "Sensor identified");
        } else {
            warn!("Sensor identification pattern not recognized");
        }

        // Reset is optional; a board without the line skips the sequence
        match collab.lines.acquire(lines::RESET, Direction::Output(Level::High)) {
            Ok(reset) => {
                hw_reset(&reset)?;
                debug!("Sensor reset sequence done");
            }
            Err(e) => debug!(error = %e, "No reset line, skipping reset"),
        }

        let spec = InputDeviceSpec::new(&options.input_device_name);
        let sink = collab.input.register(&spec)?;

        let mut lease = TimedWakeLease::new(collab.clock.clone());
        if let Some(platform) = collab.wake_lock.clone() {
            lease = lease.with_platform(platform);
        }
        let lease = Arc::new(lease);

        let state = Arc::new(ActiveState::new(options.initial_display_on));
        let notifier = Arc::new(AttributeNotifier::new());
        let events = Arc::new(EventNotifier::new(
            lease.clone(),
            options.ttw_hold,
            notifier.clone(),
            state.clone(),
            sink,
        ));

        let (queue, receiver) = TaskQueue::channel();
        let scheduler = Arc::new(PriorityScheduler::new(
            state.clone(),
            collab.priority.clone(),
            notifier.clone(),
            options.policy.clone(),
        ));
        let (worker, manual) = match options.deferred {
            DeferredWork::Worker => (Some(PriorityWorker::spawn(receiver, scheduler.clone())?), None),
            DeferredWork::Manual => (None, Some(receiver)),
        };

        let handler_events = events.clone();
        let interrupt = InterruptRegistration::request(
            collab.interrupt.clone(),
            Arc::new(move || handler_events.handle_interrupt()),
        )?;

        let coordinator = Arc::new(PowerStateCoordinator::new(state.clone(), queue.clone()));
        let display_subscription = collab
            .display
            .clone()
            .and_then(|publisher| subscribe_best_effort(publisher, coordinator));

        info!(
            input = %options.input_device_name,
            hold_ms = options.ttw_hold.as_millis() as u64,
            process = %options.policy.process,
            display_on = options.initial_display_on,
            "Sensor attached"
        );

        Ok(Self {
            irq_line,
            component: RwLock::new(identity.component_info()),
            identity,
            state,
            lease,
            notifier,
            events,
            scheduler,
            queue,
            ignore_home_for_esd: AtomicBool::new(options.ignore_home_for_esd),
            display_subscription: Mutex::new(display_subscription),
            interrupt: Mutex::new(Some(interrupt)),
            worker: Mutex::new(worker),
            manual: Mutex::new(manual),
        })
    }

    /// Stop both trigger sources, then let pending deferred work finish.
    ///
    /// Works through a shared reference so a holder of one `Arc<Device>`
    /// can detach while others still exist; later calls and drop are no-ops.
    /// Reads keep working afterwards; interrupts and display events no
    /// longer reach the device.
    pub fn detach(&self) {
        self.display_subscription.lock().take();
        let was_attached = self.interrupt.lock().take().is_some();
        self.worker.lock().take();
        self.manual.lock().take();
        if was_attached {
            info!("Sensor detached");
        }
    }

    pub fn is_attached(&self) -> bool {
        self.interrupt.lock().is_some()
    }

    /// Run queued priority work in [`DeferredWork::Manual`] mode.
    /// Returns the number of runs.
    pub fn run_deferred(&self) -> usize {
        match self.manual.lock().as_ref() {
            Some(rx) => rx.run_pending(&|| self.scheduler.run()),
            None => 0,
        }
    }

    pub fn irq_level(&self) -> Level {
        read_line(self.irq_line.as_ref())
    }

    pub fn is_display_on(&self) -> bool {
        self.state.is_display_on()
    }

    /// Identity resolved at attach; never changes
    pub fn identity(&self) -> SensorIdentity {
        self.identity
    }

    /// Published component info, initially [`Device::identity`]
    pub fn component_info(&self) -> ComponentInfo {
        self.component.read().clone()
    }

    pub(crate) fn set_component_info(&self, info: ComponentInfo) {
        *self.component.write() = info;
    }

    pub fn ignore_home_for_esd(&self) -> bool {
        self.ignore_home_for_esd.load(Ordering::SeqCst)
    }

    pub fn set_ignore_home_for_esd(&self, ignore: bool) {
        self.ignore_home_for_esd.store(ignore, Ordering::SeqCst);
    }

    pub fn events(&self) -> &EventNotifier {
        &self.events
    }

    pub fn notifier(&self) -> &AttributeNotifier {
        &self.notifier
    }

    pub fn wake_lease(&self) -> &TimedWakeLease {
        &self.lease
    }

    pub fn scheduler(&self) -> &PriorityScheduler {
        &self.scheduler
    }

    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    pub fn status(&self) -> DeviceStatus {
        DeviceStatus {
            irq_level: self.irq_level().as_u8(),
            display_on: self.is_display_on(),
            sensor_version: self.identity.version(),
            sensor_identity: self.identity.to_string(),
            component_info: self.component_info().to_string(),
            ignore_home_for_esd: self.ignore_home_for_esd(),
            wake_lease_held: self.lease.is_held(),
            interrupts: self.events.interrupts(),
            irq_generation: self.notifier.generation(Attribute::Irq),
            screen_state_generation: self.notifier.generation(Attribute::ScreenState),
        }
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.detach();
    }
}

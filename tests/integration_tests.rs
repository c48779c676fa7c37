/*
 * Integration tests for fpc
 *
 * These tests drive the whole engine the way fpcd does: simulated control
 * lines, a simulated interrupt source and an in-process display bus, with
 * the control surface as the only window into the device.
 */

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use mockall::mock;
use mockall::predicate::eq;
use serial_test::serial;
use tempfile::TempDir;

use fpc_core::constants::keys::{KEY_F2, KEY_FINGERPRINT, KEY_HOME};
use fpc_core::constants::lines;
use fpc_core::{
    AttachOptions, Attribute, BlankState, Collaborators, ControlSurface, DeferredWork, Device,
    DeviceConfig, DisplayBus, DisplayEvent, FpcError, KeyEvent, Level, ManualClock,
    PriorityControl, RecordingSink, SimInput, SimInterrupt, SimLineProvider,
};
use fpcctl::logger;

mock! {
    pub Priority {}
    impl PriorityControl for Priority {
        fn set_named_nice(&self, name: &str, nice: i32) -> fpc_core::Result<bool>;
    }
}

struct Rig {
    lines: Arc<SimLineProvider>,
    irq: Arc<SimInterrupt>,
    input: Arc<SimInput>,
    bus: Arc<DisplayBus>,
    clock: Arc<ManualClock>,
}

impl Rig {
    fn new(straps: (bool, bool, bool)) -> Self {
        Self {
            lines: Arc::new(SimLineProvider::with_straps(straps)),
            irq: Arc::new(SimInterrupt::new()),
            input: Arc::new(SimInput::new()),
            bus: Arc::new(DisplayBus::new()),
            clock: Arc::new(ManualClock::new()),
        }
    }

    fn attach(&self, priority: MockPriority, deferred: DeferredWork) -> Device {
        let collab = Collaborators::new(
            self.lines.clone(),
            self.irq.clone(),
            self.input.clone(),
            Arc::new(priority),
        )
        .with_display(self.bus.clone())
        .with_clock(self.clock.clone());
        let options = AttachOptions {
            deferred,
            ..AttachOptions::default()
        };
        Device::attach(collab, options).unwrap()
    }

    fn sink(&self) -> Arc<RecordingSink> {
        self.input.sink()
    }

    fn blank(&self, state: BlankState) {
        self.bus.publish(DisplayEvent::early(state));
        self.bus.publish(DisplayEvent::post(state));
    }
}

fn quiet_priority() -> MockPriority {
    let mut priority = MockPriority::new();
    priority.expect_set_named_nice().returning(|_, _| Ok(false));
    priority
}

#[test]
fn test_identity_table_through_surface() {
    let table = [
        ((true, true, true), "fpc1245 FPC(OF)", "1"),
        ((true, false, false), "fpc1245 FPC(Primax)", "1"),
        ((false, false, true), "fpc1245 FPC(truly)", "1"),
        ((true, true, false), "fpc1263 FPC(OF)", "2"),
        ((false, false, false), "fpc1263 FPC(Primax)", "2"),
        ((false, true, true), "fpc1263 FPC(truly)", "2"),
        ((false, true, false), "fpc1263 FPC(f/p)", "2"),
        ((true, false, true), "fpc1263 FPC(Goodix)", "2"),
    ];

    for (straps, identity, version) in table {
        let rig = Rig::new(straps);
        let surface = ControlSurface::new(Arc::new(rig.attach(quiet_priority(), DeferredWork::Manual)));
        assert_eq!(surface.read(Attribute::SensorIdentity).unwrap(), format!("{}\n", identity));
        assert_eq!(surface.read(Attribute::SensorVersion).unwrap(), format!("{}\n", version));
    }
}

#[test]
fn test_pulse_only_while_display_off() {
    let rig = Rig::new((false, false, false));
    let device = rig.attach(quiet_priority(), DeferredWork::Manual);
    let sink = rig.sink();

    // Display starts on: interrupts publish but emit no key
    assert!(rig.irq.fire());
    assert!(rig.irq.fire());
    assert_eq!(sink.pulses(KEY_FINGERPRINT), 0);
    assert_eq!(device.status().irq_generation, 2);

    rig.blank(BlankState::Powerdown);
    assert!(!device.is_display_on());
    assert!(rig.irq.fire());
    assert_eq!(sink.pulses(KEY_FINGERPRINT), 1);

    rig.blank(BlankState::Unblank);
    assert!(rig.irq.fire());
    assert_eq!(sink.pulses(KEY_FINGERPRINT), 1);

    let status = device.status();
    assert_eq!(status.interrupts, 4);
    assert_eq!(status.irq_generation, 4);
}

#[test]
fn test_every_interrupt_arms_lease_until_expiry() {
    let rig = Rig::new((false, false, false));
    let device = rig.attach(quiet_priority(), DeferredWork::Manual);
    let lease = device.wake_lease();

    assert!(!lease.is_held());
    rig.irq.fire();
    assert!(lease.is_held());

    rig.clock.advance(Duration::from_millis(600));
    rig.irq.fire();
    rig.clock.advance(Duration::from_millis(600));
    // Second arm extended the deadline to 1600ms
    assert!(lease.is_held());

    rig.clock.advance(Duration::from_millis(400));
    assert!(!lease.is_held());
    assert_eq!(lease.arm_count(), 2);
}

#[test]
fn test_flip_flop_coalesces_into_one_run() {
    let rig = Rig::new((false, false, false));
    let mut priority = MockPriority::new();
    // Only the settled state is applied
    priority
        .expect_set_named_nice()
        .with(eq("fingerprintd"), eq(-20))
        .times(1)
        .returning(|_, _| Ok(true));
    let device = rig.attach(priority, DeferredWork::Manual);

    rig.blank(BlankState::Powerdown);
    rig.blank(BlankState::Unblank);
    rig.blank(BlankState::Powerdown);
    assert!(device.queue().is_pending());
    assert_eq!(device.queue().scheduled(), 1);

    assert_eq!(device.run_deferred(), 1);
    assert_eq!(device.run_deferred(), 0);
    assert_eq!(device.scheduler().runs(), 1);
    assert_eq!(device.status().screen_state_generation, 1);
}

#[test]
fn test_ignored_blank_levels_and_post_phase() {
    let rig = Rig::new((false, false, false));
    let device = rig.attach(quiet_priority(), DeferredWork::Manual);

    rig.bus.publish(DisplayEvent::post(BlankState::Powerdown));
    assert!(device.is_display_on());

    for level in [BlankState::Normal, BlankState::VsyncSuspend, BlankState::HsyncSuspend] {
        rig.blank(level);
        assert!(device.is_display_on());
    }
    assert_eq!(device.queue().scheduled(), 0);
}

#[test]
fn test_worker_applies_priority_and_notifies() {
    let rig = Rig::new((false, false, false));
    let mut priority = MockPriority::new();
    priority
        .expect_set_named_nice()
        .with(eq("fingerprintd"), eq(-20))
        .times(1)
        .returning(|_, _| Ok(true));
    let surface = ControlSurface::new(Arc::new(rig.attach(priority, DeferredWork::Worker)));

    let seen = surface.generation(Attribute::ScreenState).unwrap();
    rig.blank(BlankState::Powerdown);
    let (generation, value) = surface
        .wait(Attribute::ScreenState, seen, Duration::from_secs(2))
        .unwrap();
    assert!(generation > seen);
    assert_eq!(value, "0\n");
}

#[test]
fn test_missing_dependent_process_is_not_an_error() {
    let rig = Rig::new((false, false, false));
    let mut priority = MockPriority::new();
    priority.expect_set_named_nice().times(1).returning(|_, _| Ok(false));
    let device = rig.attach(priority, DeferredWork::Manual);

    rig.blank(BlankState::Powerdown);
    assert_eq!(device.run_deferred(), 1);
    // The screen state is still published
    assert_eq!(device.status().screen_state_generation, 1);
}

#[test]
fn test_home_key_commands() {
    let rig = Rig::new((false, false, false));
    let surface = ControlSurface::new(Arc::new(rig.attach(quiet_priority(), DeferredWork::Manual)));
    let sink = rig.sink();

    surface.write(Attribute::ReportHome, "down").unwrap();
    surface.write(Attribute::ReportHome, "up\n").unwrap();
    assert_eq!(
        sink.events(),
        vec![
            KeyEvent { code: KEY_HOME, pressed: true },
            KeyEvent { code: KEY_HOME, pressed: false },
        ]
    );

    surface.write(Attribute::ReportHome, "timeout").unwrap();
    assert_eq!(sink.pulses(KEY_F2), 1);

    let before = sink.events().len();
    let err = surface.write(Attribute::ReportHome, "down please").unwrap_err();
    assert_eq!(err.errno(), 22);
    assert_eq!(sink.events().len(), before);
}

#[test]
fn test_irq_reflects_line_level() {
    let rig = Rig::new((false, false, false));
    let surface = ControlSurface::new(Arc::new(rig.attach(quiet_priority(), DeferredWork::Manual)));
    let irq = rig.lines.line(lines::IRQ).unwrap();

    irq.drive(Level::High);
    assert_eq!(surface.read(Attribute::Irq).unwrap(), "1\n");
    irq.drive(Level::Low);
    assert_eq!(surface.read(Attribute::Irq).unwrap(), "0\n");
}

#[test]
fn test_screen_state_reads_never_torn() {
    let rig = Rig::new((false, false, false));
    let surface = ControlSurface::new(Arc::new(rig.attach(quiet_priority(), DeferredWork::Manual)));

    let bus = rig.bus.clone();
    let flipper = thread::spawn(move || {
        for i in 0..500 {
            let state = if i % 2 == 0 { BlankState::Powerdown } else { BlankState::Unblank };
            bus.publish(DisplayEvent::early(state));
        }
    });

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let surface = surface.clone();
            thread::spawn(move || {
                for _ in 0..500 {
                    let value = surface.read(Attribute::ScreenState).unwrap();
                    assert!(value == "0\n" || value == "1\n", "torn read {:?}", value);
                }
            })
        })
        .collect();

    flipper.join().unwrap();
    for r in readers {
        r.join().unwrap();
    }
    // 500 alternating events end on Unblank
    assert_eq!(surface.read(Attribute::ScreenState).unwrap(), "1\n");
}

#[test]
fn test_detach_releases_interrupt_and_display() {
    let rig = Rig::new((false, false, false));
    let device = rig.attach(quiet_priority(), DeferredWork::Worker);
    assert!(rig.irq.is_requested());
    assert_eq!(rig.bus.subscriber_count(), 1);

    device.detach();
    assert!(!rig.irq.is_requested());
    assert_eq!(rig.bus.subscriber_count(), 0);
    assert!(!rig.irq.fire());
}

#[test]
fn test_attach_fails_without_interrupt() {
    let rig = Rig::new((false, false, false));
    rig.irq.refuse_requests(true);
    let collab = Collaborators::new(
        rig.lines.clone(),
        rig.irq.clone(),
        rig.input.clone(),
        Arc::new(quiet_priority()),
    );
    let err = Device::attach(collab, AttachOptions::default()).err().unwrap();
    assert!(matches!(err, FpcError::InterruptUnavailable(_)));
}

#[test]
fn test_config_drives_attach_options() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("fpc1020.json");

    let mut config = DeviceConfig::default();
    config.lines.irq = Some(23);
    config.ttw_hold_ms = 250;
    config.dependent_process = "fpsvcd".into();
    config.initial_display_on = false;
    fpc_core::save_config(&path, &config).unwrap();

    let loaded = fpc_core::load_config(&path).unwrap();
    loaded.validate().unwrap();
    let options = AttachOptions::from(&loaded);
    assert_eq!(options.ttw_hold, Duration::from_millis(250));
    assert_eq!(options.policy.process, "fpsvcd");
    assert!(!options.initial_display_on);
    assert_eq!(options.deferred, DeferredWork::Worker);
}

#[test]
#[serial]
fn test_logger_writes_json_lines() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("logs").join("logs.json");

    logger::init_logging_at(&path);
    assert_eq!(logger::log_path().as_deref(), Some(path.as_path()));
    logger::log_event("write", serde_json::json!({ "attribute": "report_home" }));
    logger::log_event("notify", serde_json::json!({ "generation": 3 }));
    logger::shutdown_logging();

    let content = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<serde_json::Value> = content
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["event"], "write");
    assert_eq!(lines[1]["data"]["generation"], 3);
    assert!(lines[0]["ts_ms"].is_number());
}

#[test]
#[serial]
fn test_logger_is_silent_when_uninitialized() {
    logger::shutdown_logging();
    assert!(logger::log_path().is_none());
    // Must not panic or create files
    logger::log_event("ignored", serde_json::json!({}));
}

//! In-process hardware
//!
//! Software stand-ins for lines, the interrupt source and the event sink.
//! Used for bring-up on hosts without the sensor and by the test suites.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::engine::input::{EventSink, InputDeviceSpec, InputRegistrar, KeyEvent};
use crate::error::{FpcError, Result};
use crate::hw::irq::{InterruptSource, IrqHandler};
use crate::hw::line::{ControlLine, Direction, Level, LineHandle, LineProvider};

/// A line whose level is held in memory
pub struct SimLine {
    label: String,
    high: AtomicBool,
    faulty: AtomicBool,
    driven: Mutex<Vec<Level>>,
}

impl SimLine {
    pub fn new(label: &str, level: Level) -> Self {
        Self {
            label: label.to_string(),
            high: AtomicBool::new(level.is_high()),
            faulty: AtomicBool::new(false),
            driven: Mutex::new(Vec::new()),
        }
    }

    /// Change the level from the "hardware" side
    pub fn drive(&self, level: Level) {
        self.high.store(level.is_high(), Ordering::SeqCst);
    }

    /// Make reads fail until cleared
    pub fn set_faulty(&self, faulty: bool) {
        self.faulty.store(faulty, Ordering::SeqCst);
    }

    /// Levels written through [`ControlLine::set_level`], oldest first
    pub fn driven_levels(&self) -> Vec<Level> {
        self.driven.lock().clone()
    }
}

impl ControlLine for SimLine {
    fn label(&self) -> &str {
        &self.label
    }

    fn level(&self) -> Option<Level> {
        if self.faulty.load(Ordering::SeqCst) {
            return None;
        }
        Some(Level::from(self.high.load(Ordering::SeqCst)))
    }

    fn set_level(&self, level: Level) -> Result<()> {
        self.driven.lock().push(level);
        self.high.store(level.is_high(), Ordering::SeqCst);
        Ok(())
    }
}

/// Provider over a fixed set of named [`SimLine`]s
#[derive(Default)]
pub struct SimLineProvider {
    lines: Mutex<HashMap<String, Arc<SimLine>>>,
}

impl SimLineProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a line and return a handle for driving it
    pub fn add(&self, label: &str, level: Level) -> Arc<SimLine> {
        let line = Arc::new(SimLine::new(label, level));
        self.lines.lock().insert(label.to_string(), line.clone());
        line
    }

    /// Provider with the interrupt line and the three straps set to `pattern`
    pub fn with_straps(pattern: (bool, bool, bool)) -> Self {
        use crate::constants::lines;

        let provider = Self::new();
        provider.add(lines::IRQ, Level::Low);
        provider.add(lines::ID0, Level::from(pattern.0));
        provider.add(lines::ID1, Level::from(pattern.1));
        provider.add(lines::ID2, Level::from(pattern.2));
        provider
    }

    pub fn line(&self, label: &str) -> Option<Arc<SimLine>> {
        self.lines.lock().get(label).cloned()
    }
}

impl LineProvider for SimLineProvider {
    fn acquire(&self, label: &str, direction: Direction) -> Result<LineHandle> {
        let line = self
            .line(label)
            .ok_or_else(|| FpcError::line_unavailable(label, "no such line"))?;
        if let Direction::Output(level) = direction {
            line.set_level(level)?;
        }
        Ok(line)
    }
}

/// Interrupt source fired by hand
#[derive(Default)]
pub struct SimInterrupt {
    handler: Mutex<Option<IrqHandler>>,
    refuse: AtomicBool,
}

impl SimInterrupt {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `request` fail
    pub fn refuse_requests(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.handler.lock().is_some()
    }

    /// Deliver one interrupt. Returns false when nothing is registered.
    pub fn fire(&self) -> bool {
        // Clone out so the handler runs without our lock held
        let handler = self.handler.lock().clone();
        match handler {
            Some(h) => {
                h();
                true
            }
            None => false,
        }
    }
}

impl InterruptSource for SimInterrupt {
    fn request(&self, handler: IrqHandler) -> Result<()> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(FpcError::InterruptUnavailable("interrupt busy".into()));
        }
        let mut slot = self.handler.lock();
        if slot.is_some() {
            return Err(FpcError::InterruptUnavailable("already requested".into()));
        }
        *slot = Some(handler);
        Ok(())
    }

    fn free(&self) {
        self.handler.lock().take();
    }
}

/// Event sink that records everything it is given
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<KeyEvent>>,
    syncs: Mutex<usize>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every event emitted so far, oldest first
    pub fn events(&self) -> Vec<KeyEvent> {
        self.events.lock().clone()
    }

    pub fn flush_count(&self) -> usize {
        *self.syncs.lock()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
        *self.syncs.lock() = 0;
    }

    /// Number of completed press+release pairs for `code`
    pub fn pulses(&self, code: u16) -> usize {
        let events = self.events.lock();
        events
            .windows(2)
            .filter(|w| {
                w[0].code == code && w[0].pressed && w[1].code == code && !w[1].pressed
            })
            .count()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, code: u16, pressed: bool) {
        self.events.lock().push(KeyEvent { code, pressed });
    }

    fn flush(&self) {
        *self.syncs.lock() += 1;
    }
}

/// Input registrar handing out one shared [`RecordingSink`]
#[derive(Default)]
pub struct SimInput {
    sink: Arc<RecordingSink>,
    refuse: AtomicBool,
    registered: Mutex<Option<InputDeviceSpec>>,
}

impl SimInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sink(&self) -> Arc<RecordingSink> {
        self.sink.clone()
    }

    pub fn refuse_registration(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Spec of the last successful registration
    pub fn registered(&self) -> Option<InputDeviceSpec> {
        self.registered.lock().clone()
    }
}

impl InputRegistrar for SimInput {
    fn register(&self, spec: &InputDeviceSpec) -> Result<Arc<dyn EventSink>> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(FpcError::EventSinkUnavailable(format!(
                "cannot register {}",
                spec.name
            )));
        }
        *self.registered.lock() = Some(spec.clone());
        Ok(self.sink.clone())
    }
}

//! sysfs GPIO backend
//!
//! Lines are addressed by label and mapped to kernel GPIO numbers through the
//! device configuration. Each line is exported on demand and accessed through
//! `/sys/class/gpio/gpioN/{direction,edge,value}`.
//!
//! Edge interrupts use the sysfs convention: with `edge` set, the `value`
//! file raises `POLLPRI` on every configured edge and must be re-read from
//! offset 0 to re-arm.

use std::collections::HashMap;
use std::fs::{self, File};
use std::os::unix::fs::FileExt;
use std::os::unix::io::AsRawFd;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::constants::{paths, timing};
use crate::error::{FpcError, Result};
use crate::hw::irq::{InterruptSource, IrqHandler};
use crate::hw::line::{ControlLine, Direction, Level, LineHandle, LineProvider};

/// Line provider over the sysfs GPIO class directory
pub struct SysfsGpio {
    base: PathBuf,
    numbers: HashMap<String, u32>,
}

impl SysfsGpio {
    pub fn new(numbers: HashMap<String, u32>) -> Self {
        Self::with_base(paths::GPIO_BASE, numbers)
    }

    /// Provider rooted somewhere other than `/sys/class/gpio`
    pub fn with_base(base: impl Into<PathBuf>, numbers: HashMap<String, u32>) -> Self {
        Self {
            base: base.into(),
            numbers,
        }
    }

    fn number(&self, label: &str) -> Result<u32> {
        self.numbers
            .get(label)
            .copied()
            .ok_or_else(|| FpcError::line_unavailable(label, "no GPIO configured"))
    }

    /// Directory of an exported GPIO, exporting it first if needed
    fn export(&self, label: &str, number: u32) -> Result<PathBuf> {
        let dir = self.base.join(format!("gpio{}", number));
        if dir.exists() {
            return Ok(dir);
        }
        fs::write(self.base.join("export"), number.to_string()).map_err(|e| {
            FpcError::line_unavailable(label, format!("export of gpio{} failed: {}", number, e))
        })?;
        if !dir.exists() {
            return Err(FpcError::line_unavailable(
                label,
                format!("gpio{} did not appear after export", number),
            ));
        }
        debug!(line = %label, gpio = number, "Exported GPIO");
        Ok(dir)
    }

    /// Configure `label` as a rising-edge interrupt source
    pub fn edge_interrupt(&self, label: &str) -> Result<GpioEdgeInterrupt> {
        let number = self.number(label)?;
        let dir = self.export(label, number)?;
        Ok(GpioEdgeInterrupt::new(label, dir))
    }
}

impl LineProvider for SysfsGpio {
    fn acquire(&self, label: &str, direction: Direction) -> Result<LineHandle> {
        let number = self.number(label)?;
        let dir = self.export(label, number)?;

        // "high"/"low" switch to output with the initial level in one write
        let dir_value = match direction {
            Direction::Input => "in",
            Direction::Output(Level::High) => "high",
            Direction::Output(Level::Low) => "low",
        };
        fs::write(dir.join("direction"), dir_value).map_err(|e| {
            FpcError::line_unavailable(label, format!("cannot set direction {}: {}", dir_value, e))
        })?;

        info!(line = %label, gpio = number, direction = dir_value, "Acquired control line");
        Ok(Arc::new(SysfsLine {
            label: label.to_string(),
            value_path: dir.join("value"),
        }))
    }
}

/// One exported GPIO
pub struct SysfsLine {
    label: String,
    value_path: PathBuf,
}

impl ControlLine for SysfsLine {
    fn label(&self) -> &str {
        &self.label
    }

    fn level(&self) -> Option<Level> {
        let content = fs::read_to_string(&self.value_path).ok()?;
        parse_level(&content)
    }

    fn set_level(&self, level: Level) -> Result<()> {
        fs::write(&self.value_path, level.as_u8().to_string())
            .map_err(|e| FpcError::line_io(&self.label, format!("write failed: {}", e)))
    }
}

fn parse_level(content: &str) -> Option<Level> {
    match content.trim() {
        "0" => Some(Level::Low),
        "1" => Some(Level::High),
        _ => None,
    }
}

struct Watcher {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Interrupt source backed by a GPIO `value` file.
///
/// A dedicated thread waits for `POLLPRI` and runs the handler for each edge.
pub struct GpioEdgeInterrupt {
    label: String,
    dir: PathBuf,
    watcher: Mutex<Option<Watcher>>,
}

impl GpioEdgeInterrupt {
    fn new(label: &str, dir: PathBuf) -> Self {
        Self {
            label: label.to_string(),
            dir,
            watcher: Mutex::new(None),
        }
    }

    fn open_value(&self) -> Result<File> {
        fs::write(self.dir.join("edge"), "rising").map_err(|e| {
            FpcError::InterruptUnavailable(format!("{}: cannot set edge: {}", self.label, e))
        })?;
        File::open(self.dir.join("value")).map_err(|e| {
            FpcError::InterruptUnavailable(format!("{}: cannot open value: {}", self.label, e))
        })
    }
}

impl InterruptSource for GpioEdgeInterrupt {
    fn request(&self, handler: IrqHandler) -> Result<()> {
        let mut slot = self.watcher.lock();
        if slot.is_some() {
            return Err(FpcError::InterruptUnavailable(format!(
                "{}: already requested",
                self.label
            )));
        }

        let file = self.open_value()?;
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let label = self.label.clone();

        let handle = thread::Builder::new()
            .name("fpc-irq".into())
            .spawn(move || watch_edges(&label, file, &stop_flag, handler))
            .map_err(|e| FpcError::InterruptUnavailable(format!("cannot spawn watcher: {}", e)))?;

        info!(line = %self.label, "Sensor interrupt requested");
        *slot = Some(Watcher { stop, handle });
        Ok(())
    }

    fn free(&self) {
        if let Some(watcher) = self.watcher.lock().take() {
            watcher.stop.store(true, Ordering::SeqCst);
            if watcher.handle.join().is_err() {
                error!(line = %self.label, "Interrupt watcher panicked");
            }
            // Stop edge generation so nothing piles up while detached
            if let Err(e) = fs::write(self.dir.join("edge"), "none") {
                warn!(line = %self.label, error = %e, "Failed to disable edge");
            }
        }
    }
}

impl Drop for GpioEdgeInterrupt {
    fn drop(&mut self) {
        self.free();
    }
}

fn watch_edges(label: &str, file: File, stop: &AtomicBool, handler: IrqHandler) {
    let mut buf = [0u8; 8];
    // Initial read clears any edge latched before we started
    let _ = file.read_at(&mut buf, 0);

    let timeout_ms = timing::WATCH_SLICE.as_millis() as libc::c_int;
    while !stop.load(Ordering::SeqCst) {
        let mut pfd = libc::pollfd {
            fd: file.as_raw_fd(),
            events: libc::POLLPRI | libc::POLLERR,
            revents: 0,
        };
        // SAFETY: pfd is a valid pollfd for the lifetime of the call
        let rc = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
        if rc < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::Interrupted {
                continue;
            }
            error!(line = %label, error = %err, "poll on interrupt line failed");
            break;
        }
        if rc == 0 || pfd.revents & libc::POLLPRI == 0 {
            continue;
        }
        let _ = file.read_at(&mut buf, 0);
        handler();
    }
    debug!(line = %label, "Interrupt watcher exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fake_gpio(number: u32, value: &str) -> (TempDir, SysfsGpio) {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join(format!("gpio{}", number));
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join("value"), value).unwrap();
        fs::write(dir.join("direction"), "in").unwrap();
        fs::write(dir.join("edge"), "none").unwrap();

        let mut numbers = HashMap::new();
        numbers.insert("fpc,irq-gpio".to_string(), number);
        let gpio = SysfsGpio::with_base(tmp.path(), numbers);
        (tmp, gpio)
    }

    #[test]
    fn test_read_exported_line() {
        let (_tmp, gpio) = fake_gpio(77, "1\n");
        let line = gpio.acquire("fpc,irq-gpio", Direction::Input).unwrap();
        assert_eq!(line.level(), Some(Level::High));
        assert_eq!(line.label(), "fpc,irq-gpio");
    }

    #[test]
    fn test_output_direction_written() {
        let (tmp, gpio) = fake_gpio(12, "0\n");
        let line = gpio
            .acquire("fpc,irq-gpio", Direction::Output(Level::High))
            .unwrap();
        assert_eq!(
            fs::read_to_string(tmp.path().join("gpio12/direction")).unwrap(),
            "high"
        );
        line.set_level(Level::Low).unwrap();
        assert_eq!(line.level(), Some(Level::Low));
    }

    #[test]
    fn test_unconfigured_label_unavailable() {
        let (_tmp, gpio) = fake_gpio(77, "0");
        let err = match gpio.acquire("fpc,reset-gpio", Direction::Input) {
            Err(e) => e,
            Ok(_) => panic!("acquire should fail"),
        };
        assert!(err.is_fatal_at_attach());
    }

    #[test]
    fn test_export_failure_unavailable() {
        let tmp = TempDir::new().unwrap();
        let mut numbers = HashMap::new();
        numbers.insert("fpc,irq-gpio".to_string(), 3);
        // No export file and no gpio3 directory
        let gpio = SysfsGpio::with_base(tmp.path().join("missing"), numbers);
        assert!(gpio.acquire("fpc,irq-gpio", Direction::Input).is_err());
    }

    #[test]
    fn test_garbage_value_reads_none() {
        let (tmp, gpio) = fake_gpio(5, "x");
        let line = gpio.acquire("fpc,irq-gpio", Direction::Input).unwrap();
        assert_eq!(line.level(), None);
        fs::write(tmp.path().join("gpio5/value"), "0").unwrap();
        assert_eq!(line.level(), Some(Level::Low));
    }

    #[test]
    fn test_edge_interrupt_lifecycle() {
        let (tmp, gpio) = fake_gpio(9, "0");
        let irq = gpio.edge_interrupt("fpc,irq-gpio").unwrap();
        irq.request(Arc::new(|| {})).unwrap();
        assert_eq!(
            fs::read_to_string(tmp.path().join("gpio9/edge")).unwrap(),
            "rising"
        );
        assert!(irq.request(Arc::new(|| {})).is_err());

        irq.free();
        assert_eq!(
            fs::read_to_string(tmp.path().join("gpio9/edge")).unwrap(),
            "none"
        );
        assert!(irq.request(Arc::new(|| {})).is_ok());
    }
}

//! uinput event sink
//!
//! Registers a virtual keyboard through `/dev/uinput` that advertises the
//! sensor's keys. Events are written as raw `input_event` records.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{info, warn};

use crate::constants::paths;
use crate::engine::input::{EventSink, InputDeviceSpec, InputRegistrar};
use crate::error::{FpcError, Result};

const EV_SYN: u16 = 0x00;
const EV_KEY: u16 = 0x01;
const SYN_REPORT: u16 = 0;
const BUS_VIRTUAL: u16 = 0x06;

const UINPUT_MAX_NAME_SIZE: usize = 80;

// _IOW('U', 100, int), _IOW('U', 101, int)
const UI_SET_EVBIT: u64 = 0x4004_5564;
const UI_SET_KEYBIT: u64 = 0x4004_5565;
// _IOW('U', 3, struct uinput_setup)
const UI_DEV_SETUP: u64 = 0x405c_5503;
// _IO('U', 1), _IO('U', 2)
const UI_DEV_CREATE: u64 = 0x5501;
const UI_DEV_DESTROY: u64 = 0x5502;

#[repr(C)]
struct InputId {
    bustype: u16,
    vendor: u16,
    product: u16,
    version: u16,
}

#[repr(C)]
struct UinputSetup {
    id: InputId,
    name: [libc::c_char; UINPUT_MAX_NAME_SIZE],
    ff_effects_max: u32,
}

fn ioctl(file: &File, request: u64, arg: libc::c_ulong) -> std::io::Result<()> {
    // SAFETY: fd is open for the duration of the call; callers pass either a
    // plain integer or a pointer to a live, correctly sized struct
    let rc = unsafe { libc::ioctl(file.as_raw_fd(), request as _, arg) };
    if rc < 0 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Creates uinput devices
pub struct UinputRegistrar {
    path: PathBuf,
}

impl UinputRegistrar {
    pub fn new() -> Self {
        Self {
            path: PathBuf::from(paths::UINPUT),
        }
    }
}

impl Default for UinputRegistrar {
    fn default() -> Self {
        Self::new()
    }
}

impl InputRegistrar for UinputRegistrar {
    fn register(&self, spec: &InputDeviceSpec) -> Result<Arc<dyn EventSink>> {
        let unavailable =
            |what: &str, e: std::io::Error| FpcError::EventSinkUnavailable(format!("{}: {}", what, e));

        let file = OpenOptions::new()
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(&self.path)
            .map_err(|e| unavailable(&format!("open {}", self.path.display()), e))?;

        ioctl(&file, UI_SET_EVBIT, EV_KEY as libc::c_ulong).map_err(|e| unavailable("UI_SET_EVBIT", e))?;
        for key in &spec.keys {
            ioctl(&file, UI_SET_KEYBIT, *key as libc::c_ulong)
                .map_err(|e| unavailable("UI_SET_KEYBIT", e))?;
        }

        let mut setup = UinputSetup {
            id: InputId {
                bustype: BUS_VIRTUAL,
                vendor: 0,
                product: 0,
                version: 1,
            },
            name: [0; UINPUT_MAX_NAME_SIZE],
            ff_effects_max: 0,
        };
        for (dst, src) in setup
            .name
            .iter_mut()
            .zip(spec.name.bytes().take(UINPUT_MAX_NAME_SIZE - 1))
        {
            *dst = src as libc::c_char;
        }

        ioctl(&file, UI_DEV_SETUP, &setup as *const UinputSetup as libc::c_ulong)
            .map_err(|e| unavailable("UI_DEV_SETUP", e))?;
        ioctl(&file, UI_DEV_CREATE, 0).map_err(|e| unavailable("UI_DEV_CREATE", e))?;

        info!(name = %spec.name, keys = spec.keys.len(), "Registered input device");
        Ok(Arc::new(UinputSink {
            file,
            warned: AtomicBool::new(false),
        }))
    }
}

/// Sink writing to a created uinput device. Destroys it on drop.
pub struct UinputSink {
    file: File,
    warned: AtomicBool,
}

impl UinputSink {
    fn write_event(&self, type_: u16, code: u16, value: i32) {
        // SAFETY: input_event is plain old data
        let mut ev: libc::input_event = unsafe { std::mem::zeroed() };
        ev.type_ = type_;
        ev.code = code;
        ev.value = value;

        // SAFETY: reading the bytes of a fully initialized repr(C) struct
        let bytes = unsafe {
            std::slice::from_raw_parts(
                &ev as *const libc::input_event as *const u8,
                std::mem::size_of::<libc::input_event>(),
            )
        };
        if let Err(e) = (&self.file).write_all(bytes) {
            if !self.warned.swap(true, Ordering::Relaxed) {
                warn!(error = %e, "Failed to write input event");
            }
        }
    }
}

impl EventSink for UinputSink {
    fn emit(&self, code: u16, pressed: bool) {
        self.write_event(EV_KEY, code, pressed as i32);
    }

    fn flush(&self) {
        self.write_event(EV_SYN, SYN_REPORT, 0);
    }
}

impl Drop for UinputSink {
    fn drop(&mut self) {
        if let Err(e) = ioctl(&self.file, UI_DEV_DESTROY, 0) {
            warn!(error = %e, "Failed to destroy input device");
        }
    }
}

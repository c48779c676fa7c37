//! Shared display-active flag
//!
//! Written only by the power-state coordinator, read by the interrupt path
//! and the priority task. A single atomic: readers never block and never see
//! anything but the old or the new value.

use std::sync::atomic::{AtomicBool, Ordering};

pub struct ActiveState {
    display_on: AtomicBool,
}

impl ActiveState {
    pub fn new(display_on: bool) -> Self {
        Self {
            display_on: AtomicBool::new(display_on),
        }
    }

    pub fn is_display_on(&self) -> bool {
        self.display_on.load(Ordering::Acquire)
    }

    /// Store a new value and return the previous one
    pub fn set_display_on(&self, on: bool) -> bool {
        self.display_on.swap(on, Ordering::AcqRel)
    }
}

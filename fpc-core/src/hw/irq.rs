//! Interrupt registration
//!
//! The platform owns the actual interrupt delivery. The core only hands it a
//! handler at attach and takes it back at detach.

use std::sync::Arc;

use tracing::debug;

use crate::error::Result;

/// Handler invoked once per interrupt edge. Runs in a context that must not
/// block, so implementations only touch atomics and short critical sections.
pub type IrqHandler = Arc<dyn Fn() + Send + Sync>;

/// A source of sensor interrupts (platform collaborator)
pub trait InterruptSource: Send + Sync {
    /// Install the handler. Fails if the interrupt cannot be claimed.
    fn request(&self, handler: IrqHandler) -> Result<()>;

    /// Remove the handler. After this returns the handler is never called again.
    fn free(&self);
}

/// Owns a requested interrupt and frees it on drop
pub struct InterruptRegistration {
    source: Arc<dyn InterruptSource>,
}

impl InterruptRegistration {
    pub fn request(source: Arc<dyn InterruptSource>, handler: IrqHandler) -> Result<Self> {
        source.request(handler)?;
        Ok(Self { source })
    }
}

impl Drop for InterruptRegistration {
    fn drop(&mut self) {
        debug!("Freeing sensor interrupt");
        self.source.free();
    }
}

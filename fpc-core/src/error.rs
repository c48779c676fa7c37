//! Error types for fpc-core
//!
//! Re-exports the workspace-wide error type from fpc-error.

pub use fpc_error::{FpcError, Result};

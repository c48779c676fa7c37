//! Unified error handling for fpc
//!
//! This crate provides a single error type used across the daemon, the core
//! engine and the client. It uses thiserror for Display and Error impls.

use std::io;
use std::path::PathBuf;

/// Result type alias using FpcError
pub type Result<T> = std::result::Result<T, FpcError>;

/// Unified error type for all fpc operations
#[derive(thiserror::Error, Debug)]
pub enum FpcError {
    // ============================================================================
    // I/O and File System Errors
    // ============================================================================
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: io::Error,
    },

    #[error("Failed to write file {path}: {source}")]
    FileWrite {
        path: PathBuf,
        source: io::Error,
    },

    // ============================================================================
    // Configuration Errors
    // ============================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Invalid configuration value for {field}: {reason}")]
    InvalidConfig {
        field: String,
        reason: String,
    },

    // ============================================================================
    // Hardware Errors (fatal at attach)
    // ============================================================================
    #[error("Control line '{label}' unavailable: {reason}")]
    LineUnavailable {
        label: String,
        reason: String,
    },

    #[error("Control line '{label}' I/O failed: {reason}")]
    LineIo {
        label: String,
        reason: String,
    },

    #[error("Interrupt registration failed: {0}")]
    InterruptUnavailable(String),

    #[error("Input event sink registration failed: {0}")]
    EventSinkUnavailable(String),

    #[error("Display notifier registration failed: {0}")]
    DisplayNotifier(String),

    // ============================================================================
    // Control Surface Errors
    // ============================================================================
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Operation not supported: {0}")]
    NotSupported(String),

    // ============================================================================
    // Daemon and IPC Errors
    // ============================================================================
    #[error("Daemon connection failed: {0}")]
    DaemonConnection(String),

    #[error("Daemon request failed: {0}")]
    DaemonRequest(String),

    #[error("IPC protocol error: {0}")]
    IpcProtocol(String),

    #[error("Message too large: {size} bytes (max {max_size} bytes)")]
    MessageTooLarge {
        size: usize,
        max_size: usize,
    },

    #[error("Operation timed out: {0}")]
    Timeout(String),

    // ============================================================================
    // Generic Errors
    // ============================================================================
    #[error("{0}")]
    Generic(String),
}

impl FpcError {
    /// Create a generic error from a string
    pub fn generic(msg: impl Into<String>) -> Self {
        Self::Generic(msg.into())
    }

    /// Create a config error from a string
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid configuration error for a named field
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a line-unavailable error
    pub fn line_unavailable(label: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::LineUnavailable {
            label: label.into(),
            reason: reason.into(),
        }
    }

    /// Create a line I/O error
    pub fn line_io(label: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::LineIo {
            label: label.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid-argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a daemon error from a string
    pub fn daemon(msg: impl Into<String>) -> Self {
        Self::DaemonRequest(msg.into())
    }

    /// Whether this error aborts device attach
    pub fn is_fatal_at_attach(&self) -> bool {
        matches!(
            self,
            Self::LineUnavailable { .. }
                | Self::InterruptUnavailable(_)
                | Self::EventSinkUnavailable(_)
        )
    }

    /// Errno-style code the control surface reports for this error
    pub fn errno(&self) -> i32 {
        match self {
            Self::InvalidArgument(_) => 22, // EINVAL
            Self::PermissionDenied(_) => 13, // EACCES
            Self::NotSupported(_) => 95, // EOPNOTSUPP
            Self::Timeout(_) => 110, // ETIMEDOUT
            Self::LineUnavailable { .. } => 19, // ENODEV
            _ => 5, // EIO
        }
    }
}

// Allow converting from String to FpcError
impl From<String> for FpcError {
    fn from(s: String) -> Self {
        Self::Generic(s)
    }
}

// Allow converting from &str to FpcError
impl From<&str> for FpcError {
    fn from(s: &str) -> Self {
        Self::Generic(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attach_fatal_classification() {
        assert!(FpcError::line_unavailable("fpc,irq-gpio", "missing").is_fatal_at_attach());
        assert!(FpcError::EventSinkUnavailable("uinput".into()).is_fatal_at_attach());
        assert!(FpcError::InterruptUnavailable("edge".into()).is_fatal_at_attach());
        assert!(!FpcError::DisplayNotifier("busy".into()).is_fatal_at_attach());
        assert!(!FpcError::invalid_argument("bogus").is_fatal_at_attach());
    }

    #[test]
    fn test_errno_mapping() {
        assert_eq!(FpcError::invalid_argument("x").errno(), 22);
        assert_eq!(FpcError::PermissionDenied("x".into()).errno(), 13);
        assert_eq!(FpcError::generic("x").errno(), 5);
    }

    #[test]
    fn test_display_messages() {
        let err = FpcError::line_unavailable("fpc,gpio_id0", "not exported");
        assert_eq!(
            err.to_string(),
            "Control line 'fpc,gpio_id0' unavailable: not exported"
        );
        let err: FpcError = "plain".into();
        assert_eq!(err.to_string(), "plain");
    }
}

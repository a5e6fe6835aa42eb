//! Centralized error types for the bridge
//!
//! All application-level errors are represented by the `BridgeError` enum.
//! Use `Result<T>` as shorthand for `std::result::Result<T, BridgeError>`.
//!
//! Protocol-level failures of a single SLCAN command live in
//! [`crate::slcan::SlcanError`]; they are answered with a NACK and never
//! surface here.

use std::fmt;
use std::path::PathBuf;

/// All bridge errors
#[derive(Debug)]
pub enum BridgeError {
    // === Transport ===
    /// Failed to open serial port
    SerialOpen {
        port: String,
        source: std::io::Error,
    },
    /// No serial port configured and none detected
    NoSerialPort,

    // === Network ===
    /// Failed to bind UDP socket
    UdpBind { port: u16, source: std::io::Error },

    // === CAN ===
    /// CAN driver backend could not be created
    CanBackend {
        interface: String,
        source: std::io::Error,
    },
    /// Requested CAN backend is not available on this platform
    #[cfg(not(target_os = "linux"))]
    BackendNotSupported { backend: &'static str },

    // === Config ===
    /// Config file could not be read or written
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Invalid config value
    ConfigValidation { field: &'static str, reason: String },

    // === Runtime ===
    /// Tokio runtime creation failed
    Runtime { source: std::io::Error },
    /// A background task panicked or was cancelled
    TaskFailed { task: &'static str, reason: String },
    /// Bridge left the running state because of an error
    BridgeFailed,
}

impl std::error::Error for BridgeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::SerialOpen { source, .. }
            | Self::UdpBind { source, .. }
            | Self::CanBackend { source, .. }
            | Self::ConfigRead { source, .. }
            | Self::Runtime { source } => Some(source),
            _ => None,
        }
    }
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SerialOpen { port, .. } => write!(f, "Cannot open serial port: {}", port),
            Self::NoSerialPort => write!(f, "No serial port configured or detected"),
            Self::UdpBind { port, .. } => write!(f, "Cannot bind UDP port {}", port),
            Self::CanBackend { interface, source } => {
                write!(f, "Cannot use CAN interface {}: {}", interface, source)
            }
            #[cfg(not(target_os = "linux"))]
            Self::BackendNotSupported { backend } => {
                write!(f, "{} backend not supported on this platform", backend)
            }
            Self::ConfigRead { path, .. } => write!(f, "Config IO error: {}", path.display()),
            Self::ConfigValidation { field, reason } => {
                write!(f, "Invalid {}: {}", field, reason)
            }
            Self::Runtime { source } => write!(f, "Failed to create runtime: {}", source),
            Self::TaskFailed { task, reason } => write!(f, "{} task failed: {}", task, reason),
            Self::BridgeFailed => write!(f, "Bridge stopped with an error"),
        }
    }
}

/// Alias for Result with BridgeError
pub type Result<T> = std::result::Result<T, BridgeError>;

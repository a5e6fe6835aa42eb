//! CAN driver collaborator
//!
//! The SLCAN engine talks to the controller only through [`CanDriver`].
//! Every call is a bounded-wait blocking call; implementations must be safe
//! to use from the command path and the forwarding loop at the same time.
//!
//! # Backends
//!
//! - [`VirtualCan`]: in-process bus, always available (tests, bench use)
//! - [`SocketCan`]: Linux SocketCAN interface (`can0`, `vcan0`, ...)

#[cfg(target_os = "linux")]
pub mod socketcan;
pub mod virtual_bus;

#[cfg(target_os = "linux")]
pub use self::socketcan::SocketCan;
pub use virtual_bus::{VirtualCan, VirtualPeer};

use crate::slcan::{CanFrame, CanMode, StatusFlags};
use std::fmt;
use std::time::Duration;

/// Driver entry point that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverOp {
    SetBitrate,
    Open,
    Close,
    Send,
}

impl fmt::Display for DriverOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SetBitrate => write!(f, "set_bitrate"),
            Self::Open => write!(f, "open"),
            Self::Close => write!(f, "close"),
            Self::Send => write!(f, "send"),
        }
    }
}

/// Failure reported by a CAN driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverError {
    pub op: DriverOp,
    pub reason: String,
}

impl DriverError {
    pub fn new(op: DriverOp, reason: impl Into<String>) -> Self {
        Self {
            op,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.op, self.reason)
    }
}

impl std::error::Error for DriverError {}

bitflags::bitflags! {
    /// Controller alert conditions latched by the driver
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Alerts: u32 {
        const TX_IDLE = 1 << 0;
        const TX_SUCCESS = 1 << 1;
        const RX_DATA = 1 << 2;
        const BELOW_ERR_WARN = 1 << 3;
        const ERR_ACTIVE = 1 << 4;
        const RECOVERY_IN_PROGRESS = 1 << 5;
        const BUS_RECOVERED = 1 << 6;
        const ARB_LOST = 1 << 7;
        const ABOVE_ERR_WARN = 1 << 8;
        const BUS_ERROR = 1 << 9;
        const TX_FAILED = 1 << 10;
        const RX_QUEUE_FULL = 1 << 11;
        const ERR_PASS = 1 << 12;
        const BUS_OFF = 1 << 13;
        const RX_FIFO_OVERRUN = 1 << 14;
    }
}

impl From<Alerts> for StatusFlags {
    fn from(alerts: Alerts) -> Self {
        let mut flags = StatusFlags::empty();
        flags.set(
            StatusFlags::RX_QUEUE_FULL,
            alerts.contains(Alerts::RX_QUEUE_FULL),
        );
        flags.set(StatusFlags::TX_FAILED, alerts.contains(Alerts::TX_FAILED));
        flags.set(
            StatusFlags::ERROR_WARNING,
            alerts.intersects(Alerts::ABOVE_ERR_WARN | Alerts::BELOW_ERR_WARN),
        );
        flags.set(
            StatusFlags::RX_OVERRUN,
            alerts.contains(Alerts::RX_FIFO_OVERRUN),
        );
        flags.set(StatusFlags::ERROR_PASSIVE, alerts.contains(Alerts::ERR_PASS));
        flags.set(
            StatusFlags::ARBITRATION_LOST,
            alerts.contains(Alerts::ARB_LOST),
        );
        flags.set(StatusFlags::BUS_ERROR, alerts.contains(Alerts::BUS_ERROR));
        flags
    }
}

/// CAN controller driver
///
/// `open` installs and starts the controller with the last accepted bitrate
/// and enables alert reporting; `close` stops and uninstalls it.
pub trait CanDriver: Send + Sync + 'static {
    /// Select the bus speed used by the next `open`
    fn set_bitrate(&self, bps: u32) -> Result<(), DriverError>;

    /// Install and start the controller
    fn open(&self, mode: CanMode) -> Result<(), DriverError>;

    /// Stop and uninstall the controller
    fn close(&self) -> Result<(), DriverError>;

    /// Queue one frame for transmission, waiting at most `timeout`
    fn send(&self, frame: &CanFrame, timeout: Duration) -> Result<(), DriverError>;

    /// Next received frame, or `None` after `timeout`
    fn receive(&self, timeout: Duration) -> Option<CanFrame>;

    /// Alerts raised since the last call, or `None` if none within `timeout`
    fn read_alerts(&self, timeout: Duration) -> Option<Alerts>;

    /// Receive and transmit error counters
    fn error_counters(&self) -> (u32, u32);
}

impl<D: CanDriver + ?Sized> CanDriver for Box<D> {
    fn set_bitrate(&self, bps: u32) -> Result<(), DriverError> {
        (**self).set_bitrate(bps)
    }

    fn open(&self, mode: CanMode) -> Result<(), DriverError> {
        (**self).open(mode)
    }

    fn close(&self) -> Result<(), DriverError> {
        (**self).close()
    }

    fn send(&self, frame: &CanFrame, timeout: Duration) -> Result<(), DriverError> {
        (**self).send(frame, timeout)
    }

    fn receive(&self, timeout: Duration) -> Option<CanFrame> {
        (**self).receive(timeout)
    }

    fn read_alerts(&self, timeout: Duration) -> Option<Alerts> {
        (**self).read_alerts(timeout)
    }

    fn error_counters(&self) -> (u32, u32) {
        (**self).error_counters()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alerts_to_status_flags() {
        let flags = StatusFlags::from(Alerts::RX_QUEUE_FULL | Alerts::BUS_ERROR);
        assert_eq!(flags.bits(), 0x81);

        let flags = StatusFlags::from(Alerts::BELOW_ERR_WARN);
        assert_eq!(flags, StatusFlags::ERROR_WARNING);

        let flags = StatusFlags::from(Alerts::ERR_PASS | Alerts::ARB_LOST | Alerts::TX_FAILED);
        assert_eq!(flags.bits(), 0x20 | 0x40 | 0x02);
    }

    #[test]
    fn test_unmapped_alerts_are_ignored() {
        let flags = StatusFlags::from(Alerts::TX_SUCCESS | Alerts::RX_DATA | Alerts::BUS_OFF);
        assert!(flags.is_empty());
    }

    #[test]
    fn test_driver_error_display() {
        let err = DriverError::new(DriverOp::Send, "tx queue full");
        assert_eq!(err.to_string(), "send failed: tx queue full");
    }
}

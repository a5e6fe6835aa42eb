//! Command dispatcher
//!
//! Executes one command line and writes exactly one reply: optional payload
//! followed by CR (ACK) or BELL (NACK). A failed command never leaves a
//! partial payload in the reply.
//!
//! | Command       | Action                                  |
//! |---------------|-----------------------------------------|
//! | `t T r R`     | transmit frame                          |
//! | `S0`..`S8`    | select bitrate                          |
//! | `O` `l` `L`   | open normal / loopback / listen-only    |
//! | `C`           | close                                   |
//! | `V` `v`       | hardware / firmware version             |
//! | `F`           | status flags (`Fxx`)                    |
//! | `N`           | serial number                           |
//! | `Z0` `Z1`     | timestamp suffix off / on               |
//! | empty         | no-op                                   |

use super::ascii::ascii_to_frame;
use super::bitrate::Bitrate;
use super::channel::Channel;
use super::error::SlcanError;
use super::frame::CanMode;
use super::indicator::{IndicatorEvent, StatusIndicator};
use crate::can::CanDriver;
use crate::constants::{BELL, CR};
use bytes::{BufMut, BytesMut};
use std::fmt::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Identification strings reported by `V`, `v` and `N`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub hardware_version: String,
    pub firmware_version: String,
    pub serial_number: String,
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self {
            hardware_version: std::env::consts::ARCH.to_string(),
            firmware_version: env!("CARGO_PKG_VERSION").to_string(),
            serial_number: "0000".to_string(),
        }
    }
}

/// SLCAN command dispatcher, shared by all transport sessions
pub struct Dispatcher<D: CanDriver> {
    channel: Arc<Channel<D>>,
    indicator: Arc<dyn StatusIndicator>,
    device: DeviceInfo,
    timestamps: Arc<AtomicBool>,
}

impl<D: CanDriver> Dispatcher<D> {
    pub fn new(
        channel: Arc<Channel<D>>,
        indicator: Arc<dyn StatusIndicator>,
        device: DeviceInfo,
    ) -> Self {
        Self {
            channel,
            indicator,
            device,
            timestamps: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn channel(&self) -> &Arc<Channel<D>> {
        &self.channel
    }

    /// Flag toggled by `Z`, read by the forwarding loop
    pub fn timestamp_flag(&self) -> Arc<AtomicBool> {
        self.timestamps.clone()
    }

    /// Execute one line (terminator stripped) and append the reply to `out`
    pub fn dispatch(&self, line: &[u8], out: &mut BytesMut) -> Result<(), SlcanError> {
        debug!(command = %line.escape_ascii(), "SLCAN command");

        let start = out.len();
        match self.execute(line, out) {
            Ok(event) => {
                out.put_u8(CR);
                if let Some(event) = event {
                    self.indicator.signal(event);
                }
                Ok(())
            }
            Err(e) => {
                out.truncate(start);
                self.nack(&e, out);
                Err(e)
            }
        }
    }

    /// Reply to a line the framer had to discard
    pub fn overflow(&self, out: &mut BytesMut) -> SlcanError {
        let e = SlcanError::FramingOverflow;
        self.nack(&e, out);
        e
    }

    fn nack(&self, e: &SlcanError, out: &mut BytesMut) {
        warn!(error = %e, "SLCAN command rejected");
        out.put_u8(BELL);
        self.indicator.signal(e.indicator());
    }

    fn execute(
        &self,
        line: &[u8],
        out: &mut BytesMut,
    ) -> Result<Option<IndicatorEvent>, SlcanError> {
        let Some(&command) = line.first() else {
            return Ok(None);
        };

        match command {
            b't' | b'T' | b'r' | b'R' => {
                let frame = ascii_to_frame(line)?;
                self.channel.send(&frame)?;
                Ok(None)
            }
            b'S' => {
                let &selector = line.get(1).ok_or(SlcanError::MalformedCommand {
                    reason: "bitrate selector missing",
                })?;
                let bitrate = Bitrate::lookup(selector).ok_or(SlcanError::UnsupportedBitrate {
                    selector,
                    source: None,
                })?;
                self.channel.set_bitrate(bitrate)?;
                Ok(Some(IndicatorEvent::Waiting))
            }
            b'O' => self.open(CanMode::Normal),
            b'l' => self.open(CanMode::Loopback),
            b'L' => self.open(CanMode::Silent),
            b'C' => {
                self.channel.close()?;
                Ok(Some(IndicatorEvent::Idle))
            }
            b'V' => {
                out.extend_from_slice(self.device.hardware_version.as_bytes());
                Ok(None)
            }
            b'v' => {
                out.extend_from_slice(self.device.firmware_version.as_bytes());
                Ok(None)
            }
            b'F' => {
                let flags = self.channel.status_flags()?;
                let _ = write!(out, "F{:02X}", flags.bits());
                Ok(None)
            }
            b'N' => {
                out.put_u8(b'N');
                out.extend_from_slice(self.device.serial_number.as_bytes());
                Ok(None)
            }
            b'Z' => {
                let enabled = match line.get(1) {
                    Some(b'0') => false,
                    Some(b'1') => true,
                    _ => {
                        return Err(SlcanError::MalformedCommand {
                            reason: "timestamp switch must be 0 or 1",
                        })
                    }
                };
                self.timestamps.store(enabled, Ordering::Relaxed);
                debug!(enabled, "Timestamp suffix switched");
                Ok(None)
            }
            _ => Err(SlcanError::MalformedCommand {
                reason: "unknown command",
            }),
        }
    }

    fn open(&self, mode: CanMode) -> Result<Option<IndicatorEvent>, SlcanError> {
        self.channel.open(mode)?;
        Ok(Some(IndicatorEvent::Idle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::can::{Alerts, DriverOp, VirtualCan, VirtualPeer};
    use crate::slcan::{CanFrame, ChannelState};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingIndicator {
        events: Mutex<Vec<IndicatorEvent>>,
    }

    impl RecordingIndicator {
        fn take(&self) -> Vec<IndicatorEvent> {
            std::mem::take(&mut *self.events.lock())
        }
    }

    impl StatusIndicator for RecordingIndicator {
        fn signal(&self, event: IndicatorEvent) {
            self.events.lock().push(event);
        }
    }

    struct Harness {
        dispatcher: Dispatcher<VirtualCan>,
        indicator: Arc<RecordingIndicator>,
        peer: VirtualPeer,
    }

    impl Harness {
        fn new() -> Self {
            let (driver, peer) = VirtualCan::new();
            let indicator = Arc::new(RecordingIndicator::default());
            let device = DeviceInfo {
                hardware_version: "hw-test".into(),
                firmware_version: "fw-1.2".into(),
                serial_number: "A1B2".into(),
            };
            let dispatcher =
                Dispatcher::new(Arc::new(Channel::new(driver)), indicator.clone(), device);
            Self {
                dispatcher,
                indicator,
                peer,
            }
        }

        fn opened() -> Self {
            let harness = Self::new();
            assert_eq!(harness.run(b"S6"), b"\r");
            assert_eq!(harness.run(b"O"), b"\r");
            harness.indicator.take();
            harness
        }

        fn run(&self, line: &[u8]) -> Vec<u8> {
            let mut out = BytesMut::new();
            let _ = self.dispatcher.dispatch(line, &mut out);
            out.to_vec()
        }

        fn state(&self) -> ChannelState {
            self.dispatcher.channel().state()
        }
    }

    #[test]
    fn test_send_standard_frame() {
        let h = Harness::opened();
        assert_eq!(h.run(b"t1231AA"), b"\r");
        assert_eq!(
            h.peer.take_sent(),
            vec![CanFrame::new(0x123, false, &[0xAA]).unwrap()]
        );
        assert!(h.indicator.take().is_empty());
    }

    #[test]
    fn test_send_length_over_eight_never_reaches_driver() {
        let h = Harness::opened();
        assert_eq!(h.run(b"t123F"), b"\x07");
        assert!(h.peer.take_sent().is_empty());
        assert_eq!(h.indicator.take(), vec![IndicatorEvent::Error]);
    }

    #[test]
    fn test_send_while_closed() {
        let h = Harness::new();
        assert_eq!(h.run(b"t1231AA"), b"\x07");
        assert_eq!(h.indicator.take(), vec![IndicatorEvent::Error]);
    }

    #[test]
    fn test_send_driver_failure() {
        let h = Harness::opened();
        h.peer.fail_next(DriverOp::Send);
        assert_eq!(h.run(b"T000001232BEEF"), b"\x07");
        assert_eq!(h.indicator.take(), vec![IndicatorEvent::Error]);
        assert_eq!(h.state(), ChannelState::Open);
    }

    #[test]
    fn test_set_bitrate() {
        let h = Harness::new();
        assert_eq!(h.run(b"S6"), b"\r");
        assert_eq!(h.peer.bitrate(), Some(Bitrate::Kbit500));
        assert_eq!(h.indicator.take(), vec![IndicatorEvent::Waiting]);
    }

    #[test]
    fn test_set_bitrate_out_of_range() {
        let h = Harness::new();
        assert_eq!(h.run(b"S9"), b"\x07");
        assert_eq!(h.run(b"S"), b"\x07");
        assert_eq!(h.peer.bitrate(), None);
        assert_eq!(
            h.indicator.take(),
            vec![IndicatorEvent::Error, IndicatorEvent::Error]
        );
    }

    #[test]
    fn test_open_modes() {
        for (command, mode) in [
            (b"O", CanMode::Normal),
            (b"l", CanMode::Loopback),
            (b"L", CanMode::Silent),
        ] {
            let h = Harness::new();
            h.run(b"S4");
            h.indicator.take();
            assert_eq!(h.run(command), b"\r");
            assert_eq!(h.peer.mode(), Some(mode));
            assert_eq!(h.indicator.take(), vec![IndicatorEvent::Idle]);
        }
    }

    #[test]
    fn test_open_without_bitrate() {
        let h = Harness::new();
        assert_eq!(h.run(b"O"), b"\x07");
        assert_eq!(h.state(), ChannelState::Closed);
        assert_eq!(h.indicator.take(), vec![IndicatorEvent::Error]);
    }

    #[test]
    fn test_open_already_open() {
        let h = Harness::opened();
        assert_eq!(h.run(b"O"), b"\x07");
        assert_eq!(h.state(), ChannelState::Open);
        assert_eq!(h.indicator.take(), vec![IndicatorEvent::Error]);
    }

    #[test]
    fn test_close() {
        let h = Harness::opened();
        assert_eq!(h.run(b"C"), b"\r");
        assert_eq!(h.state(), ChannelState::Closed);
        assert_eq!(h.indicator.take(), vec![IndicatorEvent::Idle]);
    }

    #[test]
    fn test_close_while_closed_signals_waiting() {
        let h = Harness::new();
        assert_eq!(h.run(b"C"), b"\x07");
        assert_eq!(h.indicator.take(), vec![IndicatorEvent::Waiting]);
    }

    #[test]
    fn test_close_teardown_failure_signals_waiting() {
        let h = Harness::opened();
        h.peer.fail_next(DriverOp::Close);
        assert_eq!(h.run(b"C"), b"\x07");
        assert_eq!(h.state(), ChannelState::Closing);
        assert_eq!(h.indicator.take(), vec![IndicatorEvent::Waiting]);

        assert_eq!(h.run(b"C"), b"\r");
        assert_eq!(h.state(), ChannelState::Closed);
    }

    #[test]
    fn test_versions_and_serial() {
        let h = Harness::new();
        assert_eq!(h.run(b"V"), b"hw-test\r");
        assert_eq!(h.run(b"v"), b"fw-1.2\r");
        assert_eq!(h.run(b"N"), b"NA1B2\r");
    }

    #[test]
    fn test_status_flags() {
        let h = Harness::opened();
        assert_eq!(h.run(b"F"), b"F00\r");
        h.peer.raise_alerts(Alerts::BUS_ERROR | Alerts::ABOVE_ERR_WARN);
        assert_eq!(h.run(b"F"), b"F84\r");
    }

    #[test]
    fn test_status_flags_while_closed() {
        let h = Harness::new();
        assert_eq!(h.run(b"F"), b"\x07");
        assert_eq!(h.indicator.take(), vec![IndicatorEvent::Error]);
    }

    #[test]
    fn test_timestamp_switch() {
        let h = Harness::new();
        let flag = h.dispatcher.timestamp_flag();
        assert_eq!(h.run(b"Z1"), b"\r");
        assert!(flag.load(Ordering::Relaxed));
        assert_eq!(h.run(b"Z0"), b"\r");
        assert!(!flag.load(Ordering::Relaxed));
    }

    #[test]
    fn test_bare_z_is_rejected() {
        let h = Harness::new();
        assert_eq!(h.run(b"Z"), b"\x07");
        assert_eq!(h.indicator.take(), vec![IndicatorEvent::Error]);
    }

    #[test]
    fn test_unknown_command() {
        let h = Harness::new();
        assert_eq!(h.run(b"X"), b"\x07");
        assert_eq!(h.indicator.take(), vec![IndicatorEvent::Error]);
    }

    #[test]
    fn test_empty_line() {
        let h = Harness::new();
        assert_eq!(h.run(b""), b"\r");
        assert!(h.indicator.take().is_empty());
    }

    #[test]
    fn test_reply_appends_to_existing_buffer() {
        let h = Harness::new();
        let mut out = BytesMut::from(&b"\r"[..]);
        h.dispatcher.dispatch(b"V", &mut out).unwrap();
        assert_eq!(&out[..], b"\rhw-test\r");
    }

    #[test]
    fn test_overflow_reply() {
        let h = Harness::new();
        let mut out = BytesMut::new();
        assert_eq!(h.dispatcher.overflow(&mut out), SlcanError::FramingOverflow);
        assert_eq!(&out[..], b"\x07");
        assert_eq!(h.indicator.take(), vec![IndicatorEvent::Error]);
    }
}

//! Channel state machine
//!
//! `Closed → Open → Closing → Closed`
//!
//! The channel is shared by the inbound command path and the forwarding
//! loop. Lifecycle transitions (`set_bitrate`, `open`, `close`) are
//! serialized by one mutex, so there is a single writer of the state token.
//! Bus operations (`send`, `receive`, `status_flags`) hold the bus lock
//! shared and re-check the token under it; `close` publishes `Closing`
//! first and then takes the bus lock exclusively, so the driver is never
//! torn down under an in-flight receive.

use super::bitrate::Bitrate;
use super::error::SlcanError;
use super::frame::{CanFrame, CanMode, StatusFlags};
use crate::can::CanDriver;
use crate::constants::{CAN_ALERT_TIMEOUT, CAN_SEND_TIMEOUT, CLOSE_SETTLE_DELAY};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Lifecycle state of the logical CAN channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChannelState {
    Closed = 0,
    Closing = 1,
    Open = 2,
}

impl ChannelState {
    fn from_u8(value: u8) -> Self {
        match value {
            2 => Self::Open,
            1 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Closing => write!(f, "closing"),
            Self::Open => write!(f, "open"),
        }
    }
}

/// Channel operation, used to report illegal transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelOp {
    Open,
    Close,
    Send,
    Status,
}

impl fmt::Display for ChannelOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Close => write!(f, "close"),
            Self::Send => write!(f, "send"),
            Self::Status => write!(f, "query status"),
        }
    }
}

#[derive(Default)]
struct Lifecycle {
    bitrate: Option<Bitrate>,
}

/// The single logical CAN channel
pub struct Channel<D: CanDriver> {
    driver: D,
    state: AtomicU8,
    lifecycle: Mutex<Lifecycle>,
    bus: RwLock<()>,
}

impl<D: CanDriver> Channel<D> {
    pub fn new(driver: D) -> Self {
        Self {
            driver,
            state: AtomicU8::new(ChannelState::Closed as u8),
            lifecycle: Mutex::new(Lifecycle::default()),
            bus: RwLock::new(()),
        }
    }

    pub fn state(&self) -> ChannelState {
        ChannelState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Running sub-state: frames may be sent and received
    pub fn is_running(&self) -> bool {
        self.state() == ChannelState::Open
    }

    /// Bitrate that the next `open` will use
    pub fn bitrate(&self) -> Option<Bitrate> {
        self.lifecycle.lock().bitrate
    }

    fn publish(&self, state: ChannelState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Select the bus speed; valid in any state, applied on the next `open`
    pub fn set_bitrate(&self, bitrate: Bitrate) -> Result<(), SlcanError> {
        let mut lifecycle = self.lifecycle.lock();
        self.driver
            .set_bitrate(bitrate.bps())
            .map_err(|e| SlcanError::UnsupportedBitrate {
                selector: bitrate.selector(),
                source: Some(e),
            })?;
        lifecycle.bitrate = Some(bitrate);
        debug!(%bitrate, "Bitrate configured");
        Ok(())
    }

    /// Start the controller; only from `Closed` with a configured bitrate
    pub fn open(&self, mode: CanMode) -> Result<(), SlcanError> {
        let lifecycle = self.lifecycle.lock();
        let state = self.state();
        if state != ChannelState::Closed {
            return Err(SlcanError::IllegalStateTransition {
                op: ChannelOp::Open,
                state,
            });
        }
        let bitrate = lifecycle.bitrate.ok_or(SlcanError::BitrateNotConfigured)?;

        self.driver.open(mode).map_err(SlcanError::DriverFailure)?;
        self.publish(ChannelState::Open);
        info!(%mode, %bitrate, "CAN channel opened");
        Ok(())
    }

    /// Stop the controller
    ///
    /// Allowed from `Open` and from a `Closing` left by a failed teardown,
    /// which makes a repeated `close` the recovery path. On driver failure
    /// the state stays `Closing`.
    pub fn close(&self) -> Result<(), SlcanError> {
        let _lifecycle = self.lifecycle.lock();
        let state = self.state();
        if state == ChannelState::Closed {
            return Err(SlcanError::IllegalStateTransition {
                op: ChannelOp::Close,
                state,
            });
        }

        self.publish(ChannelState::Closing);
        std::thread::sleep(CLOSE_SETTLE_DELAY);

        let _bus = self.bus.write();
        if let Err(e) = self.driver.close() {
            warn!(error = %e, "CAN teardown failed, channel left closing");
            return Err(SlcanError::DriverFailure(e));
        }
        self.publish(ChannelState::Closed);
        info!("CAN channel closed");
        Ok(())
    }

    /// Transmit one frame while running
    pub fn send(&self, frame: &CanFrame) -> Result<(), SlcanError> {
        let _bus = self.bus.read();
        let state = self.state();
        if state != ChannelState::Open {
            return Err(SlcanError::IllegalStateTransition {
                op: ChannelOp::Send,
                state,
            });
        }
        self.driver
            .send(frame, CAN_SEND_TIMEOUT)
            .map_err(SlcanError::DriverFailure)
    }

    /// Receive one frame; `None` on timeout or when not running
    pub fn receive(&self, timeout: Duration) -> Option<CanFrame> {
        let _bus = self.bus.read();
        if !self.is_running() {
            return None;
        }
        self.driver.receive(timeout)
    }

    /// Fresh status snapshot; no alerts within the poll window means no flags
    pub fn status_flags(&self) -> Result<StatusFlags, SlcanError> {
        let _bus = self.bus.read();
        let state = self.state();
        if state != ChannelState::Open {
            return Err(SlcanError::IllegalStateTransition {
                op: ChannelOp::Status,
                state,
            });
        }

        let (rx_errors, tx_errors) = self.driver.error_counters();
        debug!(rx_errors, tx_errors, "CAN error counters");

        Ok(self
            .driver
            .read_alerts(CAN_ALERT_TIMEOUT)
            .map(StatusFlags::from)
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::can::{Alerts, DriverError, DriverOp, VirtualCan, VirtualPeer};
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use std::thread;

    fn channel() -> (Channel<VirtualCan>, VirtualPeer) {
        let (driver, peer) = VirtualCan::new();
        (Channel::new(driver), peer)
    }

    fn open_channel() -> (Channel<VirtualCan>, VirtualPeer) {
        let (channel, peer) = channel();
        channel.set_bitrate(Bitrate::Kbit500).unwrap();
        channel.open(CanMode::Normal).unwrap();
        (channel, peer)
    }

    #[test]
    fn test_initial_state() {
        let (channel, _peer) = channel();
        assert_eq!(channel.state(), ChannelState::Closed);
        assert!(!channel.is_running());
        assert_eq!(channel.bitrate(), None);
    }

    #[test]
    fn test_open_requires_bitrate() {
        let (channel, peer) = channel();
        assert_eq!(
            channel.open(CanMode::Normal),
            Err(SlcanError::BitrateNotConfigured)
        );
        assert_eq!(channel.state(), ChannelState::Closed);
        assert_eq!(peer.mode(), None);
    }

    #[test]
    fn test_open_close_open() {
        let (channel, peer) = open_channel();
        assert_eq!(channel.state(), ChannelState::Open);
        assert_eq!(peer.mode(), Some(CanMode::Normal));

        channel.close().unwrap();
        assert_eq!(channel.state(), ChannelState::Closed);
        assert_eq!(peer.mode(), None);

        channel.open(CanMode::Loopback).unwrap();
        assert_eq!(peer.mode(), Some(CanMode::Loopback));
    }

    #[test]
    fn test_open_while_open_keeps_driver_state() {
        let (channel, peer) = open_channel();
        assert_eq!(
            channel.open(CanMode::Silent),
            Err(SlcanError::IllegalStateTransition {
                op: ChannelOp::Open,
                state: ChannelState::Open,
            })
        );
        assert_eq!(channel.state(), ChannelState::Open);
        assert_eq!(peer.mode(), Some(CanMode::Normal));
    }

    #[test]
    fn test_close_while_closed_fails() {
        let (channel, _peer) = channel();
        assert_eq!(
            channel.close(),
            Err(SlcanError::IllegalStateTransition {
                op: ChannelOp::Close,
                state: ChannelState::Closed,
            })
        );
    }

    #[test]
    fn test_open_driver_failure_stays_closed() {
        let (channel, peer) = channel();
        channel.set_bitrate(Bitrate::Kbit125).unwrap();
        peer.fail_next(DriverOp::Open);
        assert!(matches!(
            channel.open(CanMode::Normal),
            Err(SlcanError::DriverFailure(_))
        ));
        assert_eq!(channel.state(), ChannelState::Closed);
    }

    #[test]
    fn test_failed_teardown_leaves_closing_and_close_retries() {
        let (channel, peer) = open_channel();
        peer.fail_next(DriverOp::Close);
        assert!(matches!(
            channel.close(),
            Err(SlcanError::DriverFailure(DriverError { op: DriverOp::Close, .. }))
        ));
        assert_eq!(channel.state(), ChannelState::Closing);

        assert!(matches!(
            channel.open(CanMode::Normal),
            Err(SlcanError::IllegalStateTransition {
                op: ChannelOp::Open,
                state: ChannelState::Closing,
            })
        ));

        channel.close().unwrap();
        assert_eq!(channel.state(), ChannelState::Closed);
        channel.open(CanMode::Normal).unwrap();
    }

    #[test]
    fn test_set_bitrate_rejected_by_driver() {
        let (channel, peer) = channel();
        channel.set_bitrate(Bitrate::Kbit250).unwrap();
        peer.fail_next(DriverOp::SetBitrate);
        let err = channel.set_bitrate(Bitrate::Mbit1).unwrap_err();
        assert!(matches!(
            err,
            SlcanError::UnsupportedBitrate {
                selector: b'8',
                source: Some(_),
            }
        ));
        assert_eq!(channel.bitrate(), Some(Bitrate::Kbit250));
    }

    #[test]
    fn test_set_bitrate_while_open_applies_on_next_open() {
        let (channel, peer) = open_channel();
        channel.set_bitrate(Bitrate::Kbit125).unwrap();
        assert_eq!(channel.state(), ChannelState::Open);
        assert_eq!(peer.bitrate(), Some(Bitrate::Kbit125));
    }

    #[test]
    fn test_send_requires_open() {
        let (channel, peer) = channel();
        let frame = CanFrame::new(0x10, false, &[1]).unwrap();
        assert!(matches!(
            channel.send(&frame),
            Err(SlcanError::IllegalStateTransition {
                op: ChannelOp::Send,
                ..
            })
        ));
        assert!(peer.take_sent().is_empty());
    }

    #[test]
    fn test_send_and_receive() {
        let (channel, peer) = open_channel();
        let frame = CanFrame::new(0x10, false, &[1]).unwrap();
        channel.send(&frame).unwrap();
        assert_eq!(peer.take_sent(), vec![frame]);

        peer.inject(frame);
        let received = channel.receive(Duration::from_millis(10)).unwrap();
        assert_eq!(received.id(), 0x10);
    }

    #[test]
    fn test_receive_when_closed_skips_driver() {
        let (channel, peer) = channel();
        assert!(channel.receive(Duration::from_millis(10)).is_none());
        assert_eq!(peer.receive_while_closed(), 0);
    }

    #[test]
    fn test_status_flags() {
        let (channel, peer) = open_channel();
        assert_eq!(channel.status_flags(), Ok(StatusFlags::empty()));

        peer.raise_alerts(Alerts::ERR_PASS | Alerts::RX_QUEUE_FULL);
        assert_eq!(channel.status_flags().unwrap().bits(), 0x21);
    }

    #[test]
    fn test_status_flags_requires_open() {
        let (channel, _peer) = channel();
        assert!(matches!(
            channel.status_flags(),
            Err(SlcanError::IllegalStateTransition {
                op: ChannelOp::Status,
                state: ChannelState::Closed,
            })
        ));
    }

    #[test]
    fn test_close_never_races_receive() {
        let (channel, peer) = channel();
        let channel = Arc::new(channel);
        channel.set_bitrate(Bitrate::Kbit500).unwrap();

        let stop = Arc::new(AtomicBool::new(false));
        let poller = {
            let channel = channel.clone();
            let stop = stop.clone();
            thread::spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    if channel.receive(Duration::from_millis(5)).is_none() {
                        thread::yield_now();
                    }
                }
            })
        };

        for _ in 0..5 {
            channel.open(CanMode::Normal).unwrap();
            thread::sleep(Duration::from_millis(20));
            channel.close().unwrap();
        }

        stop.store(true, Ordering::Relaxed);
        poller.join().unwrap();
        assert_eq!(peer.receive_while_closed(), 0);
    }
}

//! In-process virtual CAN bus
//!
//! [`VirtualCan`] implements [`CanDriver`] on top of a shared in-memory bus.
//! The paired [`VirtualPeer`] plays the other nodes: it injects frames that
//! the driver will receive, collects the frames the driver transmitted,
//! raises alerts and can make the next driver call fail.
//!
//! Loopback mode echoes transmitted frames back into the receive queue;
//! silent mode refuses to transmit.

use super::{Alerts, CanDriver, DriverError, DriverOp};
use crate::constants::VIRTUAL_RX_QUEUE_LEN;
use crate::slcan::{Bitrate, CanFrame, CanMode, BITRATE_TABLE};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Default)]
struct BusState {
    bitrate: Option<Bitrate>,
    mode: Option<CanMode>,
    rx: VecDeque<CanFrame>,
    sent: Vec<CanFrame>,
    alerts: Alerts,
    rx_errors: u32,
    tx_errors: u32,
    fail_next: Option<DriverOp>,
    receive_while_closed: usize,
}

impl BusState {
    fn take_failure(&mut self, op: DriverOp) -> Result<(), DriverError> {
        if self.fail_next == Some(op) {
            self.fail_next = None;
            return Err(DriverError::new(op, "injected failure"));
        }
        Ok(())
    }
}

struct Shared {
    state: Mutex<BusState>,
    rx_ready: Condvar,
    alert_ready: Condvar,
    epoch: Instant,
}

impl Shared {
    /// Milliseconds within the current minute, the usual SLCAN timestamp
    fn timestamp(&self) -> u16 {
        (self.epoch.elapsed().as_millis() % 60_000) as u16
    }

    fn enqueue(&self, state: &mut BusState, frame: CanFrame) -> bool {
        if state.rx.len() >= VIRTUAL_RX_QUEUE_LEN {
            state.alerts |= Alerts::RX_QUEUE_FULL;
            self.alert_ready.notify_all();
            return false;
        }
        state.rx.push_back(frame.with_timestamp(self.timestamp()));
        state.alerts |= Alerts::RX_DATA;
        self.rx_ready.notify_one();
        true
    }
}

/// Driver side of the virtual bus
pub struct VirtualCan {
    shared: Arc<Shared>,
}

/// Test/bench side of the virtual bus
#[derive(Clone)]
pub struct VirtualPeer {
    shared: Arc<Shared>,
}

impl VirtualCan {
    /// Create a bus, returning the driver and its peer handle
    pub fn new() -> (Self, VirtualPeer) {
        let shared = Arc::new(Shared {
            state: Mutex::new(BusState::default()),
            rx_ready: Condvar::new(),
            alert_ready: Condvar::new(),
            epoch: Instant::now(),
        });
        (
            Self {
                shared: shared.clone(),
            },
            VirtualPeer { shared },
        )
    }
}

impl CanDriver for VirtualCan {
    fn set_bitrate(&self, bps: u32) -> Result<(), DriverError> {
        let mut state = self.shared.state.lock();
        state.take_failure(DriverOp::SetBitrate)?;
        let bitrate = BITRATE_TABLE
            .iter()
            .copied()
            .find(|b| b.bps() == bps)
            .ok_or_else(|| DriverError::new(DriverOp::SetBitrate, format!("{} bps", bps)))?;
        state.bitrate = Some(bitrate);
        Ok(())
    }

    fn open(&self, mode: CanMode) -> Result<(), DriverError> {
        let mut state = self.shared.state.lock();
        state.take_failure(DriverOp::Open)?;
        if state.mode.is_some() {
            return Err(DriverError::new(DriverOp::Open, "already installed"));
        }
        let Some(bitrate) = state.bitrate else {
            return Err(DriverError::new(DriverOp::Open, "no timing configured"));
        };
        state.mode = Some(mode);
        state.alerts = Alerts::empty();
        debug!(%mode, %bitrate, "Virtual bus started");
        Ok(())
    }

    fn close(&self) -> Result<(), DriverError> {
        let mut state = self.shared.state.lock();
        state.take_failure(DriverOp::Close)?;
        if state.mode.take().is_none() {
            return Err(DriverError::new(DriverOp::Close, "not installed"));
        }
        state.rx.clear();
        debug!("Virtual bus stopped");
        Ok(())
    }

    fn send(&self, frame: &CanFrame, _timeout: Duration) -> Result<(), DriverError> {
        let mut state = self.shared.state.lock();
        state.take_failure(DriverOp::Send)?;
        match state.mode {
            None => Err(DriverError::new(DriverOp::Send, "not running")),
            Some(CanMode::Silent) => {
                state.alerts |= Alerts::TX_FAILED;
                Err(DriverError::new(DriverOp::Send, "listen-only mode"))
            }
            Some(mode) => {
                state.sent.push(*frame);
                state.alerts |= Alerts::TX_SUCCESS;
                if mode == CanMode::Loopback {
                    self.shared.enqueue(&mut state, *frame);
                }
                Ok(())
            }
        }
    }

    fn receive(&self, timeout: Duration) -> Option<CanFrame> {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        if state.mode.is_none() {
            state.receive_while_closed += 1;
            return None;
        }
        while state.rx.is_empty() {
            if self
                .shared
                .rx_ready
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                break;
            }
        }
        state.rx.pop_front()
    }

    fn read_alerts(&self, timeout: Duration) -> Option<Alerts> {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        while state.alerts.is_empty() {
            if self
                .shared
                .alert_ready
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                break;
            }
        }
        let alerts = std::mem::take(&mut state.alerts);
        (!alerts.is_empty()).then_some(alerts)
    }

    fn error_counters(&self) -> (u32, u32) {
        let state = self.shared.state.lock();
        (state.rx_errors, state.tx_errors)
    }
}

impl VirtualPeer {
    /// Put a frame on the bus for the driver to receive
    ///
    /// Returns `false` if the controller is not running or its queue is full.
    pub fn inject(&self, frame: CanFrame) -> bool {
        let mut state = self.shared.state.lock();
        if state.mode.is_none() {
            return false;
        }
        self.shared.enqueue(&mut state, frame)
    }

    /// Frames transmitted by the driver since the last call
    pub fn take_sent(&self) -> Vec<CanFrame> {
        std::mem::take(&mut self.shared.state.lock().sent)
    }

    /// Latch alert conditions
    pub fn raise_alerts(&self, alerts: Alerts) {
        self.shared.state.lock().alerts |= alerts;
        self.shared.alert_ready.notify_all();
    }

    pub fn set_error_counters(&self, rx: u32, tx: u32) {
        let mut state = self.shared.state.lock();
        state.rx_errors = rx;
        state.tx_errors = tx;
    }

    /// Make the next call of `op` fail once
    pub fn fail_next(&self, op: DriverOp) {
        self.shared.state.lock().fail_next = Some(op);
    }

    /// Mode the controller is running in, `None` when stopped
    pub fn mode(&self) -> Option<CanMode> {
        self.shared.state.lock().mode
    }

    /// Bitrate accepted by the last `set_bitrate`
    pub fn bitrate(&self) -> Option<Bitrate> {
        self.shared.state.lock().bitrate
    }

    /// Number of `receive` calls made while the controller was stopped
    pub fn receive_while_closed(&self) -> usize {
        self.shared.state.lock().receive_while_closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHORT: Duration = Duration::from_millis(10);

    fn open_bus(mode: CanMode) -> (VirtualCan, VirtualPeer) {
        let (driver, peer) = VirtualCan::new();
        driver.set_bitrate(500_000).unwrap();
        driver.open(mode).unwrap();
        (driver, peer)
    }

    #[test]
    fn test_set_bitrate_rejects_non_standard_speed() {
        let (driver, peer) = VirtualCan::new();
        assert!(driver.set_bitrate(33_333).is_err());
        assert_eq!(peer.bitrate(), None);
        driver.set_bitrate(125_000).unwrap();
        assert_eq!(peer.bitrate(), Some(Bitrate::Kbit125));
    }

    #[test]
    fn test_open_requires_bitrate() {
        let (driver, _peer) = VirtualCan::new();
        let err = driver.open(CanMode::Normal).unwrap_err();
        assert_eq!(err.op, DriverOp::Open);
    }

    #[test]
    fn test_open_twice_fails() {
        let (driver, peer) = open_bus(CanMode::Normal);
        assert!(driver.open(CanMode::Normal).is_err());
        assert_eq!(peer.mode(), Some(CanMode::Normal));
    }

    #[test]
    fn test_close_when_stopped_fails() {
        let (driver, _peer) = VirtualCan::new();
        assert!(driver.close().is_err());
    }

    #[test]
    fn test_send_reaches_peer() {
        let (driver, peer) = open_bus(CanMode::Normal);
        let frame = CanFrame::new(0x123, false, &[1, 2, 3]).unwrap();
        driver.send(&frame, SHORT).unwrap();
        assert_eq!(peer.take_sent(), vec![frame]);
        assert!(driver.receive(SHORT).is_none());
    }

    #[test]
    fn test_loopback_echoes_frames() {
        let (driver, _peer) = open_bus(CanMode::Loopback);
        let frame = CanFrame::new(0x42, false, &[9]).unwrap();
        driver.send(&frame, SHORT).unwrap();
        let echoed = driver.receive(SHORT).expect("looped back");
        assert_eq!(echoed.id(), 0x42);
        assert_eq!(echoed.data(), &[9]);
    }

    #[test]
    fn test_silent_mode_refuses_transmit() {
        let (driver, peer) = open_bus(CanMode::Silent);
        let frame = CanFrame::new(0x1, false, &[]).unwrap();
        assert!(driver.send(&frame, SHORT).is_err());
        assert!(peer.take_sent().is_empty());
        assert!(driver
            .read_alerts(SHORT)
            .unwrap()
            .contains(Alerts::TX_FAILED));
    }

    #[test]
    fn test_inject_and_receive() {
        let (driver, peer) = open_bus(CanMode::Normal);
        let frame = CanFrame::new(0x7FF, false, &[0xAB]).unwrap();
        assert!(peer.inject(frame));
        let received = driver.receive(SHORT).unwrap();
        assert_eq!(received.id(), 0x7FF);
        assert_eq!(received.data(), &[0xAB]);
    }

    #[test]
    fn test_inject_while_stopped_is_dropped() {
        let (_driver, peer) = VirtualCan::new();
        assert!(!peer.inject(CanFrame::new(0x1, false, &[]).unwrap()));
    }

    #[test]
    fn test_receive_while_stopped_is_counted() {
        let (driver, peer) = VirtualCan::new();
        assert!(driver.receive(SHORT).is_none());
        assert_eq!(peer.receive_while_closed(), 1);
    }

    #[test]
    fn test_rx_queue_overflow_raises_alert() {
        let (driver, peer) = open_bus(CanMode::Normal);
        let frame = CanFrame::new(0x1, false, &[]).unwrap();
        for _ in 0..VIRTUAL_RX_QUEUE_LEN {
            assert!(peer.inject(frame));
        }
        assert!(!peer.inject(frame));
        let alerts = driver.read_alerts(SHORT).unwrap();
        assert!(alerts.contains(Alerts::RX_QUEUE_FULL));
    }

    #[test]
    fn test_read_alerts_clears_latch() {
        let (driver, peer) = open_bus(CanMode::Normal);
        peer.raise_alerts(Alerts::BUS_ERROR);
        assert_eq!(driver.read_alerts(SHORT), Some(Alerts::BUS_ERROR));
        assert_eq!(driver.read_alerts(SHORT), None);
    }

    #[test]
    fn test_fail_next_is_one_shot() {
        let (driver, peer) = VirtualCan::new();
        peer.fail_next(DriverOp::SetBitrate);
        assert!(driver.set_bitrate(500_000).is_err());
        assert!(driver.set_bitrate(500_000).is_ok());
    }

    #[test]
    fn test_error_counters() {
        let (driver, peer) = VirtualCan::new();
        peer.set_error_counters(3, 128);
        assert_eq!(driver.error_counters(), (3, 128));
    }
}

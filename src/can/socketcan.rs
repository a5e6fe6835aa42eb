//! Linux SocketCAN backend
//!
//! Opens a raw CAN socket on an existing interface. The link itself
//! (bitrate, up/down) is normally managed by the system:
//!
//!   sudo ip link set can0 up type can bitrate 500000
//!
//! With `configure_link` set, `open` runs those `ip link` commands itself
//! using the last accepted bitrate and the requested mode, and `close` takes
//! the link down again. Listen-only and loopback are controller settings, so
//! without `configure_link` only normal mode can be opened.
//! Error frames are received and latched as alerts.

use super::{Alerts, CanDriver, DriverError, DriverOp};
use crate::slcan::{CanFrame, CanMode, BITRATE_TABLE};
use parking_lot::{Condvar, Mutex};
use ::socketcan::errors::ControllerProblem;
use ::socketcan::{
    CanError, CanFrame as SocketFrame, CanSocket, EmbeddedFrame, ExtendedId, Id, Socket,
    SocketOptions, StandardId,
};
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Error frame carries tx/rx error counters in data[6] and data[7]
const CAN_ERR_CNT: u32 = 0x0000_0200;

const IP_PROGRAM: &str = "ip";

struct Link {
    socket: CanSocket,
    mode: CanMode,
}

pub struct SocketCan {
    interface: String,
    configure_link: bool,
    ip_program: String,
    bitrate: Mutex<Option<u32>>,
    link: Mutex<Option<Arc<Link>>>,
    /// Socket released but the interface was not taken down yet
    teardown_pending: AtomicBool,
    alerts: Mutex<Alerts>,
    alert_ready: Condvar,
    /// (rx, tx) as last reported by an error frame
    counters: Mutex<(u32, u32)>,
    epoch: Instant,
}

impl SocketCan {
    pub fn new(interface: impl Into<String>, configure_link: bool) -> Self {
        Self {
            interface: interface.into(),
            configure_link,
            ip_program: IP_PROGRAM.to_string(),
            bitrate: Mutex::new(None),
            link: Mutex::new(None),
            teardown_pending: AtomicBool::new(false),
            alerts: Mutex::new(Alerts::empty()),
            alert_ready: Condvar::new(),
            counters: Mutex::new((0, 0)),
            epoch: Instant::now(),
        }
    }

    /// Check that the interface exists by opening a throwaway socket
    pub fn probe(&self) -> std::io::Result<()> {
        CanSocket::open(&self.interface).map(drop)
    }

    fn raise(&self, alerts: Alerts) {
        *self.alerts.lock() |= alerts;
        self.alert_ready.notify_all();
    }

    fn timestamp(&self) -> u16 {
        (self.epoch.elapsed().as_millis() % 60_000) as u16
    }

    /// Apply bitrate and mode to the link and bring it up
    fn link_up(&self, bps: u32, mode: CanMode) -> Result<(), DriverError> {
        self.link_down(DriverOp::Open)?;
        let args = link_args(&self.interface, bps, mode);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        self.ip_link(DriverOp::Open, &args)?;
        self.ip_link(DriverOp::Open, &["set", self.interface.as_str(), "up"])?;
        info!(interface = %self.interface, bps, ?mode, "CAN link configured");
        Ok(())
    }

    /// Take the interface down, remembering a failure so `close` can retry
    fn link_down(&self, op: DriverOp) -> Result<(), DriverError> {
        self.teardown_pending.store(true, Ordering::SeqCst);
        self.ip_link(op, &["set", self.interface.as_str(), "down"])?;
        self.teardown_pending.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn open_socket(&self, mode: CanMode) -> Result<CanSocket, DriverError> {
        let socket = CanSocket::open(&self.interface)
            .map_err(|e| DriverError::new(DriverOp::Open, format!("{}: {}", self.interface, e)))?;
        socket
            .set_error_filter_accept_all()
            .map_err(|e| DriverError::new(DriverOp::Open, format!("error filter: {}", e)))?;

        let loopback = mode == CanMode::Loopback;
        socket
            .set_loopback(loopback)
            .and_then(|_| socket.set_recv_own_msgs(loopback))
            .map_err(|e| DriverError::new(DriverOp::Open, format!("loopback: {}", e)))?;
        Ok(socket)
    }

    fn ip_link(&self, op: DriverOp, args: &[&str]) -> Result<(), DriverError> {
        debug!("{} link {}", self.ip_program, args.join(" "));
        let output = Command::new(&self.ip_program)
            .arg("link")
            .args(args)
            .output()
            .map_err(|e| {
                DriverError::new(op, format!("failed to run {}: {}", self.ip_program, e))
            })?;

        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        let detail = if stderr.trim().is_empty() {
            format!("exit code {:?}", output.status.code())
        } else {
            stderr.trim().to_string()
        };
        Err(DriverError::new(op, format!("ip link: {}", detail)))
    }

    /// Translate one socket frame, latching alerts for error frames
    fn convert(&self, frame: SocketFrame) -> Option<CanFrame> {
        let (id, extended) = match frame.id() {
            Id::Standard(id) => (u32::from(id.as_raw()), false),
            Id::Extended(id) => (id.as_raw(), true),
        };

        match frame {
            SocketFrame::Data(f) => CanFrame::new(id, extended, f.data()),
            SocketFrame::Remote(f) => CanFrame::new_remote(id, extended, f.dlc() as u8),
            SocketFrame::Error(f) => {
                if f.error_bits() & CAN_ERR_CNT != 0 {
                    if let [.., tx, rx] = *f.data() {
                        *self.counters.lock() = (u32::from(rx), u32::from(tx));
                    }
                }
                let alerts = alerts_for(&f.into_error());
                debug!(?alerts, "CAN error frame");
                self.raise(alerts);
                None
            }
        }
        .map(|f| f.with_timestamp(self.timestamp()))
    }
}

impl CanDriver for SocketCan {
    fn set_bitrate(&self, bps: u32) -> Result<(), DriverError> {
        if !BITRATE_TABLE.iter().any(|b| b.bps() == bps) {
            return Err(DriverError::new(
                DriverOp::SetBitrate,
                format!("{} bit/s not supported", bps),
            ));
        }
        *self.bitrate.lock() = Some(bps);
        Ok(())
    }

    fn open(&self, mode: CanMode) -> Result<(), DriverError> {
        let mut link = self.link.lock();
        if link.is_some() {
            return Err(DriverError::new(DriverOp::Open, "already open"));
        }
        let Some(bps) = *self.bitrate.lock() else {
            return Err(DriverError::new(DriverOp::Open, "no bitrate selected"));
        };
        if !self.configure_link && mode != CanMode::Normal {
            return Err(DriverError::new(
                DriverOp::Open,
                format!("{:?} mode requires configure_link", mode),
            ));
        }

        if self.configure_link {
            self.link_up(bps, mode)?;
        }

        let socket = match self.open_socket(mode) {
            Ok(socket) => socket,
            Err(e) => {
                if self.configure_link {
                    if let Err(down) = self.link_down(DriverOp::Open) {
                        warn!(interface = %self.interface, "Link left up: {}", down);
                    }
                }
                return Err(e);
            }
        };

        *self.alerts.lock() = Alerts::empty();
        *link = Some(Arc::new(Link { socket, mode }));
        info!(interface = %self.interface, ?mode, "SocketCAN opened");
        Ok(())
    }

    /// Release the socket, then take the link down if we manage it
    ///
    /// A failed `ip link down` leaves the teardown pending; calling `close`
    /// again retries it.
    fn close(&self) -> Result<(), DriverError> {
        let released = self.link.lock().take();
        if released.is_none() && !self.teardown_pending.load(Ordering::SeqCst) {
            return Err(DriverError::new(DriverOp::Close, "not open"));
        }
        drop(released);

        if self.configure_link {
            self.link_down(DriverOp::Close)?;
        }
        info!(interface = %self.interface, "SocketCAN closed");
        Ok(())
    }

    fn send(&self, frame: &CanFrame, timeout: Duration) -> Result<(), DriverError> {
        let Some(link) = self.link.lock().clone() else {
            return Err(DriverError::new(DriverOp::Send, "not open"));
        };
        if link.mode == CanMode::Silent {
            self.raise(Alerts::TX_FAILED);
            return Err(DriverError::new(DriverOp::Send, "listen-only mode"));
        }

        let out = to_socket_frame(frame)
            .ok_or_else(|| DriverError::new(DriverOp::Send, "frame not representable"))?;

        let result = link
            .socket
            .set_write_timeout(timeout)
            .and_then(|_| link.socket.write_frame(&out));
        match result {
            Ok(()) => {
                self.raise(Alerts::TX_SUCCESS);
                Ok(())
            }
            Err(e) => {
                self.raise(Alerts::TX_FAILED);
                Err(DriverError::new(DriverOp::Send, e.to_string()))
            }
        }
    }

    fn receive(&self, timeout: Duration) -> Option<CanFrame> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }

            // Lock released before the blocking read
            let link = self.link.lock().clone()?;
            let read = link
                .socket
                .set_read_timeout(remaining)
                .and_then(|_| link.socket.read_frame());

            match read {
                Ok(frame) => {
                    if let Some(frame) = self.convert(frame) {
                        trace!(%frame, "SocketCAN rx");
                        return Some(frame);
                    }
                }
                Err(ref e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    return None;
                }
                Err(e) => {
                    warn!(interface = %self.interface, "SocketCAN read error: {}", e);
                    self.raise(Alerts::BUS_ERROR);
                    return None;
                }
            }
        }
    }

    fn read_alerts(&self, timeout: Duration) -> Option<Alerts> {
        let deadline = Instant::now() + timeout;
        let mut alerts = self.alerts.lock();
        while alerts.is_empty() {
            if self.alert_ready.wait_until(&mut alerts, deadline).timed_out() {
                break;
            }
        }
        let latched = std::mem::take(&mut *alerts);
        (!latched.is_empty()).then_some(latched)
    }

    /// Counters carried by the most recent error frame that had them
    fn error_counters(&self) -> (u32, u32) {
        *self.counters.lock()
    }
}

fn to_socket_frame(frame: &CanFrame) -> Option<SocketFrame> {
    let id: Id = if frame.is_extended() {
        Id::Extended(ExtendedId::new(frame.id())?)
    } else {
        Id::Standard(StandardId::new(u16::try_from(frame.id()).ok()?)?)
    };

    if frame.is_remote() {
        SocketFrame::new_remote(id, frame.len())
    } else {
        SocketFrame::new(id, frame.data())
    }
}

fn alerts_for(error: &CanError) -> Alerts {
    match error {
        CanError::TransmitTimeout => Alerts::TX_FAILED,
        CanError::LostArbitration(_) => Alerts::ARB_LOST,
        CanError::BusOff => Alerts::BUS_OFF,
        CanError::Restarted => Alerts::BUS_RECOVERED,
        CanError::ControllerProblem(problem) => match problem {
            ControllerProblem::ReceiveBufferOverflow => Alerts::RX_FIFO_OVERRUN,
            ControllerProblem::TransmitBufferOverflow => Alerts::TX_FAILED,
            ControllerProblem::ReceiveErrorWarning | ControllerProblem::TransmitErrorWarning => {
                Alerts::ABOVE_ERR_WARN
            }
            ControllerProblem::ReceiveErrorPassive | ControllerProblem::TransmitErrorPassive => {
                Alerts::ERR_PASS
            }
            ControllerProblem::Active => Alerts::ERR_ACTIVE,
            _ => Alerts::BUS_ERROR,
        },
        _ => Alerts::BUS_ERROR,
    }
}

/// `ip link` arguments applying bitrate and mode to `interface`
fn link_args(interface: &str, bps: u32, mode: CanMode) -> Vec<String> {
    let flag = |on: bool| if on { "on" } else { "off" };
    vec![
        "set".into(),
        interface.into(),
        "type".into(),
        "can".into(),
        "bitrate".into(),
        bps.to_string(),
        "listen-only".into(),
        flag(mode == CanMode::Silent).into(),
        "loopback".into(),
        flag(mode == CanMode::Loopback).into(),
    ]
}

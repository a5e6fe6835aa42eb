//! Serial transport (USB CDC gadget or UART)
//!
//! Uses blocking threads for low-latency I/O:
//! - Reader thread: reads from serial port, sends to channel, polls line state
//! - Writer thread: receives from channel, writes and flushes the port
//!
//! The transport stops when:
//! - `shutdown` flag is set
//! - Serial port disconnects (detected via consecutive empty reads or errors)
//! - Write error occurs

use super::{Transport, TransportChannels};
use crate::constants::{
    CHANNEL_CAPACITY, LINE_STATE_POLL_READS, READ_BUFFER_SIZE, SERIAL_DISCONNECT_THRESHOLD,
};
use crate::error::{BridgeError, Result};
use bytes::Bytes;
use serialport::{SerialPort, SerialPortType};
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Read timeout; bounds how long the reader takes to observe shutdown
const READ_TIMEOUT: Duration = Duration::from_millis(10);

pub struct SerialTransport {
    port_name: String,
    baud_rate: u32,
}

impl SerialTransport {
    /// Create a new serial transport for the specified port
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
        }
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// First USB serial port on the system
    ///
    /// # Errors
    ///
    /// `NoSerialPort` when no USB serial device is present.
    pub fn detect() -> Result<String> {
        let ports = serialport::available_ports().unwrap_or_default();
        ports
            .into_iter()
            .find(|p| matches!(p.port_type, SerialPortType::UsbPort(_)))
            .map(|p| p.port_name)
            .ok_or(BridgeError::NoSerialPort)
    }

    /// Open the port; the baud rate is ignored by USB CDC devices
    pub fn open(port_name: &str, baud_rate: u32) -> Result<Box<dyn SerialPort>> {
        serialport::new(port_name, baud_rate)
            .timeout(READ_TIMEOUT)
            .open()
            .map_err(|e| BridgeError::SerialOpen {
                port: port_name.to_string(),
                source: std::io::Error::other(e.to_string()),
            })
    }
}

/// Modem line state as seen from this end of the cable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LineState {
    dsr: bool,
    cts: bool,
}

fn read_line_state(port: &mut dyn SerialPort) -> Option<LineState> {
    let dsr = port.read_data_set_ready().ok()?;
    let cts = port.read_clear_to_send().ok()?;
    Some(LineState { dsr, cts })
}

impl Transport for SerialTransport {
    fn describe(&self) -> String {
        format!("serial {} @ {} baud", self.port_name, self.baud_rate)
    }

    fn spawn(self, shutdown: Arc<AtomicBool>) -> Result<TransportChannels> {
        let (in_tx, in_rx) = mpsc::channel::<Bytes>(CHANNEL_CAPACITY);
        let (out_tx, mut out_rx) = mpsc::channel::<Bytes>(CHANNEL_CAPACITY);

        let port_read = Self::open(&self.port_name, self.baud_rate)?;
        let port_write = port_read.try_clone().map_err(|e| BridgeError::SerialOpen {
            port: self.port_name.clone(),
            source: std::io::Error::other(e.to_string()),
        })?;

        // Reader thread (blocking)
        let shutdown_reader = shutdown.clone();
        let port_name = self.port_name.clone();
        std::thread::spawn(move || {
            let mut port = port_read;
            let mut buf = [0u8; READ_BUFFER_SIZE];
            let mut consecutive_errors = 0u32;
            let mut reads = 0u32;
            let mut line_state = read_line_state(port.as_mut());

            while !shutdown_reader.load(Ordering::Relaxed) {
                reads += 1;
                if reads >= LINE_STATE_POLL_READS {
                    reads = 0;
                    if let Some(current) = read_line_state(port.as_mut()) {
                        if line_state != Some(current) {
                            let LineState { dsr, cts } = current;
                            info!(port = %port_name, dsr, cts, "Serial line state changed");
                            line_state = Some(current);
                        }
                    }
                }

                match port.read(&mut buf) {
                    Ok(n) if n > 0 => {
                        consecutive_errors = 0;
                        if in_tx
                            .blocking_send(Bytes::copy_from_slice(&buf[..n]))
                            .is_err()
                        {
                            break;
                        }
                    }
                    Ok(_) => {
                        // Zero bytes read - could be normal or port gone
                        consecutive_errors += 1;
                        if consecutive_errors > SERIAL_DISCONNECT_THRESHOLD {
                            break;
                        }
                    }
                    Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => {
                        consecutive_errors = 0;
                    }
                    Err(e) => {
                        warn!(port = %port_name, error = %e, "Serial read failed");
                        break;
                    }
                }
            }
            debug!(port = %port_name, "Serial reader stopped");
        });

        // Writer thread (blocking)
        let shutdown_writer = shutdown;
        let port_name = self.port_name;
        std::thread::spawn(move || {
            let mut port = port_write;

            while !shutdown_writer.load(Ordering::Relaxed) {
                let Some(data) = out_rx.blocking_recv() else {
                    break;
                };
                if let Err(e) = port.write_all(&data).and_then(|_| port.flush()) {
                    warn!(port = %port_name, error = %e, "Serial write failed");
                    break;
                }
            }
            debug!(port = %port_name, "Serial writer stopped");
        });

        Ok(TransportChannels {
            rx: in_rx,
            tx: out_tx,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_transport_new() {
        let transport = SerialTransport::new("/dev/ttyGS0", 115_200);
        assert_eq!(transport.port_name(), "/dev/ttyGS0");
        assert_eq!(transport.describe(), "serial /dev/ttyGS0 @ 115200 baud");
    }

    #[test]
    fn test_serial_transport_from_string() {
        let transport = SerialTransport::new(String::from("/dev/ttyACM0"), 9600);
        assert_eq!(transport.port_name, "/dev/ttyACM0");
        assert_eq!(transport.baud_rate, 9600);
    }

    #[test]
    fn test_open_missing_port_fails() {
        let result = SerialTransport::open("/dev/does-not-exist-slcan", 115_200);
        assert!(matches!(result, Err(BridgeError::SerialOpen { .. })));
    }
}

//! Bridge runner (internal implementation)
//!
//! Starts the frame forwarder once for the whole run and attaches one
//! transport session at a time. Handles auto-reconnection for the serial
//! transport.

use super::session::SlcanSession;
use super::sink::OutboundSink;
use super::stats::Stats;
use super::Engine;
use crate::can::CanDriver;
use crate::config::{BridgeConfig, TransportKind};
use crate::constants::RECONNECT_DELAY_SECS;
use crate::error::Result;
use crate::slcan::ChannelState;
use crate::transport::{SerialTransport, Transport, UdpTransport};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

// =============================================================================
// Main entry point
// =============================================================================

/// Run the bridge until `shutdown` is set (or the UDP socket fails)
///
/// The CAN channel is closed on the way out if the host left it open.
pub(super) async fn run<D: CanDriver>(
    config: &BridgeConfig,
    engine: &Engine<D>,
    shutdown: Arc<AtomicBool>,
    stats: Arc<Stats>,
) -> Result<()> {
    let sink = OutboundSink::new(stats.clone());

    let forwarder = {
        let forwarder = engine.forwarder.clone();
        let sink = sink.clone();
        let shutdown = shutdown.clone();
        tokio::task::spawn_blocking(move || forwarder.run(&sink, &shutdown))
    };

    let result = match config.transport {
        TransportKind::Serial => run_serial(config, engine, &sink, &shutdown, &stats).await,
        TransportKind::Udp => run_udp(config, engine, &sink, &shutdown, &stats).await,
    };

    shutdown.store(true, Ordering::SeqCst);
    if let Err(e) = forwarder.await {
        warn!("Frame forwarder ended abnormally: {}", e);
    }

    close_channel(engine).await;
    info!("Bridge stopped: {}", stats);

    result
}

// =============================================================================
// Serial (with auto-reconnection)
// =============================================================================

/// Run sessions over the serial line
///
/// Supports auto-reconnection when the host side is unplugged/replugged.
/// The CAN channel keeps its state across reconnects.
async fn run_serial<D: CanDriver>(
    config: &BridgeConfig,
    engine: &Engine<D>,
    sink: &OutboundSink,
    shutdown: &Arc<AtomicBool>,
    stats: &Arc<Stats>,
) -> Result<()> {
    while !shutdown.load(Ordering::Relaxed) {
        // Detect or use configured port
        let port_name = if config.serial_port.is_empty() {
            match SerialTransport::detect() {
                Ok(p) => {
                    info!("Found serial port {}", p);
                    p
                }
                Err(_) => {
                    // Passive waiting
                    wait_reconnect(shutdown).await;
                    continue;
                }
            }
        } else {
            config.serial_port.clone()
        };

        let transport = SerialTransport::new(&port_name, config.baud_rate);
        let endpoint = transport.describe();
        let channels = match transport.spawn(shutdown.clone()) {
            Ok(c) => c,
            Err(e) => {
                warn!("{}", e);
                wait_reconnect(shutdown).await;
                continue;
            }
        };

        info!("Connected: {}", endpoint);
        let session = SlcanSession::new(
            channels,
            engine.dispatcher.clone(),
            sink.clone(),
            stats.clone(),
        );
        if let Err(e) = session.run(shutdown.clone()).await {
            warn!("Session failed: {}", e);
        }

        if shutdown.load(Ordering::Relaxed) {
            break;
        }

        info!("Connection lost, reconnecting...");
        wait_reconnect(shutdown).await;
    }

    Ok(())
}

// =============================================================================
// UDP (no auto-reconnection)
// =============================================================================

/// Run one session on the UDP socket until shutdown
async fn run_udp<D: CanDriver>(
    config: &BridgeConfig,
    engine: &Engine<D>,
    sink: &OutboundSink,
    shutdown: &Arc<AtomicBool>,
    stats: &Arc<Stats>,
) -> Result<()> {
    let transport = UdpTransport::new(config.udp_bind, config.udp_port);
    let endpoint = transport.describe();
    let channels = transport.spawn(shutdown.clone())?;

    info!("Listening: {}", endpoint);
    let session = SlcanSession::new(
        channels,
        engine.dispatcher.clone(),
        sink.clone(),
        stats.clone(),
    );
    session.run(shutdown.clone()).await
}

// =============================================================================
// Helpers
// =============================================================================

/// Sleep before the next connection attempt, waking early on shutdown
async fn wait_reconnect(shutdown: &AtomicBool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(RECONNECT_DELAY_SECS);
    while !shutdown.load(Ordering::Relaxed) && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

/// Tear down a channel the host left open
async fn close_channel<D: CanDriver>(engine: &Engine<D>) {
    let channel = engine.dispatcher.channel().clone();
    if channel.state() == ChannelState::Closed {
        return;
    }

    debug!("Closing CAN channel on exit");
    match tokio::task::spawn_blocking(move || channel.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("CAN channel close failed: {}", e),
        Err(e) => warn!("CAN channel close task failed: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::can::VirtualCan;
    use crate::slcan::{Bitrate, CanMode, DeviceInfo, TracingIndicator};

    #[tokio::test]
    async fn test_exit_closes_open_channel() {
        let (driver, peer) = VirtualCan::new();
        let engine = Engine::new(
            driver,
            Arc::new(TracingIndicator::new()),
            DeviceInfo::default(),
        );
        let channel = engine.dispatcher.channel().clone();
        channel.set_bitrate(Bitrate::lookup(b'6').unwrap()).unwrap();
        channel.open(CanMode::Normal).unwrap();

        close_channel(&engine).await;
        assert_eq!(channel.state(), ChannelState::Closed);
        assert!(peer.mode().is_none());
    }

    #[tokio::test]
    async fn test_wait_reconnect_wakes_on_shutdown() {
        let shutdown = AtomicBool::new(true);
        tokio::time::timeout(Duration::from_millis(500), wait_reconnect(&shutdown))
            .await
            .expect("returns immediately once shutdown is set");
    }
}

//! SLCAN bridge - serial-line CAN adapter
//!
//! Usage:
//!   slcan-bridge                          Serial transport, first USB port
//!   slcan-bridge --port /dev/ttyGS0       Serial transport on a given port
//!   slcan-bridge --transport udp          UDP transport (default port 9100)
//!   slcan-bridge --driver socketcan       Drive a SocketCAN interface
//!   slcan-bridge check-config             Print the effective config

use clap::Parser;
use slcan_bridge::bridge::{self, Engine, State};
use slcan_bridge::can::{CanDriver, VirtualCan};
use slcan_bridge::cli::{Cli, Command};
use slcan_bridge::config::{self, Config, DriverKind};
use slcan_bridge::error::{BridgeError, Result};
use slcan_bridge::logging::init_tracing;
use slcan_bridge::slcan::TracingIndicator;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut config = config::load(cli.config.as_deref());
    cli.apply(&mut config);
    config.validate()?;

    if let Some(Command::CheckConfig) = cli.command {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    let engine = build_engine(&config)?;

    let rt = tokio::runtime::Runtime::new().map_err(|source| BridgeError::Runtime { source })?;
    let state = rt.block_on(run_bridge(config, engine));

    match state {
        State::Error => Err(BridgeError::BridgeFailed),
        _ => Ok(()),
    }
}

/// Create the CAN driver and apply the startup bitrate, if any
fn build_engine(config: &Config) -> Result<Arc<Engine<Box<dyn CanDriver>>>> {
    let driver = create_driver(config)?;
    let engine = Engine::new(
        driver,
        Arc::new(TracingIndicator::new()),
        config.device.to_device_info(),
    );

    if let Some(bitrate) = config.can.startup_bitrate()? {
        engine
            .channel()
            .set_bitrate(bitrate)
            .map_err(|e| BridgeError::ConfigValidation {
                field: "can.default_bitrate",
                reason: e.to_string(),
            })?;
        info!("Startup bitrate {}", bitrate);
    }

    Ok(Arc::new(engine))
}

fn create_driver(config: &Config) -> Result<Box<dyn CanDriver>> {
    match config.can.driver {
        DriverKind::Virtual => {
            // Peer dropped: nothing else is on the bus
            let (driver, _peer) = VirtualCan::new();
            info!("Using virtual CAN bus");
            Ok(Box::new(driver))
        }
        #[cfg(target_os = "linux")]
        DriverKind::SocketCan => {
            let driver = slcan_bridge::can::SocketCan::new(
                config.can.interface.as_str(),
                config.can.configure_link,
            );
            driver.probe().map_err(|source| BridgeError::CanBackend {
                interface: config.can.interface.clone(),
                source,
            })?;
            info!("Using SocketCAN interface {}", config.can.interface);
            Ok(Box::new(driver))
        }
        #[cfg(not(target_os = "linux"))]
        DriverKind::SocketCan => Err(BridgeError::BackendNotSupported {
            backend: "socketcan",
        }),
    }
}

async fn run_bridge(config: Config, engine: Arc<Engine<Box<dyn CanDriver>>>) -> State {
    let handle = bridge::start(config.bridge, engine);

    tokio::select! {
        _ = shutdown_signal() => {
            info!("Shutdown requested");
            handle.stop();
        }
        _ = wait_stopped(&handle) => {}
    }

    let stats = handle.stats().clone();
    let state = handle.wait().await;
    info!("Final: {}", stats);
    state
}

/// Resolve once the bridge leaves the running states on its own
async fn wait_stopped(handle: &bridge::Handle) {
    while matches!(handle.state(), State::Starting | State::Running) {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut sigterm, mut sigint) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(term), Ok(int)) => (term, int),
        _ => {
            error!("Cannot install signal handlers, falling back to Ctrl+C");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => {},
        _ = sigint.recv() => {},
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

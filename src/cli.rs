//! Command-line interface definition using clap
//!
//! Flags override the matching config file values.

use crate::config::{Config, DriverKind, TransportKind};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

// =============================================================================
// CLI Definition
// =============================================================================

/// SLCAN adapter: bridges a serial line or UDP socket to a CAN bus
#[derive(Parser, Debug, Default)]
#[command(name = "slcan-bridge")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose debug output
    #[arg(short, long)]
    pub verbose: bool,

    /// Config file (default: config.toml next to the executable)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Host transport (overrides config)
    #[arg(long, value_enum)]
    pub transport: Option<TransportKind>,

    /// Serial port to use (overrides config)
    #[arg(long, value_name = "PORT")]
    pub port: Option<String>,

    /// UDP listen port (overrides config)
    #[arg(long, value_name = "PORT")]
    pub udp_port: Option<u16>,

    /// CAN driver backend (overrides config)
    #[arg(long, value_enum)]
    pub driver: Option<DriverKind>,

    /// SocketCAN interface (overrides config)
    #[arg(long, value_name = "IFACE")]
    pub interface: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Validate the configuration and print the effective values as TOML
    CheckConfig,
}

impl Cli {
    /// Apply command-line overrides to `config`
    pub fn apply(&self, config: &mut Config) {
        if let Some(transport) = self.transport {
            config.bridge.transport = transport;
        }
        if let Some(port) = &self.port {
            config.bridge.serial_port = port.clone();
        }
        if let Some(udp_port) = self.udp_port {
            config.bridge.udp_port = udp_port;
        }
        if let Some(driver) = self.driver {
            config.can.driver = driver;
        }
        if let Some(interface) = &self.interface {
            config.can.interface = interface.clone();
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

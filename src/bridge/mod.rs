//! Bridge layer
//!
//! Wires the SLCAN engine to a host transport and provides a controllable
//! bridge that can be started and stopped.

mod runner;
mod session;
mod sink;
pub mod stats;

pub use session::SlcanSession;
pub use sink::OutboundSink;

use self::stats::Stats;
use crate::can::CanDriver;
use crate::config::BridgeConfig;
use crate::slcan::{Channel, DeviceInfo, Dispatcher, Forwarder, StatusIndicator};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// SLCAN engine: one CAN channel shared by the command path and the
/// frame forwarder
pub struct Engine<D: CanDriver> {
    dispatcher: Arc<Dispatcher<D>>,
    forwarder: Arc<Forwarder<D>>,
}

impl<D: CanDriver> Engine<D> {
    pub fn new(driver: D, indicator: Arc<dyn StatusIndicator>, device: DeviceInfo) -> Self {
        let channel = Arc::new(Channel::new(driver));
        let dispatcher = Arc::new(Dispatcher::new(channel.clone(), indicator.clone(), device));
        let forwarder = Arc::new(Forwarder::new(
            channel,
            indicator,
            dispatcher.timestamp_flag(),
        ));
        Self {
            dispatcher,
            forwarder,
        }
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher<D>> {
        &self.dispatcher
    }

    pub fn channel(&self) -> &Arc<Channel<D>> {
        self.dispatcher.channel()
    }
}

/// Bridge state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Stopped,
    Starting,
    Running,
    Stopping,
    Error,
}

/// Handle to control a running bridge
pub struct Handle {
    shutdown: Arc<AtomicBool>,
    state: Arc<RwLock<State>>,
    stats: Arc<Stats>,
    task: JoinHandle<()>,
}

impl Handle {
    /// Request bridge shutdown
    pub fn stop(&self) {
        let mut state = self.state.write();
        if matches!(*state, State::Starting | State::Running) {
            *state = State::Stopping;
            self.shutdown.store(true, Ordering::SeqCst);
        }
    }

    /// Get current state
    pub fn state(&self) -> State {
        *self.state.read()
    }

    /// Get traffic statistics
    pub fn stats(&self) -> &Arc<Stats> {
        &self.stats
    }

    /// Wait for the bridge task to finish, returning the final state
    pub async fn wait(self) -> State {
        if let Err(e) = self.task.await {
            error!("Bridge task failed: {}", e);
            *self.state.write() = State::Error;
        }
        *self.state.read()
    }
}

/// Start the bridge in background
pub fn start<D: CanDriver>(config: BridgeConfig, engine: Arc<Engine<D>>) -> Handle {
    let shutdown = Arc::new(AtomicBool::new(false));
    let state = Arc::new(RwLock::new(State::Starting));
    let stats = Arc::new(Stats::new());

    let task = {
        let shutdown = shutdown.clone();
        let state = state.clone();
        let stats = stats.clone();

        tokio::spawn(async move {
            {
                let mut s = state.write();
                if *s == State::Starting {
                    *s = State::Running;
                }
            }
            info!("Bridge started ({:?} transport)", config.transport);

            let result = runner::run(&config, &engine, shutdown, stats).await;

            match result {
                Ok(()) => *state.write() = State::Stopped,
                Err(e) => {
                    error!("Bridge error: {}", e);
                    *state.write() = State::Error;
                }
            }
        })
    };

    Handle {
        shutdown,
        state,
        stats,
        task,
    }
}

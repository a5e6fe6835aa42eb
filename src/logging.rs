//! Tracing setup
//!
//! Protocol traffic is logged through `tracing` at these levels:
//! - `warn`: rejected commands, transport failures
//! - `info`: channel lifecycle, indicator changes, connections
//! - `debug`: every command and lifecycle detail
//! - `trace`: raw bytes in both directions

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter directive for the given verbosity
fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "debug"
    } else {
        "warn"
    }
}

/// Initialize tracing output
///
/// Call early in main() before any logging occurs. `RUST_LOG`, when set,
/// replaces the level chosen by `verbose`.
pub fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_file(false)
                .compact(),
        )
        .with(filter)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directive() {
        assert_eq!(default_directive(false), "warn");
        assert_eq!(default_directive(true), "debug");
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init_tracing(false);
        init_tracing(true);
    }
}

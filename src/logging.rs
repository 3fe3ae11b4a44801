//! Structured logging setup using tracing
//!
//! Writes to stderr only so library consumers keep stdout for their own output.
//! Auto-detects format: human-readable with ANSI colors when stderr is a terminal,
//! structured JSON when piped/redirected.

use std::io::IsTerminal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::errors::EvidenceError;

/// Initialize tracing subscriber with stderr-only output
///
/// Log level from config.log_level (default: info)
/// RUST_LOG env var can override at runtime
///
/// Returns a configuration error if a global subscriber is already installed.
pub fn init_logging(config: &Config) -> Result<(), EvidenceError> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let stderr_is_terminal = std::io::stderr().is_terminal();

    let result = if stderr_is_terminal {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(true),
            )
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .json(),
            )
            .try_init()
    };

    result.map_err(|e| EvidenceError::Config(format!("Failed to initialize logging: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_reported_not_panicking() {
        let config = Config::default();
        // Another test may already have installed a subscriber; either way the
        // second call must fail gracefully.
        let _ = init_logging(&config);
        assert!(init_logging(&config).is_err());
    }
}

//! # grblstream
//!
//! Streams G-code programs to GRBL-family CNC controllers (GRBL, grblHAL,
//! FluidNC) over serial or TCP, keeping the firmware's receive buffer full
//! without ever overflowing it.
//!
//! ## Architecture
//!
//! grblstream is organized as a workspace:
//!
//! 1. **grblstream-core** - Error types, data model, table-driven state machine, event dispatch
//! 2. **grblstream-communication** - Transports, GRBL parsers, flow control, the streaming controller
//! 3. **grblstream** - This crate: logging setup, program loading and the command line tool

pub use grblstream_communication::firmware;
pub use grblstream_core::data;

pub use grblstream_core::{
    CNCPoint, Command, CommandOutcome, CommunicatorEvent, ConfigError, ConnectionError,
    ControllerError, ControllerState, ControllerStatus, DispatchMode, Error, EventListener,
    ListenerId, Result, Units,
};

pub use grblstream_communication::{
    list_ports, CommunicatorConfig, ConnectionDriver, ConnectionParams, ControllerType,
    CornerResult, ErrorPolicy, GrblController, ProbeParams, ProbeSession, SerialPortInfo,
    StatusPoller,
};

use anyhow::Context;
use std::path::Path;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date (set at compile time)
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Initialize logging
///
/// Sets up structured logging with:
/// - Pretty console output on stderr; progress goes to stdout
/// - RUST_LOG environment variable support, `info` by default
/// - JSON lines instead of human readable text when `json` is set
pub fn init_logging(json: bool) -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if json {
        let fmt_layer = fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_names(true)
            .with_line_number(true);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .context("failed to install the log subscriber")?;
    } else {
        let fmt_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_level(true)
            .with_thread_names(true)
            .with_line_number(true)
            .pretty();

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .context("failed to install the log subscriber")?;
    }

    Ok(())
}

/// Read a G-code program, one command per non-blank line
///
/// Trailing whitespace and `\r` are dropped; comment-only lines are kept so
/// the controller can report them as skipped.
pub fn load_program(path: &Path) -> anyhow::Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;

    let program: Vec<String> = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && *line != "%")
        .map(str::to_string)
        .collect();

    tracing::debug!("Loaded {} commands from {}", program.len(), path.display());
    Ok(program)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_program_skips_blank_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "%\r\nG21\r\n\r\n(face)\n  G0 X1  \n%\n").unwrap();

        let program = load_program(file.path()).unwrap();
        assert_eq!(program, vec!["G21", "(face)", "G0 X1"]);
    }

    #[test]
    fn test_load_program_missing_file() {
        let err = load_program(Path::new("/nonexistent/part.nc")).unwrap_err();
        assert!(err.to_string().contains("part.nc"));
    }
}

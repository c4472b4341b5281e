//! Error handling for grblstream
//!
//! Provides error types for every layer of the streaming stack:
//! - Connection errors (transport could not be opened or was lost)
//! - I/O errors (a write failed mid-stream)
//! - Controller errors (invalid caller operations, firmware rejections)
//! - State machine errors (events with no matching transition)
//! - Configuration errors
//!
//! All error types use `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Controller error type
///
/// Represents errors raised by the streaming controller, including
/// operations that are not valid in the current state and firmware
/// rejections of individual commands.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ControllerError {
    /// Controller is not connected
    #[error("Controller not connected")]
    NotConnected,

    /// Controller is already connected
    #[error("Controller already connected")]
    AlreadyConnected,

    /// Operation is not valid in the current state
    #[error("Cannot {operation} while {state}")]
    InvalidState {
        /// The operation that was attempted.
        operation: String,
        /// The state the controller was in.
        state: String,
    },

    /// Command can never fit into the firmware receive buffer
    #[error("Buffer overflow: {message}")]
    BufferOverflow {
        /// A message describing the buffer overflow.
        message: String,
    },

    /// Firmware answered a command with `error:N`
    #[error("Firmware rejected '{command}': {description}")]
    Protocol {
        /// The error code, if the firmware reported one.
        code: Option<u16>,
        /// The command text that was rejected.
        command: String,
        /// Human readable description of the code.
        description: String,
    },

    /// Alarm condition detected
    #[error("Alarm: {code} - {message}")]
    Alarm {
        /// The alarm code.
        code: u16,
        /// The alarm message.
        message: String,
    },

    /// Probe workflow failed
    #[error("Probe failed: {reason}")]
    ProbeFailed {
        /// The reason the probe operation failed.
        reason: String,
    },

    /// Generic controller error
    #[error("Controller error: {message}")]
    Other {
        /// The error message.
        message: String,
    },
}

impl ControllerError {
    /// Build an [`ControllerError::InvalidState`] from anything displayable
    pub fn invalid_state(operation: impl Into<String>, state: impl std::fmt::Display) -> Self {
        ControllerError::InvalidState {
            operation: operation.into(),
            state: state.to_string(),
        }
    }
}

/// Connection error type
///
/// Represents errors opening or keeping a transport open.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConnectionError {
    /// Port not found
    #[error("Port not found: {port}")]
    PortNotFound {
        /// The name of the port that was not found.
        port: String,
    },

    /// Failed to open port
    #[error("Failed to open port {port}: {reason}")]
    FailedToOpen {
        /// The name of the port that failed to open.
        port: String,
        /// The reason the port failed to open.
        reason: String,
    },

    /// Connection lost
    #[error("Connection lost: {reason}")]
    ConnectionLost {
        /// The reason the connection was lost.
        reason: String,
    },

    /// Failed to resolve hostname
    #[error("Failed to resolve hostname {hostname}")]
    HostnameResolution {
        /// The hostname that failed to resolve.
        hostname: String,
    },

    /// TCP connection error
    #[error("TCP connection error: {reason}")]
    TcpError {
        /// The reason for the TCP error.
        reason: String,
    },

    /// Serial port error
    #[error("Serial port error: {reason}")]
    SerialError {
        /// The reason for the serial port error.
        reason: String,
    },

    /// Invalid connection parameters
    #[error("Invalid connection parameters: {reason}")]
    InvalidParameters {
        /// The reason the parameters are invalid.
        reason: String,
    },
}

/// A write to the transport failed
///
/// A command is atomic on the wire: when this is raised the whole stream
/// is considered broken.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IoError {
    /// The transport is not open
    #[error("Transport is not connected")]
    NotConnected,

    /// The write itself failed
    #[error("Write failed: {reason}")]
    WriteFailed {
        /// The reason reported by the transport.
        reason: String,
    },
}

impl From<std::io::Error> for IoError {
    fn from(err: std::io::Error) -> Self {
        IoError::WriteFailed {
            reason: err.to_string(),
        }
    }
}

/// State machine error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateMachineError {
    /// An event was applied that has no transition from the current state
    #[error("Unexpected event {event} in state {state}")]
    UnexpectedEvent {
        /// Debug rendering of the current state.
        state: String,
        /// Debug rendering of the rejected event.
        event: String,
    },
}

/// Configuration error type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Configuration file could not be read or written
    #[error("Config file error: {0}")]
    File(String),

    /// Configuration file could not be parsed
    #[error("Invalid {format} config: {reason}")]
    Parse {
        /// Format that failed ("JSON" or "TOML").
        format: &'static str,
        /// Parser message.
        reason: String,
    },

    /// A value failed validation
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue {
        /// Field name.
        field: String,
        /// What is wrong with it.
        reason: String,
    },
}

/// Main error type for grblstream
///
/// A unified error type that can represent any error from all layers.
/// This is the primary error type used in public APIs.
#[derive(Error, Debug)]
pub enum Error {
    /// Controller error
    #[error(transparent)]
    Controller(#[from] ControllerError),

    /// Connection error
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Transport write error
    #[error(transparent)]
    Io(#[from] IoError),

    /// State machine error
    #[error(transparent)]
    StateMachine(#[from] StateMachineError),

    /// Configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an error from a string message
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Check if this is a connection error
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Error::Connection(_))
    }

    /// Check if this is a transport write error
    pub fn is_io_error(&self) -> bool {
        matches!(self, Error::Io(_))
    }

    /// Check if this is a controller error
    pub fn is_controller_error(&self) -> bool {
        matches!(self, Error::Controller(_))
    }

    /// Check if the caller invoked an operation not valid in the current state
    pub fn is_invalid_state(&self) -> bool {
        matches!(self, Error::Controller(ControllerError::InvalidState { .. }))
    }
}

/// Result type using Error
pub type Result<T> = std::result::Result<T, Error>;

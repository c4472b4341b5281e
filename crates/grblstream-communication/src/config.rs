//! Communicator configuration
//!
//! Loaded from and saved to JSON or TOML, chosen by file extension.

use crate::communication::{ConnectionParams, ErrorPolicy};
use crate::firmware::ControllerType;
use grblstream_core::{ConfigError, DispatchMode, Units};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Streaming behaviour for one controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommunicatorConfig {
    /// Firmware profile; decides the receive buffer size
    pub firmware: ControllerType,
    /// Receive buffer size override in bytes
    pub buffer_size: Option<usize>,
    /// Appended to every command on the wire
    pub line_terminator: String,
    pub error_policy: ErrorPolicy,
    /// Send the next command only after the previous one is acknowledged
    pub single_step: bool,
    /// Status query interval in milliseconds, 0 to disable polling
    pub status_poll_ms: u64,
    pub dispatch_mode: DispatchMode,
    /// Units of reported positions; inferred from each report when unset
    pub reporting_units: Option<Units>,
    pub connection: ConnectionParams,
}

impl Default for CommunicatorConfig {
    fn default() -> Self {
        Self {
            firmware: ControllerType::Grbl,
            buffer_size: None,
            line_terminator: "\n".to_string(),
            error_policy: ErrorPolicy::Pause,
            single_step: false,
            status_poll_ms: 200,
            dispatch_mode: DispatchMode::Async,
            reporting_units: None,
            connection: ConnectionParams::default(),
        }
    }
}

enum Format {
    Json,
    Toml,
}

fn format_for(path: &Path) -> Result<Format, ConfigError> {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => Ok(Format::Json),
        Some("toml") => Ok(Format::Toml),
        _ => Err(ConfigError::File(format!(
            "{}: config file must be .json or .toml",
            path.display()
        ))),
    }
}

impl CommunicatorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receive buffer capacity in bytes
    pub fn capacity(&self) -> usize {
        self.buffer_size
            .unwrap_or_else(|| self.firmware.rx_buffer_size())
    }

    /// Load config from file (JSON or TOML)
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let format = format_for(path)?;
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::File(format!("failed to read {}: {}", path.display(), e)))?;

        let config: Self = match format {
            Format::Json => serde_json::from_str(&content).map_err(|e| ConfigError::Parse {
                format: "JSON",
                reason: e.to_string(),
            })?,
            Format::Toml => toml::from_str(&content).map_err(|e| ConfigError::Parse {
                format: "TOML",
                reason: e.to_string(),
            })?,
        };

        config.validate()?;
        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Save config to file (JSON or TOML)
    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        self.validate()?;

        let content = match format_for(path)? {
            Format::Json => serde_json::to_string_pretty(self).map_err(|e| ConfigError::Parse {
                format: "JSON",
                reason: e.to_string(),
            })?,
            Format::Toml => toml::to_string_pretty(self).map_err(|e| ConfigError::Parse {
                format: "TOML",
                reason: e.to_string(),
            })?,
        };

        std::fs::write(path, content)
            .map_err(|e| ConfigError::File(format!("failed to write {}: {}", path.display(), e)))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field: &str, reason: &str| ConfigError::InvalidValue {
            field: field.to_string(),
            reason: reason.to_string(),
        };

        if self.capacity() == 0 {
            return Err(invalid("buffer_size", "must be > 0"));
        }
        if self.line_terminator.is_empty() || !self.line_terminator.ends_with('\n') {
            return Err(invalid("line_terminator", "must end with a newline"));
        }
        if self.line_terminator != "\n" && self.line_terminator != "\r\n" {
            return Err(invalid("line_terminator", "must be \\n or \\r\\n"));
        }

        let conn = &self.connection;
        if conn.baud_rate == 0 {
            return Err(invalid("connection.baud_rate", "must be > 0"));
        }
        if !(5..=8).contains(&conn.data_bits) {
            return Err(invalid("connection.data_bits", "must be between 5 and 8"));
        }
        if !(1..=2).contains(&conn.stop_bits) {
            return Err(invalid("connection.stop_bits", "must be 1 or 2"));
        }
        if conn.timeout_ms == 0 {
            return Err(invalid("connection.timeout_ms", "must be > 0"));
        }

        Ok(())
    }
}

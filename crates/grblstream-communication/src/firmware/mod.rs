//! Firmware support
//!
//! Supported controllers all speak the GRBL serial protocol:
//! - GRBL: Open-source CNC control software (128 byte receive buffer)
//! - grblHAL: Enhanced GRBL for 32-bit boards (256 bytes)
//! - FluidNC: ESP32 GRBL derivative (512 bytes)

pub mod grbl;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Supported CNC controller types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControllerType {
    /// GRBL (default, most common)
    #[default]
    Grbl,
    /// grblHAL (enhanced GRBL with additional features)
    GrblHal,
    /// FluidNC
    FluidNC,
}

impl ControllerType {
    /// Size of the firmware's serial receive buffer in bytes
    pub fn rx_buffer_size(&self) -> usize {
        match self {
            Self::Grbl => 128,
            Self::GrblHal => 256,
            Self::FluidNC => 512,
        }
    }
}

impl fmt::Display for ControllerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Grbl => write!(f, "GRBL"),
            Self::GrblHal => write!(f, "grblHAL"),
            Self::FluidNC => write!(f, "FluidNC"),
        }
    }
}

impl std::str::FromStr for ControllerType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "grbl" => Ok(Self::Grbl),
            "grblhal" => Ok(Self::GrblHal),
            "fluidnc" => Ok(Self::FluidNC),
            other => Err(format!("unknown firmware profile: {}", other)),
        }
    }
}

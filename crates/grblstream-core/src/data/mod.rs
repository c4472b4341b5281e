//! Data models for positions, machine state and status snapshots
//!
//! This module provides:
//! - Position tracking with full 6-axis support (X, Y, Z, A, B, C)
//! - Controller state as tracked by the streaming state machine
//! - Status snapshots parsed from firmware status reports
//! - Streamed command records

pub mod command;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub use command::{Command, CommandKind, CommandNumberGenerator, CommandOutcome};

/// Machine coordinate units (millimeters or inches)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Units {
    /// Millimeters (metric)
    MM,
    /// Inches (imperial)
    INCH,
    /// Unknown or uninitialized
    Unknown,
}

impl Units {
    /// Convert a value from one unit to another
    ///
    /// Returns the original value if units are the same or unknown.
    pub fn convert(value: f64, from: Units, to: Units) -> f64 {
        match (from, to) {
            (Units::MM, Units::INCH) => value / 25.4,
            (Units::INCH, Units::MM) => value * 25.4,
            _ => value,
        }
    }
}

impl fmt::Display for Units {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Units::MM => write!(f, "mm"),
            Units::INCH => write!(f, "in"),
            Units::Unknown => write!(f, "unknown"),
        }
    }
}

/// Base CNC point structure representing a 6-axis coordinate
///
/// Firmware reports between three and six axes; unreported axes stay at zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CNCPoint {
    /// X-axis position
    pub x: f64,
    /// Y-axis position
    pub y: f64,
    /// Z-axis position
    pub z: f64,
    /// A-axis (4th axis) position
    pub a: f64,
    /// B-axis (5th axis) position
    pub b: f64,
    /// C-axis (6th axis) position
    pub c: f64,
    /// Coordinate unit
    pub unit: Units,
}

impl CNCPoint {
    /// Create a new CNC point with all axes at zero
    pub fn new(unit: Units) -> Self {
        Self::with_axes(&[], unit)
    }

    /// Create a point from up to six axis values, in X Y Z A B C order
    pub fn with_axes(axes: &[f64], unit: Units) -> Self {
        let axis = |i: usize| axes.get(i).copied().unwrap_or(0.0);
        Self {
            x: axis(0),
            y: axis(1),
            z: axis(2),
            a: axis(3),
            b: axis(4),
            c: axis(5),
            unit,
        }
    }

    /// Create a point with X, Y and Z set
    pub fn xyz(x: f64, y: f64, z: f64, unit: Units) -> Self {
        Self::with_axes(&[x, y, z], unit)
    }

    /// Component-wise sum, keeping this point's unit
    pub fn add(&self, other: &CNCPoint) -> Self {
        Self {
            x: self.x + other.x,
            y: self.y + other.y,
            z: self.z + other.z,
            a: self.a + other.a,
            b: self.b + other.b,
            c: self.c + other.c,
            unit: self.unit,
        }
    }

    /// Component-wise difference, keeping this point's unit
    pub fn subtract(&self, other: &CNCPoint) -> Self {
        Self {
            x: self.x - other.x,
            y: self.y - other.y,
            z: self.z - other.z,
            a: self.a - other.a,
            b: self.b - other.b,
            c: self.c - other.c,
            unit: self.unit,
        }
    }

    /// Convert this point to a different unit
    pub fn convert_to(&self, target_unit: Units) -> Self {
        let scale = Units::convert(1.0, self.unit, target_unit);
        Self {
            x: self.x * scale,
            y: self.y * scale,
            z: self.z * scale,
            a: self.a * scale,
            b: self.b * scale,
            c: self.c * scale,
            unit: target_unit,
        }
    }
}

impl Default for CNCPoint {
    fn default() -> Self {
        Self::new(Units::MM)
    }
}

impl fmt::Display for CNCPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "X:{:.3} Y:{:.3} Z:{:.3} ({})",
            self.x, self.y, self.z, self.unit
        )
    }
}

/// Controller state tracked by the streaming state machine
///
/// Firmware reports a richer set of states (`Jog`, `Door`, `Home`, `Sleep`);
/// those are folded into the closest state here and kept verbatim in
/// [`ControllerStatus::state_string`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ControllerState {
    /// Not connected to any controller
    Disconnected,
    /// Connected and idle, ready for commands
    Idle,
    /// Streaming or executing motion
    Run,
    /// Sending paused or firmware feed hold
    Hold,
    /// Machine alarm, requires an explicit unlock
    Alarm,
    /// Check mode (dry-run without machine movement)
    Check,
    /// Transport failure; recoverable by reconnecting or a firmware reset
    Error,
}

impl ControllerState {
    /// Check if this state indicates the controller is connected
    pub fn is_connected(&self) -> bool {
        !matches!(self, ControllerState::Disconnected)
    }

    /// Check if a program may be started in this state
    pub fn can_send(&self) -> bool {
        matches!(self, ControllerState::Idle | ControllerState::Check)
    }

    /// Check if streaming may be paused in this state
    pub fn can_pause(&self) -> bool {
        matches!(self, ControllerState::Run)
    }

    /// Check if a stream may be cancelled in this state
    pub fn can_cancel(&self) -> bool {
        matches!(
            self,
            ControllerState::Run | ControllerState::Hold | ControllerState::Check
        )
    }

    /// Check if this state indicates an error condition
    pub fn is_error(&self) -> bool {
        matches!(self, ControllerState::Alarm | ControllerState::Error)
    }
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "Disconnected",
            Self::Idle => "Idle",
            Self::Run => "Run",
            Self::Hold => "Hold",
            Self::Alarm => "Alarm",
            Self::Check => "Check",
            Self::Error => "Error",
        };
        f.write_str(name)
    }
}

/// Input pins reported active in a status report (`Pn:` field)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnabledPins {
    pub x_limit: bool,
    pub y_limit: bool,
    pub z_limit: bool,
    pub a_limit: bool,
    pub b_limit: bool,
    pub c_limit: bool,
    pub probe: bool,
    pub door: bool,
    pub hold: bool,
    pub soft_reset: bool,
    pub cycle_start: bool,
}

impl EnabledPins {
    /// Parse the letters of a `Pn:` field, e.g. `XZP`
    pub fn parse(value: &str) -> Self {
        let mut pins = Self::default();
        for ch in value.chars() {
            match ch.to_ascii_uppercase() {
                'X' => pins.x_limit = true,
                'Y' => pins.y_limit = true,
                'Z' => pins.z_limit = true,
                'A' => pins.a_limit = true,
                'B' => pins.b_limit = true,
                'C' => pins.c_limit = true,
                'P' => pins.probe = true,
                'D' => pins.door = true,
                'H' => pins.hold = true,
                'R' => pins.soft_reset = true,
                'S' => pins.cycle_start = true,
                _ => {}
            }
        }
        pins
    }
}

/// Feed, rapid and spindle override percentages (`Ov:` field)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverridePercents {
    pub feed: u16,
    pub rapid: u16,
    pub spindle: u16,
}

/// Free planner blocks and serial receive bytes (`Buf:`/`Bf:` field)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferAvailability {
    pub planner_blocks: u16,
    pub rx_bytes: u16,
}

/// Snapshot parsed from a single firmware status report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerStatus {
    /// State folded into the state machine's vocabulary
    pub state: ControllerState,
    /// Firmware state string as reported, including sub-state (e.g. `Hold:0`)
    pub state_string: String,
    pub machine_coord: CNCPoint,
    pub work_coord: CNCPoint,
    /// Work coordinate offset, carried over from earlier reports when absent
    pub work_coord_offset: Option<CNCPoint>,
    pub feed_rate: Option<f64>,
    pub spindle_speed: Option<f64>,
    pub overrides: Option<OverridePercents>,
    pub pins: Option<EnabledPins>,
    pub buffer: Option<BufferAvailability>,
    pub received_at: DateTime<Utc>,
}

impl ControllerStatus {
    /// An empty snapshot in the given state
    pub fn new(state: ControllerState) -> Self {
        Self {
            state,
            state_string: state.to_string(),
            machine_coord: CNCPoint::default(),
            work_coord: CNCPoint::default(),
            work_coord_offset: None,
            feed_rate: None,
            spindle_speed: None,
            overrides: None,
            pins: None,
            buffer: None,
            received_at: Utc::now(),
        }
    }
}

impl Default for ControllerStatus {
    fn default() -> Self {
        Self::new(ControllerState::Disconnected)
    }
}

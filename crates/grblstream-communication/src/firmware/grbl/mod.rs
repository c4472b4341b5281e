//! GRBL protocol support
//!
//! Response classification, status report parsing, error and alarm
//! decoding, the controller state table, the streaming controller itself and
//! the corner probing workflow.

pub mod controller;
pub mod error_decoder;
pub mod machine;
pub mod probe;
pub mod response_parser;
pub mod status_parser;

pub use controller::GrblController;
pub use machine::MachineEvent;
pub use probe::{CornerProbe, CornerResult, ProbeEvent, ProbeParams, ProbeSession, ProbeState};
pub use response_parser::{classify, GrblResponse};
pub use status_parser::StatusParser;

/// Single-byte commands GRBL acts on as soon as they arrive, bypassing the
/// receive buffer
pub mod realtime {
    pub const STATUS_QUERY: u8 = b'?';
    pub const FEED_HOLD: u8 = b'!';
    pub const CYCLE_START: u8 = b'~';
    pub const SOFT_RESET: u8 = 0x18;
    pub const SAFETY_DOOR: u8 = 0x84;
    pub const JOG_CANCEL: u8 = 0x85;
}

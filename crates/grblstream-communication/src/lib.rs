//! # grblstream Communication
//!
//! Transports (serial, TCP, no-op), the GRBL response and status parsers,
//! character-counting flow control and the streaming controller built on
//! top of them.

pub mod communication;
pub mod config;
pub mod firmware;
pub mod poller;

pub use communication::{
    list_ports, transport_for, Acknowledgement, CommandStream, ConnectionDriver,
    ConnectionParams, ErrorPolicy, NoOpTransport, ResponseLineSplitter, SerialParity,
    SerialPortInfo, SerialTransport, TcpTransport, Transport, TransportHandler,
};
pub use config::CommunicatorConfig;
pub use firmware::grbl::{
    realtime, CornerProbe, CornerResult, GrblController, GrblResponse, ProbeParams,
    ProbeSession, StatusParser,
};
pub use firmware::ControllerType;
pub use poller::StatusPoller;

pub use grblstream_core;

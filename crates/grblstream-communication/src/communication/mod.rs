//! Transports and connection parameters
//!
//! A [`Transport`] is a duplex byte channel: the controller writes whole
//! commands or single real-time bytes to it, and the transport hands every
//! chunk it reads to the registered [`TransportHandler`] from its own reader
//! thread, in arrival order.

pub mod buffered;
pub mod line_splitter;
pub mod serial;
pub mod tcp;

use grblstream_core::{ConnectionError, IoError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub use buffered::{Acknowledgement, CommandStream, ErrorPolicy};
pub use line_splitter::ResponseLineSplitter;
pub use serial::{list_ports, SerialPortInfo, SerialTransport};
pub use tcp::TcpTransport;

/// Kind of link to the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionDriver {
    /// USB or RS-232 serial port
    Serial,
    /// Raw TCP socket (ESP32 bridges, FluidNC telnet)
    Tcp,
    /// Discards everything; used for dry runs
    NoOp,
}

/// Serial parity setting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerialParity {
    #[default]
    None,
    Even,
    Odd,
}

/// Everything needed to open a transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionParams {
    pub driver: ConnectionDriver,
    /// Serial device path, or host name for TCP
    pub port: String,
    /// TCP port
    pub network_port: u16,
    pub baud_rate: u32,
    pub data_bits: u8,
    pub stop_bits: u8,
    pub parity: SerialParity,
    /// Hardware (RTS/CTS) flow control
    pub flow_control: bool,
    /// Connect and write timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            driver: ConnectionDriver::Serial,
            port: String::new(),
            network_port: 23,
            baud_rate: 115_200,
            data_bits: 8,
            stop_bits: 1,
            parity: SerialParity::None,
            flow_control: false,
            timeout_ms: 2000,
        }
    }
}

impl ConnectionParams {
    /// Parameters for a serial port at the given baud rate
    pub fn serial(port: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            driver: ConnectionDriver::Serial,
            port: port.into(),
            baud_rate,
            ..Self::default()
        }
    }

    /// Parameters for a TCP connection
    pub fn tcp(host: impl Into<String>, network_port: u16) -> Self {
        Self {
            driver: ConnectionDriver::Tcp,
            port: host.into(),
            network_port,
            ..Self::default()
        }
    }

    /// Check framing values before a port is opened
    pub fn validate(&self) -> Result<(), ConnectionError> {
        let invalid = |reason: String| Err(ConnectionError::InvalidParameters { reason });

        if self.driver != ConnectionDriver::NoOp && self.port.trim().is_empty() {
            return invalid("port must not be empty".into());
        }
        if self.driver == ConnectionDriver::Serial {
            if self.baud_rate == 0 {
                return invalid("baud rate must be positive".into());
            }
            if !(5..=8).contains(&self.data_bits) {
                return invalid(format!("invalid data bits: {}", self.data_bits));
            }
            if !(1..=2).contains(&self.stop_bits) {
                return invalid(format!("invalid stop bits: {}", self.stop_bits));
            }
        }
        if self.driver == ConnectionDriver::Tcp && self.network_port == 0 {
            return invalid("network port must be positive".into());
        }
        Ok(())
    }

    /// Human readable name of the link, for logs
    pub fn describe(&self) -> String {
        match self.driver {
            ConnectionDriver::Serial => format!("{}@{}", self.port, self.baud_rate),
            ConnectionDriver::Tcp => format!("{}:{}", self.port, self.network_port),
            ConnectionDriver::NoOp => "no-op".to_string(),
        }
    }
}

/// Receives what a transport reads
pub trait TransportHandler: Send + Sync {
    /// Raw bytes, not lines, in arrival order
    fn on_data(&self, bytes: &[u8]);

    /// The link closed without `disconnect` being called
    fn on_closed(&self, reason: &str);
}

/// Duplex byte channel to the firmware
pub trait Transport: Send {
    /// Open the link and start delivering incoming bytes to `handler`
    fn connect(
        &mut self,
        params: &ConnectionParams,
        handler: Arc<dyn TransportHandler>,
    ) -> Result<(), ConnectionError>;

    /// Close the link and stop the reader without waiting for it
    ///
    /// Must not block on the reader thread: the reader may itself be waiting
    /// on the caller's locks inside [`TransportHandler::on_data`].
    fn disconnect(&mut self);

    fn is_connected(&self) -> bool;

    /// Write all of `data` or fail
    fn write(&mut self, data: &[u8]) -> Result<(), IoError>;
}

/// Transport that accepts and discards every write
#[derive(Debug, Default)]
pub struct NoOpTransport {
    connected: bool,
    bytes_written: usize,
}

impl NoOpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bytes_written(&self) -> usize {
        self.bytes_written
    }
}

impl Transport for NoOpTransport {
    fn connect(
        &mut self,
        _params: &ConnectionParams,
        _handler: Arc<dyn TransportHandler>,
    ) -> Result<(), ConnectionError> {
        self.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) {
        self.connected = false;
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn write(&mut self, data: &[u8]) -> Result<(), IoError> {
        if !self.connected {
            return Err(IoError::NotConnected);
        }
        self.bytes_written += data.len();
        Ok(())
    }
}

/// Create the transport for `params.driver`
pub fn transport_for(params: &ConnectionParams) -> Box<dyn Transport> {
    match params.driver {
        ConnectionDriver::Serial => Box::new(SerialTransport::new()),
        ConnectionDriver::Tcp => Box::new(TcpTransport::new()),
        ConnectionDriver::NoOp => Box::new(NoOpTransport::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_validation() {
        assert!(ConnectionParams::serial("/dev/ttyUSB0", 115_200)
            .validate()
            .is_ok());
        assert!(ConnectionParams::serial("", 115_200).validate().is_err());

        let mut params = ConnectionParams::serial("/dev/ttyUSB0", 115_200);
        params.data_bits = 9;
        assert!(params.validate().is_err());

        assert!(ConnectionParams::tcp("grbl.local", 0).validate().is_err());
        assert_eq!(ConnectionParams::tcp("grbl.local", 23).describe(), "grbl.local:23");
    }

    #[test]
    fn test_noop_transport_requires_connect() {
        struct Ignore;
        impl TransportHandler for Ignore {
            fn on_data(&self, _bytes: &[u8]) {}
            fn on_closed(&self, _reason: &str) {}
        }

        let mut transport = NoOpTransport::new();
        assert_eq!(transport.write(b"G0\n"), Err(IoError::NotConnected));

        let params = ConnectionParams {
            driver: ConnectionDriver::NoOp,
            ..ConnectionParams::default()
        };
        transport.connect(&params, Arc::new(Ignore)).unwrap();
        transport.write(b"G0\n").unwrap();
        assert_eq!(transport.bytes_written(), 3);
    }
}

//! Serial port transport
//!
//! Opens a USB or RS-232 port with the `serialport` crate. Reads happen on a
//! dedicated thread that owns a cloned port handle and forwards every chunk to
//! the [`TransportHandler`]; writes go through the original handle.
//!
//! Supports:
//! - Port enumeration and discovery
//! - Baud rate configuration
//! - Flow control settings
//! - Parity and stop bit configuration

use super::{ConnectionDriver, ConnectionParams, SerialParity, Transport, TransportHandler};
use grblstream_core::{ConnectionError, IoError};
use serde::Serialize;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Read timeout of the reader thread; bounds how long a stop request waits
const READ_POLL: Duration = Duration::from_millis(10);

/// Information about an available serial port
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SerialPortInfo {
    /// Port name (e.g., "/dev/ttyUSB0", "COM3")
    pub port_name: String,

    /// Port description (e.g., "USB Serial Port")
    pub description: String,

    pub manufacturer: Option<String>,
    pub serial_number: Option<String>,

    /// USB vendor ID if applicable
    pub vid: Option<u16>,

    /// USB product ID if applicable
    pub pid: Option<u16>,
}

impl SerialPortInfo {
    pub fn new(port_name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            description: description.into(),
            manufacturer: None,
            serial_number: None,
            vid: None,
            pid: None,
        }
    }

    pub fn with_manufacturer(mut self, manufacturer: impl Into<String>) -> Self {
        self.manufacturer = Some(manufacturer.into());
        self
    }

    pub fn with_serial_number(mut self, serial_number: impl Into<String>) -> Self {
        self.serial_number = Some(serial_number.into());
        self
    }

    pub fn with_usb_ids(mut self, vid: u16, pid: u16) -> Self {
        self.vid = Some(vid);
        self.pid = Some(pid);
        self
    }
}

/// List serial ports that look like CNC controllers
///
/// Filters to the usual controller device names:
/// - Windows: COM* (e.g., COM1, COM3)
/// - Linux: /dev/ttyUSB*, /dev/ttyACM*
/// - macOS: /dev/cu.usbserial-*, /dev/cu.usbmodem*
pub fn list_ports() -> Result<Vec<SerialPortInfo>, ConnectionError> {
    let ports = serialport::available_ports().map_err(|e| {
        tracing::error!("Failed to enumerate serial ports: {}", e);
        ConnectionError::SerialError {
            reason: format!("failed to enumerate ports: {}", e),
        }
    })?;

    Ok(ports
        .iter()
        .filter(|port| is_controller_port(&port.port_name))
        .map(|port| {
            let info = SerialPortInfo::new(&port.port_name, port_description(port));
            match &port.port_type {
                serialport::SerialPortType::UsbPort(usb) => {
                    let mut info = info.with_usb_ids(usb.vid, usb.pid);
                    if let Some(ref mfg) = usb.manufacturer {
                        info = info.with_manufacturer(mfg);
                    }
                    if let Some(ref serial) = usb.serial_number {
                        info = info.with_serial_number(serial);
                    }
                    info
                }
                _ => info,
            }
        })
        .collect())
}

fn is_controller_port(port_name: &str) -> bool {
    if let Some(number) = port_name.strip_prefix("COM") {
        return !number.is_empty() && number.chars().all(|c| c.is_ascii_digit());
    }

    port_name.starts_with("/dev/ttyUSB")
        || port_name.starts_with("/dev/ttyACM")
        || port_name.starts_with("/dev/cu.usbserial-")
        || port_name.starts_with("/dev/cu.usbmodem")
}

fn port_description(port: &serialport::SerialPortInfo) -> String {
    match &port.port_type {
        serialport::SerialPortType::UsbPort(usb) => format!(
            "USB {} {}",
            usb.manufacturer.as_deref().unwrap_or("Device"),
            usb.product.as_deref().unwrap_or("Serial Port")
        ),
        serialport::SerialPortType::BluetoothPort => "Bluetooth Serial".to_string(),
        serialport::SerialPortType::PciPort => "PCI Serial".to_string(),
        _ => "Serial Port".to_string(),
    }
}

fn to_serialport_parity(parity: SerialParity) -> serialport::Parity {
    match parity {
        SerialParity::None => serialport::Parity::None,
        SerialParity::Even => serialport::Parity::Even,
        SerialParity::Odd => serialport::Parity::Odd,
    }
}

fn open_port(
    params: &ConnectionParams,
) -> Result<Box<dyn serialport::SerialPort>, ConnectionError> {
    let invalid = |reason: String| ConnectionError::InvalidParameters { reason };

    let data_bits = match params.data_bits {
        5 => serialport::DataBits::Five,
        6 => serialport::DataBits::Six,
        7 => serialport::DataBits::Seven,
        8 => serialport::DataBits::Eight,
        other => return Err(invalid(format!("invalid data bits: {}", other))),
    };
    let stop_bits = match params.stop_bits {
        1 => serialport::StopBits::One,
        2 => serialport::StopBits::Two,
        other => return Err(invalid(format!("invalid stop bits: {}", other))),
    };

    serialport::new(&params.port, params.baud_rate)
        .timeout(READ_POLL)
        .data_bits(data_bits)
        .stop_bits(stop_bits)
        .parity(to_serialport_parity(params.parity))
        .flow_control(if params.flow_control {
            serialport::FlowControl::Hardware
        } else {
            serialport::FlowControl::None
        })
        .open()
        .map_err(|e| {
            tracing::warn!("Failed to open serial port {}: {}", params.port, e);
            match e.kind() {
                serialport::ErrorKind::NoDevice => ConnectionError::PortNotFound {
                    port: params.port.clone(),
                },
                _ => ConnectionError::FailedToOpen {
                    port: params.port.clone(),
                    reason: e.to_string(),
                },
            }
        })
}

/// Serial port transport with a background reader thread
#[derive(Default)]
pub struct SerialTransport {
    port: Option<Box<dyn serialport::SerialPort>>,
    stop: Option<Arc<AtomicBool>>,
}

impl SerialTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Transport for SerialTransport {
    fn connect(
        &mut self,
        params: &ConnectionParams,
        handler: Arc<dyn TransportHandler>,
    ) -> Result<(), ConnectionError> {
        if params.driver != ConnectionDriver::Serial {
            return Err(ConnectionError::InvalidParameters {
                reason: "serial transport requires the serial driver".into(),
            });
        }
        params.validate()?;
        self.disconnect();

        let port = open_port(params)?;
        let mut reader = port.try_clone().map_err(|e| ConnectionError::SerialError {
            reason: format!("cannot clone port handle: {}", e),
        })?;

        let stop = Arc::new(AtomicBool::new(false));
        let reader_stop = stop.clone();
        let name = params.port.clone();

        thread::Builder::new()
            .name(format!("serial-reader {}", name))
            .spawn(move || {
                let mut buf = [0u8; 1024];
                while !reader_stop.load(Ordering::Acquire) {
                    match reader.read(&mut buf) {
                        Ok(0) => {}
                        Ok(n) => {
                            if reader_stop.load(Ordering::Acquire) {
                                break;
                            }
                            handler.on_data(&buf[..n]);
                        }
                        Err(e) if e.kind() == io::ErrorKind::TimedOut => {}
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                        Err(e) => {
                            if !reader_stop.swap(true, Ordering::AcqRel) {
                                tracing::warn!("Serial port {} closed: {}", name, e);
                                handler.on_closed(&e.to_string());
                            }
                            break;
                        }
                    }
                }
                tracing::debug!("Serial reader for {} exiting", name);
            })
            .map_err(|e| ConnectionError::SerialError {
                reason: format!("cannot start reader thread: {}", e),
            })?;

        tracing::info!("Opened serial port {}", params.describe());
        self.port = Some(port);
        self.stop = Some(stop);
        Ok(())
    }

    /// Close the port; the reader thread exits within one read poll
    fn disconnect(&mut self) {
        if let Some(stop) = self.stop.take() {
            stop.store(true, Ordering::Release);
        }
        if self.port.take().is_some() {
            tracing::info!("Closed serial port");
        }
    }

    fn is_connected(&self) -> bool {
        match (&self.port, &self.stop) {
            (Some(_), Some(stop)) => !stop.load(Ordering::Acquire),
            _ => false,
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<(), IoError> {
        let port = self.port.as_mut().ok_or(IoError::NotConnected)?;
        port.write_all(data)?;
        port.flush()?;
        Ok(())
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        self.disconnect();
    }
}

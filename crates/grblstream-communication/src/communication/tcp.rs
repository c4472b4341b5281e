//! Raw TCP transport
//!
//! Used for network-attached controllers (ESP32 serial bridges, FluidNC's
//! telnet port). Bytes are exchanged unframed, exactly as on a serial line.

use super::{ConnectionDriver, ConnectionParams, Transport, TransportHandler};
use grblstream_core::{ConnectionError, IoError};
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const READ_POLL: Duration = Duration::from_millis(50);

/// TCP transport with a background reader thread
#[derive(Default)]
pub struct TcpTransport {
    stream: Option<TcpStream>,
    stop: Option<Arc<AtomicBool>>,
}

impl TcpTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

fn tcp_error(e: io::Error) -> ConnectionError {
    ConnectionError::TcpError {
        reason: e.to_string(),
    }
}

impl Transport for TcpTransport {
    fn connect(
        &mut self,
        params: &ConnectionParams,
        handler: Arc<dyn TransportHandler>,
    ) -> Result<(), ConnectionError> {
        if params.driver != ConnectionDriver::Tcp {
            return Err(ConnectionError::InvalidParameters {
                reason: "TCP transport requires the tcp driver".into(),
            });
        }
        params.validate()?;
        self.disconnect();

        let addr = (params.port.as_str(), params.network_port)
            .to_socket_addrs()
            .ok()
            .and_then(|mut addrs| addrs.next())
            .ok_or_else(|| ConnectionError::HostnameResolution {
                hostname: params.port.clone(),
            })?;

        let timeout = Duration::from_millis(params.timeout_ms.max(1));
        let stream = TcpStream::connect_timeout(&addr, timeout).map_err(|e| {
            tracing::warn!("Failed to connect to {}: {}", addr, e);
            ConnectionError::FailedToOpen {
                port: params.describe(),
                reason: e.to_string(),
            }
        })?;
        stream.set_nodelay(true).map_err(tcp_error)?;
        stream.set_write_timeout(Some(timeout)).map_err(tcp_error)?;

        let mut reader = stream.try_clone().map_err(tcp_error)?;
        reader.set_read_timeout(Some(READ_POLL)).map_err(tcp_error)?;

        let stop = Arc::new(AtomicBool::new(false));
        let reader_stop = stop.clone();
        let name = params.describe();

        thread::Builder::new()
            .name(format!("tcp-reader {}", name))
            .spawn(move || {
                let mut buf = [0u8; 1024];
                while !reader_stop.load(Ordering::Acquire) {
                    match reader.read(&mut buf) {
                        Ok(0) => {
                            if !reader_stop.swap(true, Ordering::AcqRel) {
                                tracing::warn!("{} closed by peer", name);
                                handler.on_closed("connection closed by peer");
                            }
                            break;
                        }
                        Ok(n) => {
                            if reader_stop.load(Ordering::Acquire) {
                                break;
                            }
                            handler.on_data(&buf[..n]);
                        }
                        Err(e)
                            if matches!(
                                e.kind(),
                                io::ErrorKind::WouldBlock
                                    | io::ErrorKind::TimedOut
                                    | io::ErrorKind::Interrupted
                            ) => {}
                        Err(e) => {
                            if !reader_stop.swap(true, Ordering::AcqRel) {
                                tracing::warn!("{} failed: {}", name, e);
                                handler.on_closed(&e.to_string());
                            }
                            break;
                        }
                    }
                }
                tracing::debug!("TCP reader for {} exiting", name);
            })
            .map_err(tcp_error)?;

        tracing::info!("Connected to {}", params.describe());
        self.stream = Some(stream);
        self.stop = Some(stop);
        Ok(())
    }

    fn disconnect(&mut self) {
        if let Some(stop) = self.stop.take() {
            stop.store(true, Ordering::Release);
        }
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
            tracing::info!("Closed TCP connection");
        }
    }

    fn is_connected(&self) -> bool {
        match (&self.stream, &self.stop) {
            (Some(_), Some(stop)) => !stop.load(Ordering::Acquire),
            _ => false,
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<(), IoError> {
        let stream = self.stream.as_mut().ok_or(IoError::NotConnected)?;
        stream.write_all(data)?;
        Ok(())
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.disconnect();
    }
}

//! Shared test doubles: a transport that records writes and lets the test
//! play the firmware's side of the link.

#![allow(dead_code)]

use crossbeam_channel::Sender;
use grblstream_communication::{
    CommunicatorConfig, ConnectionDriver, ConnectionParams, GrblController, Transport,
    TransportHandler,
};
use grblstream_core::{
    CommunicatorEvent, ConnectionError, DispatchMode, EventListener, IoError,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// The test's end of the link
#[derive(Clone, Default)]
pub struct Wire {
    writes: Arc<Mutex<Vec<Vec<u8>>>>,
    handler: Arc<Mutex<Option<Arc<dyn TransportHandler>>>>,
    fail_writes: Arc<AtomicBool>,
    tap: Arc<Mutex<Option<Sender<Vec<u8>>>>>,
}

impl Wire {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transport(&self) -> Box<dyn Transport> {
        Box::new(RecordingTransport {
            wire: self.clone(),
            connected: false,
        })
    }

    /// Forward every successful write to `tx` as well
    pub fn tap(&self, tx: Sender<Vec<u8>>) {
        *self.tap.lock() = Some(tx);
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.writes.lock().clone()
    }

    /// Newline-terminated writes, without the terminator
    pub fn lines(&self) -> Vec<String> {
        self.writes
            .lock()
            .iter()
            .filter(|w| w.ends_with(b"\n"))
            .map(|w| String::from_utf8_lossy(w).trim_end().to_string())
            .collect()
    }

    /// Single-byte writes, in order
    pub fn realtime(&self) -> Vec<u8> {
        self.writes
            .lock()
            .iter()
            .filter(|w| w.len() == 1)
            .map(|w| w[0])
            .collect()
    }

    pub fn clear(&self) {
        self.writes.lock().clear();
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn handler(&self) -> Option<Arc<dyn TransportHandler>> {
        self.handler.lock().clone()
    }

    /// Deliver bytes as if the firmware sent them
    pub fn reply(&self, text: &str) {
        if let Some(handler) = self.handler() {
            handler.on_data(text.as_bytes());
        }
    }

    /// Deliver raw bytes, which need not be valid UTF-8
    pub fn reply_bytes(&self, bytes: &[u8]) {
        if let Some(handler) = self.handler() {
            handler.on_data(bytes);
        }
    }

    /// Drop the link from the far side
    pub fn close(&self, reason: &str) {
        if let Some(handler) = self.handler() {
            handler.on_closed(reason);
        }
    }
}

struct RecordingTransport {
    wire: Wire,
    connected: bool,
}

impl Transport for RecordingTransport {
    fn connect(
        &mut self,
        _params: &ConnectionParams,
        handler: Arc<dyn TransportHandler>,
    ) -> Result<(), ConnectionError> {
        *self.wire.handler.lock() = Some(handler);
        self.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) {
        self.connected = false;
        *self.wire.tap.lock() = None;
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn write(&mut self, data: &[u8]) -> Result<(), IoError> {
        if !self.connected {
            return Err(IoError::NotConnected);
        }
        if self.wire.fail_writes.load(Ordering::SeqCst) {
            return Err(IoError::WriteFailed {
                reason: "cable unplugged".into(),
            });
        }
        self.wire.writes.lock().push(data.to_vec());
        if let Some(tx) = self.wire.tap.lock().as_ref() {
            let _ = tx.send(data.to_vec());
        }
        Ok(())
    }
}

/// Records every dispatched event
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<CommunicatorEvent>>>,
}

impl EventLog {
    pub fn listener(&self) -> Arc<dyn EventListener<CommunicatorEvent>> {
        let events = self.events.clone();
        Arc::new(move |event: &CommunicatorEvent| events.lock().push(event.clone()))
    }

    pub fn events(&self) -> Vec<CommunicatorEvent> {
        self.events.lock().clone()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    pub fn count(&self, pred: impl Fn(&CommunicatorEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|e| pred(e)).count()
    }

    pub fn stream_completions(&self) -> Vec<bool> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                CommunicatorEvent::StreamComplete { success } => Some(*success),
                _ => None,
            })
            .collect()
    }
}

pub fn sync_config() -> CommunicatorConfig {
    CommunicatorConfig {
        dispatch_mode: DispatchMode::Sync,
        ..CommunicatorConfig::default()
    }
}

/// A connected controller with synchronous dispatch, its wire and event log
pub fn connected(config: CommunicatorConfig) -> (GrblController, Wire, EventLog) {
    let wire = Wire::new();
    let log = EventLog::default();
    let controller = GrblController::new(&config, wire.transport());
    controller.add_listener(log.listener());
    controller
        .connect(&ConnectionParams {
            driver: ConnectionDriver::NoOp,
            ..ConnectionParams::default()
        })
        .expect("connect");
    log.clear();
    (controller, wire, log)
}

//! GRBL Controller Implementation
//!
//! [`GrblController`] ties the pieces together: the transport reader thread
//! feeds bytes through the line splitter, every line is classified once, and
//! acknowledgements retire commands in the flow controller, which frees
//! receive buffer space and pumps more commands out.
//!
//! One mutex guards the streaming core (queues, counters, state machine,
//! status and splitter). The transport sits behind a second mutex that is
//! only ever taken while the core lock is held, so writes and bookkeeping
//! are applied atomically. Events are handed to the dispatcher under the
//! core lock, which keeps them in production order; listeners of a
//! synchronous dispatcher therefore must not call back into the controller.

use super::error_decoder;
use super::machine::{controller_machine, ControllerMachine, MachineEvent};
use super::realtime;
use super::response_parser::{classify, GrblResponse};
use super::status_parser::StatusParser;
use crate::communication::{
    transport_for, Acknowledgement, CommandStream, ConnectionParams, ErrorPolicy,
    ResponseLineSplitter, Transport, TransportHandler,
};
use crate::config::CommunicatorConfig;
use grblstream_core::{
    CommunicatorEvent, ControllerError, ControllerState, ControllerStatus, Error, EventDispatcher,
    EventListener, IoError, ListenerId, Result,
};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

/// Everything the core lock guards
struct Core {
    stream: CommandStream,
    machine: ControllerMachine,
    status: ControllerStatus,
    parser: StatusParser,
    splitter: ResponseLineSplitter,
    /// Sending was paused by a firmware feed hold, not by the caller
    firmware_hold: bool,
}

struct Inner {
    core: Mutex<Core>,
    transport: Mutex<Box<dyn Transport>>,
    dispatcher: Arc<dyn EventDispatcher<CommunicatorEvent>>,
    terminator_len: usize,
}

/// Streaming controller for GRBL-family firmware
///
/// Cheap to clone; clones share the same connection.
#[derive(Clone)]
pub struct GrblController {
    inner: Arc<Inner>,
}

/// Forwards transport callbacks without keeping the controller alive
struct LinkHandler {
    inner: Weak<Inner>,
}

impl TransportHandler for LinkHandler {
    fn on_data(&self, bytes: &[u8]) {
        if let Some(inner) = self.inner.upgrade() {
            inner.on_data(bytes);
        }
    }

    fn on_closed(&self, reason: &str) {
        if let Some(inner) = self.inner.upgrade() {
            inner.on_closed(reason);
        }
    }
}

impl GrblController {
    /// Create a controller that talks through `transport`
    pub fn new(config: &CommunicatorConfig, transport: Box<dyn Transport>) -> Self {
        let mut stream = CommandStream::new(config.capacity(), config.line_terminator.clone());
        stream.set_error_policy(config.error_policy);
        stream.set_single_step(config.single_step);

        let parser = match config.reporting_units {
            Some(units) => StatusParser::with_units(units),
            None => StatusParser::new(),
        };

        tracing::debug!(
            "Creating {} controller with {} byte receive buffer",
            config.firmware,
            config.capacity()
        );

        Self {
            inner: Arc::new(Inner {
                core: Mutex::new(Core {
                    stream,
                    machine: controller_machine(),
                    status: ControllerStatus::default(),
                    parser,
                    splitter: ResponseLineSplitter::new(),
                    firmware_hold: false,
                }),
                transport: Mutex::new(transport),
                dispatcher: config.dispatch_mode.create(),
                terminator_len: config.line_terminator.len(),
            }),
        }
    }

    /// Create a controller with the transport matching `config.connection`
    pub fn from_config(config: &CommunicatorConfig) -> Self {
        Self::new(config, transport_for(&config.connection))
    }

    /// Open the transport
    pub fn connect(&self, params: &ConnectionParams) -> Result<()> {
        let handler: Arc<dyn TransportHandler> = Arc::new(LinkHandler {
            inner: Arc::downgrade(&self.inner),
        });
        self.inner.connect(params, handler)
    }

    /// Close the transport, dropping anything queued
    pub fn disconnect(&self) {
        self.inner.disconnect();
    }

    pub fn add_listener(&self, listener: Arc<dyn EventListener<CommunicatorEvent>>) -> ListenerId {
        self.inner.dispatcher.add_listener(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.dispatcher.remove_listener(id)
    }

    /// Queue a program and start streaming it
    ///
    /// Returns the number of commands queued.
    pub fn enqueue_program<I, T>(&self, texts: I) -> Result<usize>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        let mut core = self.inner.core.lock();
        let state = core.machine.current();
        Inner::ensure_connected(state)?;
        if !state.can_send() {
            return Err(ControllerError::invalid_state("start a program", state).into());
        }

        let count = core.stream.enqueue_program(texts)?;
        tracing::info!("Streaming program of {} commands", count);
        self.inner.pump(&mut core).map(|_| count)
    }

    /// Send a single command through the same flow control
    ///
    /// Returns the command's sequence number. No `StreamComplete` is emitted
    /// for single commands.
    pub fn send_command(&self, text: &str) -> Result<u64> {
        let mut core = self.inner.core.lock();
        self.inner.check_sendable(&core, &[text])?;
        let seq = core.stream.enqueue_command(text)?;
        self.inner.pump(&mut core).map(|_| seq)
    }

    /// Send several single commands in one go
    ///
    /// Validates every command before queueing any of them.
    pub fn send_commands<I, T>(&self, texts: I) -> Result<Vec<u64>>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        let texts: Vec<T> = texts.into_iter().collect();
        let mut core = self.inner.core.lock();
        self.inner.check_sendable(&core, &texts)?;

        let mut seqs = Vec::with_capacity(texts.len());
        for text in &texts {
            seqs.push(core.stream.enqueue_command(text.as_ref())?);
        }
        self.inner.pump(&mut core).map(|_| seqs)
    }

    /// Stop sending and issue a feed hold
    pub fn pause_send(&self) -> Result<()> {
        let mut core = self.inner.core.lock();
        let state = core.machine.current();
        Inner::ensure_connected(state)?;
        if !state.can_pause() {
            return Err(ControllerError::invalid_state("pause", state).into());
        }

        self.inner.write_realtime(&mut core, realtime::FEED_HOLD)?;
        core.stream.pause();
        let mut events = vec![CommunicatorEvent::Paused];
        core.machine.apply(MachineEvent::HoldRequested, &mut events)?;
        self.inner.emit(events);
        Ok(())
    }

    /// Issue a cycle start and resume sending
    pub fn resume_send(&self) -> Result<()> {
        let mut core = self.inner.core.lock();
        let state = core.machine.current();
        Inner::ensure_connected(state)?;
        // an error can pause sending in check mode, where the state stays Check
        if state != ControllerState::Hold && !core.stream.is_paused() {
            return Err(ControllerError::invalid_state("resume", state).into());
        }

        self.inner.write_realtime(&mut core, realtime::CYCLE_START)?;
        core.stream.resume();
        core.firmware_hold = false;
        let event = if core.stream.is_busy() {
            MachineEvent::ResumeRequested
        } else {
            MachineEvent::ResumeIdle
        };
        let mut events = Vec::new();
        core.machine.apply(event, &mut events)?;
        self.inner.emit(events);
        self.inner.pump(&mut core)
    }

    /// Abort the running stream
    ///
    /// Clears both queues, sends feed hold followed by soft reset and leaves
    /// the controller idle. A jog in progress is stopped with a jog cancel
    /// instead of a reset. Does nothing if nothing is queued or in flight and
    /// the state has nothing to cancel.
    pub fn cancel(&self) -> Result<()> {
        let mut core = self.inner.core.lock();
        let state = core.machine.current();
        if !core.stream.is_busy() && !core.stream.is_program_active() && !state.can_cancel() {
            return Ok(());
        }

        tracing::info!(
            "Cancelling stream in {} ({} pending, {} outstanding)",
            state,
            core.stream.pending_count(),
            core.stream.outstanding_count()
        );
        let mut events = Vec::new();
        core.stream.cancel(&mut events);
        core.firmware_hold = false;
        core.machine.apply(MachineEvent::Cancelled, &mut events)?;
        self.inner.emit(events);

        if core.status.state_string.eq_ignore_ascii_case("jog") {
            return self.inner.write_realtime(&mut core, realtime::JOG_CANCEL);
        }
        self.inner.write_realtime(&mut core, realtime::FEED_HOLD)?;
        self.inner.write_realtime(&mut core, realtime::SOFT_RESET)
    }

    /// Drop the queues and reset the firmware
    ///
    /// The controller returns to idle once the firmware prints its banner.
    pub fn soft_reset(&self) -> Result<()> {
        let mut core = self.inner.core.lock();
        Inner::ensure_connected(core.machine.current())?;

        let mut events = Vec::new();
        core.stream.cancel(&mut events);
        core.firmware_hold = false;
        self.inner.emit(events);
        self.inner.write_realtime(&mut core, realtime::SOFT_RESET)
    }

    /// Ask the firmware for a status report
    pub fn query_status(&self) -> Result<()> {
        let mut core = self.inner.core.lock();
        Inner::ensure_connected(core.machine.current())?;
        self.inner.write_realtime(&mut core, realtime::STATUS_QUERY)
    }

    /// Cancel an active jog
    pub fn jog_cancel(&self) -> Result<()> {
        let mut core = self.inner.core.lock();
        Inner::ensure_connected(core.machine.current())?;
        self.inner.write_realtime(&mut core, realtime::JOG_CANCEL)
    }

    /// Trigger the firmware's safety door state
    pub fn safety_door(&self) -> Result<()> {
        let mut core = self.inner.core.lock();
        Inner::ensure_connected(core.machine.current())?;
        self.inner.write_realtime(&mut core, realtime::SAFETY_DOOR)
    }

    /// Clear an alarm with `$X`
    pub fn unlock(&self) -> Result<()> {
        let mut core = self.inner.core.lock();
        let state = core.machine.current();
        Inner::ensure_connected(state)?;
        if state != ControllerState::Alarm {
            return Err(ControllerError::invalid_state("unlock", state).into());
        }

        core.stream.enqueue_command("$X")?;
        self.inner.pump(&mut core)?;
        let mut events = Vec::new();
        core.machine.apply(MachineEvent::Unlocked, &mut events)?;
        self.inner.emit(events);
        Ok(())
    }

    /// Toggle check mode with `$C`
    pub fn toggle_check_mode(&self) -> Result<()> {
        let mut core = self.inner.core.lock();
        let state = core.machine.current();
        Inner::ensure_connected(state)?;
        if !state.can_send() {
            return Err(ControllerError::invalid_state("toggle check mode", state).into());
        }

        core.stream.enqueue_command("$C")?;
        self.inner.pump(&mut core)
    }

    pub fn set_error_policy(&self, policy: ErrorPolicy) {
        self.inner.core.lock().stream.set_error_policy(policy);
    }

    pub fn set_single_step(&self, enabled: bool) {
        self.inner.core.lock().stream.set_single_step(enabled);
    }

    pub fn state(&self) -> ControllerState {
        self.inner.core.lock().machine.current()
    }

    /// Latest parsed status report
    pub fn controller_status(&self) -> ControllerStatus {
        self.inner.core.lock().status.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.state(), ControllerState::Idle | ControllerState::Check)
    }

    pub fn is_paused(&self) -> bool {
        self.state() == ControllerState::Hold
    }

    pub fn can_send(&self) -> bool {
        self.state().can_send()
    }

    pub fn can_pause(&self) -> bool {
        self.state().can_pause()
    }

    pub fn can_cancel(&self) -> bool {
        self.state().can_cancel()
    }

    /// True while a program is queued or streaming
    pub fn is_streaming(&self) -> bool {
        self.inner.core.lock().stream.is_program_active()
    }

    pub fn pending_count(&self) -> usize {
        self.inner.core.lock().stream.pending_count()
    }

    pub fn outstanding_count(&self) -> usize {
        self.inner.core.lock().stream.outstanding_count()
    }

    pub fn outstanding_bytes(&self) -> usize {
        self.inner.core.lock().stream.outstanding_bytes()
    }

    pub fn capacity(&self) -> usize {
        self.inner.core.lock().stream.capacity()
    }

    pub fn buffer_usage_percent(&self) -> u32 {
        self.inner.core.lock().stream.buffer_usage_percent()
    }

    /// Outstanding command texts, oldest first, joined with `, `
    pub fn active_command_summary(&self) -> String {
        self.inner.core.lock().stream.active_command_summary()
    }
}

impl Inner {
    fn ensure_connected(state: ControllerState) -> std::result::Result<(), ControllerError> {
        if state.is_connected() {
            Ok(())
        } else {
            Err(ControllerError::NotConnected)
        }
    }

    /// Connected, in a sending state, and every text fits the receive buffer
    fn check_sendable<T: AsRef<str>>(&self, core: &Core, texts: &[T]) -> Result<()> {
        let state = core.machine.current();
        Self::ensure_connected(state)?;
        if !state.can_send() {
            return Err(ControllerError::invalid_state("send a command", state).into());
        }

        let capacity = core.stream.capacity();
        if let Some(text) = texts
            .iter()
            .map(AsRef::as_ref)
            .find(|text| text.len() + self.terminator_len > capacity)
        {
            return Err(ControllerError::BufferOverflow {
                message: format!(
                    "'{}' needs {} bytes but the receive buffer holds {}",
                    text,
                    text.len() + self.terminator_len,
                    capacity
                ),
            }
            .into());
        }
        Ok(())
    }

    fn emit(&self, events: Vec<CommunicatorEvent>) {
        for event in events {
            self.dispatcher.dispatch(event);
        }
    }

    fn connect(&self, params: &ConnectionParams, handler: Arc<dyn TransportHandler>) -> Result<()> {
        let mut core = self.core.lock();
        if core.machine.current().is_connected() {
            return Err(ControllerError::AlreadyConnected.into());
        }

        core.splitter.reset();
        core.parser.reset();

        if let Err(err) = self.transport.lock().connect(params, handler) {
            tracing::error!("Failed to connect to {}: {}", params.describe(), err);
            self.emit(vec![CommunicatorEvent::ConnectionError {
                reason: err.to_string(),
            }]);
            return Err(err.into());
        }

        tracing::info!("Connected to {}", params.describe());
        core.status = ControllerStatus::new(ControllerState::Idle);
        let mut events = Vec::new();
        core.machine.apply(MachineEvent::Connected, &mut events)?;
        self.emit(events);
        Ok(())
    }

    fn disconnect(&self) {
        let mut core = self.core.lock();
        self.transport.lock().disconnect();
        self.close_session(&mut core, Vec::new());
    }

    fn on_closed(&self, reason: &str) {
        let mut core = self.core.lock();
        if !core.machine.current().is_connected() {
            return;
        }
        tracing::error!("Connection lost: {}", reason);
        self.transport.lock().disconnect();
        let events = vec![CommunicatorEvent::ConnectionError {
            reason: reason.to_string(),
        }];
        self.close_session(&mut core, events);
    }

    fn close_session(&self, core: &mut Core, mut events: Vec<CommunicatorEvent>) {
        core.stream.cancel(&mut events);
        core.firmware_hold = false;
        core.splitter.reset();
        core.status = ControllerStatus::default();
        // Disconnected has a wildcard entry; this cannot fail
        let _ = core.machine.apply(MachineEvent::Disconnected, &mut events);
        self.emit(events);
    }

    /// Write a real-time byte, outside of flow control
    fn write_realtime(&self, core: &mut Core, byte: u8) -> Result<()> {
        let result = self.transport.lock().write(&[byte]);
        result.map_err(|err| self.write_failed(core, err))
    }

    /// Send what fits, then settle the stream and state
    fn pump(&self, core: &mut Core) -> Result<()> {
        let mut events = Vec::new();
        let result = {
            let mut transport = self.transport.lock();
            core.stream
                .pump(&mut events, |bytes| transport.write(bytes))
        };
        self.settle(core, &mut events);
        self.emit(events);
        result.map_err(|err| self.write_failed(core, err))
    }

    /// Apply stream progress to the state machine
    fn settle(&self, core: &mut Core, events: &mut Vec<CommunicatorEvent>) {
        let state = core.machine.current();
        let apply = |core: &mut Core, event, events: &mut Vec<CommunicatorEvent>| {
            let _ = core.machine.apply(event, events);
        };

        if state == ControllerState::Idle && core.stream.outstanding_count() > 0 {
            apply(core, MachineEvent::StreamStarted, events);
        }
        if core.stream.is_paused() && core.machine.current() == ControllerState::Run {
            apply(core, MachineEvent::HoldRequested, events);
        }

        core.stream.finish_if_drained(events);
        if !core.stream.is_busy() && core.machine.current() == ControllerState::Run {
            apply(core, MachineEvent::StreamFinished, events);
        }
    }

    /// A write failed: the stream is broken
    fn write_failed(&self, core: &mut Core, err: IoError) -> Error {
        tracing::error!("Write failed: {}", err);
        let mut events = vec![CommunicatorEvent::ConnectionError {
            reason: err.to_string(),
        }];
        core.stream.cancel(&mut events);
        let _ = core.machine.apply(MachineEvent::WriteFailed, &mut events);
        self.emit(events);
        err.into()
    }

    fn on_data(&self, bytes: &[u8]) {
        let mut core = self.core.lock();
        if !core.machine.current().is_connected() {
            tracing::trace!("Dropping {} bytes received while disconnected", bytes.len());
            return;
        }

        let lines = core.splitter.feed(bytes);
        for line in lines {
            match String::from_utf8(line) {
                Ok(line) => self.handle_line(&mut core, line),
                Err(err) => {
                    let line = String::from_utf8_lossy(err.as_bytes()).into_owned();
                    tracing::warn!("Undecodable response {:?}", err.as_bytes());
                    self.emit(vec![CommunicatorEvent::RawResponse { line }]);
                }
            }
        }
    }

    fn handle_line(&self, core: &mut Core, line: String) {
        if line.trim().is_empty() {
            return;
        }

        let response = classify(&line);
        if let GrblResponse::Status(raw) = &response {
            self.handle_status(core, raw, &line);
            return;
        }

        tracing::debug!("<< {}", line);
        let mut events = vec![CommunicatorEvent::RawResponse { line: line.clone() }];

        match response {
            GrblResponse::Ok => {
                self.acknowledge(core, Acknowledgement::Ok, &line, events);
                return;
            }
            GrblResponse::Error(code) => {
                self.acknowledge(core, Acknowledgement::Error(code), &line, events);
                return;
            }
            GrblResponse::Alarm(code) => {
                let description = error_decoder::decode_alarm(code).to_string();
                tracing::error!("ALARM:{} {}", code, description);
                events.push(CommunicatorEvent::Alarm { code, description });
                self.raise_alarm(core, &mut events);
            }
            GrblResponse::Probe {
                mut position,
                success,
            } => {
                position.unit = core.parser.units();
                tracing::info!("Probe {}: {}", if success { "hit" } else { "miss" }, position);
                events.push(CommunicatorEvent::ProbeResult { position, success });
            }
            GrblResponse::Welcome(banner) => {
                tracing::info!("Firmware announced: {}", banner);
                // a reset empties the firmware's buffers; nothing will be acknowledged
                core.stream.cancel(&mut events);
                let _ = core.machine.apply(MachineEvent::Welcome, &mut events);
            }
            GrblResponse::Feedback(text) => {
                if text == "[MSG:Enabled]" {
                    let _ = core.machine.apply(MachineEvent::FirmwareCheck, &mut events);
                }
            }
            GrblResponse::Status(_) | GrblResponse::Setting { .. } | GrblResponse::Message(_) => {}
        }

        self.emit(events);
    }

    fn acknowledge(
        &self,
        core: &mut Core,
        ack: Acknowledgement,
        line: &str,
        mut events: Vec<CommunicatorEvent>,
    ) {
        match core.stream.acknowledge(ack, line, &mut events) {
            Some(command) => {
                if let Acknowledgement::Error(code) = ack {
                    let description = code
                        .map(error_decoder::decode_error)
                        .unwrap_or("no error code");
                    tracing::warn!("{} rejected: {}", command, description);
                }
            }
            None => tracing::debug!("Unmatched response '{}'", line),
        }

        let mut pumped = Vec::new();
        let result = {
            let mut transport = self.transport.lock();
            core.stream
                .pump(&mut pumped, |bytes| transport.write(bytes))
        };
        events.extend(pumped);
        self.settle(core, &mut events);
        self.emit(events);

        if let Err(err) = result {
            let _ = self.write_failed(core, err);
        }
    }

    fn raise_alarm(&self, core: &mut Core, events: &mut Vec<CommunicatorEvent>) {
        if core.machine.current() == ControllerState::Alarm {
            return;
        }
        // the firmware discards its buffers on alarm
        core.stream.cancel(events);
        let _ = core.machine.apply(MachineEvent::AlarmRaised, events);
    }

    fn handle_status(&self, core: &mut Core, raw: &str, line: &str) {
        let Some(status) = core.parser.parse(raw) else {
            tracing::warn!("Unparseable status report '{}'", line);
            self.emit(vec![CommunicatorEvent::RawResponse {
                line: line.to_string(),
            }]);
            return;
        };

        tracing::trace!("Status {}", status.state_string);
        core.status = status.clone();
        let mut events = vec![CommunicatorEvent::StatusUpdated(status.clone())];

        let idle_stream = !core.stream.is_busy() && !core.stream.is_program_active();
        let mut resumed = false;
        let event = match status.state {
            ControllerState::Idle if idle_stream => Some(MachineEvent::FirmwareIdle),
            ControllerState::Run if core.firmware_hold => {
                tracing::info!("Firmware resumed from feed hold");
                core.firmware_hold = false;
                core.stream.resume();
                resumed = true;
                Some(MachineEvent::FirmwareRun)
            }
            ControllerState::Run if !core.stream.is_paused() => Some(MachineEvent::FirmwareRun),
            ControllerState::Hold => {
                if core.stream.is_busy() && !core.stream.is_paused() {
                    tracing::info!("Firmware feed hold, pausing sending");
                    core.stream.pause();
                    core.firmware_hold = true;
                    events.push(CommunicatorEvent::Paused);
                }
                Some(MachineEvent::FirmwareHold)
            }
            ControllerState::Check => Some(MachineEvent::FirmwareCheck),
            ControllerState::Alarm => {
                self.raise_alarm(core, &mut events);
                None
            }
            _ => None,
        };
        if let Some(event) = event {
            let _ = core.machine.apply(event, &mut events);
        }

        self.emit(events);
        if resumed {
            // a failed write has already been reported through write_failed
            let _ = self.pump(core);
        }
    }
}

//! Character-counting flow control
//!
//! Implements the GRBL streaming protocol: commands are written as long as the
//! total length of sent-but-unacknowledged commands fits the firmware's serial
//! receive buffer, and every `ok`/`error` retires the oldest outstanding
//! command.
//!
//! # Features
//! - Pending and outstanding command queues
//! - Receive buffer byte accounting
//! - FIFO acknowledgement matching
//! - Pause/resume of sending
//! - Configurable reaction to firmware errors
//! - Single-step streaming
//!
//! [`CommandStream`] does no I/O of its own. The controller passes a writer
//! closure into [`CommandStream::pump`] and holds its lock for the whole call,
//! so bookkeeping and writes happen atomically.

use grblstream_core::{
    Command, CommandKind, CommandNumberGenerator, CommandOutcome, CommunicatorEvent,
    ControllerError, IoError,
};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// What to do with the rest of a program after the firmware rejects a command
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPolicy {
    /// Keep streaming
    Continue,
    /// Stop sending and wait for `resume_send`
    #[default]
    Pause,
    /// Drop the rest of the program
    Abort,
}

/// A response that retires an outstanding command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acknowledgement {
    Ok,
    Error(Option<u16>),
}

/// Pending and outstanding commands plus the receive buffer accounting
#[derive(Debug)]
pub struct CommandStream {
    capacity: usize,
    terminator: String,
    error_policy: ErrorPolicy,
    single_step: bool,
    numbers: CommandNumberGenerator,
    pending: VecDeque<Command>,
    outstanding: VecDeque<Command>,
    outstanding_bytes: usize,
    paused: bool,
    program_active: bool,
    program_failed: bool,
}

impl CommandStream {
    /// Create a stream for a firmware with `capacity` bytes of receive buffer
    pub fn new(capacity: usize, terminator: impl Into<String>) -> Self {
        Self {
            capacity,
            terminator: terminator.into(),
            error_policy: ErrorPolicy::default(),
            single_step: false,
            numbers: CommandNumberGenerator::new(),
            pending: VecDeque::new(),
            outstanding: VecDeque::new(),
            outstanding_bytes: 0,
            paused: false,
            program_active: false,
            program_failed: false,
        }
    }

    pub fn set_error_policy(&mut self, policy: ErrorPolicy) {
        self.error_policy = policy;
    }

    /// Only send a command once the previous one has been acknowledged
    pub fn set_single_step(&mut self, enabled: bool) {
        self.single_step = enabled;
    }

    fn build(&self, text: &str) -> Result<Command, ControllerError> {
        let command = Command::new(self.numbers.next_number(), text, &self.terminator);
        if command.byte_len() > self.capacity {
            return Err(ControllerError::BufferOverflow {
                message: format!(
                    "command #{} needs {} bytes but the receive buffer holds {}",
                    command.seq(),
                    command.byte_len(),
                    self.capacity
                ),
            });
        }
        Ok(command)
    }

    /// Queue a whole program
    ///
    /// Fails without side effects if a program is already streaming or if any
    /// command could never fit the receive buffer. Does not send anything;
    /// call [`CommandStream::pump`] afterwards.
    pub fn enqueue_program<I, T>(&mut self, texts: I) -> Result<usize, ControllerError>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        if self.program_active {
            return Err(ControllerError::invalid_state(
                "enqueue a program",
                "a program is streaming",
            ));
        }

        let commands = texts
            .into_iter()
            .map(|text| self.build(text.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;

        let count = commands.len();
        self.pending.extend(commands);
        self.program_active = true;
        self.program_failed = false;
        tracing::debug!("Queued program of {} commands", count);
        Ok(count)
    }

    /// Queue a single command outside of any program
    pub fn enqueue_command(&mut self, text: &str) -> Result<u64, ControllerError> {
        let command = self.build(text)?;
        let seq = command.seq();
        self.pending.push_back(command);
        Ok(seq)
    }

    fn has_room_for(&self, command: &Command) -> bool {
        if self.single_step && !self.outstanding.is_empty() {
            return false;
        }
        self.outstanding_bytes + command.byte_len() <= self.capacity
    }

    /// Send as many pending commands as the receive buffer allows
    ///
    /// Comment-only commands are retired without being written. Status
    /// queries are written as the bare real-time byte and are never
    /// accounted. If `write` fails the command stays at the head of the
    /// pending queue unsent and the error is returned.
    pub fn pump<W>(
        &mut self,
        events: &mut Vec<CommunicatorEvent>,
        mut write: W,
    ) -> Result<(), IoError>
    where
        W: FnMut(&[u8]) -> Result<(), IoError>,
    {
        while !self.paused {
            let Some(next) = self.pending.front() else {
                break;
            };

            match next.kind() {
                CommandKind::CommentOnly => {
                    if let Some(mut command) = self.pending.pop_front() {
                        command.finish(CommandOutcome::CommentOnly, None);
                        tracing::trace!("Skipping {}", command);
                        events.push(CommunicatorEvent::CommandSkipped(command));
                    }
                }
                CommandKind::StatusQuery => {
                    write(b"?")?;
                    if let Some(mut command) = self.pending.pop_front() {
                        command.mark_sent();
                        command.finish(CommandOutcome::Skipped, None);
                        events.push(CommunicatorEvent::CommandSent(command));
                    }
                }
                CommandKind::Gcode => {
                    if !self.has_room_for(next) {
                        break;
                    }

                    let mut line = String::with_capacity(next.byte_len());
                    line.push_str(next.text());
                    line.push_str(&self.terminator);
                    write(line.as_bytes())?;

                    if let Some(mut command) = self.pending.pop_front() {
                        command.mark_sent();
                        self.outstanding_bytes += command.byte_len();
                        tracing::debug!(
                            "Sent {} ({}/{} bytes in flight)",
                            command,
                            self.outstanding_bytes,
                            self.capacity
                        );
                        events.push(CommunicatorEvent::CommandSent(command.clone()));
                        self.outstanding.push_back(command);
                    }
                }
            }
        }

        Ok(())
    }

    /// Retire the oldest outstanding command
    ///
    /// Returns `None` if nothing is outstanding; the caller should then treat
    /// the line as an unsolicited response.
    pub fn acknowledge(
        &mut self,
        ack: Acknowledgement,
        line: &str,
        events: &mut Vec<CommunicatorEvent>,
    ) -> Option<Command> {
        let mut command = self.outstanding.pop_front()?;
        self.outstanding_bytes = self.outstanding_bytes.saturating_sub(command.byte_len());

        let outcome = match ack {
            Acknowledgement::Ok => CommandOutcome::Ok,
            Acknowledgement::Error(code) => CommandOutcome::Error(code),
        };
        command.finish(outcome, Some(line.to_string()));
        events.push(CommunicatorEvent::CommandComplete(command.clone()));

        if let Acknowledgement::Error(code) = ack {
            self.apply_error_policy(&command, code, events);
        }

        Some(command)
    }

    fn apply_error_policy(
        &mut self,
        command: &Command,
        code: Option<u16>,
        events: &mut Vec<CommunicatorEvent>,
    ) {
        if self.program_active {
            self.program_failed = true;
        }

        match self.error_policy {
            ErrorPolicy::Continue => {
                tracing::warn!("{} rejected (error {:?}), continuing", command, code);
            }
            ErrorPolicy::Pause => {
                if !self.pending.is_empty() && !self.paused {
                    tracing::warn!("{} rejected (error {:?}), pausing", command, code);
                    self.paused = true;
                    events.push(CommunicatorEvent::Paused);
                }
            }
            ErrorPolicy::Abort => {
                tracing::warn!(
                    "{} rejected (error {:?}), dropping {} pending commands",
                    command,
                    code,
                    self.pending.len()
                );
                self.discard_pending();
            }
        }
    }

    fn discard_pending(&mut self) {
        for mut command in self.pending.drain(..) {
            command.finish(CommandOutcome::Skipped, None);
        }
    }

    /// Emit `StreamComplete` once a program has been fully sent and acknowledged
    pub fn finish_if_drained(&mut self, events: &mut Vec<CommunicatorEvent>) -> bool {
        if !self.program_active || !self.pending.is_empty() || !self.outstanding.is_empty() {
            return false;
        }
        self.program_active = false;
        let success = !self.program_failed;
        tracing::info!("Program finished ({})", if success { "ok" } else { "with errors" });
        events.push(CommunicatorEvent::StreamComplete { success });
        true
    }

    /// Drop everything pending and outstanding
    ///
    /// Returns true if anything was cleared. A program that was streaming ends
    /// with exactly one `StreamComplete { success: false }`.
    pub fn cancel(&mut self, events: &mut Vec<CommunicatorEvent>) -> bool {
        let had_work = self.is_busy() || self.program_active;

        self.discard_pending();
        for mut command in self.outstanding.drain(..) {
            command.finish(CommandOutcome::Skipped, None);
        }
        self.outstanding_bytes = 0;
        self.paused = false;

        if self.program_active {
            self.program_active = false;
            self.program_failed = false;
            events.push(CommunicatorEvent::StreamComplete { success: false });
        }

        had_work
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// A program was enqueued and has not finished yet
    pub fn is_program_active(&self) -> bool {
        self.program_active
    }

    /// Anything pending or in flight
    pub fn is_busy(&self) -> bool {
        !self.pending.is_empty() || !self.outstanding.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn outstanding_count(&self) -> usize {
        self.outstanding.len()
    }

    /// Bytes currently charged against the receive buffer
    pub fn outstanding_bytes(&self) -> usize {
        self.outstanding_bytes
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn outstanding(&self) -> impl Iterator<Item = &Command> {
        self.outstanding.iter()
    }

    /// Get the current buffer usage as a percentage
    pub fn buffer_usage_percent(&self) -> u32 {
        if self.capacity == 0 {
            return 0;
        }
        ((self.outstanding_bytes as f64 / self.capacity as f64) * 100.0) as u32
    }

    /// Outstanding command texts, oldest first
    pub fn active_command_summary(&self) -> String {
        self.outstanding
            .iter()
            .map(Command::text)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

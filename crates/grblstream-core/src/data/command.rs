//! Streamed command records
//!
//! A [`Command`] is the unit of flow control: its byte length is what the
//! streamer charges against the firmware receive buffer while it is in flight.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// How the streamer treats a command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandKind {
    /// Written to the firmware and acknowledged with `ok`/`error`
    Gcode,
    /// Blank or comment-only; never written, the firmware would not answer it
    CommentOnly,
    /// `?` status poll; answered out-of-band with a status report
    StatusQuery,
}

impl CommandKind {
    /// Classify command text the way the upstream preprocessor does
    ///
    /// Text is comment-only when nothing remains after removing `( ... )`
    /// groups and everything from `;` onwards.
    pub fn classify(text: &str) -> Self {
        let trimmed = text.trim();
        if trimmed == "?" {
            return CommandKind::StatusQuery;
        }

        let mut depth = 0usize;
        for ch in trimmed.chars() {
            match ch {
                ';' if depth == 0 => break,
                '(' => depth += 1,
                ')' if depth > 0 => depth -= 1,
                c if depth == 0 && !c.is_whitespace() => return CommandKind::Gcode,
                _ => {}
            }
        }
        CommandKind::CommentOnly
    }
}

/// Final classification of a command once it is done
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandOutcome {
    /// Acknowledged with `ok`
    Ok,
    /// Rejected with `error`, carrying the numeric code when the firmware sent one
    Error(Option<u16>),
    /// Comment-only; never sent
    CommentOnly,
    /// Discarded by cancel or reset, or answered out-of-band
    Skipped,
}

/// A command plus its delivery state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    seq: u64,
    text: String,
    byte_len: usize,
    kind: CommandKind,
    sent: bool,
    done: bool,
    response: Option<String>,
    outcome: Option<CommandOutcome>,
}

impl Command {
    /// Create a command; `terminator` is what goes on the wire after the text
    pub fn new(seq: u64, text: impl Into<String>, terminator: &str) -> Self {
        let text = text.into();
        let kind = CommandKind::classify(&text);
        let byte_len = match kind {
            CommandKind::Gcode => text.len() + terminator.len(),
            CommandKind::CommentOnly | CommandKind::StatusQuery => 0,
        };
        Self {
            seq,
            text,
            byte_len,
            kind,
            sent: false,
            done: false,
            response: None,
            outcome: None,
        }
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Bytes charged against the receive buffer while this command is outstanding
    pub fn byte_len(&self) -> usize {
        self.byte_len
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    pub fn is_status_query(&self) -> bool {
        self.kind == CommandKind::StatusQuery
    }

    pub fn is_comment_only(&self) -> bool {
        self.kind == CommandKind::CommentOnly
    }

    pub fn is_sent(&self) -> bool {
        self.sent
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn response(&self) -> Option<&str> {
        self.response.as_deref()
    }

    pub fn outcome(&self) -> Option<CommandOutcome> {
        self.outcome
    }

    /// True once the firmware rejected this command
    pub fn is_error(&self) -> bool {
        matches!(self.outcome, Some(CommandOutcome::Error(_)))
    }

    /// Mark the command as written. Returns false if it was already sent.
    pub fn mark_sent(&mut self) -> bool {
        if self.sent {
            return false;
        }
        self.sent = true;
        true
    }

    /// Mark the command done with its outcome and the raw response, if any
    ///
    /// Returns false and leaves the command untouched if it is already done.
    pub fn finish(&mut self, outcome: CommandOutcome, response: Option<String>) -> bool {
        if self.done {
            return false;
        }
        self.done = true;
        self.outcome = Some(outcome);
        if self.response.is_none() {
            self.response = response;
        }
        true
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {}", self.seq, self.text)
    }
}

/// Hands out strictly increasing sequence numbers for one session
#[derive(Debug, Default)]
pub struct CommandNumberGenerator {
    next: AtomicU64,
}

impl CommandNumberGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_number(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

//! Event system for controller notifications
//!
//! The streaming controller never calls listeners directly. It hands every
//! [`CommunicatorEvent`] to an [`EventDispatcher`], which delivers it either
//! inline ([`SynchronousEventDispatcher`]) or from a dedicated consumer thread
//! ([`AsyncEventDispatcher`]). Either way listeners see events in the order
//! they were produced.

mod async_dispatcher;
mod dispatcher;

pub use async_dispatcher::AsyncEventDispatcher;
pub use dispatcher::{EventDispatcher, ListenerRegistry, SynchronousEventDispatcher};

use crate::data::{CNCPoint, Command, ControllerState, ControllerStatus};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Handle returned when registering a listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(Uuid);

impl ListenerId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Listener({})", &self.0.to_string()[..8])
    }
}

/// Receives dispatched events
pub trait EventListener<E>: Send + Sync {
    fn on_event(&self, event: &E);
}

impl<E, F> EventListener<E> for F
where
    F: Fn(&E) + Send + Sync,
{
    fn on_event(&self, event: &E) {
        self(event)
    }
}

/// Notifications produced while streaming
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommunicatorEvent {
    /// A command was written to the transport
    CommandSent(Command),
    /// A comment-only command was retired without being written
    CommandSkipped(Command),
    /// A command was matched to its `ok`/`error` response
    CommandComplete(Command),
    /// A response line arrived that did not acknowledge a command
    RawResponse { line: String },
    /// Sending stopped, either by request or by the error policy
    Paused,
    /// A status report was parsed
    StatusUpdated(ControllerStatus),
    /// The streamed program ended
    StreamComplete { success: bool },
    /// The controller state machine moved to a different state
    StateChanged {
        from: ControllerState,
        to: ControllerState,
    },
    /// The firmware raised an alarm
    Alarm { code: u16, description: String },
    /// The firmware reported a probe cycle result
    ProbeResult { position: CNCPoint, success: bool },
    /// The transport failed; the current stream is broken
    ConnectionError { reason: String },
}

impl fmt::Display for CommunicatorEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CommandSent(cmd) => write!(f, "Sent: {}", cmd),
            Self::CommandSkipped(cmd) => write!(f, "Skipped: {}", cmd),
            Self::CommandComplete(cmd) => write!(
                f,
                "Complete: {} -> {}",
                cmd,
                cmd.response().unwrap_or("(no response)")
            ),
            Self::RawResponse { line } => write!(f, "Response: {}", line),
            Self::Paused => write!(f, "Paused"),
            Self::StatusUpdated(status) => write!(
                f,
                "Status: {} MPos {} WPos {}",
                status.state_string, status.machine_coord, status.work_coord
            ),
            Self::StreamComplete { success } => write!(
                f,
                "Stream complete ({})",
                if *success { "success" } else { "failed" }
            ),
            Self::StateChanged { from, to } => write!(f, "State: {} -> {}", from, to),
            Self::Alarm { code, description } => write!(f, "ALARM:{} {}", code, description),
            Self::ProbeResult { position, success } => {
                write!(f, "Probe {}: {}", if *success { "hit" } else { "miss" }, position)
            }
            Self::ConnectionError { reason } => write!(f, "Connection error: {}", reason),
        }
    }
}

/// Which dispatcher a controller should use
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// Listeners run inline on the producing thread
    Sync,
    /// Listeners run on a dedicated consumer thread
    #[default]
    Async,
}

impl DispatchMode {
    /// Build and start a dispatcher of this kind
    pub fn create<E>(self) -> Arc<dyn EventDispatcher<E>>
    where
        E: Send + 'static,
    {
        let dispatcher: Arc<dyn EventDispatcher<E>> = match self {
            DispatchMode::Sync => Arc::new(SynchronousEventDispatcher::new()),
            DispatchMode::Async => Arc::new(AsyncEventDispatcher::new()),
        };
        dispatcher.start();
        dispatcher
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_json_is_tagged() {
        let json = serde_json::to_value(CommunicatorEvent::StreamComplete { success: true })
            .unwrap();
        assert_eq!(json["type"], "stream_complete");
        assert_eq!(json["success"], true);
    }

    #[test]
    fn test_event_display() {
        let event = CommunicatorEvent::StateChanged {
            from: ControllerState::Idle,
            to: ControllerState::Run,
        };
        assert_eq!(event.to_string(), "State: Idle -> Run");
    }
}

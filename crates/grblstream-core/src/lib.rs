//! # grblstream Core
//!
//! Core types, traits, and utilities for grblstream.
//! Provides the fundamental abstractions for the streaming controller:
//! error types, the data model, a table-driven state machine and the
//! event dispatchers.

pub mod data;
pub mod error;
pub mod event;
pub mod state_machine;

pub use data::{
    BufferAvailability, CNCPoint, Command, CommandKind, CommandNumberGenerator, CommandOutcome,
    ControllerState, ControllerStatus, EnabledPins, OverridePercents, Units,
};

pub use error::{
    ConfigError, ConnectionError, ControllerError, Error, IoError, Result, StateMachineError,
};

pub use event::{
    AsyncEventDispatcher, CommunicatorEvent, DispatchMode, EventDispatcher, EventListener,
    ListenerId, ListenerRegistry, SynchronousEventDispatcher,
};

pub use state_machine::{StateMachine, StateMachineBuilder};

//! Controller state table
//!
//! Maps stream progress, caller requests and firmware reports onto
//! [`ControllerState`]. Events with no entry for the current state are
//! ignored; the controller checks the `can_*` queries before acting on caller
//! requests, so an ignored event never hides a caller error.

use grblstream_core::{CommunicatorEvent, ControllerState, StateMachine, StateMachineBuilder};

/// Inputs to the controller state table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MachineEvent {
    Connected,
    Disconnected,
    /// A command went out while idle
    StreamStarted,
    /// Nothing pending and nothing awaiting acknowledgement
    StreamFinished,
    HoldRequested,
    /// Resume with commands still to send or acknowledge
    ResumeRequested,
    /// Resume with nothing left to do
    ResumeIdle,
    /// Pending and outstanding commands dropped by the caller
    Cancelled,
    FirmwareIdle,
    FirmwareRun,
    FirmwareHold,
    FirmwareCheck,
    AlarmRaised,
    /// `$X` accepted
    Unlocked,
    /// Startup banner, printed after a reset
    Welcome,
    WriteFailed,
}

/// Context passed to the table's callbacks: events to dispatch once the
/// caller is done
pub type MachineOutput = Vec<CommunicatorEvent>;

pub type ControllerMachine = StateMachine<ControllerState, MachineEvent, MachineOutput>;

const ALL_STATES: [ControllerState; 7] = [
    ControllerState::Disconnected,
    ControllerState::Idle,
    ControllerState::Run,
    ControllerState::Hold,
    ControllerState::Alarm,
    ControllerState::Check,
    ControllerState::Error,
];

/// Build the controller state table, starting disconnected
pub fn controller_machine() -> ControllerMachine {
    use ControllerState::*;
    use MachineEvent as Ev;

    let mut builder = StateMachineBuilder::new(Disconnected)
        .add_transition(Disconnected, Ev::Connected, Idle)
        .add_transition_from_any(Ev::Disconnected, Disconnected)
        // streaming
        .add_transition(Idle, Ev::StreamStarted, Run)
        .add_transition(Run, Ev::StreamFinished, Idle)
        .add_transition(Run, Ev::HoldRequested, Hold)
        .add_transition(Hold, Ev::ResumeRequested, Run)
        .add_transition(Hold, Ev::ResumeIdle, Idle)
        .add_transitions(&[Run, Hold, Check], Ev::Cancelled, Idle)
        // firmware reports
        .add_transitions(&[Run, Hold, Check], Ev::FirmwareIdle, Idle)
        .add_transitions(&[Idle, Hold], Ev::FirmwareRun, Run)
        .add_transitions(&[Idle, Run], Ev::FirmwareHold, Hold)
        .add_transitions(&[Idle, Run, Hold], Ev::FirmwareCheck, Check)
        // alarms stay until unlocked or disconnected
        .add_transitions(&[Idle, Run, Hold, Check, Error], Ev::AlarmRaised, Alarm)
        .add_transition(Alarm, Ev::Unlocked, Idle)
        .add_transitions(&[Run, Hold, Check, Error], Ev::Welcome, Idle)
        .add_transitions(&[Idle, Run, Hold, Check], Ev::WriteFailed, Error)
        .on_transition(|from, event, to, output: &mut MachineOutput| {
            if from != to {
                tracing::info!("Controller state {} -> {} on {:?}", from, to, event);
                output.push(CommunicatorEvent::StateChanged { from, to });
            }
        })
        .raise_on_unmatched(false);

    for state in ALL_STATES {
        builder = builder
            .on_enter(state, move |_: &mut MachineOutput| {
                tracing::debug!("Entering {}", state)
            })
            .on_exit(state, move |_: &mut MachineOutput| {
                tracing::debug!("Leaving {}", state)
            });
    }

    builder.build()
}

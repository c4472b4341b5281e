//! XY corner probing
//!
//! Finds the outside corner of a workpiece by touching its Y edge and then
//! its X edge. Each edge gets a fast probe, a short retract and a slow probe
//! at half the feed rate. The sequence is a [`StateMachine`]; entering a
//! state queues the G-code for that step and [`ProbeSession`] sends it once
//! the controller is idle again.
//!
//! The tool starts diagonally outside the corner. Spacings are signed: they
//! give the direction towards the workpiece on each axis.

use super::controller::GrblController;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use grblstream_core::{
    CNCPoint, CommunicatorEvent, ControllerError, ControllerState, Result, StateMachine,
    StateMachineBuilder, StateMachineError,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Steps of the corner probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProbeState {
    Waiting,
    /// Move beside the Y edge
    Setup,
    ProbeY,
    RetractY,
    SlowY,
    ProbedY,
    /// Back off and move beside the X edge
    StoreY,
    ProbeX,
    RetractX,
    SlowX,
    ProbedX,
    /// Return to the start position
    Finalize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProbeEvent {
    Start,
    /// The controller went idle
    Idle,
    /// The firmware reported a probe contact
    Probed,
    /// A status report arrived
    Position,
}

/// Corner probe geometry
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProbeParams {
    /// Distance along X from the start position to the Y probing lane
    pub x_spacing: f64,
    /// Distance along Y from the start position to the X probing lane
    pub y_spacing: f64,
    /// Fast probe feed rate in mm/min
    pub feed_rate: f64,
}

impl Default for ProbeParams {
    fn default() -> Self {
        Self {
            x_spacing: 10.0,
            y_spacing: 10.0,
            feed_rate: 100.0,
        }
    }
}

/// Edge positions found by a completed probe, in machine coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CornerResult {
    /// Contact point on the X edge
    pub x_contact: CNCPoint,
    /// Contact point on the Y edge
    pub y_contact: CNCPoint,
}

impl CornerResult {
    /// The corner as `(x, y)`
    pub fn corner(&self) -> (f64, f64) {
        (self.x_contact.x, self.y_contact.y)
    }
}

#[derive(Debug)]
struct ProbeContext {
    params: ProbeParams,
    start: CNCPoint,
    last_contact: Option<CNCPoint>,
    y_contact: Option<CNCPoint>,
    x_contact: Option<CNCPoint>,
    outbox: Vec<String>,
    failure: Option<String>,
}

impl ProbeContext {
    fn push(&mut self, command: String) {
        self.outbox.push(command);
    }

    fn probe(&mut self, axis: char, distance: f64, feed: f64) {
        self.push("G21 G91 G49".to_string());
        self.push(format!("G38.2 {}{} F{}", axis, num(distance), num(feed)));
    }

    fn rapid(&mut self, axis: char, distance: f64) {
        self.push(format!("G91 G21 G0 {}{}", axis, num(distance)));
    }

    /// Take the contact recorded for the edge just probed
    fn take_contact(&mut self) -> Option<CNCPoint> {
        let contact = self.last_contact.take();
        if contact.is_none() {
            self.failure = Some("no probe contact recorded".to_string());
        }
        contact
    }
}

fn num(value: f64) -> String {
    format!("{:.3}", value)
}

type ProbeMachine = StateMachine<ProbeState, ProbeEvent, ProbeContext>;

fn probe_machine() -> ProbeMachine {
    use ProbeEvent as Ev;
    use ProbeState::*;

    StateMachineBuilder::new(Waiting)
        .add_transition(Waiting, Ev::Start, Setup)
        .add_transition(Setup, Ev::Idle, ProbeY)
        .add_transition(ProbeY, Ev::Probed, RetractY)
        .add_transition(RetractY, Ev::Idle, SlowY)
        .add_transition(SlowY, Ev::Probed, ProbedY)
        .add_transition(ProbedY, Ev::Position, StoreY)
        .add_transition(StoreY, Ev::Idle, ProbeX)
        .add_transition(ProbeX, Ev::Probed, RetractX)
        .add_transition(RetractX, Ev::Idle, SlowX)
        .add_transition(SlowX, Ev::Probed, ProbedX)
        .add_transition(ProbedX, Ev::Position, Finalize)
        .on_enter(Setup, |ctx: &mut ProbeContext| {
            let x = ctx.params.x_spacing;
            ctx.rapid('X', x);
        })
        .on_enter(ProbeY, |ctx: &mut ProbeContext| {
            let (y, feed) = (ctx.params.y_spacing, ctx.params.feed_rate);
            ctx.probe('Y', y, feed);
        })
        .on_enter(RetractY, |ctx: &mut ProbeContext| {
            let y = ctx.params.y_spacing;
            ctx.rapid('Y', -y / 10.0);
        })
        .on_enter(SlowY, |ctx: &mut ProbeContext| {
            let (y, feed) = (ctx.params.y_spacing, ctx.params.feed_rate);
            ctx.probe('Y', y, feed / 2.0);
        })
        .on_enter(StoreY, |ctx: &mut ProbeContext| {
            let Some(contact) = ctx.take_contact() else {
                return;
            };
            ctx.y_contact = Some(contact);
            let (x, y, start_y) = (ctx.params.x_spacing, ctx.params.y_spacing, ctx.start.y);
            ctx.rapid('Y', start_y - contact.y);
            ctx.rapid('X', -x);
            ctx.rapid('Y', y);
        })
        .on_enter(ProbeX, |ctx: &mut ProbeContext| {
            let (x, feed) = (ctx.params.x_spacing, ctx.params.feed_rate);
            ctx.probe('X', x, feed);
        })
        .on_enter(RetractX, |ctx: &mut ProbeContext| {
            let x = ctx.params.x_spacing;
            ctx.rapid('X', -x / 10.0);
        })
        .on_enter(SlowX, |ctx: &mut ProbeContext| {
            let (x, feed) = (ctx.params.x_spacing, ctx.params.feed_rate);
            ctx.probe('X', x, feed / 2.0);
        })
        .on_enter(Finalize, |ctx: &mut ProbeContext| {
            let Some(contact) = ctx.take_contact() else {
                return;
            };
            ctx.x_contact = Some(contact);
            let (y, start_x) = (ctx.params.y_spacing, ctx.start.x);
            ctx.rapid('X', start_x - contact.x);
            ctx.rapid('Y', -y);
            ctx.push("G90".to_string());
        })
        .on_transition(|from, event, to, _: &mut ProbeContext| {
            if from != to {
                tracing::debug!("Corner probe {:?} -> {:?} on {:?}", from, to, event);
            }
        })
        .raise_on_unmatched(false)
        .build()
}

/// The corner probe sequence, independent of any connection
#[derive(Debug)]
pub struct CornerProbe {
    machine: ProbeMachine,
    context: ProbeContext,
}

impl CornerProbe {
    /// A probe starting from `start`, in machine coordinates
    pub fn new(params: ProbeParams, start: CNCPoint) -> Self {
        Self {
            machine: probe_machine(),
            context: ProbeContext {
                params,
                start,
                last_contact: None,
                y_contact: None,
                x_contact: None,
                outbox: Vec::new(),
                failure: None,
            },
        }
    }

    pub fn state(&self) -> ProbeState {
        self.machine.current()
    }

    /// Feed an event; returns the new state when it caused a transition
    pub fn apply(
        &mut self,
        event: ProbeEvent,
    ) -> std::result::Result<Option<ProbeState>, StateMachineError> {
        self.machine.apply(event, &mut self.context)
    }

    /// Remember where the firmware reported contact
    pub fn record_contact(&mut self, position: CNCPoint) {
        self.context.last_contact = Some(position);
    }

    /// Drain the commands queued by the last transitions
    pub fn take_commands(&mut self) -> Vec<String> {
        std::mem::take(&mut self.context.outbox)
    }

    pub fn has_commands(&self) -> bool {
        !self.context.outbox.is_empty()
    }

    pub fn failure(&self) -> Option<&str> {
        self.context.failure.as_deref()
    }

    pub fn is_finished(&self) -> bool {
        self.state() == ProbeState::Finalize && self.context.failure.is_none()
    }

    /// Both contacts, once the probe reached its final step
    pub fn result(&self) -> Option<CornerResult> {
        if !self.is_finished() {
            return None;
        }
        Some(CornerResult {
            x_contact: self.context.x_contact?,
            y_contact: self.context.y_contact?,
        })
    }
}

/// Runs a [`CornerProbe`] against a connected controller
///
/// Blocks the calling thread. Commands are only sent while the controller is
/// idle, so every step waits for the previous moves to finish.
#[derive(Debug, Clone)]
pub struct ProbeSession {
    params: ProbeParams,
    poll_interval: Duration,
    timeout: Duration,
}

impl ProbeSession {
    pub fn new(params: ProbeParams) -> Self {
        Self {
            params,
            poll_interval: Duration::from_millis(100),
            timeout: Duration::from_secs(120),
        }
    }

    /// Interval between status queries while waiting for the firmware
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Give up after `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn run(&self, controller: &GrblController) -> Result<CornerResult> {
        let state = controller.state();
        if !state.is_connected() {
            return Err(ControllerError::NotConnected.into());
        }
        if !controller.is_idle() {
            return Err(ControllerError::invalid_state("probe", state).into());
        }

        let (tx, rx) = crossbeam_channel::unbounded();
        let id = controller.add_listener(Arc::new(move |event: &CommunicatorEvent| {
            let _ = tx.send(event.clone());
        }));

        let start = controller.controller_status().machine_coord;
        tracing::info!("Corner probe from {}", start);
        let mut probe = CornerProbe::new(self.params, start);
        let result = self.drive(controller, &mut probe, &rx);
        controller.remove_listener(id);

        match &result {
            Ok(corner) => {
                let (x, y) = corner.corner();
                tracing::info!("Corner found at X:{:.3} Y:{:.3}", x, y);
            }
            Err(err) => tracing::error!("Corner probe failed in {:?}: {}", probe.state(), err),
        }
        result
    }

    fn drive(
        &self,
        controller: &GrblController,
        probe: &mut CornerProbe,
        events: &Receiver<CommunicatorEvent>,
    ) -> Result<CornerResult> {
        let deadline = Instant::now() + self.timeout;
        probe.apply(ProbeEvent::Start)?;

        loop {
            if let Some(reason) = probe.failure() {
                return Err(failed(reason));
            }
            if probe.has_commands() && controller.is_idle() {
                controller.send_commands(probe.take_commands())?;
            }
            if probe.is_finished() && !probe.has_commands() && controller.is_idle() {
                return probe
                    .result()
                    .ok_or_else(|| failed("probe finished without both contacts"));
            }
            if Instant::now() >= deadline {
                return Err(failed(&format!("timed out in {:?}", probe.state())));
            }

            match events.recv_timeout(self.poll_interval) {
                Ok(event) => self.handle(probe, event)?,
                Err(RecvTimeoutError::Timeout) => controller.query_status()?,
                Err(RecvTimeoutError::Disconnected) => return Err(failed("event channel closed")),
            }
        }
    }

    fn handle(&self, probe: &mut CornerProbe, event: CommunicatorEvent) -> Result<()> {
        match event {
            CommunicatorEvent::StateChanged { to, .. } => match to {
                ControllerState::Idle => {
                    probe.apply(ProbeEvent::Idle)?;
                }
                ControllerState::Alarm | ControllerState::Error | ControllerState::Disconnected => {
                    return Err(failed(&format!("controller entered {}", to)));
                }
                _ => {}
            },
            CommunicatorEvent::ProbeResult { position, success } => {
                if !success {
                    return Err(failed("no contact within the probe distance"));
                }
                probe.record_contact(position);
                probe.apply(ProbeEvent::Probed)?;
            }
            CommunicatorEvent::StatusUpdated(_) => {
                probe.apply(ProbeEvent::Position)?;
            }
            CommunicatorEvent::Alarm { code, description } => {
                return Err(failed(&format!("ALARM:{} {}", code, description)));
            }
            CommunicatorEvent::ConnectionError { reason } => return Err(failed(&reason)),
            _ => {}
        }
        Ok(())
    }
}

fn failed(reason: &str) -> grblstream_core::Error {
    ControllerError::ProbeFailed {
        reason: reason.to_string(),
    }
    .into()
}

//! Table-driven state machine
//!
//! A machine is described by a table of `(state, event) -> state` transitions,
//! optional wildcard transitions that apply from any state, and lists of
//! callbacks that run when a state is entered or left. The context type `C`
//! is passed mutably to every callback so workflows can accumulate output
//! without the machine knowing anything about it.
//!
//! The same utility drives the controller state tracking and the probing
//! workflow.
//!
//! ```
//! use grblstream_core::state_machine::StateMachineBuilder;
//!
//! #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
//! enum Door { Open, Closed }
//! #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
//! enum Push { Open, Close }
//!
//! let mut machine = StateMachineBuilder::<Door, Push, Vec<&str>>::new(Door::Closed)
//!     .add_transition(Door::Closed, Push::Open, Door::Open)
//!     .add_transition(Door::Open, Push::Close, Door::Closed)
//!     .on_enter(Door::Open, |log| log.push("opened"))
//!     .build();
//!
//! let mut log = Vec::new();
//! machine.apply(Push::Open, &mut log).unwrap();
//! assert_eq!(machine.current(), Door::Open);
//! assert_eq!(log, vec!["opened"]);
//! ```

use crate::error::StateMachineError;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;

/// Callback run on entering or leaving a state
pub type StateCallback<C> = Box<dyn Fn(&mut C) + Send + Sync>;

/// Observer run after every matched event: `(from, event, to, context)`
pub type TransitionCallback<S, E, C> = Box<dyn Fn(S, E, S, &mut C) + Send + Sync>;

/// Builder for [`StateMachine`]
pub struct StateMachineBuilder<S, E, C> {
    initial: S,
    transitions: HashMap<(S, E), S>,
    any_state: HashMap<E, S>,
    on_enter: HashMap<S, Vec<StateCallback<C>>>,
    on_exit: HashMap<S, Vec<StateCallback<C>>>,
    on_transition: Vec<TransitionCallback<S, E, C>>,
    raise_on_unmatched: bool,
}

impl<S, E, C> StateMachineBuilder<S, E, C>
where
    S: Copy + Eq + Hash + Debug,
    E: Copy + Eq + Hash + Debug,
{
    /// Start a machine in `initial`
    pub fn new(initial: S) -> Self {
        Self {
            initial,
            transitions: HashMap::new(),
            any_state: HashMap::new(),
            on_enter: HashMap::new(),
            on_exit: HashMap::new(),
            on_transition: Vec::new(),
            raise_on_unmatched: true,
        }
    }

    /// Add `from --event--> to`; a later call for the same pair replaces it
    pub fn add_transition(mut self, from: S, event: E, to: S) -> Self {
        self.transitions.insert((from, event), to);
        self
    }

    /// Add the same transition from several states
    pub fn add_transitions(mut self, from: &[S], event: E, to: S) -> Self {
        for state in from {
            self.transitions.insert((*state, event), to);
        }
        self
    }

    /// Add a transition taken from any state without a specific entry for `event`
    pub fn add_transition_from_any(mut self, event: E, to: S) -> Self {
        self.any_state.insert(event, to);
        self
    }

    /// Run `callback` whenever `state` is entered from a different state
    pub fn on_enter<F>(mut self, state: S, callback: F) -> Self
    where
        F: Fn(&mut C) + Send + Sync + 'static,
    {
        self.on_enter
            .entry(state)
            .or_default()
            .push(Box::new(callback));
        self
    }

    /// Run `callback` whenever `state` is left for a different state
    pub fn on_exit<F>(mut self, state: S, callback: F) -> Self
    where
        F: Fn(&mut C) + Send + Sync + 'static,
    {
        self.on_exit
            .entry(state)
            .or_default()
            .push(Box::new(callback));
        self
    }

    /// Observe every matched event, including self-transitions
    pub fn on_transition<F>(mut self, callback: F) -> Self
    where
        F: Fn(S, E, S, &mut C) + Send + Sync + 'static,
    {
        self.on_transition.push(Box::new(callback));
        self
    }

    /// Choose whether an event with no transition raises
    /// [`StateMachineError::UnexpectedEvent`] (the default) or is ignored
    pub fn raise_on_unmatched(mut self, raise: bool) -> Self {
        self.raise_on_unmatched = raise;
        self
    }

    pub fn build(self) -> StateMachine<S, E, C> {
        StateMachine {
            current: self.initial,
            transitions: self.transitions,
            any_state: self.any_state,
            on_enter: self.on_enter,
            on_exit: self.on_exit,
            on_transition: self.on_transition,
            raise_on_unmatched: self.raise_on_unmatched,
        }
    }
}

/// A built state machine
pub struct StateMachine<S, E, C> {
    current: S,
    transitions: HashMap<(S, E), S>,
    any_state: HashMap<E, S>,
    on_enter: HashMap<S, Vec<StateCallback<C>>>,
    on_exit: HashMap<S, Vec<StateCallback<C>>>,
    on_transition: Vec<TransitionCallback<S, E, C>>,
    raise_on_unmatched: bool,
}

impl<S, E, C> StateMachine<S, E, C>
where
    S: Copy + Eq + Hash + Debug,
    E: Copy + Eq + Hash + Debug,
{
    pub fn current(&self) -> S {
        self.current
    }

    /// Target state for `event` from the current state, if any
    pub fn target(&self, event: E) -> Option<S> {
        self.transitions
            .get(&(self.current, event))
            .or_else(|| self.any_state.get(&event))
            .copied()
    }

    pub fn can_apply(&self, event: E) -> bool {
        self.target(event).is_some()
    }

    /// Apply an event
    ///
    /// Returns the new state when a transition matched, `Ok(None)` when the
    /// event was ignored. Exit callbacks of the old state run before enter
    /// callbacks of the new one; neither runs on a self-transition.
    pub fn apply(&mut self, event: E, context: &mut C) -> Result<Option<S>, StateMachineError> {
        let Some(to) = self.target(event) else {
            if self.raise_on_unmatched {
                return Err(StateMachineError::UnexpectedEvent {
                    state: format!("{:?}", self.current),
                    event: format!("{:?}", event),
                });
            }
            tracing::trace!("Ignoring {:?} in state {:?}", event, self.current);
            return Ok(None);
        };

        let from = self.current;
        if from != to {
            if let Some(callbacks) = self.on_exit.get(&from) {
                for callback in callbacks {
                    callback(context);
                }
            }
            self.current = to;
            if let Some(callbacks) = self.on_enter.get(&to) {
                for callback in callbacks {
                    callback(context);
                }
            }
        }

        for observer in &self.on_transition {
            observer(from, event, to, context);
        }

        Ok(Some(to))
    }
}

impl<S: Debug, E, C> std::fmt::Debug for StateMachine<S, E, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateMachine")
            .field("current", &self.current)
            .field("transitions", &self.transitions.len())
            .field("raise_on_unmatched", &self.raise_on_unmatched)
            .finish()
    }
}

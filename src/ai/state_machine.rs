//! Generic finite state machine with named states, ordered transitions and a
//! fluent builder.
//!
//! The machine does not own the context it drives. Callbacks and conditions
//! receive it by reference on every call, so the same agent data can be
//! shared with behaviors without interior mutability.

use std::collections::{BTreeMap, VecDeque};

use micromegas_tracing::prelude::*;
use thiserror::Error;

pub type Callback<C> = Box<dyn FnMut(&mut C) + Send + Sync>;
/// Update callbacks get `(context, time_ms, delta_ms)`.
pub type UpdateCallback<C> = Box<dyn FnMut(&mut C, f64, f64) + Send + Sync>;
/// Transition predicates must be pure.
pub type Condition<C> = Box<dyn Fn(&C) -> bool + Send + Sync>;

pub const DEFAULT_HISTORY_LIMIT: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateMachineError {
    #[error("state machine has no initial state")]
    NoInitialState,
    #[error("unknown state `{0}`")]
    UnknownState(String),
    #[error("transition from `{from}` targets unknown state `{target}`")]
    DanglingTransition { from: String, target: String },
}

struct Transition<C> {
    condition: Condition<C>,
    target: String,
}

pub struct State<C> {
    name: String,
    on_enter: Option<Callback<C>>,
    on_update: Option<UpdateCallback<C>>,
    on_exit: Option<Callback<C>>,
    transitions: Vec<Transition<C>>,
}

impl<C> State<C> {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            on_enter: None,
            on_update: None,
            on_exit: None,
            transitions: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_on_enter(&mut self, f: impl FnMut(&mut C) + Send + Sync + 'static) -> &mut Self {
        self.on_enter = Some(Box::new(f));
        self
    }

    pub fn set_on_update(
        &mut self,
        f: impl FnMut(&mut C, f64, f64) + Send + Sync + 'static,
    ) -> &mut Self {
        self.on_update = Some(Box::new(f));
        self
    }

    pub fn set_on_exit(&mut self, f: impl FnMut(&mut C) + Send + Sync + 'static) -> &mut Self {
        self.on_exit = Some(Box::new(f));
        self
    }

    /// Transitions are evaluated in the order they were added.
    pub fn add_transition(&mut self, condition: Condition<C>, target: &str) -> &mut Self {
        self.transitions.push(Transition {
            condition,
            target: target.to_owned(),
        });
        self
    }

    pub fn transition_targets(&self) -> impl Iterator<Item = &str> {
        self.transitions.iter().map(|t| t.target.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub from: Option<String>,
    pub to: String,
    /// Time of the last `update` seen before the switch.
    pub time: f64,
}

pub struct StateMachine<C> {
    states: BTreeMap<String, State<C>>,
    current: Option<String>,
    initial: Option<String>,
    started: bool,
    history: VecDeque<HistoryEntry>,
    history_limit: usize,
    last_time: f64,
}

impl<C> Default for StateMachine<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> StateMachine<C> {
    pub fn new() -> Self {
        Self {
            states: BTreeMap::new(),
            current: None,
            initial: None,
            started: false,
            history: VecDeque::new(),
            history_limit: DEFAULT_HISTORY_LIMIT,
            last_time: 0.0,
        }
    }

    /// Returns the state called `name`, creating it if needed.
    pub fn create_state(&mut self, name: &str) -> &mut State<C> {
        self.states
            .entry(name.to_owned())
            .or_insert_with(|| State::new(name))
    }

    pub fn set_initial_state(&mut self, name: &str) {
        self.initial = Some(name.to_owned());
    }

    pub fn set_history_limit(&mut self, limit: usize) {
        self.history_limit = limit;
        while self.history.len() > limit {
            self.history.pop_front();
        }
    }

    pub fn has_state(&self, name: &str) -> bool {
        self.states.contains_key(name)
    }

    pub fn state_names(&self) -> impl Iterator<Item = &str> {
        self.states.keys().map(String::as_str)
    }

    pub fn current_state_name(&self) -> Option<&str> {
        self.current.as_deref()
    }

    pub fn is_in_state(&self, name: &str) -> bool {
        self.current.as_deref() == Some(name)
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Most recent transitions, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.history.iter()
    }

    /// Enter the initial state. Starting an already running machine does
    /// nothing.
    pub fn start(&mut self, ctx: &mut C) -> Result<(), StateMachineError> {
        if self.started {
            return Ok(());
        }
        let Some(initial) = self.initial.clone() else {
            error!("state machine started without an initial state");
            return Err(StateMachineError::NoInitialState);
        };
        self.switch_to(ctx, &initial)
    }

    /// Run the current state's update callback, then fire at most one
    /// transition: the first whose condition holds.
    pub fn update(&mut self, ctx: &mut C, time: f64, delta: f64) {
        if !self.started {
            return;
        }
        self.last_time = time;
        let Some(current) = self.current.clone() else {
            return;
        };
        let Some(state) = self.states.get_mut(&current) else {
            return;
        };

        if let Some(on_update) = state.on_update.as_mut() {
            on_update(ctx, time, delta);
        }

        let target = state
            .transitions
            .iter()
            .find(|t| (t.condition)(&*ctx))
            .map(|t| t.target.clone());

        if let Some(target) = target {
            // Unknown targets are reported inside switch_to; the machine
            // stays where it is.
            let _ = self.switch_to(ctx, &target);
        }
    }

    /// Switch to `name` unless already there.
    pub fn change_state(&mut self, ctx: &mut C, name: &str) -> Result<(), StateMachineError> {
        if self.started && self.is_in_state(name) {
            return Ok(());
        }
        self.switch_to(ctx, name)
    }

    /// Switch to `name` even if it is the current state, running exit and
    /// enter again.
    pub fn force_state(&mut self, ctx: &mut C, name: &str) -> Result<(), StateMachineError> {
        self.switch_to(ctx, name)
    }

    /// Exit the current state and release the state table. The machine is
    /// inert afterwards.
    pub fn destroy(&mut self, ctx: &mut C) {
        if let Some(current) = self.current.take()
            && let Some(exit) = self
                .states
                .get_mut(&current)
                .and_then(|s| s.on_exit.as_mut())
        {
            exit(ctx);
        }
        self.states.clear();
        self.started = false;
    }

    /// Every transition whose target is not a defined state, in state-name
    /// order.
    pub fn dangling_transitions(&self) -> Vec<(String, String)> {
        self.states
            .values()
            .flat_map(|state| {
                state
                    .transition_targets()
                    .filter(|target| !self.states.contains_key(*target))
                    .map(|target| (state.name.clone(), target.to_owned()))
            })
            .collect()
    }

    /// Check the machine can start and every transition resolves.
    pub fn validate(&self) -> Result<(), StateMachineError> {
        let Some(initial) = self.initial.as_deref() else {
            return Err(StateMachineError::NoInitialState);
        };
        if !self.states.contains_key(initial) {
            return Err(StateMachineError::UnknownState(initial.to_owned()));
        }
        match self.dangling_transitions().into_iter().next() {
            Some((from, target)) => Err(StateMachineError::DanglingTransition { from, target }),
            None => Ok(()),
        }
    }

    fn switch_to(&mut self, ctx: &mut C, name: &str) -> Result<(), StateMachineError> {
        if !self.states.contains_key(name) {
            error!(
                "state machine: unknown state `{}` (staying in {:?})",
                name, self.current
            );
            return Err(StateMachineError::UnknownState(name.to_owned()));
        }

        let from = self.current.take();
        if let Some(exit) = from
            .as_ref()
            .and_then(|f| self.states.get_mut(f))
            .and_then(|s| s.on_exit.as_mut())
        {
            exit(ctx);
        }

        self.record(from, name);
        self.current = Some(name.to_owned());
        self.started = true;

        if let Some(enter) = self
            .states
            .get_mut(name)
            .and_then(|s| s.on_enter.as_mut())
        {
            enter(ctx);
        }
        Ok(())
    }

    fn record(&mut self, from: Option<String>, to: &str) {
        if self.history_limit == 0 {
            return;
        }
        if self.history.len() == self.history_limit {
            self.history.pop_front();
        }
        self.history.push_back(HistoryEntry {
            from,
            to: to.to_owned(),
            time: self.last_time,
        });
    }
}

/// Declares a whole machine as one expression:
///
/// ```ignore
/// let machine = StateMachineBuilder::new()
///     .state("IDLE")
///     .on_enter(|agent: &mut Agent| agent.body.stop())
///     .transition(conditions::in_range(RangeKind::Detection), "CHASE")
///     .state("CHASE")
///     .transition(conditions::out_of_range(RangeKind::Detection), "IDLE")
///     .initial("IDLE")
///     .build();
/// ```
///
/// Callback and transition calls apply to the most recent `state(..)`.
pub struct StateMachineBuilder<C> {
    machine: StateMachine<C>,
    cursor: Option<String>,
}

impl<C> Default for StateMachineBuilder<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> StateMachineBuilder<C> {
    pub fn new() -> Self {
        Self {
            machine: StateMachine::new(),
            cursor: None,
        }
    }

    pub fn state(mut self, name: &str) -> Self {
        self.machine.create_state(name);
        self.cursor = Some(name.to_owned());
        self
    }

    pub fn on_enter(mut self, f: impl FnMut(&mut C) + Send + Sync + 'static) -> Self {
        if let Some(state) = self.cursor_state("on_enter") {
            state.set_on_enter(f);
        }
        self
    }

    pub fn on_update(mut self, f: impl FnMut(&mut C, f64, f64) + Send + Sync + 'static) -> Self {
        if let Some(state) = self.cursor_state("on_update") {
            state.set_on_update(f);
        }
        self
    }

    pub fn on_exit(mut self, f: impl FnMut(&mut C) + Send + Sync + 'static) -> Self {
        if let Some(state) = self.cursor_state("on_exit") {
            state.set_on_exit(f);
        }
        self
    }

    pub fn transition(mut self, condition: Condition<C>, target: &str) -> Self {
        if let Some(state) = self.cursor_state("transition") {
            state.add_transition(condition, target);
        }
        self
    }

    pub fn initial(mut self, name: &str) -> Self {
        self.machine.set_initial_state(name);
        self
    }

    pub fn history_limit(mut self, limit: usize) -> Self {
        self.machine.set_history_limit(limit);
        self
    }

    /// Finish the declaration. Dangling transitions are logged, not fatal;
    /// the affected transition simply never switches.
    pub fn build(self) -> StateMachine<C> {
        for (from, target) in self.machine.dangling_transitions() {
            warn!(
                "state machine: transition {} -> {} targets an undefined state",
                from, target
            );
        }
        self.machine
    }

    fn cursor_state(&mut self, call: &str) -> Option<&mut State<C>> {
        let state = self
            .cursor
            .as_deref()
            .and_then(|name| self.machine.states.get_mut(name));
        if state.is_none() {
            warn!("state machine builder: {} called before state()", call);
        }
        state
    }
}

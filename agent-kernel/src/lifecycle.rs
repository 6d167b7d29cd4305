//! Lifecycle states of a monitored agent and their transition tables.

use std::collections::HashMap;
use std::fmt::{self, Display, Formatter};
use std::time::Duration;

use agent_config::ServiceTimings;
use agent_primitives::{Health, Necessity};
use serde::Serialize;
use thiserror::Error;
use tracing::trace;

/// Discrete states a shadow's agent can occupy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StateId {
    /// Waiting for the agent to complete the onboarding handshake.
    Onboarding,
    /// Agent is sending traffic within the expected interval.
    Active,
    /// Agent went silent but is still within its grace window.
    Inactive,
    /// Agent is confirmed missing or failed to onboard.
    Error,
    /// Agent offboarded explicitly.
    Stopped,
    /// Shadow was retired; no further transitions.
    Archived,
}

impl StateId {
    /// Every state, in table order.
    pub const ALL: [Self; 6] = [
        Self::Onboarding,
        Self::Active,
        Self::Inactive,
        Self::Error,
        Self::Stopped,
        Self::Archived,
    ];

    /// Returns `true` once the shadow can no longer leave the state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Archived)
    }

    /// Returns the canonical upper-case name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Onboarding => "ONBOARDING",
            Self::Active => "ACTIVE",
            Self::Inactive => "INACTIVE",
            Self::Error => "ERROR",
            Self::Stopped => "STOPPED",
            Self::Archived => "ARCHIVED",
        }
    }

    const fn index(self) -> usize {
        match self {
            Self::Onboarding => 0,
            Self::Active => 1,
            Self::Inactive => 2,
            Self::Error => 3,
            Self::Stopped => 4,
            Self::Archived => 5,
        }
    }
}

impl Display for StateId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Events evaluated by the state machine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Event {
    /// A valid onboarding request was processed.
    OnboardingRequest,
    /// Traffic arrived while the agent was not active.
    RegularMessage,
    /// The agent or an operator ended the session.
    Offboarding,
    /// The shadow is about to be archived.
    Archive,
    /// The active state's timer expired.
    Timeout,
    /// Deployment-specific event.
    Custom(String),
}

impl Event {
    /// Events every state must define a rule for.
    pub const UNIVERSAL: [Self; 2] = [Self::Offboarding, Self::Archive];
}

impl Display for Event {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::OnboardingRequest => f.write_str("ONBOARDING_REQUEST"),
            Self::RegularMessage => f.write_str("REGULAR_MESSAGE"),
            Self::Offboarding => f.write_str("OFFBOARDING"),
            Self::Archive => f.write_str("ARCHIVE"),
            Self::Timeout => f.write_str("TIMEOUT"),
            Self::Custom(name) => write!(f, "CUSTOM({name})"),
        }
    }
}

/// Side effect attached to a transition rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Start listening on the activity topics and answer the onboarding request.
    Handshake,
}

impl Action {
    pub(crate) fn run(self, hooks: &dyn LifecycleHooks) {
        match self {
            Self::Handshake => {
                hooks.activate_receive();
                hooks.send_onboarding_response();
            }
        }
    }
}

/// Outcome a state assigns to an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    /// Transition to `target`, running `action` between exit and enter.
    Goto {
        /// State entered by the transition.
        target: StateId,
        /// Optional side effect.
        action: Option<Action>,
    },
    /// Accept the event without changing state.
    Ignore,
}

impl Rule {
    /// Plain transition without side effect.
    #[must_use]
    pub const fn goto(target: StateId) -> Self {
        Self::Goto {
            target,
            action: None,
        }
    }

    /// Transition that performs the onboarding handshake.
    #[must_use]
    pub const fn handshake(target: StateId) -> Self {
        Self::Goto {
            target,
            action: Some(Action::Handshake),
        }
    }
}

/// Capabilities states use for their side effects.
///
/// Implemented by the owning shadow; hooks must not call back into the state
/// machine synchronously.
pub trait LifecycleHooks: Send + Sync {
    /// Publishes the onboarding response to the agent.
    fn send_onboarding_response(&self);
    /// Subscribes to the agent's activity topics.
    fn activate_receive(&self);
    /// Unsubscribes from the agent's activity topics.
    fn deactivate_receive(&self);
    /// Records the health implied by the entered state.
    fn set_state_health(&self, health: Health);
    /// Clears the log severity watermark.
    fn reset_log_level(&self);
}

/// One lifecycle state: identity, timeout policy, and outbound rules.
///
/// States are immutable once the table is built.
#[derive(Debug, Clone)]
pub struct State {
    id: StateId,
    health: Health,
    timeout: Option<Duration>,
    rules: HashMap<Event, Rule>,
}

impl State {
    /// Creates a state without timeout or rules.
    #[must_use]
    pub fn new(id: StateId, health: Health) -> Self {
        Self {
            id,
            health,
            timeout: None,
            rules: HashMap::new(),
        }
    }

    /// Sets the timeout after which a TIMEOUT event is raised.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Adds a rule for `event`.
    #[must_use]
    pub fn on(mut self, event: Event, rule: Rule) -> Self {
        self.rules.insert(event, rule);
        self
    }

    /// Returns the state identifier.
    #[must_use]
    pub const fn id(&self) -> StateId {
        self.id
    }

    /// Returns the health reported while in this state.
    #[must_use]
    pub const fn health(&self) -> Health {
        self.health
    }

    /// Returns the timeout, if any.
    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Looks up the rule for `event`; `None` means the event is undefined here.
    #[must_use]
    pub fn rule(&self, event: &Event) -> Option<&Rule> {
        self.rules.get(event)
    }

    /// Iterates over all rules of the state.
    pub fn rules(&self) -> impl Iterator<Item = (&Event, &Rule)> {
        self.rules.iter()
    }

    pub(crate) fn on_exit(&self, event: &Event, _hooks: &dyn LifecycleHooks) {
        trace!(state = %self.id, %event, "leaving state");
    }

    pub(crate) fn on_enter(&self, event: &Event, hooks: &dyn LifecycleHooks) {
        trace!(state = %self.id, %event, "entering state");
        hooks.set_state_health(self.health);
        match self.id {
            StateId::Active => hooks.reset_log_level(),
            StateId::Stopped | StateId::Archived => hooks.deactivate_receive(),
            StateId::Onboarding | StateId::Inactive | StateId::Error => {}
        }
    }
}

/// Errors raised while assembling a state table.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LifecycleError {
    /// A state id has no state definition.
    #[error("state table is missing state {0}")]
    MissingState(StateId),
    /// A state id was defined twice.
    #[error("state {0} is defined more than once")]
    DuplicateState(StateId),
    /// A state does not define a rule for a universal event.
    #[error("state {state} has no rule for universal event {event}")]
    MissingUniversalEvent {
        /// State lacking the rule.
        state: StateId,
        /// Universal event without rule.
        event: Event,
    },
}

/// Result alias used for lifecycle operations.
pub type LifecycleResult<T> = Result<T, LifecycleError>;

/// Complete set of states plus the initial state.
#[derive(Debug, Clone)]
pub struct StateTable {
    initial: StateId,
    states: [State; 6],
}

impl StateTable {
    /// Assembles and validates a table containing every [`StateId`] once.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError`] when a state is missing or duplicated, or
    /// when a state has no rule for OFFBOARDING or ARCHIVE.
    pub fn new(initial: StateId, states: impl IntoIterator<Item = State>) -> LifecycleResult<Self> {
        let mut slots: [Option<State>; 6] = Default::default();
        for state in states {
            for event in &Event::UNIVERSAL {
                if state.rule(event).is_none() {
                    return Err(LifecycleError::MissingUniversalEvent {
                        state: state.id(),
                        event: event.clone(),
                    });
                }
            }
            let slot = &mut slots[state.id().index()];
            if slot.is_some() {
                return Err(LifecycleError::DuplicateState(state.id()));
            }
            *slot = Some(state);
        }

        let mut ordered = Vec::with_capacity(slots.len());
        for (id, slot) in StateId::ALL.into_iter().zip(slots) {
            ordered.push(slot.ok_or(LifecycleError::MissingState(id))?);
        }
        let states = <[State; 6]>::try_from(ordered)
            .map_err(|_| LifecycleError::MissingState(initial))?;

        Ok(Self { initial, states })
    }

    /// Builds the canonical agent lifecycle.
    ///
    /// Spontaneous agents start in ONBOARDING; preloaded agents start in
    /// INACTIVE because they are expected but not yet heard from. Optional
    /// agents never time out of INACTIVE.
    ///
    /// # Errors
    ///
    /// Never fails for the canonical table; the signature mirrors [`StateTable::new`].
    pub fn lifecycle(timings: &ServiceTimings, necessity: Necessity) -> LifecycleResult<Self> {
        use StateId::{Active, Archived, Error, Inactive, Onboarding, Stopped};

        let initial = if necessity.is_preloaded() {
            Inactive
        } else {
            Onboarding
        };
        let inactive_timeout = match necessity {
            Necessity::Optional => None,
            Necessity::Required | Necessity::Spontaneous => timings.inactive_timeout,
        };
        let stopped_health = match necessity {
            Necessity::Required => Health::Yellow,
            Necessity::Optional | Necessity::Spontaneous => Health::Green,
        };

        let states = [
            State::new(Onboarding, Health::Yellow)
                .with_timeout(timings.onboarding_timeout)
                .on(Event::OnboardingRequest, Rule::handshake(Active))
                .on(Event::Timeout, Rule::goto(Error))
                .on(Event::Offboarding, Rule::goto(Stopped))
                .on(Event::Archive, Rule::goto(Archived)),
            State::new(Active, Health::Green)
                .with_timeout(timings.active_timeout)
                .on(Event::OnboardingRequest, Rule::handshake(Active))
                .on(Event::Timeout, Rule::goto(Inactive))
                .on(Event::Offboarding, Rule::goto(Stopped))
                .on(Event::Archive, Rule::goto(Archived)),
            State::new(Inactive, Health::Yellow)
                .with_timeout(inactive_timeout)
                .on(Event::OnboardingRequest, Rule::handshake(Active))
                .on(Event::RegularMessage, Rule::goto(Active))
                .on(Event::Timeout, Rule::goto(Error))
                .on(Event::Offboarding, Rule::goto(Stopped))
                .on(Event::Archive, Rule::goto(Archived)),
            State::new(Error, Health::Red)
                .on(Event::OnboardingRequest, Rule::handshake(Active))
                .on(Event::RegularMessage, Rule::goto(Active))
                .on(Event::Offboarding, Rule::goto(Stopped))
                .on(Event::Archive, Rule::goto(Archived)),
            State::new(Stopped, stopped_health)
                .on(Event::OnboardingRequest, Rule::handshake(Active))
                .on(Event::Offboarding, Rule::Ignore)
                .on(Event::Archive, Rule::goto(Archived)),
            State::new(Archived, Health::Green)
                .on(Event::Offboarding, Rule::Ignore)
                .on(Event::Archive, Rule::Ignore),
        ];

        Self::new(initial, states)
    }

    /// Returns the initial state id.
    #[must_use]
    pub const fn initial(&self) -> StateId {
        self.initial
    }

    /// Returns the state for `id`.
    #[must_use]
    pub fn get(&self, id: StateId) -> &State {
        &self.states[id.index()]
    }

    /// Iterates over all states in table order.
    pub fn iter(&self) -> impl Iterator<Item = &State> {
        self.states.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timings() -> ServiceTimings {
        ServiceTimings {
            onboarding_timeout: Some(Duration::from_secs(30)),
            active_timeout: Some(Duration::from_secs(60)),
            inactive_timeout: Some(Duration::from_secs(120)),
        }
    }

    #[test]
    fn spontaneous_agents_start_onboarding() {
        let table = StateTable::lifecycle(&timings(), Necessity::Spontaneous).unwrap();
        assert_eq!(table.initial(), StateId::Onboarding);
        assert_eq!(
            table.get(StateId::Inactive).timeout(),
            Some(Duration::from_secs(120))
        );
    }

    #[test]
    fn optional_agents_never_time_out_of_inactive() {
        let table = StateTable::lifecycle(&timings(), Necessity::Optional).unwrap();
        assert_eq!(table.initial(), StateId::Inactive);
        assert_eq!(table.get(StateId::Inactive).timeout(), None);
        assert_eq!(table.get(StateId::Stopped).health(), Health::Green);

        let required = StateTable::lifecycle(&timings(), Necessity::Required).unwrap();
        assert_eq!(required.get(StateId::Stopped).health(), Health::Yellow);
    }

    #[test]
    fn every_state_defines_universal_events() {
        let table = StateTable::lifecycle(&timings(), Necessity::Spontaneous).unwrap();
        for state in table.iter() {
            for event in &Event::UNIVERSAL {
                assert!(state.rule(event).is_some(), "{} lacks {event}", state.id());
            }
        }
        assert!(table.get(StateId::Archived).rules().all(|(_, rule)| *rule == Rule::Ignore));
    }

    #[test]
    fn timeout_targets_follow_the_lifecycle() {
        let table = StateTable::lifecycle(&timings(), Necessity::Spontaneous).unwrap();
        let target = |id| table.get(id).rule(&Event::Timeout).copied();
        assert_eq!(target(StateId::Onboarding), Some(Rule::goto(StateId::Error)));
        assert_eq!(target(StateId::Active), Some(Rule::goto(StateId::Inactive)));
        assert_eq!(target(StateId::Inactive), Some(Rule::goto(StateId::Error)));
        assert_eq!(target(StateId::Error), None);
    }

    #[test]
    fn rejects_incomplete_tables() {
        let lonely = State::new(StateId::Active, Health::Green)
            .on(Event::Offboarding, Rule::Ignore)
            .on(Event::Archive, Rule::Ignore);
        let err = StateTable::new(StateId::Active, [lonely.clone()]).unwrap_err();
        assert_eq!(err, LifecycleError::MissingState(StateId::Onboarding));

        let err = StateTable::new(StateId::Active, [lonely.clone(), lonely]).unwrap_err();
        assert_eq!(err, LifecycleError::DuplicateState(StateId::Active));

        let bare = State::new(StateId::Error, Health::Red);
        let err = StateTable::new(StateId::Error, [bare]).unwrap_err();
        assert!(matches!(err, LifecycleError::MissingUniversalEvent { .. }));
    }
}

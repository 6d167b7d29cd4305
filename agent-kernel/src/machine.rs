//! Per-agent state machine: synchronous and queued evaluation, timers, and
//! transition observers.

use std::collections::BTreeMap;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use agent_memory::BoundedBucket;
use agent_primitives::{Gid, Health};
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::runtime::Handle;
use tracing::{debug, info, trace, warn};

use crate::lifecycle::{Event, LifecycleHooks, Rule, StateId, StateTable, State};
use crate::queue::{EventQueue, QueueError, QueueStats, Queued};
use crate::timer::Timer;
use crate::{lock, read, write};

/// A completed state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct TransitionRecord {
    /// State that was left.
    pub from: StateId,
    /// State that was entered.
    pub to: StateId,
    /// Event that triggered the change.
    pub event: Event,
    /// Wall-clock time of the change.
    pub at: DateTime<Utc>,
}

/// Observer notified after every completed transition.
///
/// Observers run on the evaluating thread while the evaluation gate is held;
/// they may read the machine or post events, but must not call
/// [`StateMachine::operate`].
pub trait TransitionObserver: Send + Sync {
    /// Called once per transition, after the target state was entered.
    fn on_transition(&self, gid: &Gid, transition: &TransitionRecord);
}

impl<F> TransitionObserver for F
where
    F: Fn(&Gid, &TransitionRecord) + Send + Sync,
{
    fn on_transition(&self, gid: &Gid, transition: &TransitionRecord) {
        self(gid, transition);
    }
}

/// Observer that emits every transition as a structured tracing event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTransitionObserver;

impl TransitionObserver for TracingTransitionObserver {
    fn on_transition(&self, gid: &Gid, transition: &TransitionRecord) {
        info!(
            gid = %gid,
            from = %transition.from,
            to = %transition.to,
            event = %transition.event,
            "agent state changed"
        );
    }
}

/// Result of evaluating one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evaluation {
    /// The machine moved from one state to another (possibly the same).
    Transitioned {
        /// State that was left.
        from: StateId,
        /// State that was entered.
        to: StateId,
    },
    /// The active state accepts the event without changing.
    Ignored {
        /// Active state.
        state: StateId,
    },
    /// A timeout belonging to an earlier activation was dropped.
    Stale {
        /// State the timeout was armed for.
        state: StateId,
    },
}

#[derive(Debug, Default, Clone, Copy, Serialize)]
#[serde(rename_all = "kebab-case")]
struct Counters {
    events: u64,
    transitions: u64,
    ignored: u64,
    undefined: u64,
    timeouts: u64,
    stale_timeouts: u64,
    timer_restarts: u64,
}

#[derive(Debug, Default, Clone, Copy)]
struct Visits {
    entered: u64,
    last_entered: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct Core {
    active: StateId,
    entered_at: DateTime<Utc>,
    timer: Option<Timer>,
    epoch: u64,
    runtime: Option<Handle>,
    started: bool,
    running: bool,
    transitioning: bool,
    counters: Counters,
    visits: BTreeMap<StateId, Visits>,
    history: BoundedBucket<TransitionRecord>,
}

struct Shared {
    gid: Gid,
    table: StateTable,
    hooks: Arc<dyn LifecycleHooks>,
    queue: EventQueue,
    gate: Mutex<()>,
    core: Mutex<Core>,
    observers: RwLock<Vec<Arc<dyn TransitionObserver>>>,
}

impl Shared {
    fn core(&self) -> MutexGuard<'_, Core> {
        lock(&self.core)
    }

    /// Evaluates one item; `Ok(None)` means the active state has no rule for it.
    fn evaluate(&self, item: Queued) -> MachineResult<Option<Evaluation>> {
        let _gate = lock(&self.gate);
        let (event, armed_for) = match item {
            Queued::Event(event) => (event, None),
            Queued::Timeout { state, epoch } => (Event::Timeout, Some((state, epoch))),
        };

        let (from, target, action) = {
            let mut core = self.core();
            core.counters.events += 1;
            if let Some((state, epoch)) = armed_for {
                if core.active != state || core.epoch != epoch {
                    core.counters.stale_timeouts += 1;
                    debug!(gid = %self.gid, armed = %state, active = %core.active, "discarding stale timeout");
                    return Ok(Some(Evaluation::Stale { state }));
                }
                core.counters.timeouts += 1;
            }

            let from = core.active;
            match self.table.get(from).rule(&event) {
                None => {
                    core.counters.undefined += 1;
                    return Ok(None);
                }
                Some(Rule::Ignore) => {
                    core.counters.ignored += 1;
                    trace!(gid = %self.gid, state = %from, %event, "event ignored");
                    return Ok(Some(Evaluation::Ignored { state: from }));
                }
                Some(&Rule::Goto { target, action }) => {
                    disarm(&mut core);
                    core.transitioning = true;
                    (from, target, action)
                }
            }
        };

        let hooks = self.hooks.as_ref();
        self.table.get(from).on_exit(&event, hooks);
        if let Some(action) = action {
            action.run(hooks);
        }

        let record = TransitionRecord {
            from,
            to: target,
            event,
            at: Utc::now(),
        };
        {
            let mut core = self.core();
            core.active = target;
            core.entered_at = record.at;
            core.counters.transitions += 1;
            let visits = core.visits.entry(target).or_default();
            visits.entered += 1;
            visits.last_entered = Some(record.at);
            core.history.push(record.clone());
        }

        self.table.get(target).on_enter(&record.event, hooks);
        {
            let mut core = self.core();
            core.transitioning = false;
            self.arm(&mut core);
        }

        debug!(gid = %self.gid, %from, to = %target, event = %record.event, "transition complete");
        let observers = read(&self.observers).clone();
        for observer in observers {
            observer.on_transition(&self.gid, &record);
        }
        Ok(Some(Evaluation::Transitioned { from, to: target }))
    }

    /// Arms the timer of the active state, if it has one and the machine runs.
    fn arm(&self, core: &mut Core) {
        core.epoch += 1;
        if !core.running {
            return;
        }
        let Some(runtime) = core.runtime.clone() else {
            return;
        };
        let state = self.table.get(core.active);
        let Some(timeout) = state.timeout() else {
            return;
        };

        let queue = self.queue.clone();
        let gid = self.gid.clone();
        let armed_for = Queued::Timeout {
            state: state.id(),
            epoch: core.epoch,
        };
        trace!(gid = %self.gid, state = %state.id(), ?timeout, "timer armed");
        core.timer = Some(Timer::start(&runtime, timeout, move || {
            if let Err(err) = queue.post(armed_for) {
                debug!(%gid, %err, "timeout not delivered");
            }
        }));
    }
}

fn disarm(core: &mut Core) {
    if let Some(timer) = core.timer.take() {
        timer.cancel();
    }
    core.epoch += 1;
}

/// State machine driving one agent's lifecycle.
///
/// Evaluation is serialized: [`StateMachine::operate`] evaluates on the
/// calling thread, [`StateMachine::operate_async`] enqueues for the consumer
/// task spawned by [`StateMachine::start`]. Both paths share one gate, so
/// evaluations never interleave. At most one timer is armed at any time, and
/// a timeout raised for an earlier activation is discarded.
pub struct StateMachine {
    shared: Arc<Shared>,
}

impl StateMachine {
    /// Creates a stopped machine positioned on the table's initial state.
    ///
    /// The initial state's health is reported to `hooks` immediately.
    #[must_use]
    pub fn new(
        gid: Gid,
        table: StateTable,
        hooks: Arc<dyn LifecycleHooks>,
        history: NonZeroUsize,
    ) -> Self {
        let initial = table.initial();
        hooks.set_state_health(table.get(initial).health());
        let now = Utc::now();
        let mut visits = BTreeMap::new();
        visits.insert(
            initial,
            Visits {
                entered: 1,
                last_entered: Some(now),
            },
        );
        let core = Core {
            active: initial,
            entered_at: now,
            timer: None,
            epoch: 0,
            runtime: None,
            started: false,
            running: false,
            transitioning: false,
            counters: Counters::default(),
            visits,
            history: BoundedBucket::new(history),
        };
        Self {
            shared: Arc::new(Shared {
                gid,
                table,
                hooks,
                queue: EventQueue::new(),
                gate: Mutex::new(()),
                core: Mutex::new(core),
                observers: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Starts the consumer task and arms the initial state's timer.
    ///
    /// # Errors
    ///
    /// Returns [`MachineError::NoRuntime`] outside a tokio runtime and
    /// [`MachineError::AlreadyStarted`] on a second call.
    pub fn start(&self) -> MachineResult<()> {
        let gid = &self.shared.gid;
        let runtime = Handle::try_current().map_err(|_| MachineError::NoRuntime { gid: gid.clone() })?;
        let state = {
            let mut core = self.shared.core();
            if core.started {
                return Err(MachineError::AlreadyStarted { gid: gid.clone() });
            }
            core.started = true;
            core.running = true;
            core.runtime = Some(runtime.clone());
            self.shared.arm(&mut core);
            core.active
        };

        let weak = Arc::downgrade(&self.shared);
        self.shared.queue.spawn_consumer(&runtime, move |item| {
            let Some(shared) = weak.upgrade() else {
                return false;
            };
            match shared.evaluate(item) {
                Ok(Some(_)) => {}
                Ok(None) => {
                    debug!(gid = %shared.gid, state = %shared.core().active, "queued event has no transition; dropped");
                }
                Err(err) => warn!(gid = %shared.gid, %err, "queued event failed"),
            }
            true
        })?;
        info!(gid = %gid, %state, "state machine started");
        Ok(())
    }

    /// Cancels the timer and closes the queue. Idempotent.
    ///
    /// Pending queued events are dropped; synchronous evaluation stays
    /// available but no further timers are armed.
    pub fn stop(&self) {
        self.shared.queue.close();
        let mut core = self.shared.core();
        disarm(&mut core);
        if core.running {
            core.running = false;
            info!(gid = %self.shared.gid, state = %core.active, "state machine stopped");
        }
    }

    /// Returns `true` between [`StateMachine::start`] and [`StateMachine::stop`].
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shared.core().running
    }

    /// Returns `false` once [`StateMachine::stop`] closed the event queue.
    #[must_use]
    pub fn accepts_events(&self) -> bool {
        !self.shared.queue.is_closed()
    }

    /// Evaluates `event` on the calling thread.
    ///
    /// # Errors
    ///
    /// Returns [`MachineError::UndefinedTransition`] when the active state has
    /// no rule for `event`; the machine is left unchanged.
    pub fn operate(&self, event: Event) -> MachineResult<Evaluation> {
        let shown = event.clone();
        self.shared
            .evaluate(Queued::Event(event))?
            .ok_or_else(|| MachineError::UndefinedTransition {
                gid: self.shared.gid.clone(),
                state: self.shared.core().active,
                event: shown,
            })
    }

    /// Like [`StateMachine::operate`], but an undefined event yields `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Currently infallible; kept fallible to match [`StateMachine::operate`].
    pub fn try_operate(&self, event: Event) -> MachineResult<Option<Evaluation>> {
        self.shared.evaluate(Queued::Event(event))
    }

    /// Enqueues `event` for the consumer task and returns immediately.
    ///
    /// Undefined events are dropped by the consumer and logged.
    ///
    /// # Errors
    ///
    /// Returns [`MachineError::Queue`] once the machine was stopped.
    pub fn operate_async(&self, event: Event) -> MachineResult<()> {
        self.shared.queue.post(Queued::Event(event))?;
        Ok(())
    }

    /// Pushes back the active state's timeout without evaluating an event.
    ///
    /// Returns `false` when there is no armed timer or it already fired.
    pub fn restart_timeout_event(&self) -> bool {
        let mut core = self.shared.core();
        let restarted = core.timer.as_ref().is_some_and(Timer::restart);
        if restarted {
            core.counters.timer_restarts += 1;
        }
        restarted
    }

    /// Atomically checks that `state` is active and pushes back its timeout.
    ///
    /// When the timer already fired, a fresh one is armed and the pending
    /// timeout becomes stale. Returns `false` if another state is active or a
    /// transition is in flight.
    pub fn restart_timeout_if(&self, state: StateId) -> bool {
        let mut core = self.shared.core();
        if core.active != state || core.transitioning {
            return false;
        }
        core.counters.timer_restarts += 1;
        let restarted = core.timer.as_ref().is_some_and(Timer::restart);
        if !restarted && core.timer.is_some() {
            disarm(&mut core);
            self.shared.arm(&mut core);
        }
        true
    }

    /// Returns the agent identifier.
    #[must_use]
    pub fn gid(&self) -> &Gid {
        &self.shared.gid
    }

    /// Returns the state table.
    #[must_use]
    pub fn states(&self) -> &StateTable {
        &self.shared.table
    }

    /// Returns the active state.
    #[must_use]
    pub fn get_active_state(&self) -> &State {
        let active = self.get_state_id();
        self.shared.table.get(active)
    }

    /// Returns the active state's identifier.
    #[must_use]
    pub fn get_state_id(&self) -> StateId {
        self.shared.core().active
    }

    /// Summarizes the active state.
    #[must_use]
    pub fn get_stats_active_state(&self) -> ActiveStateStats {
        let core = self.shared.core();
        let state = self.shared.table.get(core.active);
        ActiveStateStats {
            id: state.id(),
            health: state.health(),
            since: core.entered_at,
            timeout: state.timeout().map(|timeout| timeout.as_secs_f64()),
            remaining: core.timer.as_ref().map(|timer| timer.remaining().as_secs_f64()),
        }
    }

    /// Summarizes machine counters, queue, and recent transitions.
    #[must_use]
    pub fn get_stats(&self) -> MachineStats {
        let active_state = self.get_stats_active_state();
        let queue = self.shared.queue.stats();
        let core = self.shared.core();
        MachineStats {
            running: core.running,
            active_state,
            counters: core.counters,
            queue,
            history: core.history.iter().cloned().collect(),
        }
    }

    /// Describes every state with its rules and visit counters.
    #[must_use]
    pub fn get_state_stats(&self) -> BTreeMap<StateId, StateStats> {
        let core = self.shared.core();
        self.shared
            .table
            .iter()
            .map(|state| {
                let visits = core.visits.get(&state.id()).copied().unwrap_or_default();
                let rules = state
                    .rules()
                    .map(|(event, rule)| {
                        let outcome = match rule {
                            Rule::Goto { target, .. } => target.name().to_owned(),
                            Rule::Ignore => "ignore".to_owned(),
                        };
                        (event.to_string(), outcome)
                    })
                    .collect();
                let stats = StateStats {
                    health: state.health(),
                    timeout: state.timeout().map(|timeout| timeout.as_secs_f64()),
                    entered: visits.entered,
                    last_entered: visits.last_entered,
                    rules,
                };
                (state.id(), stats)
            })
            .collect()
    }

    /// Registers an observer notified after every transition.
    pub fn register_state_transition_event_observer(&self, observer: Arc<dyn TransitionObserver>) {
        write(&self.shared.observers).push(observer);
    }
}

impl fmt::Debug for StateMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateMachine")
            .field("gid", &self.shared.gid)
            .field("active", &self.get_state_id())
            .finish_non_exhaustive()
    }
}

/// Snapshot of the active state.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ActiveStateStats {
    /// Active state.
    pub id: StateId,
    /// Health implied by the active state.
    pub health: Health,
    /// Time the state was entered.
    pub since: DateTime<Utc>,
    /// Configured timeout in seconds.
    pub timeout: Option<f64>,
    /// Seconds left on the armed timer.
    pub remaining: Option<f64>,
}

/// Snapshot of the machine as a whole.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct MachineStats {
    /// Whether timers and the consumer are live.
    pub running: bool,
    /// Active state summary.
    pub active_state: ActiveStateStats,
    #[serde(flatten)]
    counters: Counters,
    /// Queue throughput.
    pub queue: QueueStats,
    /// Most recent transitions, oldest first.
    pub history: Vec<TransitionRecord>,
}

impl MachineStats {
    /// Events evaluated, stale timeouts included.
    #[must_use]
    pub const fn events(&self) -> u64 {
        self.counters.events
    }

    /// Completed transitions.
    #[must_use]
    pub const fn transitions(&self) -> u64 {
        self.counters.transitions
    }

    /// Timeouts that were discarded because their state was already left.
    #[must_use]
    pub const fn stale_timeouts(&self) -> u64 {
        self.counters.stale_timeouts
    }

    /// Events without a rule in the active state.
    #[must_use]
    pub const fn undefined(&self) -> u64 {
        self.counters.undefined
    }

    /// Liveness-driven timer restarts.
    #[must_use]
    pub const fn timer_restarts(&self) -> u64 {
        self.counters.timer_restarts
    }
}

/// Description of one state.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct StateStats {
    /// Health implied by the state.
    pub health: Health,
    /// Configured timeout in seconds.
    pub timeout: Option<f64>,
    /// Number of times the state was entered.
    pub entered: u64,
    /// Last time the state was entered.
    pub last_entered: Option<DateTime<Utc>>,
    /// Outcome per event, either a target state or `ignore`.
    pub rules: BTreeMap<String, String>,
}

/// Errors produced by the state machine.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MachineError {
    /// The active state has no rule for the event.
    #[error("agent {gid}: state {state} has no transition for {event}")]
    UndefinedTransition {
        /// Agent identifier.
        gid: Gid,
        /// Active state.
        state: StateId,
        /// Rejected event.
        event: Event,
    },
    /// The machine was started outside a tokio runtime.
    #[error("agent {gid}: state machine must be started inside a tokio runtime")]
    NoRuntime {
        /// Agent identifier.
        gid: Gid,
    },
    /// [`StateMachine::start`] was called twice.
    #[error("agent {gid}: state machine already started")]
    AlreadyStarted {
        /// Agent identifier.
        gid: Gid,
    },
    /// The event queue refused the event.
    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Result alias for state machine operations.
pub type MachineResult<T> = Result<T, MachineError>;

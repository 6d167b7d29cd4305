//! Lifecycle kernel of the agent fleet monitor.
//!
//! Every monitored agent is represented by an [`AgentShadow`]: a property
//! record, bounded message and log archives, and a [`StateMachine`] that moves
//! the agent through ONBOARDING, ACTIVE, INACTIVE, ERROR, STOPPED, and
//! ARCHIVED. Timeouts are driven by restartable [`Timer`]s on the tokio clock;
//! inbound traffic arrives through the [`Transport`] seam.

#![warn(missing_docs, clippy::pedantic)]

mod lifecycle;
mod machine;
mod properties;
mod queue;
mod shadow;
mod stats;
mod timer;
mod transport;
pub mod wire;

use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub use lifecycle::{
    Action, Event, LifecycleError, LifecycleHooks, LifecycleResult, Rule, State, StateId,
    StateTable,
};
pub use machine::{
    ActiveStateStats, Evaluation, MachineError, MachineResult, MachineStats, StateMachine,
    StateStats, TracingTransitionObserver, TransitionObserver, TransitionRecord,
};
pub use properties::{Identity, Properties, PropertiesStats, PropertyEntries};
pub use queue::{QueueError, QueueResult, QueueStats};
pub use shadow::{AgentShadow, Command, ShadowContext, ShadowError, ShadowResult};
pub use stats::{GeneralStats, MicroServiceStats, ShadowStats, render};
pub use timer::Timer;
pub use transport::{
    InMemoryBus, Published, TopicHandler, Transport, TransportError, TransportResult,
};
pub use wire::{ActivityTopics, ValidationError};

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

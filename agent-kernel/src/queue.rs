//! Event queue feeding the asynchronous evaluation path of a state machine.

use std::sync::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::Serialize;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use crate::lifecycle::{Event, StateId};
use crate::lock;

/// Item travelling through the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Queued {
    /// Externally posted event.
    Event(Event),
    /// Expiry of the timer armed for `state` during arming round `epoch`.
    Timeout { state: StateId, epoch: u64 },
}

#[derive(Debug, Default)]
struct QueueState {
    closed: AtomicBool,
    posted: AtomicU64,
    processed: AtomicU64,
    receiver: Mutex<Option<UnboundedReceiver<Queued>>>,
    consumer: Mutex<Option<JoinHandle<()>>>,
}

/// FIFO of pending events drained by a single consumer task.
///
/// Clones share the same queue; timers hold one to post their expiry.
#[derive(Debug, Clone)]
pub(crate) struct EventQueue {
    sender: UnboundedSender<Queued>,
    state: Arc<QueueState>,
}

impl EventQueue {
    pub(crate) fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let state = QueueState {
            receiver: Mutex::new(Some(receiver)),
            ..QueueState::default()
        };
        Self {
            sender,
            state: Arc::new(state),
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::Acquire)
    }

    /// Appends an item without waiting for its evaluation.
    pub(crate) fn post(&self, item: Queued) -> QueueResult<()> {
        if self.is_closed() {
            return Err(QueueError::Closed);
        }
        self.sender.send(item).map_err(|_| QueueError::Closed)?;
        self.state.posted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Spawns the consumer on `runtime`.
    ///
    /// `consume` is invoked for every item in posting order; returning `false`
    /// ends the consumer.
    pub(crate) fn spawn_consumer<F>(&self, runtime: &Handle, mut consume: F) -> QueueResult<()>
    where
        F: FnMut(Queued) -> bool + Send + 'static,
    {
        if self.is_closed() {
            return Err(QueueError::Closed);
        }
        let mut receiver = lock(&self.state.receiver)
            .take()
            .ok_or(QueueError::AlreadyConsuming)?;
        // The task only holds the shared counters, never a sender, so it ends
        // once every queue handle is gone.
        let state = Arc::clone(&self.state);
        let handle = runtime.spawn(async move {
            while let Some(item) = receiver.recv().await {
                if state.closed.load(Ordering::Acquire) {
                    break;
                }
                state.processed.fetch_add(1, Ordering::Relaxed);
                if !consume(item) {
                    break;
                }
            }
        });
        *lock(&self.state.consumer) = Some(handle);
        Ok(())
    }

    /// Rejects further posts and stops the consumer; pending items are dropped.
    pub(crate) fn close(&self) {
        self.state.closed.store(true, Ordering::Release);
        if let Some(handle) = lock(&self.state.consumer).take() {
            handle.abort();
        }
    }

    pub(crate) fn stats(&self) -> QueueStats {
        let posted = self.state.posted.load(Ordering::Relaxed);
        let processed = self.state.processed.load(Ordering::Relaxed);
        QueueStats {
            closed: self.is_closed(),
            posted,
            processed,
            pending: posted.saturating_sub(processed),
        }
    }
}

/// Counters describing queue throughput.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct QueueStats {
    /// Whether the queue refuses new events.
    pub closed: bool,
    /// Events accepted by the queue.
    pub posted: u64,
    /// Events handed to the evaluator.
    pub processed: u64,
    /// Events still waiting.
    pub pending: u64,
}

/// Errors produced by the event queue.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    /// Queue is closed and will not accept new events.
    #[error("event queue closed")]
    Closed,
    /// A consumer was already spawned for this queue.
    #[error("event queue already has a consumer")]
    AlreadyConsuming,
}

/// Result alias for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;

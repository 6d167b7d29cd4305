//! Publish/subscribe seam between shadows and the message bus.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};

use bytes::Bytes;
use thiserror::Error;
use tracing::trace;

use crate::{lock, read, write};

/// Callback invoked with the raw payload of a message on a subscribed topic.
pub type TopicHandler = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Message bus used by shadows.
///
/// Handlers are identified by pointer equality of their [`Arc`].
pub trait Transport: Send + Sync {
    /// Publishes `payload` on `topic`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Backend`] when the bus rejects the message.
    fn publish(&self, topic: &str, payload: Bytes) -> TransportResult<()>;

    /// Registers `handler` for `topic`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::AlreadySubscribed`] for a repeated
    /// subscription unless `ignore_duplicate` is set.
    fn subscribe(&self, topic: &str, handler: TopicHandler, ignore_duplicate: bool) -> TransportResult<()>;

    /// Removes `handler` from `topic`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::NotSubscribed`] for an unknown subscription
    /// unless `ignore_not_found` is set.
    fn unsubscribe(&self, topic: &str, handler: &TopicHandler, ignore_not_found: bool) -> TransportResult<()>;
}

/// Errors produced by a [`Transport`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The handler is already registered for the topic.
    #[error("handler already subscribed to {0}")]
    AlreadySubscribed(String),
    /// The handler is not registered for the topic.
    #[error("handler not subscribed to {0}")]
    NotSubscribed(String),
    /// The underlying bus failed.
    #[error("transport failure: {0}")]
    Backend(String),
}

/// Result alias for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// A message recorded by [`InMemoryBus`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    /// Topic the message was published on.
    pub topic: String,
    /// Raw payload.
    pub payload: Bytes,
}

/// In-process bus that dispatches synchronously and records every publish.
#[derive(Default)]
pub struct InMemoryBus {
    subscriptions: RwLock<HashMap<String, Vec<TopicHandler>>>,
    published: Mutex<Vec<Published>>,
}

impl InMemoryBus {
    /// Creates an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every message published so far, oldest first.
    #[must_use]
    pub fn published(&self) -> Vec<Published> {
        lock(&self.published).clone()
    }

    /// Returns the payloads published on `topic`, oldest first.
    #[must_use]
    pub fn published_on(&self, topic: &str) -> Vec<Bytes> {
        lock(&self.published)
            .iter()
            .filter(|message| message.topic == topic)
            .map(|message| message.payload.clone())
            .collect()
    }

    /// Returns the number of handlers registered for `topic`.
    #[must_use]
    pub fn subscriber_count(&self, topic: &str) -> usize {
        read(&self.subscriptions).get(topic).map_or(0, Vec::len)
    }
}

impl Transport for InMemoryBus {
    fn publish(&self, topic: &str, payload: Bytes) -> TransportResult<()> {
        lock(&self.published).push(Published {
            topic: topic.to_owned(),
            payload: payload.clone(),
        });
        let handlers = read(&self.subscriptions).get(topic).cloned().unwrap_or_default();
        trace!(topic, handlers = handlers.len(), "dispatching message");
        for handler in handlers {
            handler(payload.as_ref());
        }
        Ok(())
    }

    fn subscribe(&self, topic: &str, handler: TopicHandler, ignore_duplicate: bool) -> TransportResult<()> {
        let mut subscriptions = write(&self.subscriptions);
        let handlers = subscriptions.entry(topic.to_owned()).or_default();
        if handlers.iter().any(|known| Arc::ptr_eq(known, &handler)) {
            return if ignore_duplicate {
                Ok(())
            } else {
                Err(TransportError::AlreadySubscribed(topic.to_owned()))
            };
        }
        handlers.push(handler);
        Ok(())
    }

    fn unsubscribe(&self, topic: &str, handler: &TopicHandler, ignore_not_found: bool) -> TransportResult<()> {
        let mut subscriptions = write(&self.subscriptions);
        let removed = subscriptions.get_mut(topic).is_some_and(|handlers| {
            let before = handlers.len();
            handlers.retain(|known| !Arc::ptr_eq(known, handler));
            handlers.len() < before
        });
        if subscriptions.get(topic).is_some_and(Vec::is_empty) {
            subscriptions.remove(topic);
        }
        if removed || ignore_not_found {
            Ok(())
        } else {
            Err(TransportError::NotSubscribed(topic.to_owned()))
        }
    }
}

impl fmt::Debug for InMemoryBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryBus")
            .field("topics", &read(&self.subscriptions).len())
            .field("published", &lock(&self.published).len())
            .finish_non_exhaustive()
    }
}

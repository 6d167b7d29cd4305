//! Per-agent archives.
//!
//! Every shadow keeps two bounded histories: the [`MessageArchive`] with the
//! most recent protocol messages per type, and the [`LogArchive`] with the
//! log lines an agent forwarded, bucketed by severity. Both retain a fixed
//! number of entries per bucket and evict the oldest first, while their
//! received counters keep counting.

#![warn(missing_docs, clippy::pedantic)]

mod bucket;
mod log;
mod message;

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub use bucket::{BoundedBucket, BucketStats};
pub use log::{HealthSink, LogArchive, LogArchiveConfig, LogArchiveStats, LogEntry, LogEventObserver};
pub use message::{ArchivedMessage, MessageArchive, MessageArchiveStats, MessageKind, MessageTypeStats};

pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

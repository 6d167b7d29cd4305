//! Severity-bucketed archive of log lines forwarded by an agent.

use std::collections::BTreeMap;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::{Arc, RwLock};

use agent_primitives::{Health, LogLevel};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::{read, write, BoundedBucket, BucketStats};

/// A forwarded log line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    /// Severity reported by the agent.
    pub level: LogLevel,
    /// Message body.
    pub message: String,
    /// Time the line was archived.
    pub received_at: DateTime<Utc>,
    /// Full decoded payload.
    pub payload: Value,
}

impl LogEntry {
    /// Creates an entry stamped with the current time.
    #[must_use]
    pub fn new(level: LogLevel, message: impl Into<String>, payload: Value) -> Self {
        Self {
            level,
            message: message.into(),
            received_at: Utc::now(),
            payload,
        }
    }
}

/// Observer notified for every archived log line.
pub trait LogEventObserver: Send + Sync {
    /// Called after `entry` has been archived.
    fn on_log(&self, entry: &LogEntry);
}

impl<F> LogEventObserver for F
where
    F: Fn(&LogEntry) + Send + Sync,
{
    fn on_log(&self, entry: &LogEntry) {
        self(entry);
    }
}

/// Callback receiving the log-derived health whenever it changes.
///
/// Invoked while the archive is locked; it must not call back into the
/// archive.
pub type HealthSink = Arc<dyn Fn(Health) + Send + Sync>;

/// Sizing and health thresholds for a [`LogArchive`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogArchiveConfig {
    capacity: NonZeroUsize,
    yellow_threshold: LogLevel,
    red_threshold: LogLevel,
}

impl LogArchiveConfig {
    /// Creates a configuration retaining `capacity` lines per bucket.
    #[must_use]
    pub const fn new(capacity: NonZeroUsize) -> Self {
        Self {
            capacity,
            yellow_threshold: LogLevel::Warning,
            red_threshold: LogLevel::Error,
        }
    }

    /// Sets the levels from which health degrades to yellow and red.
    #[must_use]
    pub const fn with_thresholds(mut self, yellow: LogLevel, red: LogLevel) -> Self {
        self.yellow_threshold = yellow;
        self.red_threshold = red;
        self
    }

    /// Returns the per-bucket capacity.
    #[must_use]
    pub const fn capacity(self) -> NonZeroUsize {
        self.capacity
    }

    /// Maps a severity watermark onto a health value.
    #[must_use]
    pub fn classify(self, watermark: Option<LogLevel>) -> Health {
        match watermark {
            Some(level) if level >= self.red_threshold => Health::Red,
            Some(level) if level >= self.yellow_threshold => Health::Yellow,
            _ => Health::Green,
        }
    }
}

impl Default for LogArchiveConfig {
    fn default() -> Self {
        Self::new(NonZeroUsize::new(100).expect("non-zero"))
    }
}

/// Counters and optional entries of a [`LogArchive`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogArchiveStats {
    /// Highest severity seen since the last reset.
    pub max_level: Option<LogLevel>,
    /// Health derived from `max_level`.
    pub health: Health,
    /// Counters of the chronological bucket.
    pub all: BucketStats,
    /// Counters per severity.
    pub levels: BTreeMap<LogLevel, BucketStats>,
    /// Retained lines, oldest first; only present in full stats.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entries: Option<Vec<LogEntry>>,
}

struct LogInner {
    flat: BoundedBucket<LogEntry>,
    levels: BTreeMap<LogLevel, BoundedBucket<LogEntry>>,
    max_level: Option<LogLevel>,
    health: Health,
}

/// Bounded store of forwarded log lines with a severity watermark.
pub struct LogArchive {
    config: LogArchiveConfig,
    inner: RwLock<LogInner>,
    set_health: HealthSink,
    observers: RwLock<Vec<Arc<dyn LogEventObserver>>>,
}

impl fmt::Debug for LogArchive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = read(&self.inner);
        f.debug_struct("LogArchive")
            .field("config", &self.config)
            .field("received", &inner.flat.received())
            .field("max_level", &inner.max_level)
            .field("observers", &read(&self.observers).len())
            .finish_non_exhaustive()
    }
}

impl LogArchive {
    /// Creates an archive pushing health changes into `set_health`.
    #[must_use]
    pub fn new(config: LogArchiveConfig, set_health: HealthSink) -> Self {
        let levels = LogLevel::ALL
            .into_iter()
            .map(|level| (level, BoundedBucket::new(config.capacity())))
            .collect();
        Self {
            config,
            inner: RwLock::new(LogInner {
                flat: BoundedBucket::new(config.capacity()),
                levels,
                max_level: None,
                health: Health::Green,
            }),
            set_health,
            observers: RwLock::new(Vec::new()),
        }
    }

    /// Archives a log line and updates the severity watermark.
    ///
    /// The health callback fires as soon as the watermark crosses a threshold.
    /// It runs under the archive lock, so the sink sees changes in the order
    /// the archive applied them.
    pub fn add(&self, entry: LogEntry) {
        {
            let mut inner = write(&self.inner);
            inner.flat.push(entry.clone());
            if let Some(bucket) = inner.levels.get_mut(&entry.level) {
                bucket.push(entry.clone());
            }
            inner.max_level = inner.max_level.max(Some(entry.level));
            let health = self.config.classify(inner.max_level);
            if health != inner.health {
                inner.health = health;
                debug!(level = %entry.level, %health, "log watermark changed health");
                (self.set_health)(health);
            }
        }

        for observer in read(&self.observers).iter() {
            observer.on_log(&entry);
        }
    }

    /// Clears the severity watermark and restores green log health.
    pub fn reset_max_level(&self) {
        let mut inner = write(&self.inner);
        inner.max_level = None;
        inner.health = Health::Green;
        (self.set_health)(Health::Green);
    }

    /// Registers an observer notified for every archived line.
    pub fn register_log_event_observer(&self, observer: Arc<dyn LogEventObserver>) {
        write(&self.observers).push(observer);
    }

    /// Returns the highest severity seen since the last reset.
    #[must_use]
    pub fn max_level(&self) -> Option<LogLevel> {
        read(&self.inner).max_level
    }

    /// Returns the current log-derived health.
    #[must_use]
    pub fn health(&self) -> Health {
        read(&self.inner).health
    }

    /// Returns how many lines were ever received.
    #[must_use]
    pub fn counter(&self) -> u64 {
        read(&self.inner).flat.received()
    }

    /// Returns up to `limit` of the newest lines, optionally of one level.
    #[must_use]
    pub fn recent(&self, level: Option<LogLevel>, limit: usize) -> Vec<LogEntry> {
        let inner = read(&self.inner);
        match level {
            None => inner.flat.recent(limit),
            Some(level) => inner
                .levels
                .get(&level)
                .map(|bucket| bucket.recent(limit))
                .unwrap_or_default(),
        }
    }

    /// Returns counters, including the chronological entries when `full`.
    #[must_use]
    pub fn get_stats(&self, full: bool) -> LogArchiveStats {
        let inner = read(&self.inner);
        LogArchiveStats {
            max_level: inner.max_level,
            health: inner.health,
            all: inner.flat.stats(),
            levels: inner
                .levels
                .iter()
                .map(|(level, bucket)| (*level, bucket.stats()))
                .collect(),
            entries: full.then(|| inner.flat.iter().cloned().collect()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn archive(capacity: usize) -> (LogArchive, Arc<Mutex<Vec<Health>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let config = LogArchiveConfig::new(NonZeroUsize::new(capacity).unwrap());
        let archive = LogArchive::new(
            config,
            Arc::new(move |health: Health| sink.lock().unwrap().push(health)),
        );
        (archive, seen)
    }

    fn line(level: LogLevel, message: &str) -> LogEntry {
        LogEntry::new(level, message, Value::Null)
    }

    #[test]
    fn flat_bucket_evicts_oldest_at_capacity() {
        let (archive, _) = archive(3);
        for n in 0..4 {
            archive.add(line(LogLevel::Info, &format!("line {n}")));
        }

        let stats = archive.get_stats(true);
        assert_eq!(stats.all.received, 4);
        assert_eq!(stats.all.stored, 3);
        let entries = stats.entries.unwrap();
        assert_eq!(entries[0].message, "line 1");
        assert_eq!(entries[2].message, "line 3");
        assert_eq!(stats.levels[&LogLevel::Info].received, 4);
        assert_eq!(stats.levels[&LogLevel::Error].received, 0);
    }

    #[test]
    fn severe_line_degrades_health_immediately() {
        let (archive, seen) = archive(10);
        archive.add(line(LogLevel::Debug, "noise"));
        assert!(seen.lock().unwrap().is_empty());

        archive.add(line(LogLevel::Warning, "careful"));
        archive.add(line(LogLevel::Warning, "still careful"));
        archive.add(line(LogLevel::Critical, "down"));
        archive.add(line(LogLevel::Info, "recovered?"));

        assert_eq!(*seen.lock().unwrap(), vec![Health::Yellow, Health::Red]);
        assert_eq!(archive.max_level(), Some(LogLevel::Critical));
        assert_eq!(archive.health(), Health::Red);
    }

    #[test]
    fn reset_clears_watermark() {
        let (archive, seen) = archive(10);
        archive.add(line(LogLevel::Error, "boom"));
        archive.reset_max_level();

        assert_eq!(archive.max_level(), None);
        assert_eq!(archive.health(), Health::Green);
        assert_eq!(*seen.lock().unwrap(), vec![Health::Red, Health::Green]);
        assert_eq!(archive.counter(), 1);
    }

    #[test]
    fn sink_agrees_with_archive_under_contention() {
        let (archive, seen) = archive(64);
        std::thread::scope(|scope| {
            scope.spawn(|| {
                for _ in 0..500 {
                    archive.add(line(LogLevel::Error, "boom"));
                }
            });
            scope.spawn(|| {
                for _ in 0..500 {
                    archive.reset_max_level();
                }
            });
        });

        let last = *seen.lock().unwrap().last().unwrap();
        assert_eq!(last, archive.health());
    }

    #[test]
    fn observers_see_every_line() {
        let (archive, _) = archive(1);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        archive.register_log_event_observer(Arc::new(move |entry: &LogEntry| {
            sink.lock().unwrap().push(entry.message.clone());
        }));

        archive.add(line(LogLevel::Info, "a"));
        archive.add(line(LogLevel::Info, "b"));
        assert_eq!(*seen.lock().unwrap(), vec!["a", "b"]);
        assert_eq!(archive.recent(Some(LogLevel::Info), 5).len(), 1);
    }

    #[test]
    fn custom_thresholds_apply() {
        let config = LogArchiveConfig::default().with_thresholds(LogLevel::Error, LogLevel::Critical);
        assert_eq!(config.classify(Some(LogLevel::Warning)), Health::Green);
        assert_eq!(config.classify(Some(LogLevel::Error)), Health::Yellow);
        assert_eq!(config.classify(Some(LogLevel::Critical)), Health::Red);
        assert_eq!(config.classify(None), Health::Green);
    }
}

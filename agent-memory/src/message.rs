//! Archive of inbound protocol messages.

use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use std::num::NonZeroUsize;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::trace;

use crate::{read, write, BoundedBucket};

/// Protocol message types kept in the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageKind {
    /// Onboarding request sent by the agent.
    OnboardingRequest,
    /// Liveness ping.
    Ping,
    /// Runtime statistics.
    Runtime,
    /// Effective configuration.
    Config,
    /// Forwarded log line.
    Logger,
    /// Offboarding notice.
    End,
}

impl MessageKind {
    /// Every kind, in archive order.
    pub const ALL: [Self; 6] = [
        Self::OnboardingRequest,
        Self::Ping,
        Self::Runtime,
        Self::Config,
        Self::Logger,
        Self::End,
    ];

    /// Returns the wire name of the kind.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::OnboardingRequest => "onboarding-request",
            Self::Ping => "ping",
            Self::Runtime => "runtime",
            Self::Config => "config",
            Self::Logger => "logger",
            Self::End => "end",
        }
    }
}

impl Display for MessageKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A retained message with its arrival time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArchivedMessage {
    /// Time the message was archived.
    pub received_at: DateTime<Utc>,
    /// Decoded payload.
    pub payload: Value,
}

/// Counters and optional samples for one message kind.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageTypeStats {
    /// Messages ever received.
    pub counter: u64,
    /// Messages currently retained.
    pub stored: usize,
    /// Arrival time of the newest message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_received: Option<DateTime<Utc>>,
    /// Retained messages, oldest first; only present in full stats.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entries: Option<Vec<ArchivedMessage>>,
}

/// Statistics keyed by message kind.
pub type MessageArchiveStats = BTreeMap<MessageKind, MessageTypeStats>;

/// Bounded per-kind store of the most recent inbound messages.
#[derive(Debug)]
pub struct MessageArchive {
    records: RwLock<BTreeMap<MessageKind, BoundedBucket<ArchivedMessage>>>,
}

impl MessageArchive {
    /// Creates an archive retaining `capacity` messages per kind.
    #[must_use]
    pub fn new(capacity: NonZeroUsize) -> Self {
        let records = MessageKind::ALL
            .into_iter()
            .map(|kind| (kind, BoundedBucket::new(capacity)))
            .collect();
        Self {
            records: RwLock::new(records),
        }
    }

    /// Archives a message under the given kind.
    pub fn archive(&self, kind: MessageKind, payload: Value) {
        let message = ArchivedMessage {
            received_at: Utc::now(),
            payload,
        };
        let mut records = write(&self.records);
        let bucket = records
            .entry(kind)
            .or_insert_with(|| BoundedBucket::new(NonZeroUsize::MIN));
        if bucket.push(message).is_some() {
            trace!(%kind, "evicted oldest archived message");
        }
    }

    /// Archives an onboarding request.
    pub fn archive_request(&self, payload: Value) {
        self.archive(MessageKind::OnboardingRequest, payload);
    }

    /// Archives a ping.
    pub fn archive_ping(&self, payload: Value) {
        self.archive(MessageKind::Ping, payload);
    }

    /// Archives a runtime message.
    pub fn archive_runtime(&self, payload: Value) {
        self.archive(MessageKind::Runtime, payload);
    }

    /// Archives a config message.
    pub fn archive_config(&self, payload: Value) {
        self.archive(MessageKind::Config, payload);
    }

    /// Archives a logger message.
    pub fn archive_logger(&self, payload: Value) {
        self.archive(MessageKind::Logger, payload);
    }

    /// Archives an end message.
    pub fn archive_end(&self, payload: Value) {
        self.archive(MessageKind::End, payload);
    }

    /// Returns how many messages of `kind` were received.
    #[must_use]
    pub fn counter(&self, kind: MessageKind) -> u64 {
        read(&self.records)
            .get(&kind)
            .map_or(0, BoundedBucket::received)
    }

    /// Returns up to `limit` of the newest messages of `kind`, oldest first.
    #[must_use]
    pub fn recent(&self, kind: MessageKind, limit: usize) -> Vec<ArchivedMessage> {
        read(&self.records)
            .get(&kind)
            .map(|bucket| bucket.recent(limit))
            .unwrap_or_default()
    }

    /// Returns counters for every kind, including retained payloads when `full`.
    #[must_use]
    pub fn get_stats(&self, full: bool) -> MessageArchiveStats {
        read(&self.records)
            .iter()
            .map(|(kind, bucket)| {
                let stats = MessageTypeStats {
                    counter: bucket.received(),
                    stored: bucket.len(),
                    last_received: bucket.newest().map(|message| message.received_at),
                    entries: full.then(|| bucket.iter().cloned().collect()),
                };
                (*kind, stats)
            })
            .collect()
    }
}

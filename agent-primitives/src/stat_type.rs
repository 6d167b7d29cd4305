//! Sections of the textual statistics report.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::Error;

/// Selects which part of a shadow's statistics to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StatType {
    /// Identity, uptime, health, and topics.
    General,
    /// State machine counters and history.
    StateMachine,
    /// Full properties record.
    Properties,
    /// Log archive counters.
    Logger,
    /// Message archive counters.
    Messages,
    /// Every section.
    All,
}

impl StatType {
    /// Returns `true` when this selection includes `section`.
    #[must_use]
    pub fn includes(self, section: Self) -> bool {
        self == Self::All || self == section
    }
}

impl FromStr for StatType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "general" => Ok(Self::General),
            "state-machine" => Ok(Self::StateMachine),
            "properties" => Ok(Self::Properties),
            "logger" => Ok(Self::Logger),
            "messages" => Ok(Self::Messages),
            "all" => Ok(Self::All),
            _ => Err(Error::InvalidStatType { value: s.into() }),
        }
    }
}

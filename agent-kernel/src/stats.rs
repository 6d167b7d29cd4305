//! Statistics snapshot of a shadow and its text rendering.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use agent_config::ServiceTimings;
use agent_memory::{LogArchiveStats, MessageArchiveStats, MessageKind};
use agent_primitives::{Health, StatType};
use serde::Serialize;

use crate::lifecycle::StateId;
use crate::machine::{ActiveStateStats, MachineStats, StateStats};
use crate::properties::PropertiesStats;
use crate::wire::ActivityTopics;

/// Every statistics section of a shadow.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ShadowStats {
    /// Overview of identity, state, traffic, and configuration.
    pub general: GeneralStats,
    /// Per-state description.
    pub states: BTreeMap<StateId, StateStats>,
    /// State machine counters and history.
    pub state_machine: MachineStats,
    /// Property snapshot.
    pub properties: PropertiesStats,
    /// Message archive counters.
    pub messages: MessageArchiveStats,
    /// Log archive counters.
    pub logger: LogArchiveStats,
}

/// The `general` section.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct GeneralStats {
    /// Identity and health of the agent process.
    pub micro_service: MicroServiceStats,
    /// Active state summary.
    pub active_state: ActiveStateStats,
    /// Received messages per kind.
    pub message_stats: BTreeMap<MessageKind, u64>,
    /// Activity topics of the agent.
    pub topics: ActivityTopics,
    /// State timeouts in effect.
    pub timings: ServiceTimings,
}

/// Identity and health of the agent process.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MicroServiceStats {
    /// Display name.
    pub name: Option<String>,
    /// Implementing module.
    pub module: Option<String>,
    /// Agent type.
    #[serde(rename = "type")]
    pub agent_type: Option<String>,
    /// Last reported uptime in seconds.
    pub uptime: Option<f64>,
    /// Current session.
    pub session: Option<u64>,
    /// Overall health.
    pub health: Health,
}

/// Renders the sections selected by `stat_type` under their headings.
#[must_use]
pub fn render(stats: &ShadowStats, stat_type: StatType) -> String {
    let mut output = String::new();
    if stat_type.includes(StatType::General) {
        section(&mut output, "general:", &stats.general);
    }
    if stat_type.includes(StatType::StateMachine) {
        section(&mut output, "state-machine:", &stats.state_machine);
        section(&mut output, "states:", &stats.states);
    }
    if stat_type.includes(StatType::Properties) {
        let heading = format!("properties: @{}", stats.properties.time.to_rfc3339());
        section(&mut output, &heading, &stats.properties.entries);
    }
    if stat_type.includes(StatType::Logger) {
        section(&mut output, "logger:", &stats.logger);
    }
    if stat_type.includes(StatType::Messages) {
        section(&mut output, "messages:", &stats.messages);
    }
    output
}

fn section<T: Serialize>(output: &mut String, heading: &str, value: &T) {
    let body = serde_json::to_string_pretty(value)
        .unwrap_or_else(|err| format!("<unavailable: {err}>"));
    let _ = write!(output, "{heading}\n{body}\n\n");
}

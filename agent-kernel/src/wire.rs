//! JSON payloads exchanged with monitored agents.
//!
//! Inbound payloads are parsed into a generic JSON value first and then into
//! their typed form, so a shadow can archive exactly what arrived once the
//! payload validated.

use agent_config::{AgentTimings, TopicConfig};
use agent_memory::MessageKind;
use agent_primitives::{Gid, LogLevel};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// Onboarding request an agent publishes when it (re)starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OnboardingRequest {
    /// Correlation id echoed in the response.
    pub uuid: Uuid,
    /// Topic the response must be published to.
    pub onboarding_topic: String,
    /// Protocol version spoken by the agent.
    pub protocol_version: u32,
    /// Time the agent sent the request.
    pub timestamp: DateTime<Utc>,
    /// Self-description of the agent.
    pub identifier: Identifier,
}

/// Self-description block of an [`OnboardingRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Identifier {
    /// Agent type, e.g. `actuator`.
    #[serde(rename = "type")]
    pub agent_type: String,
    /// Implementing module.
    pub module: String,
    /// Module version.
    pub version: String,
    /// Display name.
    pub name: String,
    /// Physical location.
    pub location: String,
    /// Room within the location.
    pub room: String,
    /// Device the agent drives.
    pub device: String,
    /// Free-form description.
    pub description: String,
    /// Host the agent runs on.
    pub host_name: String,
    /// Node identifier of the host.
    pub node_id: String,
    /// Addresses of the host.
    pub ips: Vec<String>,
    /// Hash of the agent configuration.
    pub config_hash: String,
    /// Gid the agent held in a previous session, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_gid: Option<Value>,
}

/// Per-agent activity topics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityTopics {
    /// Ping topic.
    pub ping: String,
    /// Runtime topic.
    pub runtime: String,
    /// Config topic.
    pub config: String,
    /// End topic.
    pub end: String,
    /// Logger topic.
    pub logger: String,
}

impl ActivityTopics {
    /// Derives the topics as `<base>/<gid>/<kind>`.
    #[must_use]
    pub fn new(base: &str, gid: &Gid) -> Self {
        let base = base.trim_end_matches('/');
        let topic = |kind: &str| format!("{base}/{gid}/{kind}");
        Self {
            ping: topic("ping"),
            runtime: topic("runtime"),
            config: topic("config"),
            end: topic("end"),
            logger: topic("logger"),
        }
    }

    /// Iterates over `(kind, topic)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (MessageKind, &str)> {
        [
            (MessageKind::Ping, self.ping.as_str()),
            (MessageKind::Runtime, self.runtime.as_str()),
            (MessageKind::Config, self.config.as_str()),
            (MessageKind::End, self.end.as_str()),
            (MessageKind::Logger, self.logger.as_str()),
        ]
        .into_iter()
    }
}

/// Command topics announced to the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandTopics {
    /// End command.
    pub end: String,
    /// Reonboarding command.
    pub reonboarding: String,
    /// Ping request.
    pub ping_on_request: String,
    /// Config request.
    pub config_on_request: String,
    /// Runtime request.
    pub runtime_on_request: String,
    /// Monitor heartbeat.
    pub heartbeat: String,
}

impl From<&TopicConfig> for CommandTopics {
    fn from(topics: &TopicConfig) -> Self {
        Self {
            end: topics.command_end.clone(),
            reonboarding: topics.command_reonboarding.clone(),
            ping_on_request: topics.command_ping_on_request.clone(),
            config_on_request: topics.command_config_on_request.clone(),
            runtime_on_request: topics.command_runtime_on_request.clone(),
            heartbeat: topics.heartbeat.clone(),
        }
    }
}

/// Response completing the onboarding handshake.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct OnboardingResponse {
    /// Correlation id of the request.
    pub uuid: Uuid,
    /// Identifier assigned to the agent.
    pub gid: Gid,
    /// Session assigned to the agent.
    pub session: u64,
    /// Topics the agent publishes to.
    pub topics_activity: ActivityTopics,
    /// Topics the agent listens on.
    pub topics_commands: CommandTopics,
    /// Intervals the agent must honor.
    pub timings: AgentTimings,
}

/// Ping payload; carries the session for validation.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PingMessage {
    /// Session the agent believes it is in.
    pub session: u64,
    /// Agent uptime in seconds.
    pub service_uptime: f64,
}

/// Runtime or config payload; only the uptime is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ActivityMessage {
    /// Agent uptime in seconds.
    pub service_uptime: f64,
}

/// Forwarded log line.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LoggerMessage {
    /// Severity.
    #[serde(alias = "levelname")]
    pub level: LogLevel,
    /// Log text.
    #[serde(alias = "msg")]
    pub message: String,
    /// Agent uptime in seconds, when reported.
    #[serde(default)]
    pub service_uptime: Option<f64>,
}

/// Command payload published on a command topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandRequest<'a> {
    /// Request name.
    pub request: &'a str,
    /// Addressed agent.
    pub gid: &'a Gid,
}

/// Errors raised while decoding an inbound payload.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// The payload is not JSON.
    #[error("{kind} payload is not valid JSON: {source}")]
    Malformed {
        /// Message kind being decoded.
        kind: MessageKind,
        /// Parser error.
        #[source]
        source: serde_json::Error,
    },
    /// The payload is JSON but lacks fields or has wrong types.
    #[error("{kind} payload rejected: {source}")]
    Invalid {
        /// Message kind being decoded.
        kind: MessageKind,
        /// Schema error.
        #[source]
        source: serde_json::Error,
    },
}

/// Decodes raw bytes into `T`, returning the generic JSON value alongside.
///
/// # Errors
///
/// Returns [`ValidationError`] for non-JSON payloads or schema mismatches.
pub fn decode<T: DeserializeOwned>(kind: MessageKind, payload: &[u8]) -> Result<(T, Value), ValidationError> {
    let value: Value =
        serde_json::from_slice(payload).map_err(|source| ValidationError::Malformed { kind, source })?;
    let typed = interpret(kind, &value)?;
    Ok((typed, value))
}

/// Interprets an already parsed JSON value as `T`.
///
/// # Errors
///
/// Returns [`ValidationError::Invalid`] on schema mismatches.
pub fn interpret<T: DeserializeOwned>(kind: MessageKind, value: &Value) -> Result<T, ValidationError> {
    T::deserialize(value).map_err(|source| ValidationError::Invalid { kind, source })
}

//! Strongly typed configuration schema.

use std::num::NonZeroUsize;
use std::path::Path;
use std::time::Duration;

use agent_primitives::LogLevel;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{ConfigError, ConfigResult};

/// Topic names shared by every shadow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TopicConfig {
    /// Base path under which per-agent activity topics are created.
    pub activity_base: String,
    /// Topic agents listen on for end commands.
    pub command_end: String,
    /// Topic agents listen on for reonboarding commands.
    pub command_reonboarding: String,
    /// Topic agents listen on for ping requests.
    pub command_ping_on_request: String,
    /// Topic agents listen on for config requests.
    pub command_config_on_request: String,
    /// Topic agents listen on for runtime requests.
    pub command_runtime_on_request: String,
    /// Topic the monitor publishes its own heartbeat to.
    pub heartbeat: String,
}

impl TopicConfig {
    fn validate(&self) -> ConfigResult<()> {
        let topics = [
            &self.activity_base,
            &self.command_end,
            &self.command_reonboarding,
            &self.command_ping_on_request,
            &self.command_config_on_request,
            &self.command_runtime_on_request,
            &self.heartbeat,
        ];
        if topics.iter().any(|topic| topic.trim().is_empty()) {
            return Err(ConfigError::Invalid("topic names must not be empty"));
        }
        if self.activity_base.trim_end_matches('/').is_empty() {
            return Err(ConfigError::Invalid("activity base must not be only '/'"));
        }
        Ok(())
    }
}

/// Longest accepted state timeout (one year).
pub const MAX_STATE_TIMEOUT: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Per-state timeouts applied by the lifecycle state machine.
///
/// A missing value disables the timeout for that state. Values must lie in
/// `(0, MAX_STATE_TIMEOUT]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ServiceTimings {
    /// Time a spontaneous agent has to complete onboarding.
    #[serde(default, with = "crate::duration")]
    pub onboarding_timeout: Option<Duration>,
    /// Silence tolerated in ACTIVE before the agent is considered inactive.
    #[serde(default, with = "crate::duration")]
    pub active_timeout: Option<Duration>,
    /// Grace window in INACTIVE before the agent is considered missing.
    #[serde(default, with = "crate::duration")]
    pub inactive_timeout: Option<Duration>,
}

impl ServiceTimings {
    fn validate(self) -> ConfigResult<()> {
        let all = [
            self.onboarding_timeout,
            self.active_timeout,
            self.inactive_timeout,
        ];
        if all.iter().flatten().any(Duration::is_zero) {
            return Err(ConfigError::Invalid("state timeouts must be greater than zero"));
        }
        if all.iter().flatten().any(|timeout| *timeout > MAX_STATE_TIMEOUT) {
            return Err(ConfigError::Invalid("state timeouts must not exceed one year"));
        }
        Ok(())
    }
}

/// Intervals handed to agents in the onboarding response, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AgentTimings {
    /// Interval between pings.
    pub send_ping: u64,
    /// Interval between runtime messages.
    pub send_runtime: u64,
    /// Interval between config messages.
    pub send_config: u64,
    /// How long an agent waits for the monitor heartbeat.
    pub expect_heartbeat: u64,
}

impl AgentTimings {
    fn validate(self) -> ConfigResult<()> {
        if [
            self.send_ping,
            self.send_runtime,
            self.send_config,
            self.expect_heartbeat,
        ]
        .contains(&0)
        {
            return Err(ConfigError::Invalid("agent timings must be greater than zero"));
        }
        Ok(())
    }
}

impl Default for AgentTimings {
    fn default() -> Self {
        Self {
            send_ping: 60,
            send_runtime: 500,
            send_config: 3600,
            expect_heartbeat: 120,
        }
    }
}

/// Sizing of the per-agent archives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ArchiveConfig {
    /// Retained payloads per message type.
    pub message_capacity: NonZeroUsize,
    /// Retained lines per log bucket.
    pub log_capacity: NonZeroUsize,
    /// Log level from which log health degrades to yellow.
    pub log_yellow_threshold: LogLevel,
    /// Log level from which log health degrades to red.
    pub log_red_threshold: LogLevel,
    /// Retained state transitions per shadow.
    pub transition_history: NonZeroUsize,
}

impl ArchiveConfig {
    fn validate(self) -> ConfigResult<()> {
        if self.log_yellow_threshold > self.log_red_threshold {
            return Err(ConfigError::Invalid(
                "log yellow threshold cannot exceed log red threshold",
            ));
        }
        Ok(())
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            message_capacity: NonZeroUsize::new(50).expect("non-zero"),
            log_capacity: NonZeroUsize::new(100).expect("non-zero"),
            log_yellow_threshold: LogLevel::Warning,
            log_red_threshold: LogLevel::Error,
            transition_history: NonZeroUsize::new(32).expect("non-zero"),
        }
    }
}

/// Complete configuration consumed by agent shadows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ServiceConfig {
    /// Shared topic names.
    pub topics: TopicConfig,
    /// Per-state timeouts.
    #[serde(default)]
    pub service_timings: ServiceTimings,
    /// Intervals forwarded to agents.
    #[serde(default)]
    pub agent_timings: AgentTimings,
    /// Archive sizing.
    #[serde(default)]
    pub archive: ArchiveConfig,
}

impl ServiceConfig {
    /// Parses and validates a JSON configuration document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed documents and
    /// [`ConfigError::Invalid`] when validation fails.
    pub fn from_json_str(raw: &str) -> ConfigResult<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses, and validates a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] when the file cannot be read, otherwise the
    /// errors of [`ServiceConfig::from_json_str`].
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "loading service configuration");
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when a topic is empty, a timeout or
    /// agent timing is zero, or the log thresholds are inverted.
    pub fn validate(&self) -> ConfigResult<()> {
        self.topics.validate()?;
        self.service_timings.validate()?;
        self.agent_timings.validate()?;
        self.archive.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "topics": {
            "activity-base": "/fleet/activity/",
            "command-end": "/fleet/end",
            "command-reonboarding": "/fleet/reonboarding",
            "command-ping-on-request": "/fleet/ping",
            "command-config-on-request": "/fleet/config",
            "command-runtime-on-request": "/fleet/runtime",
            "heartbeat": "/fleet/heartbeat"
        },
        "service-timings": {
            "onboarding-timeout": 60,
            "active-timeout": 120.5
        },
        "archive": { "message-capacity": 5, "log-red-threshold": "CRITICAL" }
    }"#;

    #[test]
    fn parses_sample_with_defaults() {
        let config = ServiceConfig::from_json_str(SAMPLE).unwrap();
        assert_eq!(config.topics.activity_base, "/fleet/activity/");
        assert_eq!(
            config.service_timings.active_timeout,
            Some(Duration::from_millis(120_500))
        );
        assert_eq!(config.service_timings.inactive_timeout, None);
        assert_eq!(config.agent_timings, AgentTimings::default());
        assert_eq!(config.archive.message_capacity.get(), 5);
        assert_eq!(config.archive.log_capacity.get(), 100);
        assert_eq!(config.archive.log_red_threshold, LogLevel::Critical);
    }

    #[test]
    fn rejects_zero_timeout() {
        let raw = SAMPLE.replace("\"onboarding-timeout\": 60", "\"onboarding-timeout\": 0");
        let err = ServiceConfig::from_json_str(&raw).expect_err("zero timeout");
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_timeout_beyond_a_year() {
        let raw = SAMPLE.replace("\"onboarding-timeout\": 60", "\"onboarding-timeout\": 1e19");
        let err = ServiceConfig::from_json_str(&raw).expect_err("unbounded timeout");
        assert!(matches!(err, ConfigError::Invalid(_)));

        let year = MAX_STATE_TIMEOUT.as_secs().to_string();
        let raw = SAMPLE.replace("\"active-timeout\": 120.5", &format!("\"active-timeout\": {year}"));
        let config = ServiceConfig::from_json_str(&raw).unwrap();
        assert_eq!(config.service_timings.active_timeout, Some(MAX_STATE_TIMEOUT));
    }

    #[test]
    fn rejects_inverted_thresholds() {
        let raw = SAMPLE.replace("\"CRITICAL\"", "\"DEBUG\"");
        let err = ServiceConfig::from_json_str(&raw).expect_err("inverted thresholds");
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_missing_topics() {
        let err = ServiceConfig::from_json_str("{}").expect_err("missing topics");
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn load_reports_missing_file() {
        let err = ServiceConfig::load("/definitely/not/here.json").expect_err("missing file");
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}

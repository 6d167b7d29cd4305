//! Observability setup for the fleet monitor.
//!
//! Libraries in this workspace only emit `tracing` events; binaries call
//! [`init_tracing`] once at startup to install a formatter.

#![warn(missing_docs, clippy::pedantic)]

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

/// Output layout of log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    /// Single-line, abbreviated fields.
    #[default]
    Compact,
    /// Single-line with full span context.
    Full,
}

/// Subscriber settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct TelemetryConfig {
    /// Filter directive used when `RUST_LOG` is unset, e.g. `info,agent_kernel=debug`.
    pub default_directive: String,
    /// Line layout.
    pub format: LogFormat,
    /// Whether to print the event target.
    pub with_target: bool,
}

impl TelemetryConfig {
    /// Creates a configuration with the given default directive.
    #[must_use]
    pub fn new(default_directive: impl Into<String>) -> Self {
        Self {
            default_directive: default_directive.into(),
            ..Self::default()
        }
    }

    /// Sets the line layout.
    #[must_use]
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Enables or disables event targets.
    #[must_use]
    pub fn with_target(mut self, with_target: bool) -> Self {
        self.with_target = with_target;
        self
    }

    /// Builds the filter: `RUST_LOG` when set, the default directive otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error if the default directive cannot be parsed.
    pub fn filter(&self) -> Result<EnvFilter> {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return Ok(filter);
        }
        EnvFilter::try_new(&self.default_directive)
            .with_context(|| format!("invalid log directive `{}`", self.default_directive))
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            default_directive: "info".to_owned(),
            format: LogFormat::Compact,
            with_target: false,
        }
    }
}

/// Installs the global `tracing` subscriber.
///
/// # Errors
///
/// Returns an error when the directive is invalid or a global subscriber is
/// already installed.
pub fn init_tracing(config: &TelemetryConfig) -> Result<()> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(config.filter()?)
        .with_target(config.with_target);
    let installed = match config.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Full => builder.try_init(),
    };
    installed.map_err(|err| anyhow!(err).context("failed to install tracing subscriber"))
}

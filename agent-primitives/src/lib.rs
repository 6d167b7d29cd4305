//! Core shared types for monitoring a fleet of agents.

#![warn(missing_docs, clippy::pedantic)]

mod error;
mod health;
mod ids;
mod level;
mod necessity;
mod stat_type;

/// Error type and result alias shared across the workspace.
pub use error::{Error, Result};
/// Coarse health signal derived from lifecycle state and logs.
pub use health::Health;
/// Global identifier of a monitored agent.
pub use ids::Gid;
/// Severity of a log line forwarded by an agent.
pub use level::LogLevel;
/// Whether the absence of an agent is an error.
pub use necessity::Necessity;
/// Sections of the human-readable statistics output.
pub use stat_type::StatType;

//! Shared error definitions for agent primitives.

use thiserror::Error;

/// Result alias used throughout the agent fleet crates.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while parsing primitive types.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// The provided global identifier was empty or whitespace.
    #[error("invalid gid `{value}`: {reason}")]
    InvalidGid {
        /// The offending identifier string.
        value: String,
        /// Human-readable reason for rejection.
        reason: &'static str,
    },

    /// Necessity string did not name a known variant.
    #[error("unknown necessity `{value}`")]
    InvalidNecessity {
        /// The offending necessity string.
        value: String,
    },

    /// Log severity string did not name a known level.
    #[error("unknown log level `{value}`")]
    InvalidLogLevel {
        /// The offending level string.
        value: String,
    },

    /// Statistics section name was not recognised.
    #[error("unknown stat type `{value}`")]
    InvalidStatType {
        /// The offending section name.
        value: String,
    },
}

//! Error types for configuration loading and validation.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read configuration {path}: {source}")]
    Io {
        /// Path that was being read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The configuration document was not valid JSON or had the wrong shape.
    #[error("failed to parse configuration: {source}")]
    Parse {
        /// Source [`serde_json::Error`].
        #[from]
        source: serde_json::Error,
    },
    /// A value was present but out of range.
    #[error("invalid configuration: {0}")]
    Invalid(&'static str),
    /// Neither a gid nor a preload config was supplied for a shadow.
    #[error("neither gid nor preload config given")]
    MissingIdentity,
    /// Both a gid and a preload config were supplied for a shadow.
    #[error("gid and preload config are mutually exclusive")]
    AmbiguousIdentity,
    /// The preload config did not carry a gid.
    #[error("gid unresolved after processing preload config")]
    UnresolvedGid,
    /// The gid was rejected by primitive validation.
    #[error(transparent)]
    Gid(#[from] agent_primitives::Error),
    /// The preload config requested a necessity other than required/optional.
    #[error("unexpected value `{0}` for necessity, must be 'required' or 'optional'")]
    InvalidNecessity(String),
}

/// Result alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

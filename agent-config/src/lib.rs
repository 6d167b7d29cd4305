//! Configuration for the agent fleet monitor.
//!
//! The service configuration is a single JSON document with kebab-case keys:
//! topic names, state timeouts, the timings handed to agents during
//! onboarding, and archive sizing. Known agents can additionally be declared
//! up front through [`PreloadConfig`] entries.

#![warn(missing_docs, clippy::pedantic)]

mod duration;
mod error;
mod preload;
mod schema;

pub use error::{ConfigError, ConfigResult};
pub use preload::{PreloadConfig, PreloadedAgent, ShadowOrigin};
pub use schema::{
    AgentTimings, ArchiveConfig, MAX_STATE_TIMEOUT, ServiceConfig, ServiceTimings, TopicConfig,
};

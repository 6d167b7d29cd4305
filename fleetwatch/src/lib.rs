//! Lifecycle and health monitoring for fleets of pub/sub agents.
//!
//! Depend on this crate via `cargo add fleetwatch`. It bundles the internal
//! crates behind feature flags so deployments can pull in only what they use.

#![warn(missing_docs, clippy::pedantic)]

/// Re-export shared primitives for convenience.
pub use agent_primitives as primitives;

/// Shadows, state machines, and transports (enabled by `kernel` feature).
#[cfg(feature = "kernel")]
pub use agent_kernel as kernel;

/// Message and log archives (enabled by `memory` feature).
#[cfg(feature = "memory")]
pub use agent_memory as memory;

/// Tracing setup (enabled by `telemetry` feature).
#[cfg(feature = "telemetry")]
pub use agent_telemetry as telemetry;

/// Service configuration (enabled by `config` feature).
#[cfg(feature = "config")]
pub use agent_config as config;

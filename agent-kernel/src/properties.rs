//! Descriptive and health properties of a monitored agent.

use std::fmt;
use std::sync::RwLock;

use agent_config::ShadowOrigin;
use agent_primitives::{Gid, Health, Necessity};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::wire::OnboardingRequest;
use crate::{read, write};

/// Identity fields reported by the agent or supplied by preload config.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Identity {
    /// Correlation id of the last onboarding request.
    pub uuid: Option<Uuid>,
    /// Topic onboarding responses go to.
    pub onboarding_topic: Option<String>,
    /// Protocol version spoken by the agent.
    pub protocol_version: Option<u32>,
    /// Timestamp of the last onboarding request.
    pub timestamp: Option<DateTime<Utc>>,
    /// Agent type.
    #[serde(rename = "type")]
    pub agent_type: Option<String>,
    /// Implementing module.
    pub module: Option<String>,
    /// Module version.
    pub version: Option<String>,
    /// Display name.
    pub name: Option<String>,
    /// Free-form description.
    pub description: Option<String>,
    /// Physical location.
    pub location: Option<String>,
    /// Room within the location.
    pub room: Option<String>,
    /// Device the agent drives.
    pub device: Option<String>,
    /// Host the agent runs on.
    pub host_name: Option<String>,
    /// Node identifier of the host.
    pub node_id: Option<String>,
    /// Addresses of the host.
    pub ips: Vec<String>,
    /// Hash of the agent configuration.
    pub config_hash: Option<String>,
    /// Gid the agent reported from an earlier session.
    pub last_gid: Option<Value>,
}

#[derive(Debug)]
struct Volatile {
    session: Option<u64>,
    identity: Identity,
    service_uptime: Option<f64>,
    state_health: Health,
    log_health: Health,
    last_update: DateTime<Utc>,
}

/// Thread-safe property record of one shadow.
///
/// The gid and necessity are fixed at construction; everything else is
/// replaced by onboarding requests and activity messages.
pub struct Properties {
    gid: Gid,
    necessity: Necessity,
    volatile: RwLock<Volatile>,
}

impl Properties {
    /// Creates the record for a shadow of the given origin.
    #[must_use]
    pub fn new(origin: &ShadowOrigin) -> Self {
        let mut identity = Identity::default();
        if let ShadowOrigin::Preloaded(agent) = origin {
            identity.name.clone_from(&agent.name);
            identity.location.clone_from(&agent.location);
            identity.room.clone_from(&agent.room);
            identity.device.clone_from(&agent.device);
        }
        Self {
            gid: origin.gid().clone(),
            necessity: origin.necessity(),
            volatile: RwLock::new(Volatile {
                session: None,
                identity,
                service_uptime: None,
                state_health: Health::Green,
                log_health: Health::Green,
                last_update: Utc::now(),
            }),
        }
    }

    /// Returns the agent identifier.
    #[must_use]
    pub const fn gid(&self) -> &Gid {
        &self.gid
    }

    /// Returns whether the agent is required, optional, or spontaneous.
    #[must_use]
    pub const fn necessity(&self) -> Necessity {
        self.necessity
    }

    /// Returns the current session, if the agent onboarded.
    #[must_use]
    pub fn session(&self) -> Option<u64> {
        read(&self.volatile).session
    }

    /// Copies the onboarding request into the record and starts `session`.
    pub fn apply_onboarding(&self, request: &OnboardingRequest, session: u64) {
        let identifier = &request.identifier;
        let mut volatile = write(&self.volatile);
        volatile.session = Some(session);
        volatile.identity = Identity {
            uuid: Some(request.uuid),
            onboarding_topic: Some(request.onboarding_topic.clone()),
            protocol_version: Some(request.protocol_version),
            timestamp: Some(request.timestamp),
            agent_type: Some(identifier.agent_type.clone()),
            module: Some(identifier.module.clone()),
            version: Some(identifier.version.clone()),
            name: Some(identifier.name.clone()),
            description: Some(identifier.description.clone()),
            location: Some(identifier.location.clone()),
            room: Some(identifier.room.clone()),
            device: Some(identifier.device.clone()),
            host_name: Some(identifier.host_name.clone()),
            node_id: Some(identifier.node_id.clone()),
            ips: identifier.ips.clone(),
            config_hash: Some(identifier.config_hash.clone()),
            last_gid: identifier.last_gid.clone(),
        };
        volatile.last_update = Utc::now();
        debug!(gid = %self.gid, session, "properties updated from onboarding request");
    }

    /// Returns a copy of the identity fields.
    #[must_use]
    pub fn identity(&self) -> Identity {
        read(&self.volatile).identity.clone()
    }

    /// Returns the last reported uptime in seconds.
    #[must_use]
    pub fn service_uptime(&self) -> Option<f64> {
        read(&self.volatile).service_uptime
    }

    /// Records the uptime reported by an activity message.
    pub fn set_service_uptime(&self, uptime: f64) {
        let mut volatile = write(&self.volatile);
        volatile.service_uptime = Some(uptime);
        volatile.last_update = Utc::now();
    }

    /// Returns the health implied by the lifecycle state.
    #[must_use]
    pub fn state_health(&self) -> Health {
        read(&self.volatile).state_health
    }

    /// Returns the health implied by forwarded logs.
    #[must_use]
    pub fn log_health(&self) -> Health {
        read(&self.volatile).log_health
    }

    /// Overall health: the worse of state and log health.
    #[must_use]
    pub fn health(&self) -> Health {
        let volatile = read(&self.volatile);
        volatile.state_health.worst(volatile.log_health)
    }

    /// Sets the state-derived health.
    pub fn set_state_health(&self, health: Health) {
        let mut volatile = write(&self.volatile);
        volatile.state_health = health;
        volatile.last_update = Utc::now();
    }

    /// Sets the log-derived health.
    pub fn set_log_health(&self, health: Health) {
        let mut volatile = write(&self.volatile);
        volatile.log_health = health;
        volatile.last_update = Utc::now();
    }

    /// Timestamped snapshot of every property.
    #[must_use]
    pub fn get_stats(&self) -> PropertiesStats {
        let volatile = read(&self.volatile);
        PropertiesStats {
            time: Utc::now(),
            entries: PropertyEntries {
                gid: self.gid.clone(),
                necessity: self.necessity,
                session: volatile.session,
                health: volatile.state_health.worst(volatile.log_health),
                state_health: volatile.state_health,
                log_health: volatile.log_health,
                service_uptime: volatile.service_uptime,
                last_update: volatile.last_update,
                identity: volatile.identity.clone(),
            },
        }
    }
}

impl fmt::Debug for Properties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Properties")
            .field("gid", &self.gid)
            .field("necessity", &self.necessity)
            .finish_non_exhaustive()
    }
}

/// Snapshot returned by [`Properties::get_stats`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PropertiesStats {
    /// Time the snapshot was taken.
    pub time: DateTime<Utc>,
    /// Property values.
    pub entries: PropertyEntries,
}

/// Property values inside a [`PropertiesStats`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct PropertyEntries {
    /// Agent identifier.
    pub gid: Gid,
    /// Required, optional, or spontaneous.
    pub necessity: Necessity,
    /// Current session.
    pub session: Option<u64>,
    /// Overall health.
    pub health: Health,
    /// State-derived health.
    pub state_health: Health,
    /// Log-derived health.
    pub log_health: Health,
    /// Last reported uptime in seconds.
    pub service_uptime: Option<f64>,
    /// Last time any property changed.
    pub last_update: DateTime<Utc>,
    /// Identity fields.
    #[serde(flatten)]
    pub identity: Identity,
}

//! Pre-provisioned agent declarations and shadow identity resolution.

use agent_primitives::{Gid, Necessity};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::{ConfigError, ConfigResult};

/// Declaration of an agent that is expected ahead of time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreloadConfig {
    /// Global identifier the agent will use.
    #[serde(default)]
    pub gid: Option<String>,
    /// Display name.
    #[serde(default)]
    pub name: Option<String>,
    /// Physical location.
    #[serde(default)]
    pub location: Option<String>,
    /// Room within the location.
    #[serde(default)]
    pub room: Option<String>,
    /// Device the agent drives.
    #[serde(default)]
    pub device: Option<String>,
    /// `required` or `optional`; defaults to optional when omitted.
    #[serde(default)]
    pub necessity: Option<String>,
}

impl PreloadConfig {
    /// Validates the declaration into a [`PreloadedAgent`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnresolvedGid`] when no gid is present and
    /// [`ConfigError::InvalidNecessity`] when the necessity is anything other
    /// than required or optional.
    pub fn resolve(&self) -> ConfigResult<PreloadedAgent> {
        debug!(preload = ?self, "processing preload config");
        let gid = self.gid.as_deref().ok_or(ConfigError::UnresolvedGid)?;
        let gid = Gid::new(gid)?;

        let necessity = match self.necessity.as_deref() {
            None => Necessity::Optional,
            Some(raw) => match raw.parse::<Necessity>() {
                Ok(necessity @ (Necessity::Required | Necessity::Optional)) => necessity,
                Ok(Necessity::Spontaneous) | Err(_) => {
                    error!(necessity = raw, "unexpected necessity in preload config");
                    return Err(ConfigError::InvalidNecessity(raw.to_owned()));
                }
            },
        };

        Ok(PreloadedAgent {
            gid,
            necessity,
            name: self.name.clone(),
            location: self.location.clone(),
            room: self.room.clone(),
            device: self.device.clone(),
        })
    }
}

/// Validated form of a [`PreloadConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreloadedAgent {
    /// Global identifier.
    pub gid: Gid,
    /// Required or optional.
    pub necessity: Necessity,
    /// Display name.
    pub name: Option<String>,
    /// Physical location.
    pub location: Option<String>,
    /// Room within the location.
    pub room: Option<String>,
    /// Device the agent drives.
    pub device: Option<String>,
}

/// How a shadow came into existence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShadowOrigin {
    /// The agent announced itself with this gid.
    Spontaneous(Gid),
    /// The agent was declared ahead of time.
    Preloaded(PreloadedAgent),
}

impl ShadowOrigin {
    /// Resolves the origin from the two optional construction inputs.
    ///
    /// Exactly one of `gid` and `preload` must be supplied.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingIdentity`] or
    /// [`ConfigError::AmbiguousIdentity`] when the inputs are not exclusive,
    /// otherwise any error from gid or preload validation.
    pub fn resolve(gid: Option<&str>, preload: Option<&PreloadConfig>) -> ConfigResult<Self> {
        match (gid, preload) {
            (Some(gid), None) => Ok(Self::Spontaneous(Gid::new(gid)?)),
            (None, Some(preload)) => Ok(Self::Preloaded(preload.resolve()?)),
            (None, None) => {
                error!("preload config and gid are both missing");
                Err(ConfigError::MissingIdentity)
            }
            (Some(_), Some(_)) => Err(ConfigError::AmbiguousIdentity),
        }
    }

    /// Returns the resolved gid.
    #[must_use]
    pub fn gid(&self) -> &Gid {
        match self {
            Self::Spontaneous(gid) => gid,
            Self::Preloaded(agent) => &agent.gid,
        }
    }

    /// Returns the necessity implied by the origin.
    #[must_use]
    pub fn necessity(&self) -> Necessity {
        match self {
            Self::Spontaneous(_) => Necessity::Spontaneous,
            Self::Preloaded(agent) => agent.necessity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn preload(necessity: Option<&str>) -> PreloadConfig {
        PreloadConfig {
            gid: Some("thermostat-1".into()),
            name: Some("thermostat".into()),
            necessity: necessity.map(str::to_owned),
            ..PreloadConfig::default()
        }
    }

    #[test]
    fn necessity_round_trip() {
        let required = ShadowOrigin::resolve(None, Some(&preload(Some("required")))).unwrap();
        assert_eq!(required.necessity(), Necessity::Required);
        let optional = ShadowOrigin::resolve(None, Some(&preload(Some("optional")))).unwrap();
        assert_eq!(optional.necessity(), Necessity::Optional);
        let implicit = ShadowOrigin::resolve(None, Some(&preload(None))).unwrap();
        assert_eq!(implicit.necessity(), Necessity::Optional);
    }

    #[test]
    fn rejects_other_necessities() {
        for raw in ["spontaneous", "mandatory", ""] {
            let err = ShadowOrigin::resolve(None, Some(&preload(Some(raw)))).expect_err(raw);
            assert!(matches!(err, ConfigError::InvalidNecessity(_)));
        }
    }

    #[test]
    fn requires_exactly_one_identity_source() {
        assert!(matches!(
            ShadowOrigin::resolve(None, None),
            Err(ConfigError::MissingIdentity)
        ));
        assert!(matches!(
            ShadowOrigin::resolve(Some("g1"), Some(&preload(None))),
            Err(ConfigError::AmbiguousIdentity)
        ));
        let origin = ShadowOrigin::resolve(Some("g1"), None).unwrap();
        assert_eq!(origin.gid().as_str(), "g1");
        assert_eq!(origin.necessity(), Necessity::Spontaneous);
    }

    #[test]
    fn preload_without_gid_is_unresolved() {
        let config = PreloadConfig {
            gid: None,
            ..preload(Some("required"))
        };
        assert!(matches!(
            ShadowOrigin::resolve(None, Some(&config)),
            Err(ConfigError::UnresolvedGid)
        ));
    }
}

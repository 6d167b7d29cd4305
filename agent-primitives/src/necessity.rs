//! Agent necessity classification.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::Error;

/// Governs whether the absence of an agent counts as an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Necessity {
    /// Pre-provisioned agent whose absence is an error.
    Required,
    /// Pre-provisioned agent whose absence is tolerated.
    Optional,
    /// Agent announced itself without being pre-provisioned.
    Spontaneous,
}

impl Necessity {
    /// Returns `true` for agents declared ahead of time in a preload config.
    #[must_use]
    pub const fn is_preloaded(self) -> bool {
        matches!(self, Self::Required | Self::Optional)
    }

    /// Returns the canonical upper-case name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Required => "REQUIRED",
            Self::Optional => "OPTIONAL",
            Self::Spontaneous => "SPONTANEOUS",
        }
    }
}

impl Display for Necessity {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Necessity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "required" => Ok(Self::Required),
            "optional" => Ok(Self::Optional),
            "spontaneous" => Ok(Self::Spontaneous),
            _ => Err(Error::InvalidNecessity { value: s.into() }),
        }
    }
}

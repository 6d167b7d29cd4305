//! Agent identifier types.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::Error;

/// Global identifier of an agent, stable across its whole lifetime.
///
/// Once assigned to a shadow it is never changed; reonboarding keeps the gid
/// and only rotates the session.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Gid(String);

impl Gid {
    /// Creates a gid after checking it is not blank.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidGid`] when the value is empty or whitespace.
    pub fn new(value: impl Into<String>) -> crate::Result<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(Error::InvalidGid {
                value,
                reason: "gid must not be empty",
            });
        }
        if value.contains('/') {
            return Err(Error::InvalidGid {
                value,
                reason: "gid must not contain '/'",
            });
        }
        Ok(Self(value))
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Gid {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Gid {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for Gid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

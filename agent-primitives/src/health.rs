//! Coarse health signal.

use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

/// Health of an agent, ordered from best to worst.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Health {
    /// Operating normally.
    #[default]
    Green,
    /// Degraded or not yet confirmed.
    Yellow,
    /// Failed, missing, or reporting severe errors.
    Red,
}

impl Health {
    /// Returns the worse of two health values.
    #[must_use]
    pub fn worst(self, other: Self) -> Self {
        self.max(other)
    }

    /// Returns the canonical upper-case name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Green => "GREEN",
            Self::Yellow => "YELLOW",
            Self::Red => "RED",
        }
    }
}

impl Display for Health {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

//! Human Decision Matrix approval levels.
//!
//! Every task and trigger carries a level; the engine runs at one level
//! and anything above it is gated out. Levels are totally ordered.

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Approval ceiling for autonomous actions, from fully autonomous
/// notification up to mandatory human sign-off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HdmLevel {
    /// Level 0: act freely, inform humans after the fact.
    Informational,
    /// Level 1: routine maintenance a human can audit later.
    Routine,
    /// Level 2: actions reviewed by a human on a regular cadence.
    Supervised,
    /// Level 3: actions that need explicit prior sign-off.
    Elevated,
    /// Level 4: critical actions; a human drives, the engine assists.
    Critical,
}

impl HdmLevel {
    /// Whether an action at `required` may run under this engine level.
    pub fn allows(self, required: HdmLevel) -> bool {
        required <= self
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Self::Informational => 0,
            Self::Routine => 1,
            Self::Supervised => 2,
            Self::Elevated => 3,
            Self::Critical => 4,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Informational => "informational",
            Self::Routine => "routine",
            Self::Supervised => "supervised",
            Self::Elevated => "elevated",
            Self::Critical => "critical",
        }
    }
}

impl Default for HdmLevel {
    fn default() -> Self {
        Self::Supervised
    }
}

impl TryFrom<u8> for HdmLevel {
    type Error = crate::domain::errors::EngineError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Informational),
            1 => Ok(Self::Routine),
            2 => Ok(Self::Supervised),
            3 => Ok(Self::Elevated),
            4 => Ok(Self::Critical),
            other => Err(crate::domain::errors::EngineError::Validation(format!(
                "HDM level must be 0..=4, got {other}"
            ))),
        }
    }
}

impl std::fmt::Display for HdmLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.as_u8(), self.name())
    }
}

// Persisted as the bare integer so the state file matches the wire shape
// consumers expect.
impl Serialize for HdmLevel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.as_u8())
    }
}

impl<'de> Deserialize<'de> for HdmLevel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = u8::deserialize(deserializer)?;
        HdmLevel::try_from(value).map_err(D::Error::custom)
    }
}

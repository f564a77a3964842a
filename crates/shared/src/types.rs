//! Common types used across orgbill

use std::fmt;

use serde::{Deserialize, Serialize};

// =============================================================================
// ID Wrappers
// =============================================================================

/// Organization ID wrapper
///
/// Organizations are keyed by the surrounding application's integer IDs. Zero is
/// never a valid ID and marks "not yet created".
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct OrgId(pub i64);

impl OrgId {
    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl From<i64> for OrgId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl fmt::Display for OrgId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// User ID wrapper
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct UserId(pub i64);

impl From<i64> for UserId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Team ID wrapper
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct TeamId(pub i64);

impl From<i64> for TeamId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl fmt::Display for TeamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Enums
// =============================================================================

/// Access level a team holds, either organization-wide or on a single unit.
///
/// Levels are ordered, so `mode >= AccessMode::Write` reads as "write or higher".
/// Stored as a small integer (0 = none ... 4 = owner).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum AccessMode {
    #[default]
    None,
    Read,
    Write,
    Admin,
    Owner,
}

impl AccessMode {
    /// Map a stored level to an access mode. Unknown levels above owner clamp to owner,
    /// negative levels to none.
    pub fn from_level(level: i16) -> Self {
        match level {
            i16::MIN..=0 => Self::None,
            1 => Self::Read,
            2 => Self::Write,
            3 => Self::Admin,
            _ => Self::Owner,
        }
    }

    pub fn level(&self) -> i16 {
        match self {
            Self::None => 0,
            Self::Read => 1,
            Self::Write => 2,
            Self::Admin => 3,
            Self::Owner => 4,
        }
    }

    pub fn can_write(&self) -> bool {
        *self >= Self::Write
    }
}

/// Repository capability units a team can be granted access to individually.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitType {
    Code,
    Issues,
    PullRequests,
    Releases,
    Wiki,
    ExternalWiki,
    ExternalTracker,
    Projects,
    Packages,
    Actions,
}

impl UnitType {
    /// Map a stored unit type number to a unit. Returns `None` for types this crate
    /// does not know about.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(Self::Code),
            2 => Some(Self::Issues),
            3 => Some(Self::PullRequests),
            4 => Some(Self::Releases),
            5 => Some(Self::Wiki),
            6 => Some(Self::ExternalWiki),
            7 => Some(Self::ExternalTracker),
            8 => Some(Self::Projects),
            9 => Some(Self::Packages),
            10 => Some(Self::Actions),
            _ => None,
        }
    }
}

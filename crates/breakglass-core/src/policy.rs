//! Access level policy.
//!
//! Pure lookup table mapping each [`AccessLevel`] to its permitted actions
//! and maximum grantable duration. The table is fixed at compile time;
//! changing a tier is a reviewed code change, not a data edit.

use serde::{Deserialize, Serialize};

use crate::error::GrantError;

/// Maximum duration for `view_only` grants, in hours.
pub const MAX_VIEW_ONLY_HOURS: u64 = 8;

/// Maximum duration for `full_clinical` grants, in hours.
pub const MAX_FULL_CLINICAL_HOURS: u64 = 12;

/// Maximum duration for `emergency` grants, in hours.
pub const MAX_EMERGENCY_HOURS: u64 = 24;

/// An action a grant holder may perform during the active window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum AccessAction {
    /// Read a record.
    View,
    /// Modify an existing record.
    Update,
    /// Create a new record.
    Create,
    /// Irreversible clinical actions (orders, overrides).
    CriticalAction,
}

/// The tier of elevated access a grant confers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum AccessLevel {
    /// Read-only access.
    ViewOnly,
    /// Read and write clinical data.
    FullClinical,
    /// Full access including critical actions; admin-granted only.
    Emergency,
}

impl AccessLevel {
    /// Returns the wire-stable string form of this level.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ViewOnly => "view_only",
            Self::FullClinical => "full_clinical",
            Self::Emergency => "emergency",
        }
    }

    /// Parses a level from its wire string.
    ///
    /// # Errors
    ///
    /// Returns [`GrantError::Validation`] if the string is not a known level.
    pub fn parse(s: &str) -> Result<Self, GrantError> {
        match s {
            "view_only" => Ok(Self::ViewOnly),
            "full_clinical" => Ok(Self::FullClinical),
            "emergency" => Ok(Self::Emergency),
            other => Err(GrantError::Validation {
                field: "access_level".to_string(),
                reason: format!("unrecognized access level: {other}"),
            }),
        }
    }

    /// Returns true if this level can only be granted by an administrator.
    #[must_use]
    pub const fn is_admin_only(&self) -> bool {
        matches!(self, Self::Emergency)
    }
}

impl std::fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Pure policy mapping access levels to capabilities and duration bounds.
#[derive(Debug, Clone, Copy)]
pub struct AccessLevelPolicy {
    default_duration_hours: u64,
}

impl AccessLevelPolicy {
    /// Creates a policy with the given default duration for requests that
    /// do not specify one.
    #[must_use]
    pub const fn new(default_duration_hours: u64) -> Self {
        Self {
            default_duration_hours,
        }
    }

    /// Returns the actions permitted at the given level.
    #[must_use]
    pub const fn allowed_actions(level: AccessLevel) -> &'static [AccessAction] {
        match level {
            AccessLevel::ViewOnly => &[AccessAction::View],
            AccessLevel::FullClinical => {
                &[AccessAction::View, AccessAction::Update, AccessAction::Create]
            }
            AccessLevel::Emergency => &[
                AccessAction::View,
                AccessAction::Update,
                AccessAction::Create,
                AccessAction::CriticalAction,
            ],
        }
    }

    /// Returns true if the given action is permitted at the given level.
    #[must_use]
    pub fn permits(level: AccessLevel, action: AccessAction) -> bool {
        Self::allowed_actions(level).contains(&action)
    }

    /// Returns the maximum grantable duration at the given level, in hours.
    #[must_use]
    pub const fn max_hours(level: AccessLevel) -> u64 {
        match level {
            AccessLevel::ViewOnly => MAX_VIEW_ONLY_HOURS,
            AccessLevel::FullClinical => MAX_FULL_CLINICAL_HOURS,
            AccessLevel::Emergency => MAX_EMERGENCY_HOURS,
        }
    }

    /// Computes the effective grant duration: the requested hours (or the
    /// configured default when absent), clamped to the level maximum.
    #[must_use]
    pub const fn effective_duration_hours(&self, level: AccessLevel, requested: Option<u64>) -> u64 {
        let requested = match requested {
            Some(hours) => hours,
            None => self.default_duration_hours,
        };
        let max = Self::max_hours(level);
        if requested < max { requested } else { max }
    }
}

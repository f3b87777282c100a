//! Staff roles and break-glass eligibility.
//!
//! Eligibility is a capability lookup on a closed [`StaffRole`] enumeration,
//! not a string list: adding a role forces an explicit policy decision here.
//! The [`SubjectRegistry`] trait is the seam to the user-management subsystem,
//! which this crate does not implement; [`StaticSubjectRegistry`] is an
//! in-memory implementation for embedding and tests.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::error::GrantError;

/// The closed set of staff roles known to the grant engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum StaffRole {
    /// Attending or resident physician.
    Physician,
    /// Registered nurse.
    Nurse,
    /// Clinical pharmacist.
    Pharmacist,
    /// Laboratory technician.
    LabTechnician,
    /// Front-desk staff; never break-glass-eligible.
    Receptionist,
    /// Administrator; approves and reviews grants but is not a grantee.
    Admin,
}

impl StaffRole {
    /// Returns the wire-stable string form of this role.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Physician => "physician",
            Self::Nurse => "nurse",
            Self::Pharmacist => "pharmacist",
            Self::LabTechnician => "lab_technician",
            Self::Receptionist => "receptionist",
            Self::Admin => "admin",
        }
    }

    /// Parses a role from its wire string.
    ///
    /// # Errors
    ///
    /// Returns [`GrantError::Validation`] if the string is not a known role.
    pub fn parse(s: &str) -> Result<Self, GrantError> {
        match s {
            "physician" => Ok(Self::Physician),
            "nurse" => Ok(Self::Nurse),
            "pharmacist" => Ok(Self::Pharmacist),
            "lab_technician" => Ok(Self::LabTechnician),
            "receptionist" => Ok(Self::Receptionist),
            "admin" => Ok(Self::Admin),
            other => Err(GrantError::Validation {
                field: "role".to_string(),
                reason: format!("unrecognized role: {other}"),
            }),
        }
    }

    /// Returns true if a subject with this role may obtain break-glass
    /// access. Admins approve grants; they are not grantees themselves.
    #[must_use]
    pub const fn is_break_glass_eligible(&self) -> bool {
        matches!(
            self,
            Self::Physician | Self::Nurse | Self::Pharmacist | Self::LabTechnician
        )
    }
}

impl std::fmt::Display for StaffRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Answers role lookups for grant subjects.
///
/// Backed by the user-management subsystem in production. Returning `None`
/// means the subject is unknown and therefore ineligible.
pub trait SubjectRegistry: Send + Sync {
    /// Returns the role of the given subject, if the subject exists.
    fn role_of(&self, subject_id: &str) -> Option<StaffRole>;

    /// Returns true if the subject exists and its role is eligible for
    /// break-glass access.
    fn is_eligible(&self, subject_id: &str) -> bool {
        self.role_of(subject_id)
            .is_some_and(|role| role.is_break_glass_eligible())
    }
}

/// In-memory subject registry.
#[derive(Debug, Default)]
pub struct StaticSubjectRegistry {
    roles: RwLock<HashMap<String, StaffRole>>,
}

impl StaticSubjectRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers or replaces a subject's role.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn insert(&self, subject_id: impl Into<String>, role: StaffRole) {
        self.roles.write().unwrap().insert(subject_id.into(), role);
    }

    /// Removes a subject from the registry.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn remove(&self, subject_id: &str) {
        self.roles.write().unwrap().remove(subject_id);
    }
}

impl SubjectRegistry for StaticSubjectRegistry {
    fn role_of(&self, subject_id: &str) -> Option<StaffRole> {
        self.roles.read().unwrap().get(subject_id).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clinical_roles_are_eligible() {
        assert!(StaffRole::Physician.is_break_glass_eligible());
        assert!(StaffRole::Nurse.is_break_glass_eligible());
        assert!(StaffRole::Pharmacist.is_break_glass_eligible());
        assert!(StaffRole::LabTechnician.is_break_glass_eligible());
        assert!(!StaffRole::Receptionist.is_break_glass_eligible());
        assert!(!StaffRole::Admin.is_break_glass_eligible());
    }

    #[test]
    fn role_round_trips_through_string_form() {
        for role in [
            StaffRole::Physician,
            StaffRole::Nurse,
            StaffRole::Pharmacist,
            StaffRole::LabTechnician,
            StaffRole::Receptionist,
            StaffRole::Admin,
        ] {
            assert_eq!(StaffRole::parse(role.as_str()).unwrap(), role);
        }
        assert!(StaffRole::parse("janitor").is_err());
    }

    #[test]
    fn unknown_subject_is_ineligible() {
        let registry = StaticSubjectRegistry::new();
        registry.insert("dr-house", StaffRole::Physician);
        registry.insert("front-desk", StaffRole::Receptionist);

        assert!(registry.is_eligible("dr-house"));
        assert!(!registry.is_eligible("front-desk"));
        assert!(!registry.is_eligible("nobody"));

        registry.remove("dr-house");
        assert!(!registry.is_eligible("dr-house"));
    }
}

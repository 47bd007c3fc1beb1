//! Patient intake payload and the session snapshot document.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::IntakeError;

/// Oldest accepted patient age.
pub const MAX_AGE: u32 = 120;

// ─────────────────────────────────────────────────────────────────────────────
// Gender
// ─────────────────────────────────────────────────────────────────────────────

/// Patient gender as accepted by the intake endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    /// Male.
    Male,
    /// Female.
    Female,
    /// Other / undisclosed.
    Other,
}

impl Gender {
    /// Wire string.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Male => "male",
            Self::Female => "female",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Gender {
    type Err = IntakeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "male" | "m" => Ok(Self::Male),
            "female" | "f" => Ok(Self::Female),
            "other" | "o" => Ok(Self::Other),
            other => Err(IntakeError::UnknownGender(other.to_owned())),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// PatientIntake
// ─────────────────────────────────────────────────────────────────────────────

/// Data collected before a diagnosis session can start.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientIntake {
    /// Patient name.
    pub name: String,
    /// Age in whole years.
    pub age: u32,
    /// Gender.
    pub gender: Gender,
    /// Free-text symptom description.
    pub symptoms: String,
}

impl PatientIntake {
    /// Build an intake record. Call [`Self::validate`] before submitting.
    pub fn new(
        name: impl Into<String>,
        age: u32,
        gender: Gender,
        symptoms: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            age,
            gender,
            symptoms: symptoms.into(),
        }
    }

    /// Local checks run before any request is sent.
    pub fn validate(&self) -> Result<(), IntakeError> {
        if self.name.trim().is_empty() {
            return Err(IntakeError::BlankName);
        }
        if self.age > MAX_AGE {
            return Err(IntakeError::AgeOutOfRange(self.age));
        }
        if self.symptoms.trim().is_empty() {
            return Err(IntakeError::BlankSymptoms);
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SessionSnapshot
// ─────────────────────────────────────────────────────────────────────────────

/// Patient details echoed back with a report.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PatientDetails {
    /// Patient name, when the service kept it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Any further fields, kept verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// JSON view of a finished session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// The generated report object. Its layout belongs to the service.
    pub report: Value,
    /// Patient details, when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_details: Option<PatientDetails>,
}

impl SessionSnapshot {
    /// Patient name, if the snapshot carries one.
    #[must_use]
    pub fn patient_name(&self) -> Option<&str> {
        self.patient_details.as_ref()?.name.as_deref()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

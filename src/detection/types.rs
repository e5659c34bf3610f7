//! Shared types for the detection pipeline.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ── Severity ────────────────────────────────────────────────────────

/// Ordinal severity shared by triggers and violations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(format!("unknown severity '{other}'")),
        }
    }
}

// ── Violation type ──────────────────────────────────────────────────

/// Closed vocabulary of boundary violation categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationType {
    GuiltTripping,
    Overstepping,
    AfterHoursPressure,
    RepeatedPushing,
    ScopeCreep,
    TimelinePressure,
    Other,
}

impl ViolationType {
    pub const ALL: [ViolationType; 7] = [
        Self::GuiltTripping,
        Self::Overstepping,
        Self::AfterHoursPressure,
        Self::RepeatedPushing,
        Self::ScopeCreep,
        Self::TimelinePressure,
        Self::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GuiltTripping => "guilt_tripping",
            Self::Overstepping => "overstepping",
            Self::AfterHoursPressure => "after_hours_pressure",
            Self::RepeatedPushing => "repeated_pushing",
            Self::ScopeCreep => "scope_creep",
            Self::TimelinePressure => "timeline_pressure",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for ViolationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ViolationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown violation type '{s}'"))
    }
}

// ── Trigger ─────────────────────────────────────────────────────────

/// A phrase or shape that can read as rejection to an RSD-sensitive reader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
    pub pattern: String,
    pub severity: Severity,
    pub explanation: String,
    pub reassurance: String,
}

// ── Boundary violation ──────────────────────────────────────────────

/// A detected boundary violation with three escalating reply suggestions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundaryViolation {
    #[serde(rename = "type")]
    pub violation_type: ViolationType,
    pub severity: Severity,
    pub explanation: String,
    /// Quoted substrings or short notes, in detection order.
    pub evidence: Vec<String>,
    pub suggested_gentle: String,
    pub suggested_moderate: String,
    pub suggested_firm: String,
}

/// Static gentle/moderate/firm reply templates for one category.
#[derive(Debug, Clone, Copy)]
pub struct ResponseTemplates {
    pub gentle: &'static str,
    pub moderate: &'static str,
    pub firm: &'static str,
}

impl BoundaryViolation {
    pub fn new(
        violation_type: ViolationType,
        severity: Severity,
        explanation: impl Into<String>,
        evidence: Vec<String>,
        templates: ResponseTemplates,
    ) -> Self {
        Self {
            violation_type,
            severity,
            explanation: explanation.into(),
            evidence,
            suggested_gentle: templates.gentle.to_string(),
            suggested_moderate: templates.moderate.to_string(),
            suggested_firm: templates.firm.to_string(),
        }
    }
}

//! Safety findings and quarantine records.

use crate::id::GenomeId;
use crate::Time;
use serde::{Deserialize, Serialize};

/// Severity level of a safety finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Informational
    None,
    /// Low
    Low,
    /// Medium
    Medium,
    /// High
    High,
    /// Critical
    Critical,
}

impl Severity {
    /// Weight used by the safety score.
    pub fn weight(&self) -> f64 {
        match self {
            Severity::Critical => 1.0,
            Severity::High => 0.5,
            Severity::Medium => 0.2,
            Severity::Low => 0.1,
            Severity::None => 0.0,
        }
    }

    /// High and critical findings reject a genome.
    pub fn is_blocking(&self) -> bool {
        *self >= Severity::High
    }

    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::None => "none",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

/// Threat category of a safety finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatCategory {
    /// Loop without a reachable exit
    UnboundedLoop,
    /// Pattern that can exhaust memory, CPU or disk
    ResourceExhaustion,
    /// Data leaving the sandbox
    Exfiltration,
    /// Attempt to gain privileges
    PrivilegeEscalation,
    /// Dynamic code or command execution
    Injection,
    /// Self-copying or process spawning
    Replication,
    /// Dependency outside the allow-list
    UnapprovedDependency,
    /// Deep nesting or oversized literals
    StructuralComplexity,
    /// Observed runtime behaviour over a ceiling
    RuntimeAnomaly,
}

impl ThreatCategory {
    /// Severity assigned to a match in this category before escalation.
    pub fn base_severity(&self) -> Severity {
        match self {
            ThreatCategory::Injection | ThreatCategory::PrivilegeEscalation => Severity::Critical,
            ThreatCategory::Exfiltration | ThreatCategory::Replication => Severity::High,
            ThreatCategory::UnboundedLoop
            | ThreatCategory::ResourceExhaustion
            | ThreatCategory::UnapprovedDependency
            | ThreatCategory::StructuralComplexity
            | ThreatCategory::RuntimeAnomaly => Severity::Medium,
        }
    }

    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreatCategory::UnboundedLoop => "unbounded_loop",
            ThreatCategory::ResourceExhaustion => "resource_exhaustion",
            ThreatCategory::Exfiltration => "exfiltration",
            ThreatCategory::PrivilegeEscalation => "privilege_escalation",
            ThreatCategory::Injection => "injection",
            ThreatCategory::Replication => "replication",
            ThreatCategory::UnapprovedDependency => "unapproved_dependency",
            ThreatCategory::StructuralComplexity => "structural_complexity",
            ThreatCategory::RuntimeAnomaly => "runtime_anomaly",
        }
    }
}

/// A safety finding against a genome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyViolation {
    /// When found
    pub timestamp: Time,
    /// Threat category
    pub category: ThreatCategory,
    /// Severity
    pub severity: Severity,
    /// What was found
    pub description: String,
    /// Offending genome
    pub genome_id: GenomeId,
    /// Matched text, if any
    pub snippet: Option<String>,
    /// Suggested mitigation
    pub mitigation: String,
}

impl SafetyViolation {
    /// Whether two findings describe the same thing, ignoring timestamps.
    pub fn same_finding(&self, other: &SafetyViolation) -> bool {
        self.category == other.category
            && self.severity == other.severity
            && self.description == other.description
            && self.genome_id == other.genome_id
            && self.snippet == other.snippet
    }
}

/// Durable record of a quarantined genome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuarantineRecord {
    /// Quarantined genome
    pub genome_id: GenomeId,
    /// SHA-256 of the scanned representation (hex)
    pub code_hash: String,
    /// Findings that caused the quarantine
    pub violations: Vec<SafetyViolation>,
    /// When quarantined
    pub timestamp: Time,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_order_and_weights() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::High.is_blocking());
        assert!(!Severity::Medium.is_blocking());
        assert_eq!(Severity::Medium.weight(), 0.2);
    }

    #[test]
    fn test_category_base_severity() {
        assert_eq!(ThreatCategory::Injection.base_severity(), Severity::Critical);
        assert_eq!(ThreatCategory::PrivilegeEscalation.base_severity(), Severity::Critical);
        assert_eq!(ThreatCategory::Exfiltration.base_severity(), Severity::High);
        assert_eq!(ThreatCategory::Replication.base_severity(), Severity::High);
        assert_eq!(ThreatCategory::ResourceExhaustion.base_severity(), Severity::Medium);
    }
}

//! Validation verdicts.

use evoguard_core::{GeneIssue, GenomeId, SafetyViolation, Severity, ThreatCategory};
use std::fmt;

/// A hard constraint a genome broke.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstraintViolation {
    /// Memory above the hard limit
    MemoryLimit {
        /// Measured or estimated memory (KB)
        value: f64,
        /// Limit (KB)
        limit: f64,
    },
    /// Instantiation latency above the hard limit
    LatencyLimit {
        /// Measured or estimated latency (µs)
        value: f64,
        /// Limit (µs)
        limit: f64,
    },
    /// Total parameter count above the budget
    ParameterBudget {
        /// Parameter count
        parameters: u64,
        /// Budget
        budget: u64,
    },
    /// Genes do not conform to the schema
    Gene(GeneIssue),
    /// Blocking safety finding
    Unsafe {
        /// Threat category
        category: ThreatCategory,
        /// Severity
        severity: Severity,
    },
}

impl fmt::Display for ConstraintViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstraintViolation::MemoryLimit { value, limit } => {
                write!(f, "memory {:.1} KB exceeds limit {:.1} KB", value, limit)
            }
            ConstraintViolation::LatencyLimit { value, limit } => {
                write!(f, "latency {:.1} µs exceeds limit {:.1} µs", value, limit)
            }
            ConstraintViolation::ParameterBudget { parameters, budget } => {
                write!(f, "{} parameters exceed budget {}", parameters, budget)
            }
            ConstraintViolation::Gene(issue) => write!(f, "{}", issue),
            ConstraintViolation::Unsafe { category, severity } => {
                write!(f, "{} {} safety finding", severity.as_str(), category.as_str())
            }
        }
    }
}

/// Outcome of validating one genome. Always produced, valid or not.
#[derive(Debug, Clone)]
pub struct ValidationReport {
    /// Validated genome
    pub genome_id: GenomeId,
    /// No hard violations and risk at or below the ceiling
    pub is_valid: bool,
    /// Combined risk (0.0 to 1.0)
    pub risk_score: f64,
    /// Hard constraint violations
    pub violations: Vec<ConstraintViolation>,
    /// Every safety finding from the scan
    pub safety: Vec<SafetyViolation>,
    /// Non-blocking warnings
    pub warnings: Vec<String>,
    /// Memory figure used for the checks (KB)
    pub memory_kb: f64,
    /// Latency figure used for the checks (µs)
    pub latency_us: f64,
}

impl ValidationReport {
    /// Whether the scan produced a high or critical finding.
    pub fn has_blocking_safety(&self) -> bool {
        self.safety.iter().any(|v| v.severity.is_blocking())
    }

    /// Blocking safety findings.
    pub fn blocking_safety(&self) -> Vec<SafetyViolation> {
        self.safety
            .iter()
            .filter(|v| v.severity.is_blocking())
            .cloned()
            .collect()
    }

    /// One-line summary of why the genome was rejected.
    pub fn summary(&self) -> String {
        if self.is_valid {
            return format!("valid (risk {:.2})", self.risk_score);
        }
        if self.violations.is_empty() {
            return format!("risk {:.2} above ceiling", self.risk_score);
        }
        self.violations
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

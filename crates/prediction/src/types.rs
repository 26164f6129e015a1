//! Prediction inputs and outputs.

use evoguard_core::GeneValue;
use serde::{Deserialize, Serialize};

/// Direction of a single-gene change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    /// Numeric value raised
    Increase,
    /// Numeric value lowered
    Decrease,
    /// Categorical option replaced
    Swap,
    /// Flag flipped
    Toggle,
    /// Unguided random change
    Random,
}

impl MutationKind {
    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationKind::Increase => "increase",
            MutationKind::Decrease => "decrease",
            MutationKind::Swap => "swap",
            MutationKind::Toggle => "toggle",
            MutationKind::Random => "random",
        }
    }
}

/// A kind of change applied to a named gene.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MutationType {
    /// Gene name
    pub gene: String,
    /// Change direction
    pub kind: MutationKind,
}

impl MutationType {
    /// Create a mutation type.
    pub fn new(gene: impl Into<String>, kind: MutationKind) -> Self {
        Self {
            gene: gene.into(),
            kind,
        }
    }

    /// Classify the change from `current` to `proposed`.
    pub fn between(gene: impl Into<String>, current: &GeneValue, proposed: &GeneValue) -> Self {
        let kind = match (current, proposed) {
            (GeneValue::Choice(_), _) => MutationKind::Swap,
            (GeneValue::Flag(_), _) => MutationKind::Toggle,
            _ => match (current.as_f64(), proposed.as_f64()) {
                (Some(c), Some(p)) if p > c => MutationKind::Increase,
                (Some(c), Some(p)) if p < c => MutationKind::Decrease,
                _ => MutationKind::Random,
            },
        };
        Self::new(gene, kind)
    }
}

impl std::fmt::Display for MutationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.gene, self.kind.as_str())
    }
}

/// A proposed single-gene mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationSpec {
    /// What kind of change
    pub mutation_type: MutationType,
    /// Value before the change
    pub current: GeneValue,
    /// Value after the change
    pub proposed: GeneValue,
    /// Fitness of the genome being mutated
    pub fitness: f64,
}

impl MutationSpec {
    /// Describe a change of `gene` from `current` to `proposed`.
    pub fn new(gene: &str, current: GeneValue, proposed: GeneValue, fitness: f64) -> Self {
        Self {
            mutation_type: MutationType::between(gene, &current, &proposed),
            current,
            proposed,
            fitness,
        }
    }

    /// Relative size of the change; categorical changes count as 1.0.
    pub fn magnitude(&self) -> f64 {
        match (self.current.as_f64(), self.proposed.as_f64()) {
            (Some(c), Some(p)) => (p - c).abs() / c.abs().max(1e-9),
            _ => 1.0,
        }
    }
}

/// Observed result of an applied mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationOutcome {
    /// What kind of change
    pub mutation_type: MutationType,
    /// Parent fitness
    pub fitness_before: f64,
    /// Child fitness
    pub fitness_after: f64,
    /// `fitness_after - fitness_before`
    pub delta: f64,
    /// Whether the child was rejected by validation
    pub violated: bool,
}

impl MutationOutcome {
    /// Build an outcome from before/after fitness.
    pub fn new(mutation_type: MutationType, fitness_before: f64, fitness_after: f64, violated: bool) -> Self {
        Self {
            mutation_type,
            fitness_before,
            fitness_after,
            delta: fitness_after - fitness_before,
            violated,
        }
    }
}

/// How a prediction is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionStrategy {
    /// Running statistics over the recorded outcomes of the same mutation type
    Statistical,
    /// Running mean of the exact mutation type
    Pattern,
    /// Fixed domain priors
    Heuristic,
    /// Confidence-weighted blend of the others
    Hybrid,
}

/// Predicted fitness change.
#[derive(Debug, Clone, PartialEq)]
pub struct FitnessPrediction {
    /// Expected fitness delta
    pub predicted_delta: f64,
    /// Confidence (0.0 to 1.0)
    pub confidence: f64,
    /// How the estimate was made
    pub reasoning: String,
    /// Reasons to distrust the estimate
    pub risk_factors: Vec<String>,
}

impl FitnessPrediction {
    /// Confidence-weighted expected improvement used for ranking.
    pub fn expected_improvement(&self) -> f64 {
        self.predicted_delta * self.confidence
    }
}

/// Hard limits a mutation must respect.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceLimits {
    /// Memory limit (KB)
    pub memory_kb: f64,
    /// Latency limit (µs)
    pub latency_us: f64,
}

/// Estimated chance that a mutation breaks a hard constraint.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintRisk {
    /// Risk from the memory estimate
    pub memory: f64,
    /// Risk from the latency estimate
    pub latency: f64,
    /// Share of past outcomes of this type that were rejected
    pub historical: f64,
    /// Combined risk
    pub overall: f64,
    /// One line per dimension
    pub explanation: Vec<String>,
}

/// Per-objective effect of a mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiObjectiveImpact {
    /// Expected fitness change
    pub fitness_delta: f64,
    /// Memory change (KB)
    pub memory_delta_kb: f64,
    /// Latency change (µs)
    pub latency_delta_us: f64,
    /// Complexity change
    pub complexity_delta: f64,
    /// One line per dimension
    pub explanation: Vec<String>,
}

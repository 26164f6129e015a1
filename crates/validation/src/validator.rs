//! Mutation validator.

use crate::report::{ConstraintViolation, ValidationReport};
use evoguard_core::{
    EvolutionConfig, GeneSchema, Genome, ResourceModel, Severity, ValidationLevel,
};
use evoguard_safety::SafetyScanner;
use std::sync::Arc;
use tracing::debug;

const DEFAULT_PARAMETER_BUDGET: u64 = 1_000_000;

const STABLE_LEARNING_RATE: (f64, f64) = (1e-4, 0.1);
const DEEP_NETWORK_LAYERS: i64 = 8;
const HIGH_DROPOUT: f64 = 0.7;
const BATCH_SIZE_RANGE: (i64, i64) = (4, 256);

/// Checks candidate genomes before they may enter the population.
pub struct MutationValidator {
    memory_limit_kb: f64,
    latency_limit_us: f64,
    risk_ceiling: f64,
    level: ValidationLevel,
    parameter_budget: u64,
    schema: GeneSchema,
    model: ResourceModel,
    scanner: Arc<SafetyScanner>,
}

impl MutationValidator {
    /// Create a validator using the default schema and resource model.
    pub fn new(config: &EvolutionConfig, scanner: Arc<SafetyScanner>) -> Self {
        Self {
            memory_limit_kb: config.memory_limit_kb,
            latency_limit_us: config.instantiation_limit_us,
            risk_ceiling: config.risk_ceiling,
            level: config.validation_level,
            parameter_budget: DEFAULT_PARAMETER_BUDGET,
            schema: GeneSchema::default(),
            model: ResourceModel::default(),
            scanner,
        }
    }

    /// Use a custom gene schema.
    pub fn with_schema(mut self, schema: GeneSchema) -> Self {
        self.schema = schema;
        self
    }

    /// Use a custom resource model.
    pub fn with_model(mut self, model: ResourceModel) -> Self {
        self.model = model;
        self
    }

    /// Set the total parameter budget.
    pub fn with_parameter_budget(mut self, budget: u64) -> Self {
        self.parameter_budget = budget;
        self
    }

    /// Validation level in use.
    pub fn level(&self) -> ValidationLevel {
        self.level
    }

    /// Validate a genome.
    ///
    /// Scored genomes are checked against their measured figures,
    /// unscored ones against the resource model estimate. A figure equal
    /// to its limit is accepted.
    pub fn validate(&self, genome: &Genome) -> ValidationReport {
        let estimate = self.model.estimate(&genome.genes);
        let (memory_kb, latency_us) = if genome.is_scored() {
            (genome.metrics.memory_kb, genome.metrics.latency_us)
        } else {
            (estimate.memory_kb, estimate.latency_us)
        };

        let mut violations: Vec<ConstraintViolation> = self
            .schema
            .check(&genome.genes)
            .into_iter()
            .map(ConstraintViolation::Gene)
            .collect();

        if !(memory_kb <= self.memory_limit_kb) {
            violations.push(ConstraintViolation::MemoryLimit {
                value: memory_kb,
                limit: self.memory_limit_kb,
            });
        }
        if !(latency_us <= self.latency_limit_us) {
            violations.push(ConstraintViolation::LatencyLimit {
                value: latency_us,
                limit: self.latency_limit_us,
            });
        }
        if estimate.parameters > self.parameter_budget {
            violations.push(ConstraintViolation::ParameterBudget {
                parameters: estimate.parameters,
                budget: self.parameter_budget,
            });
        }

        let safety = self.scanner.scan(genome);
        violations.extend(
            safety
                .iter()
                .filter(|v| v.severity.is_blocking())
                .map(|v| ConstraintViolation::Unsafe {
                    category: v.category,
                    severity: v.severity,
                }),
        );

        let mut risks = vec![
            resource_risk(memory_kb / self.memory_limit_kb),
            resource_risk(latency_us / self.latency_limit_us),
        ];
        risks.extend(safety.iter().map(|v| v.severity.weight()));
        let risk_score = combine_risks(&risks);

        let mut warnings = self.level_warnings(genome);
        for v in &safety {
            if reported_as_warning(self.level, v.severity) {
                warnings.push(format!(
                    "{} {} finding: {}",
                    v.severity.as_str(),
                    v.category.as_str(),
                    v.description
                ));
            }
        }

        let is_valid = violations.is_empty() && risk_score <= self.risk_ceiling;
        debug!(
            genome = %genome.id,
            "Validated: valid={} risk={:.3} violations={} warnings={}",
            is_valid,
            risk_score,
            violations.len(),
            warnings.len()
        );

        ValidationReport {
            genome_id: genome.id,
            is_valid,
            risk_score,
            violations,
            safety,
            warnings,
            memory_kb,
            latency_us,
        }
    }

    fn level_warnings(&self, genome: &Genome) -> Vec<String> {
        let mut warnings = Vec::new();
        let genes = &genome.genes;

        if self.level >= ValidationLevel::Standard {
            if let Some(lr) = genes.get_f64("learning_rate") {
                let (low, high) = STABLE_LEARNING_RATE;
                if lr < low || lr > high {
                    warnings.push(format!(
                        "learning rate {} is outside the stable range [{}, {}]",
                        lr, low, high
                    ));
                }
            }
        }

        if self.level >= ValidationLevel::Strict {
            if let Some(layers) = genes.get_i64("hidden_layers") {
                if layers > DEEP_NETWORK_LAYERS {
                    warnings.push(format!(
                        "{} hidden layers is deeper than {}",
                        layers, DEEP_NETWORK_LAYERS
                    ));
                }
            }
        }

        if self.level >= ValidationLevel::Paranoid {
            if let Some(dropout) = genes.get_f64("dropout") {
                if dropout > HIGH_DROPOUT {
                    warnings.push(format!("dropout {} risks over-regularisation", dropout));
                }
            }
            if let Some(batch) = genes.get_i64("batch_size") {
                let (low, high) = BATCH_SIZE_RANGE;
                if batch < low || batch > high {
                    warnings.push(format!(
                        "batch size {} is outside [{}, {}]",
                        batch, low, high
                    ));
                }
            }
        }

        warnings
    }
}

/// Whether a safety finding is listed among the warnings at `level`.
fn reported_as_warning(level: ValidationLevel, severity: Severity) -> bool {
    match level {
        ValidationLevel::Paranoid => true,
        _ => severity > Severity::None && !severity.is_blocking(),
    }
}

/// Risk of running at `utilisation` of a limit: 0.5 at the limit.
fn resource_risk(utilisation: f64) -> f64 {
    if !utilisation.is_finite() {
        return 1.0;
    }
    let u = utilisation.max(0.0);
    (0.5 * u * u).min(1.0)
}

/// Probability that at least one independent risk materialises.
fn combine_risks(risks: &[f64]) -> f64 {
    let survive: f64 = risks.iter().map(|r| 1.0 - r.clamp(0.0, 1.0)).product();
    (1.0 - survive).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use evoguard_core::{GeneValue, ThreatCategory};
    use evoguard_safety::ScannerConfig;

    fn validator(level: ValidationLevel) -> MutationValidator {
        let config = EvolutionConfig {
            validation_level: level,
            ..Default::default()
        };
        let scanner = Arc::new(SafetyScanner::new(ScannerConfig::default()).unwrap());
        MutationValidator::new(&config, scanner)
    }

    fn default_genome() -> Genome {
        Genome::new(GeneSchema::default().default_genes())
    }

    fn scored(memory_kb: f64, latency_us: f64) -> Genome {
        let mut genome = default_genome();
        genome.metrics.memory_kb = memory_kb;
        genome.metrics.latency_us = latency_us;
        genome.metrics.evaluated_at = Some(chrono::Utc::now());
        genome
    }

    #[test]
    fn test_default_genome_is_valid() {
        let report = validator(ValidationLevel::Standard).validate(&default_genome());
        assert!(report.is_valid, "{}", report.summary());
        assert!(report.violations.is_empty());
        assert!(report.warnings.is_empty());
        assert!(report.risk_score < 0.05);
    }

    #[test]
    fn test_out_of_range_gene_is_invalid() {
        let genome = default_genome().with_gene("dropout", GeneValue::Float(0.95));
        let report = validator(ValidationLevel::Basic).validate(&genome);
        assert!(!report.is_valid);
        assert!(matches!(
            &report.violations[..],
            [ConstraintViolation::Gene(evoguard_core::GeneIssue::OutOfRange { name, .. })] if name == "dropout"
        ));
    }

    #[test]
    fn test_memory_limit_boundary() {
        let validator = validator(ValidationLevel::Standard);

        let at_limit = validator.validate(&scored(512.0, 100.0));
        assert!(at_limit.is_valid, "{}", at_limit.summary());

        let over = validator.validate(&scored(513.0, 100.0));
        assert!(!over.is_valid);
        assert!(matches!(
            &over.violations[..],
            [ConstraintViolation::MemoryLimit { value, limit }] if *value == 513.0 && *limit == 512.0
        ));
    }

    #[test]
    fn test_latency_limit_boundary() {
        let validator = validator(ValidationLevel::Standard);
        assert!(validator.validate(&scored(50.0, 1000.0)).is_valid);
        assert!(!validator.validate(&scored(50.0, 1000.5)).is_valid);
    }

    #[test]
    fn test_injection_is_invalid() {
        let genome = default_genome().with_source("model.fit(eval(config_text))\n");
        let report = validator(ValidationLevel::Basic).validate(&genome);
        assert!(!report.is_valid);
        assert!(report.has_blocking_safety());
        assert!(report.violations.iter().any(|v| matches!(
            v,
            ConstraintViolation::Unsafe {
                category: ThreatCategory::Injection,
                severity: Severity::Critical
            }
        )));
        assert_eq!(report.risk_score, 1.0);
    }

    #[test]
    fn test_medium_finding_is_a_warning() {
        let genome = default_genome().with_source("import leftpad\n");
        let report = validator(ValidationLevel::Basic).validate(&genome);
        assert!(report.is_valid, "{}", report.summary());
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains("unapproved_dependency"));
        assert!(report.risk_score > 0.2);
    }

    #[test]
    fn test_non_blocking_findings_are_warnings() {
        for level in [ValidationLevel::Basic, ValidationLevel::Strict] {
            assert!(reported_as_warning(level, Severity::Low));
            assert!(reported_as_warning(level, Severity::Medium));
            assert!(!reported_as_warning(level, Severity::High));
            assert!(!reported_as_warning(level, Severity::None));
        }
        assert!(reported_as_warning(ValidationLevel::Paranoid, Severity::Critical));
    }

    #[test]
    fn test_huge_gene_is_invalid_not_a_panic() {
        let genome = default_genome().with_gene("hidden_units", GeneValue::Int(5_000_000_000));
        let report = validator(ValidationLevel::Standard).validate(&genome);
        assert!(!report.is_valid);
        assert!(report.violations.iter().any(|v| matches!(
            v,
            ConstraintViolation::Gene(evoguard_core::GeneIssue::OutOfRange { name, .. }) if name == "hidden_units"
        )));
        assert!(report
            .violations
            .iter()
            .any(|v| matches!(v, ConstraintViolation::ParameterBudget { .. })));
    }

    #[test]
    fn test_parameter_budget() {
        let genome = default_genome()
            .with_gene("hidden_layers", GeneValue::Int(16))
            .with_gene("hidden_units", GeneValue::Int(1024));
        let report = validator(ValidationLevel::Basic).validate(&genome);
        assert!(!report.is_valid);
        assert!(report
            .violations
            .iter()
            .any(|v| matches!(v, ConstraintViolation::ParameterBudget { .. })));
    }

    #[test]
    fn test_level_warnings() {
        let genome = default_genome()
            .with_gene("learning_rate", GeneValue::Float(0.5))
            .with_gene("hidden_layers", GeneValue::Int(9))
            .with_gene("hidden_units", GeneValue::Int(4))
            .with_gene("batch_size", GeneValue::Int(2));

        assert!(validator(ValidationLevel::Basic).validate(&genome).warnings.is_empty());
        assert_eq!(validator(ValidationLevel::Standard).validate(&genome).warnings.len(), 1);
        assert_eq!(validator(ValidationLevel::Strict).validate(&genome).warnings.len(), 2);
        assert_eq!(validator(ValidationLevel::Paranoid).validate(&genome).warnings.len(), 3);
    }

    #[test]
    fn test_risk_ceiling() {
        let config = EvolutionConfig {
            risk_ceiling: 0.4,
            ..Default::default()
        };
        let scanner = Arc::new(SafetyScanner::new(ScannerConfig::default()).unwrap());
        let validator = MutationValidator::new(&config, scanner);

        let report = validator.validate(&scored(500.0, 100.0));
        assert!(report.violations.is_empty());
        assert!(report.risk_score > 0.4);
        assert!(!report.is_valid);
    }
}

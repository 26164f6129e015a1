//! Fitness evaluation.

use async_trait::async_trait;
use evoguard_core::{EvolutionConfig, Genes, Genome, GenomeMetrics, ResourceModel};

/// Evaluation failure. The engine scores the genome at minimum fitness.
#[derive(Debug, thiserror::Error)]
pub enum EvaluationError {
    /// The evaluator could not produce figures
    #[error("evaluation failed: {0}")]
    Failed(String),
}

/// Produces measured figures for a genome.
///
/// Called concurrently for the unscored members of a generation.
#[async_trait]
pub trait FitnessEvaluator: Send + Sync {
    /// Measure a genome.
    async fn evaluate(&self, genome: &Genome) -> Result<GenomeMetrics, EvaluationError>;
}

/// Closed-form evaluator built on the resource model.
///
/// Resource figures come straight from [`ResourceModel::estimate`];
/// accuracy is a smooth score of how close each hyper-parameter sits to a
/// known good region.
#[derive(Debug, Clone, Default)]
pub struct AnalyticEvaluator {
    model: ResourceModel,
}

impl AnalyticEvaluator {
    /// Create an evaluator over a resource model.
    pub fn new(model: ResourceModel) -> Self {
        Self { model }
    }

    /// Accuracy score of a gene set, in `[0, 1]`.
    pub fn accuracy(&self, genes: &Genes) -> f64 {
        let lr = genes
            .get_f64("learning_rate")
            .map(|lr| 1.0 - ((lr.max(1e-12).log10() - 3e-3f64.log10()).abs() / 3.0))
            .unwrap_or(0.0)
            .clamp(0.0, 1.0);

        let parameters = self.model.parameter_count(genes) as f64;
        let capacity = (parameters.max(1.0).ln() / (self.model.reference_parameters as f64).ln())
            .clamp(0.0, 1.0);

        let dropout = genes
            .get_f64("dropout")
            .map(|d| 1.0 - 2.0 * (d - 0.2).abs())
            .unwrap_or(0.5)
            .clamp(0.0, 1.0);

        let batch = genes
            .get_i64("batch_size")
            .map(|b| 1.0 - ((b.max(1) as f64).log2() - 5.0).abs() / 6.0)
            .unwrap_or(0.5)
            .clamp(0.0, 1.0);

        let activation = match genes.get("activation").and_then(|v| v.as_choice()) {
            Some("gelu") => 0.03,
            Some("relu") => 0.02,
            Some("sigmoid") => -0.02,
            _ => 0.0,
        };
        let norm = match genes.get("batch_norm").and_then(|v| v.as_flag()) {
            Some(true) => 0.02,
            _ => 0.0,
        };

        (0.35 * lr + 0.3 * capacity + 0.15 * dropout + 0.1 * batch + 0.05 + activation + norm)
            .clamp(0.0, 1.0)
    }
}

#[async_trait]
impl FitnessEvaluator for AnalyticEvaluator {
    async fn evaluate(&self, genome: &Genome) -> Result<GenomeMetrics, EvaluationError> {
        let estimate = self.model.estimate(&genome.genes);
        Ok(GenomeMetrics {
            memory_kb: estimate.memory_kb,
            latency_us: estimate.latency_us,
            accuracy: self.accuracy(&genome.genes),
            evaluated_at: Some(chrono::Utc::now()),
        })
    }
}

/// Weighted fitness of measured figures, in `[0, 1]`.
///
/// Memory and latency contribute their headroom below the configured
/// limits; complexity contributes `1 - complexity`.
pub fn weighted_fitness(config: &EvolutionConfig, metrics: &GenomeMetrics, complexity: f64) -> f64 {
    let weights = &config.fitness_weights;
    let headroom = |value: f64, limit: f64| {
        if value.is_finite() {
            1.0 - (value / limit).clamp(0.0, 1.0)
        } else {
            0.0
        }
    };

    let fitness = weights.accuracy * metrics.accuracy.clamp(0.0, 1.0)
        + weights.memory * headroom(metrics.memory_kb, config.memory_limit_kb)
        + weights.latency * headroom(metrics.latency_us, config.instantiation_limit_us)
        + weights.complexity * (1.0 - complexity.clamp(0.0, 1.0));
    fitness.clamp(0.0, 1.0)
}

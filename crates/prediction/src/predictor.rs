//! History-driven effect predictor.

use crate::types::{
    ConstraintRisk, FitnessPrediction, MultiObjectiveImpact, MutationKind, MutationOutcome,
    MutationSpec, MutationType, PredictionStrategy, ResourceLimits,
};
use evoguard_core::{Genes, ResourceModel};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tracing::debug;

/// Predictor configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictorConfig {
    /// Outcomes kept in the history
    pub history_cap: usize,
    /// Below this confidence a conservative estimate is returned
    pub min_confidence: f64,
    /// Highest confidence any learned estimate may reach
    pub confidence_cap: f64,
    /// Sample count at which learned confidence reaches one half
    pub confidence_k: f64,
    /// Confidence of the fixed domain priors
    pub heuristic_confidence: f64,
    /// Strategy used by [`EffectPredictor::predict_fitness_change`]
    pub strategy: PredictionStrategy,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            history_cap: 1000,
            min_confidence: 0.3,
            confidence_cap: 0.95,
            confidence_k: 10.0,
            heuristic_confidence: 0.25,
            strategy: PredictionStrategy::Hybrid,
        }
    }
}

/// Welford running statistics of fitness deltas.
#[derive(Debug, Clone, Default)]
struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    violations: u64,
}

impl RunningStats {
    fn push(&mut self, delta: f64, violated: bool) {
        self.count += 1;
        let diff = delta - self.mean;
        self.mean += diff / self.count as f64;
        self.m2 += diff * (delta - self.mean);
        if violated {
            self.violations += 1;
        }
    }

    fn std_dev(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            (self.m2 / (self.count - 1) as f64).sqrt()
        }
    }

    fn violation_rate(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.violations as f64 / self.count as f64
        }
    }
}

/// One component estimate.
#[derive(Debug, Clone, Copy)]
struct Estimate {
    delta: f64,
    confidence: f64,
    source: PredictionStrategy,
}

/// Predicts mutation effects from a bounded outcome history and a
/// per-type pattern cache.
pub struct EffectPredictor {
    config: PredictorConfig,
    model: ResourceModel,
    history: VecDeque<MutationOutcome>,
    patterns: HashMap<MutationType, RunningStats>,
}

impl EffectPredictor {
    /// Create a predictor with the default resource model.
    pub fn new(config: PredictorConfig) -> Self {
        Self {
            config,
            model: ResourceModel::default(),
            history: VecDeque::new(),
            patterns: HashMap::new(),
        }
    }

    /// Use a custom resource model for constraint and impact estimates.
    pub fn with_model(mut self, model: ResourceModel) -> Self {
        self.model = model;
        self
    }

    /// Predictor configuration.
    pub fn config(&self) -> &PredictorConfig {
        &self.config
    }

    /// Outcomes currently held, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &MutationOutcome> {
        self.history.iter()
    }

    /// Number of outcomes currently held.
    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Total outcomes ever learned for a mutation type.
    pub fn samples(&self, mutation_type: &MutationType) -> u64 {
        self.patterns.get(mutation_type).map(|s| s.count).unwrap_or(0)
    }

    /// Record one outcome.
    pub fn record(&mut self, outcome: MutationOutcome) {
        self.learn_from_history(std::iter::once(outcome));
    }

    /// Append outcomes, evicting the oldest past the history cap.
    ///
    /// The pattern cache keeps running totals and is not affected by
    /// eviction.
    pub fn learn_from_history(&mut self, outcomes: impl IntoIterator<Item = MutationOutcome>) {
        let mut learned = 0usize;
        for outcome in outcomes {
            self.patterns
                .entry(outcome.mutation_type.clone())
                .or_default()
                .push(outcome.delta, outcome.violated);
            self.history.push_back(outcome);
            learned += 1;
        }
        while self.history.len() > self.config.history_cap {
            self.history.pop_front();
        }
        if learned > 0 {
            debug!(
                "Learned {} mutation outcomes ({} held, {} patterns)",
                learned,
                self.history.len(),
                self.patterns.len()
            );
        }
    }

    fn learned_confidence(&self, samples: f64) -> f64 {
        (samples / (samples + self.config.confidence_k)).min(self.config.confidence_cap)
    }

    /// Recent outcomes of the same type, confidence reduced by spread.
    fn statistical(&self, spec: &MutationSpec) -> Option<Estimate> {
        let deltas: Vec<f64> = self
            .history
            .iter()
            .filter(|o| o.mutation_type == spec.mutation_type)
            .map(|o| o.delta)
            .collect();
        if deltas.is_empty() {
            return None;
        }
        let n = deltas.len() as f64;
        let mean = deltas.iter().sum::<f64>() / n;
        let variance = deltas.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / n;
        let spread = variance.sqrt() / (mean.abs() + 0.01);
        Some(Estimate {
            delta: mean,
            confidence: self.learned_confidence(n) / (1.0 + spread),
            source: PredictionStrategy::Statistical,
        })
    }

    /// Running mean of every outcome of the same type.
    fn pattern(&self, spec: &MutationSpec) -> Option<Estimate> {
        let stats = self.patterns.get(&spec.mutation_type)?;
        Some(Estimate {
            delta: stats.mean,
            confidence: self.learned_confidence(stats.count as f64),
            source: PredictionStrategy::Pattern,
        })
    }

    fn heuristic(&self, spec: &MutationSpec) -> Estimate {
        Estimate {
            delta: prior(&spec.mutation_type, spec.fitness) * spec.magnitude().min(1.0),
            confidence: self.config.heuristic_confidence,
            source: PredictionStrategy::Heuristic,
        }
    }

    /// Predict the fitness change of a mutation with the configured strategy.
    pub fn predict_fitness_change(&self, spec: &MutationSpec) -> FitnessPrediction {
        self.predict_with(spec, self.config.strategy)
    }

    /// Predict the fitness change of a mutation with a given strategy.
    ///
    /// The hybrid confidence is the highest component confidence. Pattern
    /// confidence only grows with samples and bounds the statistical one,
    /// so hybrid confidence never drops as outcomes accumulate.
    pub fn predict_with(&self, spec: &MutationSpec, strategy: PredictionStrategy) -> FitnessPrediction {
        let components: Vec<Estimate> = match strategy {
            PredictionStrategy::Statistical => self.statistical(spec).into_iter().collect(),
            PredictionStrategy::Pattern => self.pattern(spec).into_iter().collect(),
            PredictionStrategy::Heuristic => vec![self.heuristic(spec)],
            PredictionStrategy::Hybrid => self
                .statistical(spec)
                .into_iter()
                .chain(self.pattern(spec))
                .chain(std::iter::once(self.heuristic(spec)))
                .collect(),
        };

        let risk_factors = self.risk_factors(spec);
        let weight: f64 = components.iter().map(|c| c.confidence).sum();
        if components.is_empty() || weight <= 0.0 {
            return FitnessPrediction {
                predicted_delta: 0.0,
                confidence: 0.0,
                reasoning: format!("no {:?} data for {}", strategy, spec.mutation_type),
                risk_factors,
            };
        }

        let blended = components.iter().map(|c| c.delta * c.confidence).sum::<f64>() / weight;
        let confidence = components
            .iter()
            .map(|c| c.confidence)
            .fold(0.0, f64::max);
        let parts = components
            .iter()
            .map(|c| format!("{:?} {:+.4} @ {:.2}", c.source, c.delta, c.confidence))
            .collect::<Vec<_>>()
            .join(", ");

        if confidence < self.config.min_confidence {
            FitnessPrediction {
                predicted_delta: blended * confidence,
                confidence,
                reasoning: format!(
                    "conservative: confidence {:.2} below {:.2} for {} ({})",
                    confidence, self.config.min_confidence, spec.mutation_type, parts
                ),
                risk_factors,
            }
        } else {
            FitnessPrediction {
                predicted_delta: blended,
                confidence,
                reasoning: format!("{:?} estimate for {} ({})", strategy, spec.mutation_type, parts),
                risk_factors,
            }
        }
    }

    fn risk_factors(&self, spec: &MutationSpec) -> Vec<String> {
        let mut factors = Vec::new();
        let stats = self.patterns.get(&spec.mutation_type);
        let samples = stats.map(|s| s.count).unwrap_or(0);

        if samples < 5 {
            factors.push(format!("only {} observations of {}", samples, spec.mutation_type));
        }
        if let Some(stats) = stats {
            if stats.count >= 2 && stats.std_dev() > stats.mean.abs() {
                factors.push(format!("outcomes of {} vary widely", spec.mutation_type));
            }
            if stats.violation_rate() > 0.2 {
                factors.push(format!(
                    "{:.0}% of past {} mutations were rejected",
                    stats.violation_rate() * 100.0,
                    spec.mutation_type
                ));
            }
        }
        let magnitude = spec.magnitude();
        if spec.current.as_f64().is_some() && magnitude > 0.5 {
            factors.push(format!("large change ({:.0}% of current value)", magnitude * 100.0));
        }
        if spec.fitness > 0.8 {
            factors.push("genome already near the top of the fitness range".to_string());
        }
        factors
    }

    /// Estimate the chance that applying the mutation to `genes` breaks a
    /// hard limit.
    pub fn predict_constraint_violation_risk(
        &self,
        spec: &MutationSpec,
        genes: &Genes,
        limits: &ResourceLimits,
    ) -> ConstraintRisk {
        let mutated = genes
            .clone()
            .with(spec.mutation_type.gene.clone(), spec.proposed.clone());
        let estimate = self.model.estimate(&mutated);

        let memory_util = estimate.memory_kb / limits.memory_kb;
        let latency_util = estimate.latency_us / limits.latency_us;
        let memory = utilisation_risk(memory_util);
        let latency = utilisation_risk(latency_util);
        let historical = self
            .patterns
            .get(&spec.mutation_type)
            .map(|s| s.violation_rate())
            .unwrap_or(0.0);
        let overall = 1.0 - (1.0 - memory) * (1.0 - latency) * (1.0 - historical);

        ConstraintRisk {
            memory,
            latency,
            historical,
            overall,
            explanation: vec![
                format!(
                    "memory {:.1} KB is {:.0}% of {:.1} KB",
                    estimate.memory_kb,
                    memory_util * 100.0,
                    limits.memory_kb
                ),
                format!(
                    "latency {:.1} µs is {:.0}% of {:.1} µs",
                    estimate.latency_us,
                    latency_util * 100.0,
                    limits.latency_us
                ),
                format!(
                    "{:.0}% of past {} mutations were rejected",
                    historical * 100.0,
                    spec.mutation_type
                ),
            ],
        }
    }

    /// Estimate the effect of the mutation on each objective.
    pub fn predict_multi_objective_impact(
        &self,
        spec: &MutationSpec,
        genes: &Genes,
    ) -> MultiObjectiveImpact {
        let before = self.model.estimate(genes);
        let after = self.model.estimate(
            &genes
                .clone()
                .with(spec.mutation_type.gene.clone(), spec.proposed.clone()),
        );
        let fitness = self.predict_fitness_change(spec);

        let memory_delta_kb = after.memory_kb - before.memory_kb;
        let latency_delta_us = after.latency_us - before.latency_us;
        let complexity_delta = after.complexity - before.complexity;

        MultiObjectiveImpact {
            fitness_delta: fitness.predicted_delta,
            memory_delta_kb,
            latency_delta_us,
            complexity_delta,
            explanation: vec![
                format!(
                    "fitness {:+.4} (confidence {:.2})",
                    fitness.predicted_delta, fitness.confidence
                ),
                format!("memory {:+.1} KB", memory_delta_kb),
                format!("latency {:+.1} µs", latency_delta_us),
                format!("complexity {:+.4}", complexity_delta),
            ],
        }
    }
}

impl Default for EffectPredictor {
    fn default() -> Self {
        Self::new(PredictorConfig::default())
    }
}

/// Utilisation of a limit mapped to a risk; anything over the limit is certain.
fn utilisation_risk(utilisation: f64) -> f64 {
    if !utilisation.is_finite() || utilisation > 1.0 {
        1.0
    } else {
        utilisation.max(0.0).powi(4)
    }
}

/// Fitness above which changes are expected to risk regression.
const REGRESSION_THRESHOLD: f64 = 0.8;

/// Predicted loss per unit of fitness above [`REGRESSION_THRESHOLD`].
const REGRESSION_SLOPE: f64 = 0.02;

/// Domain prior for a change at full magnitude.
///
/// Gains shrink with the remaining headroom `1 - fitness`, and near the top
/// every change carries a regression term.
fn prior(mutation_type: &MutationType, fitness: f64) -> f64 {
    let fitness = fitness.clamp(0.0, 1.0);
    let base = base_prior(mutation_type, fitness);
    let scaled = if base > 0.0 { base * (1.0 - fitness) } else { base };
    let regression = if mutation_type.kind == MutationKind::Random {
        0.0
    } else {
        REGRESSION_SLOPE * (fitness - REGRESSION_THRESHOLD).max(0.0)
    };
    scaled - regression
}

fn base_prior(mutation_type: &MutationType, fitness: f64) -> f64 {
    match (mutation_type.gene.as_str(), mutation_type.kind) {
        ("learning_rate", MutationKind::Decrease) if fitness >= 0.5 => 0.01,
        ("learning_rate", MutationKind::Increase) if fitness < 0.5 => 0.01,
        ("learning_rate", MutationKind::Random) => 0.0,
        ("learning_rate", _) => -0.005,
        ("dropout", MutationKind::Increase) => -0.005,
        ("dropout", MutationKind::Decrease) => 0.005,
        ("hidden_units" | "hidden_layers", MutationKind::Increase) => 0.01,
        ("hidden_units" | "hidden_layers", MutationKind::Decrease) => 0.005,
        ("batch_size", MutationKind::Increase | MutationKind::Decrease) => 0.002,
        ("activation", MutationKind::Swap) => 0.005,
        ("batch_norm", MutationKind::Toggle) => 0.005,
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evoguard_core::{GeneSchema, GeneValue};

    fn lr_increase() -> MutationSpec {
        MutationSpec::new("learning_rate", GeneValue::Float(0.001), GeneValue::Float(0.002), 0.3)
    }

    fn outcome(spec: &MutationSpec, delta: f64) -> MutationOutcome {
        MutationOutcome::new(spec.mutation_type.clone(), 0.3, 0.3 + delta, false)
    }

    #[test]
    fn test_mutation_type_classification() {
        let up = MutationType::between("hidden_units", &GeneValue::Int(8), &GeneValue::Int(16));
        assert_eq!(up.kind, MutationKind::Increase);
        let down = MutationType::between("dropout", &GeneValue::Float(0.4), &GeneValue::Float(0.1));
        assert_eq!(down.kind, MutationKind::Decrease);
        let swap = MutationType::between(
            "activation",
            &GeneValue::Choice("relu".into()),
            &GeneValue::Choice("gelu".into()),
        );
        assert_eq!(swap.kind, MutationKind::Swap);
        let toggle = MutationType::between("batch_norm", &GeneValue::Flag(false), &GeneValue::Flag(true));
        assert_eq!(toggle.kind, MutationKind::Toggle);
    }

    #[test]
    fn test_low_confidence_is_conservative() {
        let predictor = EffectPredictor::default();
        let prediction = predictor.predict_fitness_change(&lr_increase());
        assert_eq!(prediction.confidence, 0.25);
        assert!(prediction.predicted_delta.abs() <= 0.01 * 0.25 + 1e-12);
        assert!(prediction.reasoning.starts_with("conservative"));
        assert!(prediction.risk_factors.iter().any(|f| f.starts_with("only 0")));
    }

    #[test]
    fn test_hybrid_confidence_never_decreases() {
        let mut predictor = EffectPredictor::default();
        let spec = lr_increase();

        let mut previous = predictor.predict_fitness_change(&spec).confidence;
        for i in 0..60 {
            let delta = if i % 2 == 0 { 0.02 } else { -0.01 };
            predictor.record(outcome(&spec, delta));
            let confidence = predictor.predict_fitness_change(&spec).confidence;
            assert!(confidence >= previous, "step {}: {} < {}", i, confidence, previous);
            previous = confidence;
        }
        assert!(previous > 0.8);
    }

    #[test]
    fn test_heuristic_gain_shrinks_with_fitness() {
        let predictor = EffectPredictor::default();
        let widen = |fitness| {
            let spec = MutationSpec::new("hidden_units", GeneValue::Int(64), GeneValue::Int(96), fitness);
            predictor
                .predict_with(&spec, PredictionStrategy::Heuristic)
                .predicted_delta
        };

        let low = widen(0.1);
        let mid = widen(0.5);
        let high = widen(0.95);
        assert!(low > mid && mid > 0.0, "{} {}", low, mid);
        assert!(high < 0.0, "{}", high);
    }

    #[test]
    fn test_pattern_learns_mean_delta() {
        let mut predictor = EffectPredictor::default();
        let spec = lr_increase();
        predictor.learn_from_history((0..30).map(|_| outcome(&spec, 0.05)));

        let pattern = predictor.predict_with(&spec, PredictionStrategy::Pattern);
        assert!((pattern.predicted_delta - 0.05).abs() < 1e-9);
        assert!((pattern.confidence - 0.75).abs() < 1e-9);

        let hybrid = predictor.predict_fitness_change(&spec);
        assert!(hybrid.predicted_delta > 0.01 && hybrid.predicted_delta < 0.05);
        assert!((hybrid.confidence - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut predictor = EffectPredictor::new(PredictorConfig {
            history_cap: 5,
            ..Default::default()
        });
        let spec = lr_increase();
        predictor.learn_from_history((0..8).map(|i| {
            MutationOutcome::new(spec.mutation_type.clone(), i as f64 / 10.0, 0.5, false)
        }));

        assert_eq!(predictor.history_len(), 5);
        assert_eq!(predictor.history().next().unwrap().fitness_before, 0.3);
        assert_eq!(predictor.samples(&spec.mutation_type), 8);
    }

    #[test]
    fn test_constraint_violation_risk() {
        let predictor = EffectPredictor::default();
        let genes = GeneSchema::default().default_genes();
        let limits = ResourceLimits {
            memory_kb: 512.0,
            latency_us: 1000.0,
        };

        let huge = MutationSpec::new("hidden_units", GeneValue::Int(64), GeneValue::Int(1024), 0.5);
        let risk = predictor.predict_constraint_violation_risk(&huge, &genes, &limits);
        assert_eq!(risk.memory, 1.0);
        assert_eq!(risk.overall, 1.0);
        assert_eq!(risk.explanation.len(), 3);

        let small = MutationSpec::new("hidden_units", GeneValue::Int(64), GeneValue::Int(72), 0.5);
        let risk = predictor.predict_constraint_violation_risk(&small, &genes, &limits);
        assert!(risk.overall < 0.05);
    }

    #[test]
    fn test_multi_objective_impact() {
        let predictor = EffectPredictor::default();
        let genes = GeneSchema::default().default_genes();
        let spec = MutationSpec::new("hidden_units", GeneValue::Int(64), GeneValue::Int(128), 0.5);

        let impact = predictor.predict_multi_objective_impact(&spec, &genes);
        assert!(impact.memory_delta_kb > 0.0);
        assert!(impact.latency_delta_us > 0.0);
        assert!(impact.complexity_delta > 0.0);
        assert_eq!(impact.explanation.len(), 4);
    }

    #[test]
    fn test_outcome_serde_shape() {
        let spec = lr_increase();
        let json = serde_json::to_value(outcome(&spec, 0.01)).unwrap();
        assert_eq!(json["mutation_type"]["kind"], "increase");
    }
}

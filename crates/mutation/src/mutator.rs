//! Guided mutation with an unguided random fallback.

use evoguard_core::{
    EvolutionConfig, GeneBounds, GeneSchema, GeneValue, Genome, GenomeId, ResourceModel,
};
use evoguard_prediction::{
    EffectPredictor, FitnessPrediction, MutationKind, MutationSpec, MutationType, ResourceLimits,
};
use rand::seq::SliceRandom;
use rand::Rng;
use std::time::{Duration, Instant};
use tracing::debug;

/// Penalty applied per unit of predicted constraint risk when ranking.
const RISK_PENALTY: f64 = 0.05;

/// Mutator configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct MutatorConfig {
    /// Candidates evaluated per genome
    pub max_candidates_per_genome: usize,
    /// Time allowed for guided analysis of one genome
    pub analysis_budget: Duration,
    /// Share of a hard limit above which a resource counts as weak
    pub weak_threshold: f64,
    /// Fitness below which aggressive changes are considered
    pub low_fitness: f64,
    /// Fitness above which only conservative changes are made
    pub high_fitness: f64,
    /// Analysis confidence required for aggressive changes
    pub confident_analysis: f64,
    /// Dropout above which the genome counts as over-regularised
    pub max_dropout: f64,
    /// Largest relative change made by the random fallback
    pub random_step: f64,
    /// Memory limit (KB)
    pub memory_limit_kb: f64,
    /// Latency limit (µs)
    pub latency_limit_us: f64,
}

impl Default for MutatorConfig {
    fn default() -> Self {
        Self {
            max_candidates_per_genome: 3,
            analysis_budget: Duration::from_millis(50),
            weak_threshold: 0.8,
            low_fitness: 0.3,
            high_fitness: 0.8,
            confident_analysis: 0.7,
            max_dropout: 0.5,
            random_step: 0.25,
            memory_limit_kb: 512.0,
            latency_limit_us: 1000.0,
        }
    }
}

impl MutatorConfig {
    /// Take limits and analysis budget from a run configuration.
    pub fn from_evolution(config: &EvolutionConfig) -> Self {
        Self {
            analysis_budget: Duration::from_millis(config.analysis_budget_ms),
            memory_limit_kb: config.memory_limit_kb,
            latency_limit_us: config.instantiation_limit_us,
            ..Default::default()
        }
    }
}

/// Part of a genome that analysis found wanting.
#[derive(Debug, Clone, PartialEq)]
pub enum WeakArea {
    /// Memory close to the limit
    Memory {
        /// Share of the limit in use
        utilisation: f64,
    },
    /// Latency close to the limit
    Latency {
        /// Share of the limit in use
        utilisation: f64,
    },
    /// Learning rate unsuitable for the current fitness
    LearningRate {
        /// Current value
        value: f64,
    },
    /// Dropout high enough to hold back learning
    OverRegularised {
        /// Current dropout
        dropout: f64,
    },
}

/// Result of analysing a genome.
#[derive(Debug, Clone, PartialEq)]
pub struct Analysis {
    /// Weak areas found
    pub weak_areas: Vec<WeakArea>,
    /// Trust in the analysis (higher for measured genomes)
    pub confidence: f64,
}

/// How far guided mutation reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationStrategy {
    /// Large steps for weak genomes
    Aggressive,
    /// Fixes aimed at the weak areas
    Targeted,
    /// Small steps for strong genomes
    Conservative,
    /// Broad single changes
    Exploratory,
}

/// Guided mutation failures; each one sends the mutator down the random path.
#[derive(Debug, thiserror::Error)]
pub enum MutationError {
    /// A gene needed by the analysis is missing
    #[error("gene '{0}' required for analysis is missing")]
    MissingGene(String),

    /// Analysis ran past its time budget
    #[error("analysis budget of {0:?} exhausted")]
    BudgetExhausted(Duration),

    /// No candidate changes the genome
    #[error("no mutation candidates")]
    NoCandidates,
}

/// A mutation awaiting its outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationRecord {
    /// Mutated genome
    pub parent_id: GenomeId,
    /// Resulting genome
    pub child_id: GenomeId,
    /// Change applied
    pub mutation_type: MutationType,
    /// Parent fitness at mutation time
    pub parent_fitness: f64,
    /// Strategy used, `None` for the random path
    pub strategy: Option<MutationStrategy>,
}

/// Output of one mutation.
#[derive(Debug, Clone)]
pub struct MutationResult {
    /// New genome (new id, zeroed fitness and metrics)
    pub genome: Genome,
    /// Record of the change
    pub record: MutationRecord,
    /// Prediction for the chosen candidate
    pub prediction: Option<FitnessPrediction>,
    /// Why guided mutation was not used
    pub fallback: Option<String>,
}

struct Ranked {
    gene: String,
    value: GeneValue,
    prediction: FitnessPrediction,
    score: f64,
}

/// Predictor-guided mutator.
pub struct AIMutator {
    config: MutatorConfig,
    schema: GeneSchema,
    model: ResourceModel,
    pending: Vec<MutationRecord>,
}

impl AIMutator {
    /// Create a mutator using the default schema and resource model.
    pub fn new(config: MutatorConfig) -> Self {
        Self {
            config,
            schema: GeneSchema::default(),
            model: ResourceModel::default(),
            pending: Vec::new(),
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

    /// Take the mutations recorded since the last call.
    pub fn take_pending(&mut self) -> Vec<MutationRecord> {
        std::mem::take(&mut self.pending)
    }

    /// Find weak areas of a genome.
    pub fn analyse(&self, genome: &Genome) -> Result<Analysis, MutationError> {
        let learning_rate = genome
            .genes
            .get_f64("learning_rate")
            .ok_or_else(|| MutationError::MissingGene("learning_rate".to_string()))?;

        let (memory_kb, latency_us) = if genome.is_scored() {
            (genome.metrics.memory_kb, genome.metrics.latency_us)
        } else {
            let estimate = self.model.estimate(&genome.genes);
            (estimate.memory_kb, estimate.latency_us)
        };

        let mut weak_areas = Vec::new();
        let memory = memory_kb / self.config.memory_limit_kb;
        if memory > self.config.weak_threshold {
            weak_areas.push(WeakArea::Memory { utilisation: memory });
        }
        let latency = latency_us / self.config.latency_limit_us;
        if latency > self.config.weak_threshold {
            weak_areas.push(WeakArea::Latency { utilisation: latency });
        }
        let fine_tuning = genome.fitness > self.config.high_fitness;
        if learning_rate > 0.1 || learning_rate < 1e-4 || (fine_tuning && learning_rate > 0.01) {
            weak_areas.push(WeakArea::LearningRate {
                value: learning_rate,
            });
        }
        if let Some(dropout) = genome.genes.get_f64("dropout") {
            if dropout > self.config.max_dropout {
                weak_areas.push(WeakArea::OverRegularised { dropout });
            }
        }

        Ok(Analysis {
            weak_areas,
            confidence: if genome.is_scored() { 0.9 } else { 0.6 },
        })
    }

    /// Pick a strategy for a genome of the given fitness.
    pub fn choose_strategy(&self, fitness: f64, analysis: &Analysis) -> MutationStrategy {
        if fitness < self.config.low_fitness && analysis.confidence > self.config.confident_analysis {
            MutationStrategy::Aggressive
        } else if analysis.weak_areas.len() >= 2 {
            MutationStrategy::Targeted
        } else if fitness > self.config.high_fitness {
            MutationStrategy::Conservative
        } else {
            MutationStrategy::Exploratory
        }
    }

    /// Mutate a genome, guided by the predictor where possible.
    ///
    /// Falls back to [`AIMutator::random_mutation`] when analysis fails,
    /// no candidate exists or the analysis budget runs out.
    pub fn guided_mutation<R: Rng + ?Sized>(
        &mut self,
        genome: &Genome,
        predictor: &EffectPredictor,
        rng: &mut R,
    ) -> MutationResult {
        let deadline = Instant::now() + self.config.analysis_budget;

        match self.rank(genome, predictor, deadline) {
            Ok((strategy, best)) => {
                let child = genome.with_gene(&best.gene, best.value.clone());
                let current = genome.genes.get(&best.gene).cloned().unwrap_or(best.value.clone());
                let record = MutationRecord {
                    parent_id: genome.id,
                    child_id: child.id,
                    mutation_type: MutationType::between(best.gene.clone(), &current, &best.value),
                    parent_fitness: genome.fitness,
                    strategy: Some(strategy),
                };
                debug!(
                    genome = %genome.id,
                    "{:?} mutation {} (score {:+.4})",
                    strategy,
                    record.mutation_type,
                    best.score
                );
                self.pending.push(record.clone());
                MutationResult {
                    genome: child,
                    record,
                    prediction: Some(best.prediction),
                    fallback: None,
                }
            }
            Err(e) => {
                debug!(genome = %genome.id, "Guided mutation unavailable: {}", e);
                let mut result = self.random_mutation(genome, rng);
                result.fallback = Some(e.to_string());
                result
            }
        }
    }

    fn rank(
        &self,
        genome: &Genome,
        predictor: &EffectPredictor,
        deadline: Instant,
    ) -> Result<(MutationStrategy, Ranked), MutationError> {
        let analysis = self.analyse(genome)?;
        self.check_deadline(deadline)?;

        let strategy = self.choose_strategy(genome.fitness, &analysis);
        let candidates = self.candidates(genome, &analysis, strategy);
        if candidates.is_empty() {
            return Err(MutationError::NoCandidates);
        }

        let limits = ResourceLimits {
            memory_kb: self.config.memory_limit_kb,
            latency_us: self.config.latency_limit_us,
        };
        let mut ranked = Vec::with_capacity(candidates.len());
        for (gene, value) in candidates {
            self.check_deadline(deadline)?;
            let Some(current) = genome.genes.get(&gene).cloned() else {
                continue;
            };
            let spec = MutationSpec::new(&gene, current, value.clone(), genome.fitness);
            let prediction = predictor.predict_fitness_change(&spec);
            let risk = predictor.predict_constraint_violation_risk(&spec, &genome.genes, &limits);
            let score = prediction.expected_improvement() - RISK_PENALTY * risk.overall;
            ranked.push(Ranked {
                gene,
                value,
                prediction,
                score,
            });
        }

        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
        let best = ranked.into_iter().next().ok_or(MutationError::NoCandidates)?;
        Ok((strategy, best))
    }

    fn check_deadline(&self, deadline: Instant) -> Result<(), MutationError> {
        if Instant::now() >= deadline {
            Err(MutationError::BudgetExhausted(self.config.analysis_budget))
        } else {
            Ok(())
        }
    }

    /// Candidate changes in priority order, capped per genome.
    fn candidates(
        &self,
        genome: &Genome,
        analysis: &Analysis,
        strategy: MutationStrategy,
    ) -> Vec<(String, GeneValue)> {
        let mut proposals = match strategy {
            MutationStrategy::Targeted => Vec::new(),
            MutationStrategy::Aggressive => vec![
                self.scale(genome, "learning_rate", 3.0),
                self.scale(genome, "learning_rate", 1.0 / 3.0),
                self.scale(genome, "hidden_units", 2.0),
                self.scale(genome, "hidden_layers", 2.0),
                self.swap(genome, "activation"),
            ],
            MutationStrategy::Conservative => vec![
                self.scale(genome, "learning_rate", 0.9),
                self.shift(genome, "dropout", -0.05),
                self.shift(genome, "dropout", 0.05),
                self.scale(genome, "hidden_units", 1.1),
            ],
            MutationStrategy::Exploratory => vec![
                self.swap(genome, "activation"),
                self.toggle(genome, "batch_norm"),
                self.scale(genome, "hidden_units", 1.25),
                self.scale(genome, "learning_rate", 1.5),
                self.scale(genome, "batch_size", 2.0),
            ],
        };

        for area in &analysis.weak_areas {
            match area {
                WeakArea::Memory { .. } | WeakArea::Latency { .. } => {
                    proposals.push(self.scale(genome, "hidden_layers", 0.5));
                    proposals.push(self.scale(genome, "hidden_units", 0.75));
                    if genome.genes.get("batch_norm").and_then(|v| v.as_flag()) == Some(true) {
                        proposals.push(self.toggle(genome, "batch_norm"));
                    }
                }
                WeakArea::LearningRate { value } => {
                    let factor = if *value > 0.01 { 0.3 } else { 3.0 };
                    proposals.push(self.scale(genome, "learning_rate", factor));
                }
                WeakArea::OverRegularised { .. } => {
                    proposals.push(self.shift(genome, "dropout", -0.15));
                }
            }
        }
        let mut candidates: Vec<(String, GeneValue)> = Vec::new();
        for proposal in proposals.into_iter().flatten() {
            if !candidates.contains(&proposal) {
                candidates.push(proposal);
            }
        }
        candidates.truncate(self.config.max_candidates_per_genome);
        candidates
    }

    /// Multiply a numeric gene, staying inside its bounds.
    fn scale(&self, genome: &Genome, gene: &str, factor: f64) -> Option<(String, GeneValue)> {
        let current = genome.genes.get(gene)?;
        let proposed = match current {
            GeneValue::Float(v) => GeneValue::Float(v * factor),
            GeneValue::Int(v) => {
                let scaled = (*v as f64 * factor).round() as i64;
                let step = match factor.partial_cmp(&1.0) {
                    Some(std::cmp::Ordering::Greater) => scaled.max(v + 1),
                    Some(std::cmp::Ordering::Less) => scaled.min(v - 1),
                    _ => *v,
                };
                GeneValue::Int(step)
            }
            _ => return None,
        };
        self.bounded(gene, current, proposed)
    }

    /// Add to a float gene, staying inside its bounds.
    fn shift(&self, genome: &Genome, gene: &str, delta: f64) -> Option<(String, GeneValue)> {
        let current = genome.genes.get(gene)?;
        let v = current.as_f64()?;
        self.bounded(gene, current, GeneValue::Float(v + delta))
    }

    /// Next option of a choice gene.
    fn swap(&self, genome: &Genome, gene: &str) -> Option<(String, GeneValue)> {
        let current = genome.genes.get(gene)?.as_choice()?;
        let GeneBounds::Choice { options } = &self.schema.spec(gene)?.bounds else {
            return None;
        };
        if options.is_empty() {
            return None;
        }
        let index = options.iter().position(|o| o == current).unwrap_or(0);
        let next = options.get((index + 1) % options.len())?;
        self.bounded(gene, genome.genes.get(gene)?, GeneValue::Choice(next.clone()))
    }

    /// Flip a flag gene.
    fn toggle(&self, genome: &Genome, gene: &str) -> Option<(String, GeneValue)> {
        let current = genome.genes.get(gene)?;
        let flag = current.as_flag()?;
        self.bounded(gene, current, GeneValue::Flag(!flag))
    }

    /// Clamp to the schema bounds; `None` when nothing would change.
    fn bounded(
        &self,
        gene: &str,
        current: &GeneValue,
        proposed: GeneValue,
    ) -> Option<(String, GeneValue)> {
        let spec = self.schema.spec(gene)?;
        let proposed = spec.bounds.clamp(proposed);
        if &proposed == current || !spec.bounds.contains(&proposed) {
            return None;
        }
        Some((gene.to_string(), proposed))
    }

    /// Bounded random change of one schema gene.
    pub fn random_mutation<R: Rng + ?Sized>(&mut self, genome: &Genome, rng: &mut R) -> MutationResult {
        let mutable: Vec<&str> = genome
            .genes
            .names()
            .filter(|name| self.schema.spec(name).is_some())
            .collect();

        let change = mutable
            .choose(rng)
            .and_then(|gene| self.perturb(genome, gene, rng));

        let (child, mutation_type) = match change {
            Some((gene, current, proposed)) => {
                let mutation_type = MutationType::between(gene.clone(), &current, &proposed);
                (genome.with_gene(&gene, proposed), mutation_type)
            }
            None => (
                genome.derive(genome.genes.clone()),
                MutationType::new(String::new(), MutationKind::Random),
            ),
        };

        let record = MutationRecord {
            parent_id: genome.id,
            child_id: child.id,
            mutation_type,
            parent_fitness: genome.fitness,
            strategy: None,
        };
        debug!(genome = %genome.id, "Random mutation {}", record.mutation_type);
        self.pending.push(record.clone());
        MutationResult {
            genome: child,
            record,
            prediction: None,
            fallback: None,
        }
    }

    fn perturb<R: Rng + ?Sized>(
        &self,
        genome: &Genome,
        gene: &str,
        rng: &mut R,
    ) -> Option<(String, GeneValue, GeneValue)> {
        let spec = self.schema.spec(gene)?;
        let current = genome.genes.get(gene)?.clone();
        let step = self.config.random_step;

        let proposed = match (&spec.bounds, &current) {
            (GeneBounds::Float { min, max }, GeneValue::Float(v)) => {
                let r: f64 = rng.gen_range(-step..=step);
                let moved = if *v == 0.0 {
                    min + (max - min) * r.abs()
                } else {
                    v * (1.0 + r)
                };
                let clamped = moved.clamp(*min, *max);
                if clamped == *v {
                    GeneValue::Float((v * (1.0 - r.abs())).clamp(*min, *max))
                } else {
                    GeneValue::Float(clamped)
                }
            }
            (GeneBounds::Int { min, max }, GeneValue::Int(v)) => {
                let reach = ((*v as f64 * step).round() as i64).max(1);
                let delta = rng.gen_range(1..=reach);
                let up = rng.gen_bool(0.5);
                let moved = if up { v + delta } else { v - delta };
                let clamped = moved.clamp(*min, *max);
                if clamped == *v {
                    let other = if up { v - delta } else { v + delta };
                    GeneValue::Int(other.clamp(*min, *max))
                } else {
                    GeneValue::Int(clamped)
                }
            }
            (GeneBounds::Choice { options }, GeneValue::Choice(v)) => {
                let others: Vec<&String> = options.iter().filter(|o| *o != v).collect();
                GeneValue::Choice((*others.choose(rng)?).clone())
            }
            (GeneBounds::Flag, GeneValue::Flag(v)) => GeneValue::Flag(!v),
            _ => return None,
        };

        Some((gene.to_string(), current, proposed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evoguard_core::Genes;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn mutator() -> AIMutator {
        AIMutator::new(MutatorConfig {
            analysis_budget: Duration::from_secs(5),
            ..Default::default()
        })
    }

    fn default_genome() -> Genome {
        Genome::new(GeneSchema::default().default_genes())
    }

    #[test]
    fn test_strategy_choice() {
        let mutator = mutator();
        let confident = Analysis {
            weak_areas: vec![],
            confidence: 0.9,
        };
        let unsure = Analysis {
            weak_areas: vec![],
            confidence: 0.6,
        };
        let two_weak = Analysis {
            weak_areas: vec![
                WeakArea::Memory { utilisation: 0.9 },
                WeakArea::Latency { utilisation: 0.95 },
            ],
            confidence: 0.6,
        };

        assert_eq!(mutator.choose_strategy(0.1, &confident), MutationStrategy::Aggressive);
        assert_eq!(mutator.choose_strategy(0.1, &unsure), MutationStrategy::Exploratory);
        assert_eq!(mutator.choose_strategy(0.5, &two_weak), MutationStrategy::Targeted);
        assert_eq!(mutator.choose_strategy(0.9, &unsure), MutationStrategy::Conservative);
        assert_eq!(mutator.choose_strategy(0.5, &unsure), MutationStrategy::Exploratory);
    }

    #[test]
    fn test_analysis_finds_weak_areas() {
        let mutator = mutator();
        let mut genome = default_genome()
            .with_gene("hidden_units", GeneValue::Int(300))
            .with_gene("dropout", GeneValue::Float(0.6));
        genome.fitness = 0.5;

        let analysis = mutator.analyse(&genome).unwrap();
        assert!(matches!(analysis.weak_areas[0], WeakArea::Memory { .. }));
        assert!(matches!(analysis.weak_areas[1], WeakArea::Latency { .. }));
        assert!(matches!(analysis.weak_areas[2], WeakArea::OverRegularised { .. }));
        assert_eq!(analysis.confidence, 0.6);
    }

    #[test]
    fn test_targeted_mutation_reduces_resources() {
        let mut mutator = mutator();
        let predictor = EffectPredictor::default();
        let mut rng = StdRng::seed_from_u64(7);
        let mut genome = default_genome().with_gene("hidden_units", GeneValue::Int(300));
        genome.fitness = 0.5;

        let result = mutator.guided_mutation(&genome, &predictor, &mut rng);
        assert_eq!(result.record.strategy, Some(MutationStrategy::Targeted));
        assert!(result.fallback.is_none());
        assert!(result.prediction.is_some());

        let child = &result.genome;
        assert_ne!(child.id, genome.id);
        assert_eq!(child.fitness, 0.0);
        assert_eq!(child.parent_ids, vec![genome.id]);

        let model = ResourceModel::default();
        assert!(model.estimate(&child.genes).memory_kb < model.estimate(&genome.genes).memory_kb);
    }

    #[test]
    fn test_exhausted_budget_falls_back() {
        let mut mutator = AIMutator::new(MutatorConfig {
            analysis_budget: Duration::ZERO,
            ..Default::default()
        });
        let predictor = EffectPredictor::default();
        let mut rng = StdRng::seed_from_u64(1);

        let result = mutator.guided_mutation(&default_genome(), &predictor, &mut rng);
        assert_eq!(result.record.strategy, None);
        assert!(result.fallback.unwrap().contains("budget"));
    }

    #[test]
    fn test_failed_analysis_falls_back() {
        let mut mutator = mutator();
        let predictor = EffectPredictor::default();
        let mut rng = StdRng::seed_from_u64(2);
        let genome = Genome::new(Genes::new().with("dropout", GeneValue::Float(0.2)));

        let result = mutator.guided_mutation(&genome, &predictor, &mut rng);
        assert!(result.fallback.unwrap().contains("learning_rate"));
        assert_eq!(result.record.mutation_type.gene, "dropout");
        assert_ne!(result.genome.genes.get_f64("dropout"), Some(0.2));
    }

    #[test]
    fn test_random_mutation_stays_in_bounds() {
        let mut mutator = mutator();
        let schema = GeneSchema::default();
        let mut rng = StdRng::seed_from_u64(42);
        let genome = default_genome();

        let mut changed = 0;
        for _ in 0..200 {
            let result = mutator.random_mutation(&genome, &mut rng);
            assert!(schema.check(&result.genome.genes).is_empty());
            let differing = genome
                .genes
                .iter()
                .zip(result.genome.genes.iter())
                .filter(|(a, b)| a != b)
                .count();
            assert!(differing <= 1);
            changed += differing;
        }
        assert!(changed >= 190);
        assert_eq!(mutator.take_pending().len(), 200);
        assert!(mutator.take_pending().is_empty());
    }
}

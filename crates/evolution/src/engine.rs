//! Evolution engine - the generational loop and its safety controls.

use crate::error::{EngineError, Result};
use crate::evaluator::{weighted_fitness, AnalyticEvaluator, FitnessEvaluator};
use crate::metrics::{fittest, summarize, tail, GenerationTally};
use crate::operators::{crossover, select_parents};
use crate::registry::{AgentRecord, AgentRegistry, InMemoryRegistry};
use evoguard_core::{
    Checkpoint, CheckpointId, CheckpointInfo, EvolutionConfig, EvolutionMetrics, GeneSchema,
    Genome, GenomeId, GenomeMetrics, GenomeSpec, RateMetrics, ResourceModel, SafetyViolation,
};
use evoguard_mutation::{AIMutator, MutatorConfig, RateConfig, RateController};
use evoguard_prediction::{EffectPredictor, MutationOutcome, PredictorConfig};
use evoguard_safety::{code_hash, SafetyScanner, ScannerConfig};
use evoguard_storage::{CheckpointStore, JsonStorage, QuarantineStore, StorageError};
use evoguard_validation::MutationValidator;
use futures::future::join_all;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

/// Consecutive checkpoint failures after which the engine reports unhealthy.
const MAX_CHECKPOINT_FAILURES: u32 = 3;

/// Random steps applied to the default genes when filling the population.
const JITTER_STEPS: usize = 3;

/// Engine lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    /// Ready to start
    Idle,
    /// Building the initial population
    Initializing,
    /// Running a generation
    Evolving,
    /// Validating offspring
    Validating,
    /// Stopped at the target fitness or generation limit
    Completed,
    /// Stopped by a failure or an emergency stop
    Failed,
    /// Restored from a checkpoint
    RolledBack,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineState::Idle => write!(f, "Idle"),
            EngineState::Initializing => write!(f, "Initializing"),
            EngineState::Evolving => write!(f, "Evolving"),
            EngineState::Validating => write!(f, "Validating"),
            EngineState::Completed => write!(f, "Completed"),
            EngineState::Failed => write!(f, "Failed"),
            EngineState::RolledBack => write!(f, "RolledBack"),
        }
    }
}

/// Snapshot of the engine, readable while a generation is running.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineStatus {
    /// Lifecycle state
    pub state: EngineState,
    /// Current generation
    pub generation: u64,
    /// Fitness of the best genome seen
    pub best_fitness: Option<f64>,
    /// Population size
    pub population_size: usize,
    /// Last computed mutation rate
    pub mutation_rate: f64,
    /// Consecutive checkpoint write failures
    pub checkpoint_failures: u32,
    /// False once checkpoint writes keep failing
    pub healthy: bool,
    /// Quarantined genome count
    pub quarantined: usize,
}

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Best fitness reached the target
    TargetReached,
    /// `max_generations` reached
    GenerationLimit,
    /// Generation safety score fell below the threshold
    SafetyFailure,
    /// Best genome broke a hard resource limit
    HardLimitBreach,
    /// [`EvolutionEngine::emergency_stop`] was called
    EmergencyStop,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::TargetReached => write!(f, "target fitness reached"),
            StopReason::GenerationLimit => write!(f, "generation limit reached"),
            StopReason::SafetyFailure => write!(f, "safety score below threshold"),
            StopReason::HardLimitBreach => write!(f, "hard resource limit breached"),
            StopReason::EmergencyStop => write!(f, "emergency stop"),
        }
    }
}

/// Outcome of [`EvolutionEngine::start`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Why the run ended
    pub reason: StopReason,
    /// Generations executed by this run
    pub generations_run: u64,
    /// Engine generation at the end
    pub generation: u64,
    /// Fitness of the best genome seen
    pub best_fitness: Option<f64>,
    /// Engine state at the end
    pub state: EngineState,
}

enum StepOutcome {
    Continue,
    SafetyFailure(f64),
    HardLimitBreach,
}

struct Inner {
    population: Vec<Genome>,
    generation: u64,
    best: Option<Genome>,
    history: Vec<EvolutionMetrics>,
    rate: RateController,
    mutator: AIMutator,
    predictor: EffectPredictor,
    rng: StdRng,
    initialized: bool,
    checkpoint_failures: u32,
}

/// Runs generations over a population under safety control.
///
/// One run at a time: [`EvolutionEngine::start`] holds the engine until it
/// returns, and rollback or re-initialisation is refused meanwhile. The
/// population lock is released between generations, so
/// [`EvolutionEngine::emergency_stop`] takes effect at the next generation
/// boundary.
pub struct EvolutionEngine {
    config: EvolutionConfig,
    schema: GeneSchema,
    model: ResourceModel,
    checkpoints: Arc<dyn CheckpointStore>,
    scanner: Arc<SafetyScanner>,
    validator: MutationValidator,
    evaluator: Arc<dyn FitnessEvaluator>,
    registry: Arc<dyn AgentRegistry>,
    inner: Mutex<Inner>,
    running: AtomicBool,
    status: RwLock<EngineStatus>,
}

impl EvolutionEngine {
    /// Create an engine over the given stores.
    ///
    /// The configuration is checked by [`EvolutionEngine::initialize`].
    pub fn new(
        config: EvolutionConfig,
        checkpoints: Arc<dyn CheckpointStore>,
        quarantine: Arc<dyn QuarantineStore>,
    ) -> Result<Self> {
        let model = ResourceModel::default();
        let schema = GeneSchema::default();
        let scanner = Arc::new(SafetyScanner::new(ScannerConfig::default())?.with_store(quarantine));
        let validator = MutationValidator::new(&config, scanner.clone());

        let rng = match config.random_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let inner = Inner {
            population: Vec::new(),
            generation: 0,
            best: None,
            history: Vec::new(),
            rate: RateController::new(RateConfig::from_evolution(&config)),
            mutator: AIMutator::new(MutatorConfig::from_evolution(&config)),
            predictor: EffectPredictor::new(PredictorConfig::default()).with_model(model.clone()),
            rng,
            initialized: false,
            checkpoint_failures: 0,
        };
        let status = EngineStatus {
            state: EngineState::Idle,
            generation: 0,
            best_fitness: None,
            population_size: 0,
            mutation_rate: config.mutation_rate,
            checkpoint_failures: 0,
            healthy: true,
            quarantined: 0,
        };

        Ok(Self {
            evaluator: Arc::new(AnalyticEvaluator::new(model.clone())),
            registry: Arc::new(InMemoryRegistry::new()),
            config,
            schema,
            model,
            checkpoints,
            scanner,
            validator,
            inner: Mutex::new(inner),
            running: AtomicBool::new(false),
            status: RwLock::new(status),
        })
    }

    /// Create an engine storing JSON files under `config.storage_dir`.
    pub async fn open(config: EvolutionConfig) -> Result<Self> {
        let storage = Arc::new(JsonStorage::new(&config.storage_dir).await?);
        Self::new(config, storage.clone(), storage)
    }

    /// Use a custom fitness evaluator.
    pub fn with_evaluator(mut self, evaluator: Arc<dyn FitnessEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    /// Use a custom agent registry.
    pub fn with_registry(mut self, registry: Arc<dyn AgentRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Use a custom gene schema.
    pub fn with_schema(mut self, schema: GeneSchema) -> Self {
        self.validator = self.validator.with_schema(schema.clone());
        self.inner.get_mut().mutator =
            AIMutator::new(MutatorConfig::from_evolution(&self.config)).with_schema(schema.clone());
        self.schema = schema;
        self
    }

    /// Run configuration.
    pub fn config(&self) -> &EvolutionConfig {
        &self.config
    }

    /// Safety scanner shared with the validator.
    pub fn scanner(&self) -> &Arc<SafetyScanner> {
        &self.scanner
    }

    /// Whether a run is in progress.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Build and score the initial population.
    ///
    /// Seeds come first; a seed that does not fit the schema, fails
    /// validation or matches a quarantined genome is replaced by a jittered
    /// default. The rest of the population is filled the same way. On
    /// error the engine is left without a population in the `Failed` state.
    pub async fn initialize(&self, seeds: Vec<GenomeSpec>) -> Result<()> {
        if self.is_running() {
            return Err(EngineError::AlreadyEvolving);
        }
        let mut inner = self.inner.lock().await;
        self.set_state(EngineState::Initializing).await;

        let result = self.populate(&mut inner, seeds).await;
        match &result {
            Ok(()) => {
                info!(
                    "Initialized population of {} (best {:.4})",
                    inner.population.len(),
                    inner.best.as_ref().map(|g| g.fitness).unwrap_or(0.0)
                );
                self.set_state(EngineState::Idle).await;
            }
            Err(e) => {
                inner.population.clear();
                inner.best = None;
                inner.initialized = false;
                error!("Initialization failed: {}", e);
                self.set_state(EngineState::Failed).await;
            }
        }
        self.publish(&inner).await;
        result
    }

    async fn populate(&self, inner: &mut Inner, seeds: Vec<GenomeSpec>) -> Result<()> {
        self.config.validate()?;
        let quarantined = self.scanner.load_quarantine().await?;
        let quarantined_hashes = self.quarantined_hashes().await;
        let archived = self.checkpoints.supersede_after(0).await?;
        if archived > 0 {
            info!("Archived {} checkpoints of a previous run", archived);
        }
        debug!("{} genomes in quarantine", quarantined);

        let size = self.config.population_size;
        if seeds.len() > size {
            warn!("{} seeds for a population of {}, ignoring the rest", seeds.len(), size);
        }

        let mut population = Vec::with_capacity(size);
        for (i, spec) in seeds.into_iter().take(size).enumerate() {
            match Genome::from_spec(spec, &self.schema) {
                Ok(genome) if quarantined_hashes.contains(&code_hash(&genome)) => {
                    warn!(seed = i, "Seed matches a quarantined genome, replacing");
                }
                Ok(genome) => {
                    let report = self.validator.validate(&genome);
                    if report.is_valid {
                        population.push(genome);
                        continue;
                    }
                    warn!(seed = i, "Seed rejected: {}", report.summary());
                }
                Err(e) => warn!(seed = i, "Seed rejected: {}", e),
            }
            population.push(self.fresh_genome(inner, 0));
        }
        while population.len() < size {
            population.push(self.fresh_genome(inner, 0));
        }

        self.evaluate(&mut population).await;

        inner.best = self.promotable_leader(&population);
        inner.population = population;
        inner.generation = 0;
        inner.history.clear();
        inner.rate.reset();
        inner.checkpoint_failures = 0;
        inner.initialized = true;
        if let Some(best) = &inner.best {
            self.promote(best, 0).await;
        }
        Ok(())
    }

    /// Default genes with a few random steps applied. The steps are not
    /// recorded as mutations.
    fn fresh_genome(&self, inner: &mut Inner, generation: u64) -> Genome {
        let mut genome = Genome::new(self.schema.default_genes());
        for _ in 0..JITTER_STEPS {
            genome = inner.mutator.random_mutation(&genome, &mut inner.rng).genome;
        }
        inner.mutator.take_pending();
        genome.parent_ids.clear();
        genome.generation = generation;
        genome
    }

    /// Score every unscored genome concurrently.
    ///
    /// A genome whose evaluation fails gets zero fitness and the resource
    /// model's estimate as its figures.
    async fn evaluate(&self, population: &mut [Genome]) {
        let pending: Vec<usize> = population
            .iter()
            .enumerate()
            .filter(|(_, g)| !g.is_scored())
            .map(|(i, _)| i)
            .collect();
        if pending.is_empty() {
            return;
        }

        let results = join_all(pending.iter().map(|&i| self.evaluator.evaluate(&population[i]))).await;

        for (i, result) in pending.into_iter().zip(results) {
            let genome = &mut population[i];
            let estimate = self.model.estimate(&genome.genes);
            match result {
                Ok(mut metrics) => {
                    metrics.evaluated_at.get_or_insert_with(chrono::Utc::now);
                    genome.fitness = weighted_fitness(&self.config, &metrics, estimate.complexity);
                    genome.metrics = metrics;
                }
                Err(e) => {
                    warn!(genome = %genome.id, "{}", e);
                    genome.fitness = 0.0;
                    genome.metrics = GenomeMetrics {
                        memory_kb: estimate.memory_kb,
                        latency_us: estimate.latency_us,
                        accuracy: 0.0,
                        evaluated_at: Some(chrono::Utc::now()),
                    };
                }
            }
        }
    }

    /// Evolve until the best fitness reaches `target_fitness`, the
    /// generation limit is hit or a safety control stops the run.
    pub async fn start(&self, target_fitness: f64) -> Result<RunSummary> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(EngineError::AlreadyEvolving);
        }
        let result = self.run(target_fitness).await;
        self.running.store(false, Ordering::SeqCst);
        result
    }

    async fn run(&self, target_fitness: f64) -> Result<RunSummary> {
        let mut generations_run = 0;
        info!(
            "Evolution started (target {:.4}, limit {} generations)",
            target_fitness, self.config.max_generations
        );

        loop {
            let mut inner = self.inner.lock().await;
            if !self.is_running() {
                return Ok(self.summary(&inner, StopReason::EmergencyStop, generations_run).await);
            }
            if !inner.initialized || inner.population.is_empty() {
                return Err(EngineError::NotInitialized);
            }
            if inner
                .best
                .as_ref()
                .map_or(false, |best| best.fitness >= target_fitness)
            {
                self.set_state(EngineState::Completed).await;
                info!(generation = inner.generation, "Target fitness reached");
                return Ok(self.summary(&inner, StopReason::TargetReached, generations_run).await);
            }
            if inner.generation >= self.config.max_generations {
                self.set_state(EngineState::Completed).await;
                info!(generation = inner.generation, "Generation limit reached");
                return Ok(self.summary(&inner, StopReason::GenerationLimit, generations_run).await);
            }

            self.set_state(EngineState::Evolving).await;
            let outcome = self.step(&mut inner).await;
            generations_run += 1;

            match outcome {
                StepOutcome::Continue => {}
                StepOutcome::HardLimitBreach => {
                    let _ = self.stop_locked(&mut inner).await;
                    self.publish(&inner).await;
                    return Ok(self.summary(&inner, StopReason::HardLimitBreach, generations_run).await);
                }
                StepOutcome::SafetyFailure(score) => {
                    error!(
                        generation = inner.generation,
                        "Safety score {:.3} below threshold {:.3}",
                        score,
                        self.config.safety_threshold
                    );
                    self.set_state(EngineState::Failed).await;
                    if self.config.auto_rollback {
                        match self.rollback_locked(&mut inner, None).await {
                            Ok(info) => info!("Rolled back to {}", info.id.as_str()),
                            Err(e) => error!("Automatic rollback failed: {}", e),
                        }
                    }
                    self.publish(&inner).await;
                    return Ok(self.summary(&inner, StopReason::SafetyFailure, generations_run).await);
                }
            }

            self.publish(&inner).await;
            drop(inner);
            tokio::task::yield_now().await;
        }
    }

    /// One generation: select, recombine, mutate, validate, evaluate.
    async fn step(&self, inner: &mut Inner) -> StepOutcome {
        let next = inner.generation + 1;
        let size = self.config.population_size;

        self.evaluate(&mut inner.population).await;
        let rate = inner.rate.calculate_adaptive_rate(&inner.history);

        let parents = select_parents(
            &inner.population,
            size,
            self.config.tournament_size(),
            &mut inner.rng,
        );

        let mut offspring = Vec::with_capacity(parents.len());
        for pair in parents.chunks(2) {
            match pair {
                [a, b] => {
                    let (first, second) = crossover(a, b, self.config.crossover_rate, &mut inner.rng);
                    offspring.push(first);
                    offspring.push(second);
                }
                [a] => offspring.push(a.derive(a.genes.clone())),
                _ => {}
            }
        }

        for child in offspring.iter_mut() {
            child.generation = next;
            if !inner.rng.gen_bool(rate.clamp(0.0, 1.0)) {
                continue;
            }
            // the predictor learns from the parents' fitness
            let mut view = child.clone();
            view.fitness = inherited_fitness(&parents, &child.parent_ids);
            let result = inner.mutator.guided_mutation(&view, &inner.predictor, &mut inner.rng);
            if let Some(reason) = &result.fallback {
                debug!(genome = %view.id, "Random fallback: {}", reason);
            }
            let mut mutated = result.genome;
            mutated.parent_ids = view.parent_ids;
            mutated.generation = next;
            *child = mutated;
        }
        let records = inner.mutator.take_pending();

        self.set_state(EngineState::Validating).await;
        let mut tally = GenerationTally {
            mutation_rate: rate,
            ..Default::default()
        };
        let mut findings: Vec<SafetyViolation> = Vec::new();
        let mut rejected: HashSet<GenomeId> = HashSet::new();
        let mut population = Vec::with_capacity(size);

        for (child, parent) in offspring.into_iter().zip(parents.iter()) {
            let report = self.validator.validate(&child);
            findings.extend(report.safety.iter().cloned());
            if report.is_valid {
                tally.accepted += 1;
                population.push(child);
                continue;
            }

            tally.rejected += 1;
            rejected.insert(child.id);
            debug!(genome = %child.id, "Offspring rejected: {}", report.summary());
            if self.config.auto_quarantine && report.has_blocking_safety() {
                match self.scanner.quarantine(&child, report.blocking_safety()).await {
                    Ok(_) => warn!(genome = %child.id, "Offspring quarantined"),
                    Err(e) => error!(genome = %child.id, "Failed to quarantine: {}", e),
                }
            }
            if self.scanner.is_quarantined(parent.id).await {
                population.push(self.fresh_genome(inner, next));
            } else {
                population.push(parent.clone());
            }
        }
        self.scanner.record(&findings).await;

        self.evaluate(&mut population).await;

        let outcomes: Vec<MutationOutcome> = records
            .into_iter()
            .map(|record| {
                let violated = rejected.contains(&record.child_id);
                let after = population
                    .iter()
                    .find(|g| g.id == record.child_id)
                    .map(|g| g.fitness)
                    .unwrap_or(0.0);
                MutationOutcome::new(record.mutation_type, record.parent_fitness, after, violated)
            })
            .collect();
        inner.predictor.learn_from_history(outcomes);

        inner.population = population;
        inner.generation = next;
        let leader = fittest(&inner.population).map(|i| inner.population[i].clone());

        tally.safety_score = SafetyScanner::score_violations(&findings);
        let metrics = summarize(next, &inner.population, tally);
        info!(
            generation = next,
            "best {:.4} avg {:.4} safety {:.3} rate {:.3} accepted {} rejected {}",
            metrics.best_fitness,
            metrics.average_fitness,
            metrics.safety_score,
            metrics.mutation_rate,
            metrics.accepted_offspring,
            metrics.rejected_offspring
        );
        inner.history.push(metrics);

        if let Some(leader) = &leader {
            if !self.within_hard_limits(leader) {
                error!(
                    genome = %leader.id,
                    "Best genome breaks hard limits: {:.1} KB, {:.1} µs",
                    leader.metrics.memory_kb,
                    leader.metrics.latency_us
                );
                return StepOutcome::HardLimitBreach;
            }
            let improved = inner
                .best
                .as_ref()
                .map_or(true, |best| leader.fitness > best.fitness);
            if improved {
                self.promote(leader, next).await;
                inner.best = Some(leader.clone());
            }
        }

        if tally.safety_score < self.config.safety_threshold {
            return StepOutcome::SafetyFailure(tally.safety_score);
        }

        if next % self.config.checkpoint_interval == 0 {
            // failures are counted in the status
            let _ = self.checkpoint_locked(inner).await;
        }
        StepOutcome::Continue
    }

    /// Measured figures at or under the memory and latency limits.
    fn within_hard_limits(&self, genome: &Genome) -> bool {
        genome.metrics.memory_kb <= self.config.memory_limit_kb
            && genome.metrics.latency_us <= self.config.instantiation_limit_us
    }

    /// Fittest member, unless it breaks a hard limit.
    fn promotable_leader(&self, population: &[Genome]) -> Option<Genome> {
        let leader = &population[fittest(population)?];
        if self.within_hard_limits(leader) {
            Some(leader.clone())
        } else {
            warn!(genome = %leader.id, "Leader breaks hard limits, not promoted");
            None
        }
    }

    async fn quarantined_hashes(&self) -> HashSet<String> {
        self.scanner
            .quarantine_records()
            .await
            .into_iter()
            .map(|r| r.code_hash)
            .collect()
    }

    async fn is_admissible(&self, genome: &Genome, quarantined_hashes: &HashSet<String>) -> bool {
        !self.scanner.is_quarantined(genome.id).await && !quarantined_hashes.contains(&code_hash(genome))
    }

    async fn promote(&self, genome: &Genome, generation: u64) {
        let record = AgentRecord::from_genome(genome, generation);
        let result = match self.registry.query(genome.id).await {
            Ok(Some(_)) => self.registry.update(record).await,
            Ok(None) => self.registry.create(record).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => debug!(genome = %genome.id, "Promoted with fitness {:.4}", genome.fitness),
            Err(e) => warn!(genome = %genome.id, "Registry write failed: {}", e),
        }
    }

    /// Write a periodic checkpoint of the current generation.
    pub async fn checkpoint(&self) -> Result<CheckpointInfo> {
        if self.is_running() {
            return Err(EngineError::AlreadyEvolving);
        }
        let mut inner = self.inner.lock().await;
        if !inner.initialized || inner.population.is_empty() {
            return Err(EngineError::NotInitialized);
        }
        let result = self.checkpoint_locked(&mut inner).await;
        self.publish(&inner).await;
        result
    }

    async fn checkpoint_locked(&self, inner: &mut Inner) -> Result<CheckpointInfo> {
        let checkpoint = Checkpoint::periodic(
            inner.generation,
            inner.population.clone(),
            inner.best.clone(),
            tail(&inner.history, self.config.metrics_tail),
        );
        let saved = self.checkpoints.save_checkpoint(&checkpoint).await;
        self.note_checkpoint(inner, &checkpoint, saved)
    }

    fn note_checkpoint(
        &self,
        inner: &mut Inner,
        checkpoint: &Checkpoint,
        saved: std::result::Result<(), StorageError>,
    ) -> Result<CheckpointInfo> {
        match saved {
            Ok(()) => {
                inner.checkpoint_failures = 0;
                info!(generation = checkpoint.generation, "Checkpoint {} written", checkpoint.id.as_str());
                Ok(checkpoint.info())
            }
            Err(e) => {
                inner.checkpoint_failures += 1;
                if inner.checkpoint_failures >= MAX_CHECKPOINT_FAILURES {
                    error!(
                        "Checkpoint {} failed ({} in a row), engine unhealthy: {}",
                        checkpoint.id.as_str(),
                        inner.checkpoint_failures,
                        e
                    );
                } else {
                    warn!("Checkpoint {} failed: {}", checkpoint.id.as_str(), e);
                }
                Err(e.into())
            }
        }
    }

    /// Stop now: write the emergency checkpoint, drop the population and
    /// enter the `Failed` state.
    ///
    /// A running [`EvolutionEngine::start`] returns after its current
    /// generation. The population is dropped even if the checkpoint
    /// cannot be written.
    pub async fn emergency_stop(&self) -> Result<CheckpointInfo> {
        self.running.store(false, Ordering::SeqCst);
        let mut inner = self.inner.lock().await;
        let result = self.stop_locked(&mut inner).await;
        self.publish(&inner).await;
        result
    }

    async fn stop_locked(&self, inner: &mut Inner) -> Result<CheckpointInfo> {
        warn!(generation = inner.generation, "Emergency stop");
        let checkpoint = Checkpoint::emergency(
            inner.generation,
            std::mem::take(&mut inner.population),
            inner.best.clone(),
            tail(&inner.history, self.config.metrics_tail),
        );
        self.set_state(EngineState::Failed).await;
        let saved = self.checkpoints.save_checkpoint(&checkpoint).await;
        self.note_checkpoint(inner, &checkpoint, saved)
    }

    /// Restore a checkpoint; the latest periodic one when `id` is `None`.
    ///
    /// Periodic checkpoints newer than the restored generation are moved
    /// out of the active sequence. Restored genomes that have since been
    /// quarantined are replaced by fresh ones. On error the engine is
    /// unchanged.
    pub async fn rollback(&self, id: Option<CheckpointId>) -> Result<CheckpointInfo> {
        if self.is_running() {
            return Err(EngineError::AlreadyEvolving);
        }
        let mut inner = self.inner.lock().await;
        let result = self.rollback_locked(&mut inner, id).await;
        self.publish(&inner).await;
        result
    }

    async fn rollback_locked(&self, inner: &mut Inner, id: Option<CheckpointId>) -> Result<CheckpointInfo> {
        let checkpoint = match &id {
            Some(id) => self
                .checkpoints
                .load_checkpoint(id)
                .await
                .map_err(|e| checkpoint_error(id.as_str(), e))?
                .ok_or_else(|| EngineError::CheckpointNotFound(id.as_str().to_string()))?,
            None => self
                .checkpoints
                .latest_periodic()
                .await
                .map_err(|e| checkpoint_error("latest", e))?
                .ok_or_else(|| EngineError::CheckpointNotFound("no periodic checkpoint".to_string()))?,
        };
        if !checkpoint.is_consistent() || checkpoint.population.is_empty() {
            return Err(EngineError::CheckpointCorrupt(checkpoint.id.as_str().to_string()));
        }

        self.scanner.load_quarantine().await?;
        let quarantined_hashes = self.quarantined_hashes().await;
        let superseded = self.checkpoints.supersede_after(checkpoint.generation).await?;
        let info = checkpoint.info();

        let mut population = Vec::with_capacity(checkpoint.population.len());
        let mut replaced = 0;
        for genome in checkpoint.population {
            if self.is_admissible(&genome, &quarantined_hashes).await {
                population.push(genome);
            } else {
                warn!(genome = %genome.id, "Restored genome is quarantined, replacing");
                population.push(self.fresh_genome(inner, checkpoint.generation));
                replaced += 1;
            }
        }
        let mut best = checkpoint.best_genome;
        if replaced > 0 {
            self.evaluate(&mut population).await;
        }
        if let Some(genome) = &best {
            if !self.is_admissible(genome, &quarantined_hashes).await {
                best = self.promotable_leader(&population);
            }
        }

        inner.population = population;
        inner.generation = checkpoint.generation;
        inner.best = best;
        inner.history = checkpoint.recent_metrics;
        inner.rate.reset();
        inner.mutator.take_pending();
        inner.initialized = true;
        self.set_state(EngineState::RolledBack).await;

        info!(
            generation = info.generation,
            "Rolled back to {} ({} newer checkpoints superseded)",
            info.id.as_str(),
            superseded
        );
        Ok(info)
    }

    /// Current status snapshot. Does not wait for a running generation.
    pub async fn status(&self) -> EngineStatus {
        self.status.read().await.clone()
    }

    /// Metrics of every generation since initialisation or rollback.
    pub async fn history(&self) -> Vec<EvolutionMetrics> {
        self.inner.lock().await.history.clone()
    }

    /// Mutation-rate computations so far.
    pub async fn rate_history(&self) -> Vec<RateMetrics> {
        self.inner.lock().await.rate.log().to_vec()
    }

    /// Best genome seen.
    pub async fn best_genome(&self) -> Option<Genome> {
        self.inner.lock().await.best.clone()
    }

    /// Current population.
    pub async fn population(&self) -> Vec<Genome> {
        self.inner.lock().await.population.clone()
    }

    /// Stored checkpoints.
    pub async fn list_checkpoints(&self) -> Result<Vec<CheckpointInfo>> {
        Ok(self.checkpoints.list_checkpoints().await?)
    }

    async fn set_state(&self, state: EngineState) {
        let mut status = self.status.write().await;
        if status.state != state {
            debug!("Engine state {} -> {}", status.state, state);
            status.state = state;
        }
    }

    async fn publish(&self, inner: &Inner) {
        let quarantined = self.scanner.quarantined().await.len();
        let mut status = self.status.write().await;
        status.generation = inner.generation;
        status.best_fitness = inner.best.as_ref().map(|g| g.fitness);
        status.population_size = inner.population.len();
        status.mutation_rate = inner.rate.current_rate();
        status.checkpoint_failures = inner.checkpoint_failures;
        status.healthy = inner.checkpoint_failures < MAX_CHECKPOINT_FAILURES;
        status.quarantined = quarantined;
    }

    async fn summary(&self, inner: &Inner, reason: StopReason, generations_run: u64) -> RunSummary {
        RunSummary {
            reason,
            generations_run,
            generation: inner.generation,
            best_fitness: inner.best.as_ref().map(|g| g.fitness),
            state: self.status.read().await.state,
        }
    }
}

/// Mean fitness of the parents named in `parent_ids`.
fn inherited_fitness(parents: &[Genome], parent_ids: &[GenomeId]) -> f64 {
    let fitness: Vec<f64> = parent_ids
        .iter()
        .filter_map(|id| parents.iter().find(|p| p.id == *id))
        .map(|p| p.fitness)
        .collect();
    if fitness.is_empty() {
        0.0
    } else {
        fitness.iter().sum::<f64>() / fitness.len() as f64
    }
}

fn checkpoint_error(id: &str, error: StorageError) -> EngineError {
    match error {
        StorageError::Corrupt(_) | StorageError::Json(_) => EngineError::CheckpointCorrupt(id.to_string()),
        other => EngineError::Storage(other),
    }
}

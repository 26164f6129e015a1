//! Checkpoint snapshots of engine state.

use crate::genome::Genome;
use crate::id::CheckpointId;
use crate::metrics::EvolutionMetrics;
use crate::Time;
use serde::{Deserialize, Serialize};

/// Why a checkpoint was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckpointKind {
    /// Regular interval snapshot
    Periodic,
    /// Snapshot taken by an emergency stop
    Emergency,
}

/// Snapshot of `(generation, population, best genome)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Checkpoint id
    pub id: CheckpointId,
    /// Kind
    pub kind: CheckpointKind,
    /// Generation the snapshot belongs to
    pub generation: u64,
    /// Full population
    pub population: Vec<Genome>,
    /// Best genome seen so far
    pub best_genome: Option<Genome>,
    /// Tail of the metrics history
    pub recent_metrics: Vec<EvolutionMetrics>,
    /// When written
    pub timestamp: Time,
}

impl Checkpoint {
    /// Periodic snapshot for `generation`.
    pub fn periodic(
        generation: u64,
        population: Vec<Genome>,
        best_genome: Option<Genome>,
        recent_metrics: Vec<EvolutionMetrics>,
    ) -> Self {
        Self {
            id: CheckpointId::periodic(generation),
            kind: CheckpointKind::Periodic,
            generation,
            population,
            best_genome,
            recent_metrics,
            timestamp: chrono::Utc::now(),
        }
    }

    /// Emergency snapshot for `generation`.
    pub fn emergency(
        generation: u64,
        population: Vec<Genome>,
        best_genome: Option<Genome>,
        recent_metrics: Vec<EvolutionMetrics>,
    ) -> Self {
        Self {
            id: CheckpointId::emergency(),
            kind: CheckpointKind::Emergency,
            ..Self::periodic(generation, population, best_genome, recent_metrics)
        }
    }

    /// Whether the snapshot can be restored as-is.
    ///
    /// Periodic checkpoints need a non-empty population; no genome or
    /// metrics entry may belong to a later generation than the snapshot.
    pub fn is_consistent(&self) -> bool {
        if self.kind == CheckpointKind::Periodic && self.population.is_empty() {
            return false;
        }
        if self.kind == CheckpointKind::Periodic && self.id != CheckpointId::periodic(self.generation) {
            return false;
        }
        self.population.iter().all(|g| g.generation <= self.generation)
            && self.recent_metrics.iter().all(|m| m.generation <= self.generation)
    }

    /// Summary without the population payload.
    pub fn info(&self) -> CheckpointInfo {
        CheckpointInfo {
            id: self.id.clone(),
            kind: self.kind,
            generation: self.generation,
            population_size: self.population.len(),
            best_fitness: self.best_genome.as_ref().map(|g| g.fitness),
            timestamp: self.timestamp,
        }
    }
}

/// Lightweight checkpoint listing entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointInfo {
    /// Checkpoint id
    pub id: CheckpointId,
    /// Kind
    pub kind: CheckpointKind,
    /// Generation
    pub generation: u64,
    /// Number of genomes stored
    pub population_size: usize,
    /// Fitness of the stored best genome
    pub best_fitness: Option<f64>,
    /// When written
    pub timestamp: Time,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GeneSchema;

    #[test]
    fn test_consistency_rules() {
        let genome = Genome::new(GeneSchema::default().default_genes());

        let ok = Checkpoint::periodic(3, vec![genome.clone()], None, vec![]);
        assert!(ok.is_consistent());

        let empty = Checkpoint::periodic(3, vec![], None, vec![]);
        assert!(!empty.is_consistent());

        let mut future = genome.clone();
        future.generation = 9;
        let bad = Checkpoint::periodic(3, vec![future], None, vec![]);
        assert!(!bad.is_consistent());

        let emergency = Checkpoint::emergency(3, vec![], None, vec![]);
        assert!(emergency.is_consistent());
        assert!(emergency.id.is_emergency());
    }
}

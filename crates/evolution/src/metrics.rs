//! Per-generation metrics.

use evoguard_core::{EvolutionMetrics, Genome};

/// Offspring counts and rates observed while building a generation.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct GenerationTally {
    pub accepted: usize,
    pub rejected: usize,
    pub mutation_rate: f64,
    pub safety_score: f64,
}

/// Index of the fittest member; ties go to the earliest.
pub(crate) fn fittest(population: &[Genome]) -> Option<usize> {
    population
        .iter()
        .enumerate()
        .fold(None, |best: Option<usize>, (i, g)| match best {
            Some(b) if population[b].fitness >= g.fitness => Some(b),
            _ => Some(i),
        })
}

/// Summarise a population after generation `generation`.
pub(crate) fn summarize(generation: u64, population: &[Genome], tally: GenerationTally) -> EvolutionMetrics {
    let best = fittest(population).map(|i| &population[i]);
    let average = if population.is_empty() {
        0.0
    } else {
        population.iter().map(|g| g.fitness).sum::<f64>() / population.len() as f64
    };

    EvolutionMetrics {
        generation,
        best_fitness: best.map(|g| g.fitness).unwrap_or(0.0),
        average_fitness: average,
        best_memory_kb: best.map(|g| g.metrics.memory_kb).unwrap_or(0.0),
        best_latency_us: best.map(|g| g.metrics.latency_us).unwrap_or(0.0),
        safety_score: tally.safety_score,
        mutation_rate: tally.mutation_rate,
        accepted_offspring: tally.accepted,
        rejected_offspring: tally.rejected,
        recorded_at: chrono::Utc::now(),
    }
}

/// Last `n` entries of the history.
pub(crate) fn tail(history: &[EvolutionMetrics], n: usize) -> Vec<EvolutionMetrics> {
    history[history.len().saturating_sub(n)..].to_vec()
}

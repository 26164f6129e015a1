//! Per-generation run records.

use crate::Time;
use serde::{Deserialize, Serialize};

/// Metrics recorded for one generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvolutionMetrics {
    /// Generation index
    pub generation: u64,
    /// Best fitness in the population
    pub best_fitness: f64,
    /// Mean fitness of the population
    pub average_fitness: f64,
    /// Best genome's memory estimate (KB)
    pub best_memory_kb: f64,
    /// Best genome's latency estimate (µs)
    pub best_latency_us: f64,
    /// Safety score of the generation's scans (0.0 to 1.0)
    pub safety_score: f64,
    /// Mutation probability used
    pub mutation_rate: f64,
    /// Offspring accepted by validation
    pub accepted_offspring: usize,
    /// Offspring discarded by validation
    pub rejected_offspring: usize,
    /// When recorded
    pub recorded_at: Time,
}

/// Dominant reason behind a mutation-rate adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdjustmentReason {
    /// Not enough history to adapt
    InsufficientHistory,
    /// Base rate kept
    Baseline,
    /// Fitness has plateaued
    Stagnation,
    /// Best fitness trending down
    DecliningFitness,
    /// Best fitness improving quickly
    RapidImprovement,
    /// Population has collapsed onto one solution
    LowDiversity,
    /// Population is very spread out
    HighDiversity,
}

impl AdjustmentReason {
    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            AdjustmentReason::InsufficientHistory => "insufficient_history",
            AdjustmentReason::Baseline => "baseline",
            AdjustmentReason::Stagnation => "stagnation",
            AdjustmentReason::DecliningFitness => "declining_fitness",
            AdjustmentReason::RapidImprovement => "rapid_improvement",
            AdjustmentReason::LowDiversity => "low_diversity",
            AdjustmentReason::HighDiversity => "high_diversity",
        }
    }
}

/// One adaptive-rate computation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateMetrics {
    /// Generation the rate was computed for
    pub generation: u64,
    /// Resulting mutation probability
    pub current_rate: f64,
    /// Least-squares slope of recent best fitness
    pub fitness_trend: f64,
    /// Diversity proxy (0.0 to 1.0)
    pub diversity_index: f64,
    /// Consecutive stagnating computations
    pub stagnation_count: u32,
    /// Dominant reason
    pub reason: AdjustmentReason,
}

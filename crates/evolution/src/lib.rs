//! Evolution layer - drives the generational loop under safety control.
//!
//! [`EvolutionEngine`] owns the population and runs selection, crossover,
//! mutation, validation and evaluation each generation. It writes periodic
//! checkpoints, stops on hard-limit breaches and rolls back when the
//! population's safety score drops below the configured threshold.

#![warn(missing_docs, unused_crate_dependencies)]

mod engine;
mod error;
mod evaluator;
mod metrics;
mod operators;
mod registry;

pub use engine::{EngineState, EngineStatus, EvolutionEngine, RunSummary, StopReason};
pub use error::{EngineError, Result};
pub use evaluator::{weighted_fitness, AnalyticEvaluator, EvaluationError, FitnessEvaluator};
pub use operators::{crossover, crossover_at, select_parents, tournament_select};
pub use registry::{AgentRecord, AgentRegistry, InMemoryRegistry, RegistryError};

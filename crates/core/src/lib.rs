//! Evoguard core data models.
//!
//! This crate defines the genome, gene schema, resource model, metrics,
//! checkpoint and safety records shared by every layer of the evolution
//! control core, together with the run configuration.

#![warn(missing_docs)]

// Core identities
mod id;

// Genomes and their typed genes
mod gene;
mod genome;
mod resource;

// Run records
mod metrics;
mod checkpoint;
mod safety;

// Configuration
mod config;

// Re-exports
pub use id::*;

// Genome
pub use gene::{Gene, GeneBounds, GeneIssue, GeneSchema, GeneSpec, GeneValue, Genes};
pub use genome::{Genome, GenomeError, GenomeMetrics, GenomeSpec};
pub use resource::{ResourceEstimate, ResourceModel};

// Records
pub use metrics::{AdjustmentReason, EvolutionMetrics, RateMetrics};
pub use checkpoint::{Checkpoint, CheckpointInfo, CheckpointKind};
pub use safety::{QuarantineRecord, SafetyViolation, Severity, ThreatCategory};

// Configuration
pub use config::{ConfigError, EvolutionConfig, FitnessWeights, ValidationLevel};

/// Timestamp type
pub type Time = chrono::DateTime<chrono::Utc>;

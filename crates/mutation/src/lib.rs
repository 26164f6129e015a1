//! Mutation control - adaptive mutation rate and guided mutation.

#![warn(missing_docs)]

pub mod mutator;
pub mod rate;

pub use mutator::{
    AIMutator, Analysis, MutationError, MutationRecord, MutationResult, MutationStrategy,
    MutatorConfig, WeakArea,
};
pub use rate::{RateConfig, RateController, ScheduleKind};

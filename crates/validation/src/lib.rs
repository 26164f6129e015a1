//! Mutation validation - hard constraints, safety delegation and risk.

#![warn(missing_docs)]

mod report;
mod validator;

pub use report::{ConstraintViolation, ValidationReport};
pub use validator::MutationValidator;

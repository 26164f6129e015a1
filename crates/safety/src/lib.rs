//! Safety layer - screens genomes for dangerous patterns.
//!
//! The scanner is a best-effort heuristic pre-filter. It matches a fixed
//! catalogue of regular expressions and a few structural measures against
//! a genome's textual representation; it can miss dangerous code and it
//! can flag harmless code. It is not a soundness guarantee and does not
//! replace sandboxing or a real static analyser.

#![warn(missing_docs)]

mod catalogue;
mod quarantine;
mod runtime;
mod scanner;

pub use quarantine::QuarantineSet;
pub use runtime::{RuntimeCeilings, RuntimeObservation};
pub use scanner::{code_hash, ScannerConfig, SafetyScanner};

/// Result type for safety operations.
pub type Result<T> = std::result::Result<T, SafetyError>;

/// Errors raised by the safety layer.
#[derive(Debug, thiserror::Error)]
pub enum SafetyError {
    /// A detector pattern failed to compile
    #[error("invalid detector pattern: {0}")]
    Pattern(#[from] regex::Error),

    /// Quarantine persistence failed
    #[error("quarantine storage error: {0}")]
    Storage(#[from] evoguard_storage::StorageError),
}

//! Engine errors.

use evoguard_core::ConfigError;
use evoguard_safety::SafetyError;
use evoguard_storage::StorageError;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors raised by the evolution engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A run is in progress
    #[error("evolution already in progress")]
    AlreadyEvolving,

    /// No population to evolve
    #[error("engine not initialized")]
    NotInitialized,

    /// Configuration rejected
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Requested checkpoint does not exist
    #[error("checkpoint not found: {0}")]
    CheckpointNotFound(String),

    /// Checkpoint exists but cannot be restored
    #[error("checkpoint {0} is corrupt")]
    CheckpointCorrupt(String),

    /// Storage failure
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Safety layer failure
    #[error("safety error: {0}")]
    Safety(#[from] SafetyError),
}

//! Storage trait abstraction.

use async_trait::async_trait;
use evoguard_core::{Checkpoint, CheckpointId, CheckpointInfo, GenomeId, QuarantineRecord};

/// Error type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Periodic checkpoint would break generation ordering
    #[error("checkpoint for generation {generation} is not newer than latest generation {latest}")]
    NonMonotonic {
        /// Generation being written
        generation: u64,
        /// Latest stored generation
        latest: u64,
    },

    /// Stored or submitted data is not internally consistent
    #[error("Corrupt checkpoint: {0}")]
    Corrupt(String),
}

/// Checkpoint persistence.
///
/// Implementations are the single writer of checkpoint data; writes must
/// never leave a previously stored checkpoint damaged.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Write a checkpoint. Periodic checkpoints must be strictly newer than
    /// the latest stored one; the emergency checkpoint is overwritten.
    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()>;

    /// Load a checkpoint by id.
    async fn load_checkpoint(&self, id: &CheckpointId) -> Result<Option<Checkpoint>>;

    /// Load the most recent periodic checkpoint.
    async fn latest_periodic(&self) -> Result<Option<Checkpoint>>;

    /// List stored checkpoints, periodic ones by generation, emergency last.
    async fn list_checkpoints(&self) -> Result<Vec<CheckpointInfo>>;

    /// Move periodic checkpoints newer than `generation` out of the active
    /// sequence. Returns how many were moved.
    async fn supersede_after(&self, generation: u64) -> Result<usize>;
}

/// Quarantine record persistence, one record per genome.
#[async_trait]
pub trait QuarantineStore: Send + Sync {
    /// Save (or replace) a quarantine record.
    async fn save_quarantine(&self, record: &QuarantineRecord) -> Result<()>;

    /// Load the record of a genome.
    async fn load_quarantine(&self, id: GenomeId) -> Result<Option<QuarantineRecord>>;

    /// Remove a record. Returns whether one existed.
    async fn remove_quarantine(&self, id: GenomeId) -> Result<bool>;

    /// List all records.
    async fn list_quarantine(&self) -> Result<Vec<QuarantineRecord>>;
}

//! Unique identifiers for Evoguard entities.

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unique identifier for a Genome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GenomeId(Ulid);

impl GenomeId {
    /// Generate a new GenomeId
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for GenomeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for GenomeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for GenomeId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// Identifier of a checkpoint on disk.
///
/// Periodic checkpoints are named after their generation (`gen-000010`),
/// the emergency checkpoint is always `emergency`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CheckpointId(String);

impl CheckpointId {
    const EMERGENCY: &'static str = "emergency";

    /// Id of the periodic checkpoint taken at `generation`.
    pub fn periodic(generation: u64) -> Self {
        Self(format!("gen-{:06}", generation))
    }

    /// Id of the emergency checkpoint.
    pub fn emergency() -> Self {
        Self(Self::EMERGENCY.to_string())
    }

    /// Whether this is the emergency checkpoint id.
    pub fn is_emergency(&self) -> bool {
        self.0 == Self::EMERGENCY
    }

    /// Generation encoded in a periodic id.
    pub fn generation(&self) -> Option<u64> {
        self.0.strip_prefix("gen-").and_then(|g| g.parse().ok())
    }

    /// Borrow as str.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CheckpointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for CheckpointId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = Self(s.trim().to_string());
        if id.is_emergency() || id.generation().is_some() {
            Ok(id)
        } else {
            Err(format!("invalid checkpoint id '{}', expected gen-NNNNNN or emergency", s))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_genome_id_roundtrip() {
        let id = GenomeId::new();
        let parsed: GenomeId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_checkpoint_id_forms() {
        let periodic = CheckpointId::periodic(12);
        assert_eq!(periodic.as_str(), "gen-000012");
        assert_eq!(periodic.generation(), Some(12));
        assert!(!periodic.is_emergency());

        let emergency = CheckpointId::emergency();
        assert!(emergency.is_emergency());
        assert_eq!(emergency.generation(), None);

        assert!("gen-000003".parse::<CheckpointId>().is_ok());
        assert!("emergency".parse::<CheckpointId>().is_ok());
        assert!("latest".parse::<CheckpointId>().is_err());
    }
}

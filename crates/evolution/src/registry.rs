//! Registry of promoted genomes.

use async_trait::async_trait;
use evoguard_core::{Genes, Genome, GenomeId, Time};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Registry entry for a promoted genome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    /// Genome id
    pub genome_id: GenomeId,
    /// Fitness when promoted
    pub fitness: f64,
    /// Generation when promoted
    pub generation: u64,
    /// Gene values
    pub genes: Genes,
    /// Measured memory (KB)
    pub memory_kb: f64,
    /// Measured latency (µs)
    pub latency_us: f64,
    /// Last write
    pub updated_at: Time,
}

impl AgentRecord {
    /// Record a genome as promoted at `generation`.
    pub fn from_genome(genome: &Genome, generation: u64) -> Self {
        Self {
            genome_id: genome.id,
            fitness: genome.fitness,
            generation,
            genes: genome.genes.clone(),
            memory_kb: genome.metrics.memory_kb,
            latency_us: genome.metrics.latency_us,
            updated_at: chrono::Utc::now(),
        }
    }
}

/// Registry errors.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Create for an id that already exists
    #[error("agent {0} already registered")]
    Duplicate(GenomeId),

    /// Update for an unknown id
    #[error("agent {0} not registered")]
    NotFound(GenomeId),

    /// Backend failure
    #[error("{0}")]
    Other(String),
}

/// External store of promoted genomes.
#[async_trait]
pub trait AgentRegistry: Send + Sync {
    /// Register a new agent.
    async fn create(&self, record: AgentRecord) -> Result<(), RegistryError>;

    /// Replace an existing agent's record.
    async fn update(&self, record: AgentRecord) -> Result<(), RegistryError>;

    /// Look up an agent.
    async fn query(&self, id: GenomeId) -> Result<Option<AgentRecord>, RegistryError>;
}

/// In-memory registry.
#[derive(Clone, Default)]
pub struct InMemoryRegistry {
    records: Arc<RwLock<HashMap<GenomeId, AgentRecord>>>,
}

impl InMemoryRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered agents.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// All records, fittest first.
    pub async fn records(&self) -> Vec<AgentRecord> {
        let mut records: Vec<_> = self.records.read().await.values().cloned().collect();
        records.sort_by(|a, b| b.fitness.total_cmp(&a.fitness));
        records
    }
}

#[async_trait]
impl AgentRegistry for InMemoryRegistry {
    async fn create(&self, record: AgentRecord) -> Result<(), RegistryError> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.genome_id) {
            return Err(RegistryError::Duplicate(record.genome_id));
        }
        debug!(genome = %record.genome_id, "Registered agent");
        records.insert(record.genome_id, record);
        Ok(())
    }

    async fn update(&self, record: AgentRecord) -> Result<(), RegistryError> {
        let mut records = self.records.write().await;
        match records.get_mut(&record.genome_id) {
            Some(existing) => {
                *existing = record;
                Ok(())
            }
            None => Err(RegistryError::NotFound(record.genome_id)),
        }
    }

    async fn query(&self, id: GenomeId) -> Result<Option<AgentRecord>, RegistryError> {
        Ok(self.records.read().await.get(&id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evoguard_core::GeneSchema;

    #[tokio::test]
    async fn test_create_update_query() {
        let registry = InMemoryRegistry::new();
        let mut genome = Genome::new(GeneSchema::default().default_genes());
        genome.fitness = 0.6;

        let record = AgentRecord::from_genome(&genome, 3);
        registry.create(record.clone()).await.unwrap();
        assert!(matches!(
            registry.create(record.clone()).await,
            Err(RegistryError::Duplicate(id)) if id == genome.id
        ));

        let updated = AgentRecord {
            fitness: 0.7,
            generation: 5,
            ..record
        };
        registry.update(updated).await.unwrap();

        let stored = registry.query(genome.id).await.unwrap().unwrap();
        assert_eq!(stored.fitness, 0.7);
        assert_eq!(stored.generation, 5);
        assert_eq!(registry.len().await, 1);

        let unknown = Genome::new(GeneSchema::default().default_genes());
        assert!(registry.query(unknown.id).await.unwrap().is_none());
        assert!(matches!(
            registry.update(AgentRecord::from_genome(&unknown, 1)).await,
            Err(RegistryError::NotFound(_))
        ));
    }
}

//! Quarantine membership set.

use crate::Result;
use evoguard_core::{GenomeId, QuarantineRecord};
use evoguard_storage::QuarantineStore;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Lock-protected set of quarantined genomes, optionally backed by a store.
///
/// Writes go to the store first, so the in-memory set never holds a
/// member that would be lost on restart.
pub struct QuarantineSet {
    store: Option<Arc<dyn QuarantineStore>>,
    members: RwLock<HashMap<GenomeId, QuarantineRecord>>,
}

impl QuarantineSet {
    /// Create an in-memory set.
    pub fn new() -> Self {
        Self {
            store: None,
            members: RwLock::new(HashMap::new()),
        }
    }

    /// Create a set persisted through `store`.
    pub fn with_store(store: Arc<dyn QuarantineStore>) -> Self {
        Self {
            store: Some(store),
            members: RwLock::new(HashMap::new()),
        }
    }

    /// Replace the in-memory set with the stored records.
    pub async fn load(&self) -> Result<usize> {
        let Some(store) = &self.store else {
            return Ok(self.members.read().await.len());
        };
        let records = store.list_quarantine().await?;
        let mut members = self.members.write().await;
        members.clear();
        for record in records {
            members.insert(record.genome_id, record);
        }
        debug!("Loaded {} quarantine records", members.len());
        Ok(members.len())
    }

    /// Add a record.
    pub async fn insert(&self, record: QuarantineRecord) -> Result<()> {
        if let Some(store) = &self.store {
            store.save_quarantine(&record).await?;
        }
        info!(
            "Quarantined genome {} ({} findings)",
            record.genome_id,
            record.violations.len()
        );
        self.members.write().await.insert(record.genome_id, record);
        Ok(())
    }

    /// Remove a genome. Returns whether it was quarantined.
    pub async fn remove(&self, id: GenomeId) -> Result<bool> {
        let stored = match &self.store {
            Some(store) => store.remove_quarantine(id).await?,
            None => false,
        };
        let present = self.members.write().await.remove(&id).is_some();
        if stored || present {
            info!("Released genome {} from quarantine", id);
        }
        Ok(stored || present)
    }

    /// Whether a genome is quarantined.
    pub async fn contains(&self, id: GenomeId) -> bool {
        self.members.read().await.contains_key(&id)
    }

    /// Quarantined genome ids, sorted.
    pub async fn ids(&self) -> Vec<GenomeId> {
        let mut ids: Vec<_> = self.members.read().await.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Quarantine records, sorted by genome id.
    pub async fn records(&self) -> Vec<QuarantineRecord> {
        let mut records: Vec<_> = self.members.read().await.values().cloned().collect();
        records.sort_by_key(|r| r.genome_id);
        records
    }
}

impl Default for QuarantineSet {
    fn default() -> Self {
        Self::new()
    }
}

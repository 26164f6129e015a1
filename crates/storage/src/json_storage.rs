//! JSON file storage implementation.
//!
//! Layout under the root directory:
//!
//! ```text
//! checkpoints/checkpoint_gen_000010.json   periodic checkpoints
//! checkpoints/emergency_checkpoint.json     emergency checkpoint
//! checkpoints/superseded/                   periodic checkpoints moved aside by rollback
//! quarantine/<genome-id>.json               quarantine records
//! ```
//!
//! Every file is written to a temporary sibling first and renamed into
//! place, so a failed write never damages an existing file.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use evoguard_core::{
    Checkpoint, CheckpointId, CheckpointInfo, CheckpointKind, GenomeId, QuarantineRecord,
};
use super::{CheckpointStore, QuarantineStore, StorageError, Result};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, warn};

const PERIODIC_PREFIX: &str = "checkpoint_gen_";
const EMERGENCY_FILE: &str = "emergency_checkpoint.json";

/// File-based JSON storage backend.
#[derive(Clone)]
pub struct JsonStorage {
    root: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl JsonStorage {
    /// Create storage, creating the checkpoint and quarantine directories.
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        fs::create_dir_all(root.join("checkpoints").join("superseded")).await?;
        fs::create_dir_all(root.join("quarantine")).await?;

        Ok(Self {
            root,
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn checkpoint_dir(&self) -> PathBuf {
        self.root.join("checkpoints")
    }

    fn periodic_path(&self, generation: u64) -> PathBuf {
        self.checkpoint_dir()
            .join(format!("{}{:06}.json", PERIODIC_PREFIX, generation))
    }

    fn emergency_path(&self) -> PathBuf {
        self.checkpoint_dir().join(EMERGENCY_FILE)
    }

    fn checkpoint_path(&self, id: &CheckpointId) -> Option<PathBuf> {
        if id.is_emergency() {
            Some(self.emergency_path())
        } else {
            id.generation().map(|g| self.periodic_path(g))
        }
    }

    fn quarantine_path(&self, id: GenomeId) -> PathBuf {
        self.root.join("quarantine").join(format!("{}.json", id))
    }

    /// Generations of the active periodic checkpoints, ascending.
    async fn periodic_generations(&self) -> Result<Vec<u64>> {
        let mut generations = Vec::new();
        let mut rd = fs::read_dir(self.checkpoint_dir()).await?;
        while let Some(entry) = rd.next_entry().await? {
            if let Some(generation) = periodic_generation(&entry.path()) {
                generations.push(generation);
            }
        }
        generations.sort_unstable();
        Ok(generations)
    }
}

#[async_trait::async_trait]
impl CheckpointStore for JsonStorage {
    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        if !checkpoint.is_consistent() {
            return Err(StorageError::Corrupt(format!(
                "refusing to write inconsistent checkpoint {}",
                checkpoint.id
            )));
        }

        let _guard = self.write_lock.lock().await;

        let path = match checkpoint.kind {
            CheckpointKind::Emergency => self.emergency_path(),
            CheckpointKind::Periodic => {
                if let Some(&latest) = self.periodic_generations().await?.last() {
                    if checkpoint.generation <= latest {
                        return Err(StorageError::NonMonotonic {
                            generation: checkpoint.generation,
                            latest,
                        });
                    }
                }
                self.periodic_path(checkpoint.generation)
            }
        };

        let json = serde_json::to_string_pretty(checkpoint)?;
        write_atomic(&path, json.as_bytes()).await?;
        debug!("Wrote checkpoint {} ({} genomes)", checkpoint.id, checkpoint.population.len());
        Ok(())
    }

    async fn load_checkpoint(&self, id: &CheckpointId) -> Result<Option<Checkpoint>> {
        let Some(path) = self.checkpoint_path(id) else {
            return Ok(None);
        };
        let checkpoint: Option<Checkpoint> = read_json(&path).await?;
        match checkpoint {
            Some(c) if !c.is_consistent() || &c.id != id => Err(StorageError::Corrupt(format!(
                "checkpoint {} failed consistency check",
                id
            ))),
            other => Ok(other),
        }
    }

    async fn latest_periodic(&self) -> Result<Option<Checkpoint>> {
        match self.periodic_generations().await?.last() {
            Some(&generation) => self.load_checkpoint(&CheckpointId::periodic(generation)).await,
            None => Ok(None),
        }
    }

    async fn list_checkpoints(&self) -> Result<Vec<CheckpointInfo>> {
        let mut infos = Vec::new();
        for generation in self.periodic_generations().await? {
            match read_json::<Checkpoint>(&self.periodic_path(generation)).await {
                Ok(Some(c)) => infos.push(c.info()),
                Ok(None) => {}
                Err(e) => warn!("Skipping unreadable checkpoint for generation {}: {}", generation, e),
            }
        }
        if let Ok(Some(c)) = read_json::<Checkpoint>(&self.emergency_path()).await {
            infos.push(c.info());
        }
        Ok(infos)
    }

    async fn supersede_after(&self, generation: u64) -> Result<usize> {
        let _guard = self.write_lock.lock().await;

        let superseded = self.checkpoint_dir().join("superseded");
        let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S%3f");
        let mut moved = 0;
        for newer in self.periodic_generations().await?.into_iter().filter(|g| *g > generation) {
            let from = self.periodic_path(newer);
            let to = superseded.join(format!("{}{:06}.{}.json", PERIODIC_PREFIX, newer, stamp));
            fs::rename(&from, &to).await?;
            moved += 1;
        }
        if moved > 0 {
            debug!("Superseded {} checkpoints newer than generation {}", moved, generation);
        }
        Ok(moved)
    }
}

#[async_trait::async_trait]
impl QuarantineStore for JsonStorage {
    async fn save_quarantine(&self, record: &QuarantineRecord) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let json = serde_json::to_string_pretty(record)?;
        write_atomic(&self.quarantine_path(record.genome_id), json.as_bytes()).await?;
        Ok(())
    }

    async fn load_quarantine(&self, id: GenomeId) -> Result<Option<QuarantineRecord>> {
        read_json(&self.quarantine_path(id)).await
    }

    async fn remove_quarantine(&self, id: GenomeId) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        match fs::remove_file(self.quarantine_path(id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_quarantine(&self) -> Result<Vec<QuarantineRecord>> {
        list_dir(&self.root.join("quarantine")).await
    }
}

fn periodic_generation(path: &Path) -> Option<u64> {
    let name = path.file_name()?.to_str()?;
    name.strip_prefix(PERIODIC_PREFIX)?
        .strip_suffix(".json")?
        .parse()
        .ok()
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, bytes).await?;
    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read_to_string(path).await {
        Ok(json) => {
            let value = serde_json::from_str(&json)?;
            Ok(Some(value))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn list_dir<T: serde::de::DeserializeOwned>(dir: &Path) -> Result<Vec<T>> {
    let mut items = Vec::new();
    let mut rd = fs::read_dir(dir).await?;
    while let Some(entry) = rd.next_entry().await? {
        if entry.path().extension().and_then(|s| s.to_str()) != Some("json") {
            continue;
        }
        match read_json(&entry.path()).await {
            Ok(Some(item)) => items.push(item),
            Ok(None) => {}
            Err(e) => warn!("Skipping unreadable record {}: {}", entry.path().display(), e),
        }
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use evoguard_core::{GeneSchema, Genome, SafetyViolation, Severity, ThreatCategory};

    fn population(n: usize, generation: u64) -> Vec<Genome> {
        (0..n)
            .map(|i| {
                let mut g = Genome::new(GeneSchema::default().default_genes());
                g.fitness = i as f64 / 10.0;
                g.generation = generation;
                g
            })
            .collect()
    }

    #[tokio::test]
    async fn test_checkpoint_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonStorage::new(dir.path()).await.unwrap();

        let pop = population(4, 10);
        let checkpoint = Checkpoint::periodic(10, pop.clone(), Some(pop[3].clone()), vec![]);
        storage.save_checkpoint(&checkpoint).await.unwrap();

        let loaded = storage
            .load_checkpoint(&CheckpointId::periodic(10))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.population, pop);
        assert_eq!(loaded.best_genome, Some(pop[3].clone()));
        assert!(dir.path().join("checkpoints/checkpoint_gen_000010.json").exists());
    }

    #[tokio::test]
    async fn test_periodic_checkpoints_are_monotonic() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonStorage::new(dir.path()).await.unwrap();

        storage
            .save_checkpoint(&Checkpoint::periodic(10, population(2, 10), None, vec![]))
            .await
            .unwrap();
        let err = storage
            .save_checkpoint(&Checkpoint::periodic(5, population(2, 5), None, vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NonMonotonic { generation: 5, latest: 10 }));
    }

    #[tokio::test]
    async fn test_latest_periodic_ignores_emergency() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonStorage::new(dir.path()).await.unwrap();

        storage
            .save_checkpoint(&Checkpoint::periodic(5, population(2, 5), None, vec![]))
            .await
            .unwrap();
        storage
            .save_checkpoint(&Checkpoint::periodic(10, population(2, 10), None, vec![]))
            .await
            .unwrap();
        storage
            .save_checkpoint(&Checkpoint::emergency(12, population(2, 12), None, vec![]))
            .await
            .unwrap();

        let latest = storage.latest_periodic().await.unwrap().unwrap();
        assert_eq!(latest.generation, 10);

        let infos = storage.list_checkpoints().await.unwrap();
        let kinds: Vec<_> = infos.iter().map(|i| i.kind).collect();
        assert_eq!(
            kinds,
            vec![CheckpointKind::Periodic, CheckpointKind::Periodic, CheckpointKind::Emergency]
        );
    }

    #[tokio::test]
    async fn test_corrupt_checkpoint_reported() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonStorage::new(dir.path()).await.unwrap();
        tokio::fs::write(
            dir.path().join("checkpoints/checkpoint_gen_000007.json"),
            b"{ not json",
        )
        .await
        .unwrap();

        let result = storage.load_checkpoint(&CheckpointId::periodic(7)).await;
        assert!(matches!(result, Err(StorageError::Json(_))));
        assert!(storage
            .load_checkpoint(&CheckpointId::periodic(8))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_supersede_after_keeps_files() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonStorage::new(dir.path()).await.unwrap();
        for generation in [5, 10, 15] {
            storage
                .save_checkpoint(&Checkpoint::periodic(generation, population(2, generation), None, vec![]))
                .await
                .unwrap();
        }

        assert_eq!(storage.supersede_after(5).await.unwrap(), 2);
        assert_eq!(storage.latest_periodic().await.unwrap().unwrap().generation, 5);

        let mut archived = tokio::fs::read_dir(dir.path().join("checkpoints/superseded"))
            .await
            .unwrap();
        let mut count = 0;
        while archived.next_entry().await.unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 2);

        // the sequence can continue after the rollback point
        storage
            .save_checkpoint(&Checkpoint::periodic(10, population(2, 10), None, vec![]))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_quarantine_records() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonStorage::new(dir.path()).await.unwrap();
        let id = GenomeId::new();

        let record = QuarantineRecord {
            genome_id: id,
            code_hash: "abc".to_string(),
            violations: vec![SafetyViolation {
                timestamp: chrono::Utc::now(),
                category: ThreatCategory::Injection,
                severity: Severity::Critical,
                description: "eval call".to_string(),
                genome_id: id,
                snippet: Some("eval(x)".to_string()),
                mitigation: "remove dynamic evaluation".to_string(),
            }],
            timestamp: chrono::Utc::now(),
        };
        storage.save_quarantine(&record).await.unwrap();

        assert_eq!(storage.load_quarantine(id).await.unwrap(), Some(record));
        assert_eq!(storage.list_quarantine().await.unwrap().len(), 1);
        assert!(storage.remove_quarantine(id).await.unwrap());
        assert!(!storage.remove_quarantine(id).await.unwrap());
        assert!(storage.list_quarantine().await.unwrap().is_empty());
    }
}

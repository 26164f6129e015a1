//! Genome model - a candidate solution and its measurements.

use crate::gene::{GeneIssue, GeneSchema, GeneValue, Genes};
use crate::id::GenomeId;
use crate::Time;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Measured (or estimated) resource and quality figures of a genome.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenomeMetrics {
    /// Estimated memory footprint in KB
    pub memory_kb: f64,
    /// Estimated instantiation latency in microseconds
    pub latency_us: f64,
    /// Estimated task accuracy (0.0 to 1.0)
    pub accuracy: f64,
    /// When the figures were produced (None = never evaluated)
    pub evaluated_at: Option<Time>,
}

/// A candidate solution.
///
/// Treated as immutable: operators build a new genome with a new id
/// through [`Genome::derive`] instead of editing one in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Genome {
    /// Unique identifier
    pub id: GenomeId,

    /// Ordered typed genes
    pub genes: Genes,

    /// Fitness score (0 until evaluated)
    pub fitness: f64,

    /// Resource and quality figures
    pub metrics: GenomeMetrics,

    /// Forward-compatible free-form data
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,

    /// Program fragment carried by the genome, if any
    #[serde(default)]
    pub source: Option<String>,

    /// Genomes this one was derived from
    #[serde(default)]
    pub parent_ids: Vec<GenomeId>,

    /// Generation that produced this genome
    pub generation: u64,

    /// When created
    pub created_at: Time,
}

impl Genome {
    /// Create a fresh, unscored genome.
    pub fn new(genes: Genes) -> Self {
        Self {
            id: GenomeId::new(),
            genes,
            fitness: 0.0,
            metrics: GenomeMetrics::default(),
            metadata: BTreeMap::new(),
            source: None,
            parent_ids: Vec::new(),
            generation: 0,
            created_at: chrono::Utc::now(),
        }
    }

    /// Build a genome from a request-layer specification, validated against
    /// the schema. Missing genes take their schema default.
    pub fn from_spec(spec: GenomeSpec, schema: &GeneSchema) -> Result<Self, GenomeError> {
        let mut genes = Genes::new();
        for gene in &schema.genes {
            let value = spec.genes.get(&gene.name).cloned().unwrap_or_else(|| gene.default.clone());
            genes.set(gene.name.clone(), value);
        }
        if let Some(unknown) = spec.genes.keys().find(|name| schema.spec(name).is_none()) {
            return Err(GenomeError::InvalidGenes(vec![GeneIssue::Unknown(unknown.clone())]));
        }

        let issues = schema.check(&genes);
        if !issues.is_empty() {
            return Err(GenomeError::InvalidGenes(issues));
        }

        let mut genome = Genome::new(genes);
        genome.source = spec.source;
        genome.metadata = spec.metadata;
        Ok(genome)
    }

    /// Set the source fragment.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Add a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Derive a new genome with different genes.
    ///
    /// The child gets a new id, zeroed fitness and metrics, and records
    /// `self` as its parent. Source and metadata are inherited.
    pub fn derive(&self, genes: Genes) -> Genome {
        Genome {
            id: GenomeId::new(),
            genes,
            fitness: 0.0,
            metrics: GenomeMetrics::default(),
            metadata: self.metadata.clone(),
            source: self.source.clone(),
            parent_ids: vec![self.id],
            generation: self.generation,
            created_at: chrono::Utc::now(),
        }
    }

    /// Whether the genome has been evaluated.
    pub fn is_scored(&self) -> bool {
        self.metrics.evaluated_at.is_some()
    }

    /// Overwrite a single gene, producing a derived genome.
    pub fn with_gene(&self, name: &str, value: GeneValue) -> Genome {
        let mut genes = self.genes.clone();
        genes.set(name, value);
        self.derive(genes)
    }

    /// Textual representation used by safety scanning and hashing.
    ///
    /// Deterministic for a given genome: source first, then one
    /// `name = value` line per gene, then metadata as compact JSON.
    pub fn representation(&self) -> String {
        let mut out = String::new();
        if let Some(source) = &self.source {
            out.push_str(source);
            if !source.ends_with('\n') {
                out.push('\n');
            }
        }
        for gene in self.genes.iter() {
            out.push_str(&format!("{} = {}\n", gene.name, gene.value));
        }
        if !self.metadata.is_empty() {
            out.push_str(&serde_json::to_string(&self.metadata).unwrap_or_default());
            out.push('\n');
        }
        out
    }
}

/// Genome description produced by the request layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenomeSpec {
    /// Named gene values; omitted genes take schema defaults
    #[serde(default)]
    pub genes: BTreeMap<String, GeneValue>,
    /// Optional program fragment
    #[serde(default)]
    pub source: Option<String>,
    /// Free-form metadata
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

/// Errors building a genome.
#[derive(Debug, thiserror::Error)]
pub enum GenomeError {
    /// Genes do not conform to the schema
    #[error("invalid genes: {}", .0.iter().map(|i| i.to_string()).collect::<Vec<_>>().join("; "))]
    InvalidGenes(Vec<GeneIssue>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_spec_fills_defaults_in_schema_order() {
        let schema = GeneSchema::default();
        let mut spec = GenomeSpec::default();
        spec.genes.insert("hidden_units".into(), GeneValue::Int(128));
        spec.genes.insert("learning_rate".into(), GeneValue::Float(0.01));

        let genome = Genome::from_spec(spec, &schema).unwrap();
        assert_eq!(genome.genes.get_i64("hidden_units"), Some(128));
        assert_eq!(genome.genes.get_f64("dropout"), Some(0.2));
        assert!(genome.genes.same_layout(&schema.default_genes()));
        assert_eq!(genome.fitness, 0.0);
        assert!(!genome.is_scored());
    }

    #[test]
    fn test_from_spec_rejects_out_of_range() {
        let schema = GeneSchema::default();
        let mut spec = GenomeSpec::default();
        spec.genes.insert("learning_rate".into(), GeneValue::Float(5.0));
        assert!(matches!(
            Genome::from_spec(spec, &schema),
            Err(GenomeError::InvalidGenes(_))
        ));
    }

    #[test]
    fn test_from_spec_rejects_unknown_gene() {
        let schema = GeneSchema::default();
        let mut spec = GenomeSpec::default();
        spec.genes.insert("momentum".into(), GeneValue::Float(0.9));
        assert!(Genome::from_spec(spec, &schema).is_err());
    }

    #[test]
    fn test_derive_resets_scores_and_links_parent() {
        let mut parent = Genome::new(GeneSchema::default().default_genes());
        parent.fitness = 0.7;
        parent.metrics.evaluated_at = Some(chrono::Utc::now());

        let child = parent.with_gene("dropout", GeneValue::Float(0.3));
        assert_ne!(child.id, parent.id);
        assert_eq!(child.fitness, 0.0);
        assert!(!child.is_scored());
        assert_eq!(child.parent_ids, vec![parent.id]);
        assert_eq!(child.genes.get_f64("dropout"), Some(0.3));
        assert_eq!(parent.genes.get_f64("dropout"), Some(0.2));
    }

    #[test]
    fn test_representation_is_deterministic() {
        let genome = Genome::new(GeneSchema::default().default_genes())
            .with_source("x = 1")
            .with_metadata("owner", serde_json::json!("lab"));
        let text = genome.representation();
        assert_eq!(text, genome.representation());
        assert!(text.starts_with("x = 1\n"));
        assert!(text.contains("hidden_units = 64"));
        assert!(text.contains("\"owner\":\"lab\""));
    }
}

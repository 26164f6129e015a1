//! Typed genes and the schema that bounds them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Value carried by a single gene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum GeneValue {
    /// Continuous hyperparameter
    Float(f64),
    /// Integer hyperparameter
    Int(i64),
    /// Categorical choice
    Choice(String),
    /// Boolean switch
    Flag(bool),
}

impl GeneValue {
    /// Numeric view of the value (`Float` and `Int` only).
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            GeneValue::Float(v) => Some(*v),
            GeneValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Integer view of the value.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            GeneValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Categorical view of the value.
    pub fn as_choice(&self) -> Option<&str> {
        match self {
            GeneValue::Choice(v) => Some(v.as_str()),
            _ => None,
        }
    }

    /// Flag view of the value.
    pub fn as_flag(&self) -> Option<bool> {
        match self {
            GeneValue::Flag(v) => Some(*v),
            _ => None,
        }
    }

    /// Short name of the variant.
    pub fn kind(&self) -> &'static str {
        match self {
            GeneValue::Float(_) => "float",
            GeneValue::Int(_) => "int",
            GeneValue::Choice(_) => "choice",
            GeneValue::Flag(_) => "flag",
        }
    }
}

impl fmt::Display for GeneValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeneValue::Float(v) => write!(f, "{}", v),
            GeneValue::Int(v) => write!(f, "{}", v),
            GeneValue::Choice(v) => write!(f, "{}", v),
            GeneValue::Flag(v) => write!(f, "{}", v),
        }
    }
}

/// A named gene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gene {
    /// Gene name
    pub name: String,
    /// Current value
    pub value: GeneValue,
}

/// Ordered gene list.
///
/// Order is significant: single-point crossover splits on the position in
/// this list, so genomes built from the same schema share one layout.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Genes(Vec<Gene>);

impl Genes {
    /// Create an empty gene list.
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Look up a gene value by name.
    pub fn get(&self, name: &str) -> Option<&GeneValue> {
        self.0.iter().find(|g| g.name == name).map(|g| &g.value)
    }

    /// Numeric gene value by name.
    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(GeneValue::as_f64)
    }

    /// Integer gene value by name.
    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(GeneValue::as_i64)
    }

    /// Overwrite an existing gene or append a new one.
    pub fn set(&mut self, name: impl Into<String>, value: GeneValue) {
        let name = name.into();
        match self.0.iter_mut().find(|g| g.name == name) {
            Some(gene) => gene.value = value,
            None => self.0.push(Gene { name, value }),
        }
    }

    /// Builder-style [`Genes::set`].
    pub fn with(mut self, name: impl Into<String>, value: GeneValue) -> Self {
        self.set(name, value);
        self
    }

    /// Gene names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|g| g.name.as_str())
    }

    /// Iterate genes in order.
    pub fn iter(&self) -> impl Iterator<Item = &Gene> {
        self.0.iter()
    }

    /// Genes as a slice.
    pub fn as_slice(&self) -> &[Gene] {
        &self.0
    }

    /// Number of genes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no genes.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether two gene lists share the same names in the same order.
    pub fn same_layout(&self, other: &Genes) -> bool {
        self.len() == other.len() && self.names().zip(other.names()).all(|(a, b)| a == b)
    }
}

impl<S: Into<String>> FromIterator<(S, GeneValue)> for Genes {
    fn from_iter<I: IntoIterator<Item = (S, GeneValue)>>(iter: I) -> Self {
        let mut genes = Genes::new();
        for (name, value) in iter {
            genes.set(name, value);
        }
        genes
    }
}

/// Allowed values for a gene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GeneBounds {
    /// Inclusive float range
    Float {
        /// Lower bound
        min: f64,
        /// Upper bound
        max: f64,
    },
    /// Inclusive integer range
    Int {
        /// Lower bound
        min: i64,
        /// Upper bound
        max: i64,
    },
    /// One of a fixed set of options
    Choice {
        /// Allowed options
        options: Vec<String>,
    },
    /// Boolean
    Flag,
}

impl GeneBounds {
    /// Whether `value` has the variant these bounds expect.
    pub fn same_kind(&self, value: &GeneValue) -> bool {
        matches!(
            (self, value),
            (GeneBounds::Float { .. }, GeneValue::Float(_))
                | (GeneBounds::Int { .. }, GeneValue::Int(_))
                | (GeneBounds::Choice { .. }, GeneValue::Choice(_))
                | (GeneBounds::Flag, GeneValue::Flag(_))
        )
    }

    /// Whether `value` lies within the bounds.
    pub fn contains(&self, value: &GeneValue) -> bool {
        match (self, value) {
            (GeneBounds::Float { min, max }, GeneValue::Float(v)) => {
                v.is_finite() && *v >= *min && *v <= *max
            }
            (GeneBounds::Int { min, max }, GeneValue::Int(v)) => *v >= *min && *v <= *max,
            (GeneBounds::Choice { options }, GeneValue::Choice(v)) => options.contains(v),
            (GeneBounds::Flag, GeneValue::Flag(_)) => true,
            _ => false,
        }
    }

    /// Pull a numeric value back inside the bounds.
    ///
    /// Values of the wrong kind are returned unchanged.
    pub fn clamp(&self, value: GeneValue) -> GeneValue {
        match (self, value) {
            (GeneBounds::Float { min, max }, GeneValue::Float(v)) => {
                let v = if v.is_finite() { v } else { *min };
                GeneValue::Float(v.clamp(*min, *max))
            }
            (GeneBounds::Int { min, max }, GeneValue::Int(v)) => GeneValue::Int(v.clamp(*min, *max)),
            (_, other) => other,
        }
    }
}

/// Schema entry for one gene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneSpec {
    /// Gene name
    pub name: String,
    /// Allowed values
    pub bounds: GeneBounds,
    /// Value used by the default genome
    pub default: GeneValue,
}

impl GeneSpec {
    fn float(name: &str, min: f64, max: f64, default: f64) -> Self {
        Self {
            name: name.to_string(),
            bounds: GeneBounds::Float { min, max },
            default: GeneValue::Float(default),
        }
    }

    fn int(name: &str, min: i64, max: i64, default: i64) -> Self {
        Self {
            name: name.to_string(),
            bounds: GeneBounds::Int { min, max },
            default: GeneValue::Int(default),
        }
    }
}

/// Problem found when checking genes against a schema.
#[derive(Debug, Clone, PartialEq)]
pub enum GeneIssue {
    /// Schema gene absent from the genome
    Missing(String),
    /// Genome gene not declared by the schema
    Unknown(String),
    /// Gene appears more than once
    Duplicate(String),
    /// Gene has the wrong variant
    TypeMismatch {
        /// Gene name
        name: String,
        /// Expected variant
        expected: &'static str,
        /// Actual variant
        found: &'static str,
    },
    /// Gene value outside its bounds
    OutOfRange {
        /// Gene name
        name: String,
        /// Offending value
        value: GeneValue,
    },
    /// Genes not in schema order
    OutOfOrder,
}

impl fmt::Display for GeneIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeneIssue::Missing(name) => write!(f, "gene '{}' is missing", name),
            GeneIssue::Unknown(name) => write!(f, "gene '{}' is not part of the schema", name),
            GeneIssue::Duplicate(name) => write!(f, "gene '{}' appears more than once", name),
            GeneIssue::TypeMismatch { name, expected, found } => {
                write!(f, "gene '{}' should be {} but is {}", name, expected, found)
            }
            GeneIssue::OutOfRange { name, value } => {
                write!(f, "gene '{}' value {} is outside its configured range", name, value)
            }
            GeneIssue::OutOfOrder => write!(f, "genes are not in schema order"),
        }
    }
}

/// Ordered set of gene specifications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneSchema {
    /// Gene specifications, in layout order
    pub genes: Vec<GeneSpec>,
}

impl GeneSchema {
    /// Create a schema from specs.
    pub fn new(genes: Vec<GeneSpec>) -> Self {
        Self { genes }
    }

    /// Look up a spec by gene name.
    pub fn spec(&self, name: &str) -> Option<&GeneSpec> {
        self.genes.iter().find(|s| s.name == name)
    }

    /// Genes holding every default value, in schema order.
    pub fn default_genes(&self) -> Genes {
        self.genes
            .iter()
            .map(|s| (s.name.clone(), s.default.clone()))
            .collect()
    }

    /// Check genes against the schema. An empty result means the genes conform.
    pub fn check(&self, genes: &Genes) -> Vec<GeneIssue> {
        let mut issues = Vec::new();

        for spec in &self.genes {
            match genes.get(&spec.name) {
                None => issues.push(GeneIssue::Missing(spec.name.clone())),
                Some(value) if !spec.bounds.same_kind(value) => {
                    issues.push(GeneIssue::TypeMismatch {
                        name: spec.name.clone(),
                        expected: spec.default.kind(),
                        found: value.kind(),
                    })
                }
                Some(value) if !spec.bounds.contains(value) => {
                    issues.push(GeneIssue::OutOfRange {
                        name: spec.name.clone(),
                        value: value.clone(),
                    })
                }
                Some(_) => {}
            }
        }

        let mut seen = std::collections::HashSet::new();
        for name in genes.names() {
            if !seen.insert(name) {
                issues.push(GeneIssue::Duplicate(name.to_string()));
            }
            if self.spec(name).is_none() {
                issues.push(GeneIssue::Unknown(name.to_string()));
            }
        }

        let positions: Vec<usize> = genes
            .names()
            .filter_map(|n| self.genes.iter().position(|s| s.name == n))
            .collect();
        if positions.windows(2).any(|w| w[0] > w[1]) {
            issues.push(GeneIssue::OutOfOrder);
        }

        issues
    }
}

impl Default for GeneSchema {
    fn default() -> Self {
        Self::new(vec![
            GeneSpec::float("learning_rate", 1e-5, 1.0, 1e-3),
            GeneSpec::float("dropout", 0.0, 0.9, 0.2),
            GeneSpec::int("hidden_layers", 1, 16, 2),
            GeneSpec::int("hidden_units", 4, 1024, 64),
            GeneSpec::int("batch_size", 1, 512, 32),
            GeneSpec {
                name: "activation".to_string(),
                bounds: GeneBounds::Choice {
                    options: ["relu", "tanh", "sigmoid", "gelu"]
                        .iter()
                        .map(|s| s.to_string())
                        .collect(),
                },
                default: GeneValue::Choice("relu".to_string()),
            },
            GeneSpec {
                name: "batch_norm".to_string(),
                bounds: GeneBounds::Flag,
                default: GeneValue::Flag(false),
            },
        ])
    }
}

//! Run configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// How thorough mutation validation is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationLevel {
    /// Hard constraints and safety scan only
    Basic,
    /// Adds learning-rate stability warnings
    Standard,
    /// Adds depth warnings
    Strict,
    /// Adds every available warning
    Paranoid,
}

impl std::str::FromStr for ValidationLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "basic" => Ok(ValidationLevel::Basic),
            "standard" => Ok(ValidationLevel::Standard),
            "strict" => Ok(ValidationLevel::Strict),
            "paranoid" => Ok(ValidationLevel::Paranoid),
            other => Err(ConfigError::Invalid {
                field: "validation_level",
                reason: format!("unknown level '{}'", other),
            }),
        }
    }
}

/// Weights of the fitness components. Must sum to ~1.0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitnessWeights {
    /// Task accuracy
    pub accuracy: f64,
    /// Memory headroom against the limit
    pub memory: f64,
    /// Latency headroom against the limit
    pub latency: f64,
    /// Structural simplicity
    pub complexity: f64,
}

impl Default for FitnessWeights {
    fn default() -> Self {
        Self {
            accuracy: 0.4,
            memory: 0.3,
            latency: 0.2,
            complexity: 0.1,
        }
    }
}

impl FitnessWeights {
    /// Check weights are finite, non-negative and sum to ~1.0.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fields = [
            self.accuracy,
            self.memory,
            self.latency,
            self.complexity,
        ];
        if fields.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(ConfigError::Invalid {
                field: "fitness_weights",
                reason: "weights must be finite and >= 0".to_string(),
            });
        }
        let sum: f64 = fields.iter().sum();
        if (sum - 1.0).abs() > 0.01 {
            return Err(ConfigError::Invalid {
                field: "fitness_weights",
                reason: format!("weights must sum to ~1.0, got {:.4}", sum),
            });
        }
        Ok(())
    }
}

/// Configuration of an evolution run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvolutionConfig {
    /// Generation cap
    pub max_generations: u64,
    /// Genomes per generation
    pub population_size: usize,
    /// Base mutation probability
    pub mutation_rate: f64,
    /// Lower bound of the adaptive mutation probability
    pub min_mutation_rate: f64,
    /// Upper bound of the adaptive mutation probability
    pub max_mutation_rate: f64,
    /// Probability that a parent pair is crossed over
    pub crossover_rate: f64,
    /// Scales tournament size (size = round(2 * pressure))
    pub selection_pressure: f64,
    /// Hard memory limit (KB)
    pub memory_limit_kb: f64,
    /// Hard instantiation latency limit (µs)
    pub instantiation_limit_us: f64,
    /// Minimum per-generation safety score before the run is halted
    pub safety_threshold: f64,
    /// Highest risk score a valid genome may carry
    pub risk_ceiling: f64,
    /// Generations between periodic checkpoints
    pub checkpoint_interval: u64,
    /// Validation thoroughness
    pub validation_level: ValidationLevel,
    /// Quarantine genomes rejected for high/critical findings
    pub auto_quarantine: bool,
    /// Roll back to the last checkpoint when a safety check fails
    pub auto_rollback: bool,
    /// Fitness component weights
    pub fitness_weights: FitnessWeights,
    /// Root directory for checkpoints and quarantine records
    pub storage_dir: PathBuf,
    /// Seed for reproducible runs
    pub random_seed: Option<u64>,
    /// Per-genome budget for guided mutation analysis (ms)
    pub analysis_budget_ms: u64,
    /// Metrics entries kept in each checkpoint
    pub metrics_tail: usize,
}

impl Default for EvolutionConfig {
    fn default() -> Self {
        Self {
            max_generations: 100,
            population_size: 20,
            mutation_rate: 0.1,
            min_mutation_rate: 0.01,
            max_mutation_rate: 0.5,
            crossover_rate: 0.7,
            selection_pressure: 1.5,
            memory_limit_kb: 512.0,
            instantiation_limit_us: 1000.0,
            safety_threshold: 0.5,
            risk_ceiling: 0.8,
            checkpoint_interval: 10,
            validation_level: ValidationLevel::Standard,
            auto_quarantine: true,
            auto_rollback: true,
            fitness_weights: FitnessWeights::default(),
            storage_dir: PathBuf::from(".evoguard"),
            random_seed: None,
            analysis_budget_ms: 50,
            metrics_tail: 20,
        }
    }
}

impl EvolutionConfig {
    /// Parse a TOML document; omitted keys keep their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        tracing::debug!("Loaded configuration from {}", path.as_ref().display());
        Self::from_toml_str(&text)
    }

    /// Tournament size derived from the selection pressure.
    pub fn tournament_size(&self) -> usize {
        let size = (2.0 * self.selection_pressure).round().max(2.0) as usize;
        size.min(self.population_size.max(2))
    }

    /// Check every field is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.population_size < 2 {
            return Err(invalid("population_size", "must be at least 2"));
        }
        if self.max_generations == 0 {
            return Err(invalid("max_generations", "must be at least 1"));
        }
        if self.checkpoint_interval == 0 {
            return Err(invalid("checkpoint_interval", "must be at least 1"));
        }
        let probabilities = [
            ("mutation_rate", self.mutation_rate),
            ("min_mutation_rate", self.min_mutation_rate),
            ("max_mutation_rate", self.max_mutation_rate),
            ("crossover_rate", self.crossover_rate),
            ("safety_threshold", self.safety_threshold),
            ("risk_ceiling", self.risk_ceiling),
        ];
        for (field, value) in probabilities {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(invalid(field, &format!("must be in [0.0, 1.0], got {}", value)));
            }
        }
        if self.min_mutation_rate > self.max_mutation_rate {
            return Err(invalid("min_mutation_rate", "must not exceed max_mutation_rate"));
        }
        if !(self.min_mutation_rate..=self.max_mutation_rate).contains(&self.mutation_rate) {
            return Err(invalid("mutation_rate", "must lie between the min and max rates"));
        }
        if !self.selection_pressure.is_finite() || self.selection_pressure <= 0.0 {
            return Err(invalid("selection_pressure", "must be > 0"));
        }
        if !self.memory_limit_kb.is_finite() || self.memory_limit_kb <= 0.0 {
            return Err(invalid("memory_limit_kb", "must be > 0"));
        }
        if !self.instantiation_limit_us.is_finite() || self.instantiation_limit_us <= 0.0 {
            return Err(invalid("instantiation_limit_us", "must be > 0"));
        }
        self.fitness_weights.validate()
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.to_string(),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A field has an unusable value
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// Field name
        field: &'static str,
        /// What is wrong
        reason: String,
    },

    /// Config file could not be read
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Config file is not valid TOML
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = EvolutionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.tournament_size(), 3);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = EvolutionConfig::from_toml_str(
            r#"
            population_size = 8
            validation_level = "paranoid"
            auto_rollback = false
            "#,
        )
        .unwrap();
        assert_eq!(config.population_size, 8);
        assert_eq!(config.validation_level, ValidationLevel::Paranoid);
        assert!(!config.auto_rollback);
        assert_eq!(config.checkpoint_interval, 10);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let config = EvolutionConfig {
            crossover_rate: 1.5,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "crossover_rate", .. })
        ));

        let config = EvolutionConfig {
            population_size: 1,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = EvolutionConfig {
            fitness_weights: FitnessWeights {
                accuracy: 0.9,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_tournament_size_scales_with_pressure() {
        let config = EvolutionConfig {
            selection_pressure: 1.0,
            ..Default::default()
        };
        assert_eq!(config.tournament_size(), 2);

        let config = EvolutionConfig {
            selection_pressure: 50.0,
            population_size: 6,
            ..Default::default()
        };
        assert_eq!(config.tournament_size(), 6);
    }

    #[test]
    fn test_validation_level_parse_and_order() {
        assert_eq!("STRICT".parse::<ValidationLevel>().unwrap(), ValidationLevel::Strict);
        assert!(ValidationLevel::Paranoid > ValidationLevel::Basic);
        assert!("lenient".parse::<ValidationLevel>().is_err());
    }
}

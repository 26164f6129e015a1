//! Runtime behaviour observations and their ceilings.

use evoguard_core::GenomeId;
use serde::{Deserialize, Serialize};

/// Resource usage observed while a genome ran.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeObservation {
    /// Observed genome
    pub genome_id: GenomeId,
    /// Peak memory (KB)
    pub memory_kb: f64,
    /// Average CPU utilisation (percent of one core)
    pub cpu_percent: f64,
    /// Open network connections
    pub open_connections: u32,
    /// Wall-clock execution time (ms)
    pub execution_ms: f64,
}

/// Ceilings for runtime behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeCeilings {
    /// Peak memory (KB)
    pub max_memory_kb: f64,
    /// CPU utilisation (percent)
    pub max_cpu_percent: f64,
    /// Open network connections
    pub max_connections: u32,
    /// Execution time (ms)
    pub max_execution_ms: f64,
}

impl Default for RuntimeCeilings {
    fn default() -> Self {
        Self {
            max_memory_kb: 512.0,
            max_cpu_percent: 90.0,
            max_connections: 0,
            max_execution_ms: 5_000.0,
        }
    }
}

//! Analytic resource model.
//!
//! Estimates memory footprint and instantiation latency straight from the
//! genes, so candidates can be screened before they are ever measured.

use crate::gene::Genes;
use serde::{Deserialize, Serialize};

/// Resource estimate for a gene set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceEstimate {
    /// Trainable parameter count
    pub parameters: u64,
    /// Memory footprint in KB
    pub memory_kb: f64,
    /// Instantiation latency in microseconds
    pub latency_us: f64,
    /// Structural complexity (0.0 to 1.0)
    pub complexity: f64,
}

/// Dense-network cost model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceModel {
    /// Input feature width
    pub input_width: u64,
    /// Output width
    pub output_width: u64,
    /// Bytes per parameter
    pub bytes_per_parameter: u64,
    /// Fixed memory overhead in KB
    pub base_memory_kb: f64,
    /// Fixed latency overhead in microseconds
    pub base_latency_us: f64,
    /// Latency per thousand parameters in microseconds
    pub latency_per_kparam_us: f64,
    /// Parameter count treated as maximal complexity
    pub reference_parameters: u64,
}

impl Default for ResourceModel {
    fn default() -> Self {
        Self {
            input_width: 64,
            output_width: 10,
            bytes_per_parameter: 4,
            base_memory_kb: 16.0,
            base_latency_us: 5.0,
            latency_per_kparam_us: 10.0,
            reference_parameters: 200_000,
        }
    }
}

impl ResourceModel {
    /// Parameter count implied by `hidden_layers`, `hidden_units` and `batch_norm`.
    pub fn parameter_count(&self, genes: &Genes) -> u64 {
        let layers = genes.get_i64("hidden_layers").unwrap_or(1).max(1) as u64;
        let units = genes.get_i64("hidden_units").unwrap_or(1).max(1) as u64;

        // Saturates so out-of-range genes still yield an estimate.
        let weights = self
            .input_width
            .saturating_mul(units)
            .saturating_add((layers - 1).saturating_mul(units).saturating_mul(units))
            .saturating_add(units.saturating_mul(self.output_width));
        let biases = layers.saturating_mul(units).saturating_add(self.output_width);
        let norm = match genes.get("batch_norm").and_then(|v| v.as_flag()) {
            Some(true) => layers.saturating_mul(units).saturating_mul(2),
            _ => 0,
        };
        weights.saturating_add(biases).saturating_add(norm)
    }

    /// Estimate resources for a gene set.
    pub fn estimate(&self, genes: &Genes) -> ResourceEstimate {
        let parameters = self.parameter_count(genes);
        let memory_kb =
            self.base_memory_kb + parameters as f64 * self.bytes_per_parameter as f64 / 1024.0;

        let activation_cost = match genes.get("activation").and_then(|v| v.as_choice()) {
            Some("gelu") => 1.2,
            Some("tanh") | Some("sigmoid") => 1.1,
            _ => 1.0,
        };
        let latency_us = self.base_latency_us
            + parameters as f64 / 1000.0 * self.latency_per_kparam_us * activation_cost;

        let complexity = (parameters as f64 / self.reference_parameters as f64).min(1.0);

        ResourceEstimate {
            parameters,
            memory_kb,
            latency_us,
            complexity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{GeneSchema, GeneValue};

    #[test]
    fn test_default_genes_estimate() {
        let model = ResourceModel::default();
        let genes = GeneSchema::default().default_genes();
        let estimate = model.estimate(&genes);
        // 64*64 + 64*64 + 64*10 weights, 2*64 + 10 biases
        assert_eq!(estimate.parameters, 8_970);
        assert!(estimate.memory_kb > 50.0 && estimate.memory_kb < 52.0);
        assert!(estimate.latency_us < 100.0);
        assert!(estimate.complexity < 0.1);
    }

    #[test]
    fn test_wider_network_costs_more() {
        let model = ResourceModel::default();
        let base = GeneSchema::default().default_genes();
        let wide = base.clone().with("hidden_units", GeneValue::Int(512));
        assert!(model.estimate(&wide).memory_kb > model.estimate(&base).memory_kb);
        assert!(model.estimate(&wide).latency_us > model.estimate(&base).latency_us);
    }

    #[test]
    fn test_huge_genes_saturate() {
        let model = ResourceModel::default();
        let genes = GeneSchema::default()
            .default_genes()
            .with("hidden_units", GeneValue::Int(5_000_000_000))
            .with("hidden_layers", GeneValue::Int(1_000_000));
        let estimate = model.estimate(&genes);
        assert_eq!(estimate.parameters, u64::MAX);
        assert!(estimate.memory_kb.is_finite());
        assert_eq!(estimate.complexity, 1.0);
    }
}

//! Adaptive mutation-rate controller.
//!
//! The rate is the base rate scaled by one multiplier per signal taken
//! from the recent metrics history, then clamped to `[min_rate, max_rate]`:
//!
//! | signal | condition | multiplier |
//! |---|---|---|
//! | stagnation | best fitness range over the window `< epsilon` | 1.5 |
//! | declining fitness | slope `< -epsilon` | 1.3 |
//! | rapid improvement | slope `> rapid_slope` | 0.7 |
//! | low diversity | `(best - avg) / best < low_diversity` | 1.2 |
//! | high diversity | `(best - avg) / best > high_diversity` | 0.9 |

use evoguard_core::{AdjustmentReason, EvolutionConfig, EvolutionMetrics, RateMetrics};
use serde::{Deserialize, Serialize};
use tracing::debug;

const STAGNATION_FACTOR: f64 = 1.5;
const DECLINE_FACTOR: f64 = 1.3;
const RAPID_IMPROVEMENT_FACTOR: f64 = 0.7;
const LOW_DIVERSITY_FACTOR: f64 = 1.2;
const HIGH_DIVERSITY_FACTOR: f64 = 0.9;

/// Rate controller configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateConfig {
    /// Rate with no adjustment
    pub base_rate: f64,
    /// Lower clamp
    pub min_rate: f64,
    /// Upper clamp
    pub max_rate: f64,
    /// Generations considered for trend and stagnation
    pub window: usize,
    /// Fitness range below which the window counts as stagnant
    pub epsilon: f64,
    /// Slope above which fitness counts as rapidly improving
    pub rapid_slope: f64,
    /// Diversity below which the population counts as collapsed
    pub low_diversity: f64,
    /// Diversity above which the population counts as spread out
    pub high_diversity: f64,
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            base_rate: 0.1,
            min_rate: 0.01,
            max_rate: 0.5,
            window: 5,
            epsilon: 1e-3,
            rapid_slope: 0.02,
            low_diversity: 0.05,
            high_diversity: 0.5,
        }
    }
}

impl RateConfig {
    /// Take the rate bounds from a run configuration.
    pub fn from_evolution(config: &EvolutionConfig) -> Self {
        Self {
            base_rate: config.mutation_rate,
            min_rate: config.min_mutation_rate,
            max_rate: config.max_mutation_rate,
            ..Default::default()
        }
    }
}

/// Shape of a precomputed rate schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleKind {
    /// Base rate every generation
    Constant,
    /// Straight line from base rate to min rate
    LinearDecay,
    /// Geometric decay from base rate to min rate
    ExponentialDecay,
}

/// Computes the mutation probability for each generation.
pub struct RateController {
    config: RateConfig,
    current_rate: f64,
    stagnation_count: u32,
    log: Vec<RateMetrics>,
}

impl RateController {
    /// Create a controller starting at the base rate.
    pub fn new(config: RateConfig) -> Self {
        Self {
            current_rate: config.base_rate,
            config,
            stagnation_count: 0,
            log: Vec::new(),
        }
    }

    /// Most recently computed rate.
    pub fn current_rate(&self) -> f64 {
        self.current_rate
    }

    /// Every computation so far.
    pub fn log(&self) -> &[RateMetrics] {
        &self.log
    }

    /// Forget adaptation state, keeping the log.
    pub fn reset(&mut self) {
        self.current_rate = self.config.base_rate;
        self.stagnation_count = 0;
    }

    /// Compute the rate for the generation after the last history entry.
    pub fn calculate_adaptive_rate(&mut self, history: &[EvolutionMetrics]) -> f64 {
        let generation = history.last().map(|m| m.generation + 1).unwrap_or(0);

        if history.len() < 2 {
            self.stagnation_count = 0;
            return self.finish(generation, self.config.base_rate, 0.0, 0.0, AdjustmentReason::InsufficientHistory);
        }

        let start = history.len().saturating_sub(self.config.window);
        let tail: Vec<f64> = history[start..].iter().map(|m| m.best_fitness).collect();
        let trend = slope(&tail);
        let (lo, hi) = tail
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(*v), hi.max(*v)));
        let stagnating = tail.len() >= self.config.window && hi - lo < self.config.epsilon;
        let diversity = history.last().map(diversity_index).unwrap_or(0.0);

        let mut factors: Vec<(AdjustmentReason, f64)> = Vec::new();
        if stagnating {
            self.stagnation_count += 1;
            factors.push((AdjustmentReason::Stagnation, STAGNATION_FACTOR));
        } else {
            self.stagnation_count = 0;
        }
        if trend < -self.config.epsilon {
            factors.push((AdjustmentReason::DecliningFitness, DECLINE_FACTOR));
        } else if trend > self.config.rapid_slope {
            factors.push((AdjustmentReason::RapidImprovement, RAPID_IMPROVEMENT_FACTOR));
        }
        if diversity < self.config.low_diversity {
            factors.push((AdjustmentReason::LowDiversity, LOW_DIVERSITY_FACTOR));
        } else if diversity > self.config.high_diversity {
            factors.push((AdjustmentReason::HighDiversity, HIGH_DIVERSITY_FACTOR));
        }

        let multiplier: f64 = factors.iter().map(|(_, f)| f).product();
        let reason = factors
            .iter()
            .max_by(|a, b| a.1.ln().abs().total_cmp(&b.1.ln().abs()))
            .map(|(r, _)| *r)
            .unwrap_or(AdjustmentReason::Baseline);

        self.finish(generation, self.config.base_rate * multiplier, trend, diversity, reason)
    }

    fn finish(
        &mut self,
        generation: u64,
        rate: f64,
        trend: f64,
        diversity: f64,
        reason: AdjustmentReason,
    ) -> f64 {
        let rate = rate.max(self.config.min_rate).min(self.config.max_rate);
        self.current_rate = rate;
        debug!(
            generation,
            "Mutation rate {:.4} ({}, trend {:+.4}, diversity {:.3})",
            rate,
            reason.as_str(),
            trend,
            diversity
        );
        self.log.push(RateMetrics {
            generation,
            current_rate: rate,
            fitness_trend: trend,
            diversity_index: diversity,
            stagnation_count: self.stagnation_count,
            reason,
        });
        rate
    }

    /// Precomputed, non-adaptive schedule of `generations` rates.
    pub fn schedule(&self, generations: usize, kind: ScheduleKind) -> Vec<f64> {
        let base = self.config.base_rate;
        let min = self.config.min_rate.min(base);
        if generations <= 1 {
            return vec![base; generations];
        }
        let last = (generations - 1) as f64;

        (0..generations)
            .map(|i| {
                let t = i as f64;
                match kind {
                    ScheduleKind::Constant => base,
                    ScheduleKind::LinearDecay => base - (base - min) * t / last,
                    ScheduleKind::ExponentialDecay => {
                        if min > 0.0 {
                            base * (min / base).powf(t / last)
                        } else {
                            base * 0.95f64.powf(t)
                        }
                    }
                }
            })
            .collect()
    }
}

/// Least-squares slope of evenly spaced values.
fn slope(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    if values.len() < 2 {
        return 0.0;
    }
    let mean_x = (n - 1.0) / 2.0;
    let mean_y = values.iter().sum::<f64>() / n;
    let (num, den) = values.iter().enumerate().fold((0.0, 0.0), |(num, den), (i, y)| {
        let dx = i as f64 - mean_x;
        (num + dx * (y - mean_y), den + dx * dx)
    });
    if den == 0.0 {
        0.0
    } else {
        num / den
    }
}

/// `(best - avg) / best`, clamped to `[0, 1]`; 0 when best is not positive.
fn diversity_index(metrics: &EvolutionMetrics) -> f64 {
    if metrics.best_fitness <= 0.0 {
        return 0.0;
    }
    ((metrics.best_fitness - metrics.average_fitness) / metrics.best_fitness).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(generation: u64, best: f64, average: f64) -> EvolutionMetrics {
        EvolutionMetrics {
            generation,
            best_fitness: best,
            average_fitness: average,
            best_memory_kb: 50.0,
            best_latency_us: 90.0,
            safety_score: 1.0,
            mutation_rate: 0.1,
            accepted_offspring: 10,
            rejected_offspring: 0,
            recorded_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_insufficient_history_keeps_base() {
        let mut controller = RateController::new(RateConfig::default());
        assert_eq!(controller.calculate_adaptive_rate(&[]), 0.1);
        assert_eq!(controller.log()[0].reason, AdjustmentReason::InsufficientHistory);
    }

    #[test]
    fn test_stagnation_raises_rate_within_bounds() {
        let mut controller = RateController::new(RateConfig::default());
        let history: Vec<_> = (0..6).map(|g| metrics(g, 0.6, 0.45)).collect();

        let rate = controller.calculate_adaptive_rate(&history);
        assert!(rate > 0.1);
        assert!(rate <= 0.5);

        let entry = controller.log().last().unwrap();
        assert_eq!(entry.reason, AdjustmentReason::Stagnation);
        assert_eq!(entry.stagnation_count, 1);
        assert_eq!(entry.generation, 6);
    }

    #[test]
    fn test_oscillation_within_epsilon_is_stagnation() {
        let mut controller = RateController::new(RateConfig::default());
        let history: Vec<_> = (0..6)
            .map(|g| metrics(g, if g % 2 == 0 { 0.6 } else { 0.6004 }, 0.45))
            .collect();

        let rate = controller.calculate_adaptive_rate(&history);
        assert!(rate > 0.1 && rate <= 0.5);
        assert_eq!(controller.log()[0].reason, AdjustmentReason::Stagnation);

        // a swing wider than epsilon is not stagnation
        let mut controller = RateController::new(RateConfig::default());
        let history: Vec<_> = (0..6)
            .map(|g| metrics(g, if g % 2 == 0 { 0.6 } else { 0.61 }, 0.45))
            .collect();
        controller.calculate_adaptive_rate(&history);
        assert_eq!(controller.log()[0].stagnation_count, 0);
    }

    #[test]
    fn test_rate_clamped_to_max() {
        let mut controller = RateController::new(RateConfig {
            base_rate: 0.4,
            ..Default::default()
        });
        // stagnant and collapsed: 0.4 * 1.5 * 1.2 = 0.72
        let history: Vec<_> = (0..5).map(|g| metrics(g, 0.5, 0.5)).collect();
        assert_eq!(controller.calculate_adaptive_rate(&history), 0.5);
    }

    #[test]
    fn test_rapid_improvement_lowers_rate() {
        let mut controller = RateController::new(RateConfig::default());
        let history: Vec<_> = (0..5)
            .map(|g| metrics(g, 0.2 + 0.1 * g as f64, 0.1 + 0.08 * g as f64))
            .collect();
        let rate = controller.calculate_adaptive_rate(&history);
        assert!(rate < 0.1);
        assert_eq!(controller.log()[0].reason, AdjustmentReason::RapidImprovement);
        assert!((controller.log()[0].fitness_trend - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_declining_fitness_raises_rate() {
        let mut controller = RateController::new(RateConfig::default());
        let history: Vec<_> = (0..5)
            .map(|g| metrics(g, 0.8 - 0.05 * g as f64, 0.5))
            .collect();
        assert!(controller.calculate_adaptive_rate(&history) > 0.1);
        assert_eq!(controller.log()[0].reason, AdjustmentReason::DecliningFitness);
    }

    #[test]
    fn test_schedules() {
        let controller = RateController::new(RateConfig::default());

        let constant = controller.schedule(4, ScheduleKind::Constant);
        assert_eq!(constant, vec![0.1; 4]);

        let linear = controller.schedule(5, ScheduleKind::LinearDecay);
        assert!((linear[0] - 0.1).abs() < 1e-12);
        assert!((linear[4] - 0.01).abs() < 1e-12);
        assert!(linear.windows(2).all(|w| w[1] < w[0]));

        let exponential = controller.schedule(5, ScheduleKind::ExponentialDecay);
        assert!((exponential[4] - 0.01).abs() < 1e-12);
        assert!(exponential[2] < linear[2]);

        assert!(controller.schedule(0, ScheduleKind::LinearDecay).is_empty());
    }
}

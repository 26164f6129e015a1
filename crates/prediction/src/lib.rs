//! Effect prediction - estimates what a mutation will do before it is applied.

#![warn(missing_docs)]

mod predictor;
mod types;

pub use predictor::{EffectPredictor, PredictorConfig};
pub use types::{
    ConstraintRisk, FitnessPrediction, MultiObjectiveImpact, MutationKind, MutationOutcome,
    MutationSpec, MutationType, PredictionStrategy, ResourceLimits,
};

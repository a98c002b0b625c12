//! Parallel inference: rule registry and fixpoint engine

mod engine;
mod rules;

pub use engine::{EngineStats, InferenceEngine};
pub use rules::{
    default_rules, AbductionRule, DeductionRule, InductionRule, InferenceRule, RuleContext,
};

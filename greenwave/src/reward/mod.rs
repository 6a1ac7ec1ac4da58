// src/reward/mod.rs
//
// Reward computation for policy outputs: format classification,
// counterfactual simulation, weighted composition and batch scoring.

pub mod chain;
pub mod counterfactual;
pub mod format;
pub mod pool;

use thiserror::Error;

pub use chain::{BatchStats, RewardBreakdown, RewardChain};
pub use counterfactual::{
    normalize, relative_reward, BaselineRun, CounterfactualEvaluator, EvalTarget, EvaluationResult,
    RelativeEvaluation,
};
pub use format::{classify, DecisionResponse, FormatClass, FormatResult, ANSWER_FIELD};
pub use pool::{score_parallel, EvalTask};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RewardError {
    #[error("batch inputs differ in length: {prompts} prompts, {outputs} outputs, {state_files} state files")]
    LengthMismatch {
        prompts: usize,
        outputs: usize,
        state_files: usize,
    },

    /// Only raised in strict batch mode.
    #[error("simulation failed for sample {index}: {message}")]
    SimulationFailed { index: usize, message: String },

    #[error("invalid reward configuration: {0}")]
    Config(String),
}

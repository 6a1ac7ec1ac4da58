// src/dataset/mod.rs
//
// Dataset generation: decision-point entries, the collection loop that
// produces them, the multi-scenario worker pool and the on-disk writer.

pub mod collector;
pub mod entry;
pub mod pool;
pub mod writer;

use thiserror::Error;

pub use collector::{CollectionOutcome, Collector, ScenarioStatus};
pub use entry::{DataEntry, DecisionRequest, ANSWER_FORMAT, DECISION_REQUEST_SCHEMA};
pub use pool::{generate, ScenarioTask};
pub use writer::{load_dataset, write_generation_outputs, GenerationSummary, ScenarioSummary};

/// Per-scenario dataset file name.
pub const DATASET_FILE: &str = "grpo_dataset.json";
/// Per-scenario snapshot directory name.
pub const STATES_DIR: &str = "states";

#[derive(Debug, Clone, Error)]
pub enum DatasetError {
    #[error("JSON encoding failed: {0}")]
    Json(String),
    #[error("invalid decision request: {0}")]
    InvalidPrompt(String),
    #[error("entry invariant violated: {0}")]
    Invariant(String),
}

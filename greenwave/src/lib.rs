//! Greenwave core library.
//!
//! Generates decision-point training data for traffic-signal control
//! policies by driving a microscopic traffic simulator, and scores policy
//! outputs with a counterfactual, simulation-based reward. The binaries
//! (`src/bin/generate.rs`, `src/bin/score.rs`) are thin harnesses around
//! these components.
//!
//! # Architecture
//!
//! - **Simulation** (`sim`): the `Simulator` / `SimLauncher` seams, a TraCI
//!   client for SUMO, an in-process synthetic backend, and `SimAdapter`,
//!   which turns every simulator failure into a logged benign default.
//!
//! - **Signal programs** (`signal`): green-phase detection, phase order and
//!   per-run randomised green windows.
//!
//! - **Decision points** (`decision`): when a green phase may be extended
//!   or switched.
//!
//! - **Dataset** (`dataset`): the collection loop, entry/prompt types,
//!   multi-scenario worker pool and on-disk outputs.
//!
//! - **Baseline** (`baseline`): max-pressure policy.
//!
//! - **Reward** (`reward`): format scoring, counterfactual evaluation and
//!   the composition chain behind the reward-function contract.
//!
//! - **Telemetry** (`telemetry`): env-controlled JSONL records.

pub mod baseline;
pub mod config;
pub mod dataset;
pub mod decision;
pub mod reward;
pub mod signal;
pub mod sim;
pub mod telemetry;
pub mod types;

// --- Re-exports for ergonomic external use ---------------------------------

pub use config::{Config, ConfigError, SimBackend};

pub use types::{Decision, PhaseIndex, SimTime};

pub use sim::{LaunchSpec, PhaseDef, SimAdapter, SimError, SimLauncher, Simulator};

pub use signal::{GreenTimeCache, GreenTimeRandomization, GreenWindow, Phase, PhaseProgram};

pub use decision::{is_decision_point, DecisionPointDetector};

pub use baseline::{BaselineError, MaxPressure};

pub use dataset::{
    generate, CollectionOutcome, Collector, DataEntry, DatasetError, DecisionRequest,
    GenerationSummary, ScenarioStatus,
};

pub use reward::{
    BatchStats, CounterfactualEvaluator, EvaluationResult, FormatClass, RewardBreakdown,
    RewardChain, RewardError,
};

pub use telemetry::{TelemetryConfig, TelemetrySink};
